use std::fmt::Write as _;
use std::io::Read;

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use serde_json::Value as Json;

use crate::binary::{decode_value, encode_value};
use crate::value::Value;

/// One node of a parsed schema tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array(Box<SchemaNode>),
    Record { name: String, fields: Vec<Field> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: SchemaNode,
}

#[derive(Deserialize)]
struct FieldDef {
    name: String,
    #[serde(rename = "type")]
    ty: Json,
}

impl SchemaNode {
    fn primitive(name: &str) -> Option<Self> {
        Some(match name {
            "null" => SchemaNode::Null,
            "boolean" => SchemaNode::Boolean,
            "int" => SchemaNode::Int,
            "long" => SchemaNode::Long,
            "float" => SchemaNode::Float,
            "double" => SchemaNode::Double,
            "bytes" => SchemaNode::Bytes,
            "string" => SchemaNode::String,
            _ => return None,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SchemaNode::Null => "null",
            SchemaNode::Boolean => "boolean",
            SchemaNode::Int => "int",
            SchemaNode::Long => "long",
            SchemaNode::Float => "float",
            SchemaNode::Double => "double",
            SchemaNode::Bytes => "bytes",
            SchemaNode::String => "string",
            SchemaNode::Array(_) => "array",
            SchemaNode::Record { .. } => "record",
        }
    }

    /// Fewest bytes any value of this schema encodes to.
    pub fn min_encoded_len(&self) -> usize {
        match self {
            SchemaNode::Null => 0,
            SchemaNode::Boolean | SchemaNode::Int | SchemaNode::Long => 1,
            SchemaNode::Float => 4,
            SchemaNode::Double => 8,
            SchemaNode::Bytes | SchemaNode::String | SchemaNode::Array(_) => 1,
            SchemaNode::Record { fields, .. } => {
                fields.iter().map(|f| f.schema.min_encoded_len()).sum()
            }
        }
    }

    fn from_json(json: &Json) -> anyhow::Result<Self> {
        match json {
            Json::String(name) => {
                Self::primitive(name).ok_or_else(|| anyhow!("unknown type {:?}", name))
            }
            Json::Object(obj) => {
                let ty = obj
                    .get("type")
                    .and_then(Json::as_str)
                    .ok_or_else(|| anyhow!("missing \"type\" in {}", json))?;
                match ty {
                    "array" => {
                        let items = obj
                            .get("items")
                            .ok_or_else(|| anyhow!("array without \"items\": {}", json))?;
                        Ok(SchemaNode::Array(Box::new(Self::from_json(items)?)))
                    }
                    "record" => Self::record_from_json(obj),
                    other => Self::primitive(other).ok_or_else(|| anyhow!("unknown type {:?}", other)),
                }
            }
            other => bail!("invalid schema fragment {}", other),
        }
    }

    fn record_from_json(obj: &serde_json::Map<String, Json>) -> anyhow::Result<Self> {
        let name = obj
            .get("name")
            .and_then(Json::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| anyhow!("record without a name"))?
            .to_string();
        let raw_fields = obj
            .get("fields")
            .cloned()
            .ok_or_else(|| anyhow!("record {:?} has no \"fields\"", name))?;
        let defs: Vec<FieldDef> = serde_json::from_value(raw_fields)
            .with_context(|| format!("record {:?} has malformed fields", name))?;

        let mut fields: Vec<Field> = Vec::with_capacity(defs.len());
        for def in defs {
            if fields.iter().any(|f| f.name == def.name) {
                bail!("record {:?} repeats field {:?}", name, def.name);
            }
            let schema = Self::from_json(&def.ty)
                .with_context(|| format!("field {:?} of record {:?}", def.name, name))?;
            fields.push(Field {
                name: def.name,
                schema,
            });
        }
        Ok(SchemaNode::Record { name, fields })
    }

    /// Compact JSON with keys in `name`, `type`, `fields`, `items` order.
    fn write_canonical(&self, out: &mut String) {
        match self {
            SchemaNode::Array(items) => {
                out.push_str(r#"{"type":"array","items":"#);
                items.write_canonical(out);
                out.push('}');
            }
            SchemaNode::Record { name, fields } => {
                let _ = write!(out, r#"{{"name":{},"type":"record","fields":["#, Json::from(name.as_str()));
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, r#"{{"name":{},"type":"#, Json::from(field.name.as_str()));
                    field.schema.write_canonical(out);
                    out.push('}');
                }
                out.push_str("]}");
            }
            primitive => {
                out.push('"');
                out.push_str(primitive.type_name());
                out.push('"');
            }
        }
    }
}

/// Schema whose records are dynamic [`Value`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSchema {
    root: SchemaNode,
}

impl ValueSchema {
    pub fn new(root: SchemaNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }
}

impl ocf_core::Schema for ValueSchema {
    type Record = Value;

    fn parse(description: &str) -> anyhow::Result<Self> {
        let json: Json = serde_json::from_str(description).context("schema is not valid JSON")?;
        Ok(Self::new(SchemaNode::from_json(&json)?))
    }

    fn canonical_form(&self) -> String {
        let mut out = String::new();
        self.root.write_canonical(&mut out);
        out
    }

    fn encode(&self, record: &Value, out: &mut Vec<u8>) -> anyhow::Result<()> {
        encode_value(&self.root, record, out)
    }

    fn decode<R: Read + ?Sized>(&self, src: &mut R, target: &mut Value) -> anyhow::Result<()> {
        *target = decode_value(&self.root, src)?;
        Ok(())
    }
}
