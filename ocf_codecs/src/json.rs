use anyhow::{anyhow, bail, Context};
use serde_json::{Map, Value as Json};

use crate::schema::{SchemaNode, ValueSchema};
use crate::value::Value;

impl Value {
    /// Convert a JSON document into a value shaped by `schema`.
    ///
    /// Bytes are written in JSON as arrays of numbers 0..=255.
    pub fn from_json(schema: &ValueSchema, json: &Json) -> anyhow::Result<Value> {
        from_json_node(schema.root(), json)
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Long(n) => Json::from(*n),
            Value::Float(f) => Json::from(f64::from(*f)),
            Value::Double(f) => Json::from(*f),
            Value::Bytes(b) => Json::Array(b.iter().map(|&byte| Json::from(byte)).collect()),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => {
                let mut obj = Map::new();
                for (name, v) in fields {
                    obj.insert(name.clone(), v.to_json());
                }
                Json::Object(obj)
            }
        }
    }
}

fn from_json_node(node: &SchemaNode, json: &Json) -> anyhow::Result<Value> {
    let mismatch = || anyhow!("expected {}, got JSON {}", node.type_name(), json);
    Ok(match node {
        SchemaNode::Null => match json {
            Json::Null => Value::Null,
            _ => return Err(mismatch()),
        },
        SchemaNode::Boolean => Value::Boolean(json.as_bool().ok_or_else(mismatch)?),
        SchemaNode::Int => {
            let n = json.as_i64().ok_or_else(mismatch)?;
            Value::Int(i32::try_from(n).with_context(|| format!("int out of range: {}", n))?)
        }
        SchemaNode::Long => Value::Long(json.as_i64().ok_or_else(mismatch)?),
        SchemaNode::Float => Value::Float(json.as_f64().ok_or_else(mismatch)? as f32),
        SchemaNode::Double => Value::Double(json.as_f64().ok_or_else(mismatch)?),
        SchemaNode::Bytes => {
            let items = json.as_array().ok_or_else(mismatch)?;
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                let byte = item
                    .as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| anyhow!("bytes must hold numbers 0..=255, got {}", item))?;
                bytes.push(byte);
            }
            Value::Bytes(bytes)
        }
        SchemaNode::String => Value::String(json.as_str().ok_or_else(mismatch)?.to_string()),
        SchemaNode::Array(items) => {
            let values = json.as_array().ok_or_else(mismatch)?;
            Value::Array(
                values
                    .iter()
                    .map(|v| from_json_node(items, v))
                    .collect::<anyhow::Result<_>>()?,
            )
        }
        SchemaNode::Record { name, fields } => {
            let obj = json.as_object().ok_or_else(mismatch)?;
            if let Some(extra) = obj.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
                bail!("record {:?} has no field {:?}", name, extra);
            }
            let mut values = Vec::with_capacity(fields.len());
            for field in fields {
                let raw = obj.get(&field.name).unwrap_or(&Json::Null);
                let v = from_json_node(&field.schema, raw)
                    .with_context(|| format!("field {:?} of record {:?}", field.name, name))?;
                values.push((field.name.clone(), v));
            }
            Value::Record(values)
        }
    })
}
