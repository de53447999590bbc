//! Binary encoding of [`Value`]s under a [`SchemaNode`].
//!
//! - null: nothing
//! - boolean: one byte, 0 or 1
//! - int, long: zig-zag varint
//! - float, double: little-endian IEEE 754
//! - bytes, string: varint length + bytes
//! - array: blocks of (count, items...) ending with a zero count
//! - record: fields back to back in schema order

use std::io::Read;

use anyhow::{bail, Context};
use ocf_core::varint;

use crate::schema::SchemaNode;
use crate::value::Value;

/// Most items an array may hold when its items encode to zero bytes.
///
/// Such counts cannot be checked against the bytes actually present, so
/// they are capped instead.
pub const MAX_EMPTY_ARRAY_ITEMS: u64 = 1 << 20;

pub(crate) fn encode_value(node: &SchemaNode, value: &Value, out: &mut Vec<u8>) -> anyhow::Result<()> {
    match (node, value) {
        (SchemaNode::Null, Value::Null) => {}
        (SchemaNode::Boolean, Value::Boolean(b)) => out.push(u8::from(*b)),
        (SchemaNode::Int, Value::Int(n)) => varint::encode_long(i64::from(*n), out),
        (SchemaNode::Long, Value::Long(n)) => varint::encode_long(*n, out),
        (SchemaNode::Long, Value::Int(n)) => varint::encode_long(i64::from(*n), out),
        (SchemaNode::Float, Value::Float(f)) => out.extend_from_slice(&f.to_le_bytes()),
        (SchemaNode::Double, Value::Double(f)) => out.extend_from_slice(&f.to_le_bytes()),
        (SchemaNode::Double, Value::Float(f)) => out.extend_from_slice(&f64::from(*f).to_le_bytes()),
        (SchemaNode::Bytes, Value::Bytes(b)) => {
            varint::encode_long(b.len() as i64, out);
            out.extend_from_slice(b);
        }
        (SchemaNode::String, Value::String(s)) => {
            varint::encode_long(s.len() as i64, out);
            out.extend_from_slice(s.as_bytes());
        }
        (SchemaNode::Array(items), Value::Array(values)) => {
            if !values.is_empty() {
                varint::encode_long(values.len() as i64, out);
                for (i, v) in values.iter().enumerate() {
                    encode_value(items, v, out).with_context(|| format!("array item {}", i))?;
                }
            }
            varint::encode_long(0, out);
        }
        (SchemaNode::Record { name, fields }, Value::Record(values)) => {
            if fields.len() != values.len() {
                bail!(
                    "record {:?} has {} fields, value has {}",
                    name,
                    fields.len(),
                    values.len()
                );
            }
            for (field, (value_name, v)) in fields.iter().zip(values) {
                if &field.name != value_name {
                    bail!(
                        "record {:?}: expected field {:?}, found {:?}",
                        name,
                        field.name,
                        value_name
                    );
                }
                encode_value(&field.schema, v, out)
                    .with_context(|| format!("field {:?} of record {:?}", field.name, name))?;
            }
        }
        (node, value) => bail!("expected {}, got {}", node.type_name(), value.type_name()),
    }
    Ok(())
}

pub(crate) fn decode_value<R: Read + ?Sized>(node: &SchemaNode, src: &mut R) -> anyhow::Result<Value> {
    Ok(match node {
        SchemaNode::Null => Value::Null,
        SchemaNode::Boolean => {
            let mut b = [0u8; 1];
            src.read_exact(&mut b)?;
            match b[0] {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                other => bail!("invalid boolean byte {:#04x}", other),
            }
        }
        SchemaNode::Int => {
            let n = varint::read_long(src)?;
            Value::Int(i32::try_from(n).with_context(|| format!("int out of range: {}", n))?)
        }
        SchemaNode::Long => Value::Long(varint::read_long(src)?),
        SchemaNode::Float => {
            let mut b = [0u8; 4];
            src.read_exact(&mut b)?;
            Value::Float(f32::from_le_bytes(b))
        }
        SchemaNode::Double => {
            let mut b = [0u8; 8];
            src.read_exact(&mut b)?;
            Value::Double(f64::from_le_bytes(b))
        }
        SchemaNode::Bytes => Value::Bytes(varint::read_bytes(src)?),
        SchemaNode::String => Value::String(varint::read_string(src)?),
        SchemaNode::Array(items) => {
            let empty_items = items.min_encoded_len() == 0;
            let mut values = Vec::new();
            loop {
                let count = varint::read_long(src)?;
                if count == 0 {
                    break;
                }
                if count < 0 {
                    varint::read_long(src)?;
                }
                let count = count.unsigned_abs();
                if empty_items && values.len() as u64 + count > MAX_EMPTY_ARRAY_ITEMS {
                    bail!(
                        "array of zero-size {} items declares {} more items, limit is {}",
                        items.type_name(),
                        count,
                        MAX_EMPTY_ARRAY_ITEMS
                    );
                }
                // Items of at least one byte each stop at the end of the
                // payload, so the vector never outgrows the bytes present.
                for _ in 0..count {
                    values.push(decode_value(items, src)?);
                }
            }
            Value::Array(values)
        }
        SchemaNode::Record { name, fields } => {
            let mut values = Vec::with_capacity(fields.len());
            for field in fields {
                let v = decode_value(&field.schema, src)
                    .with_context(|| format!("field {:?} of record {:?}", field.name, name))?;
                values.push((field.name.clone(), v));
            }
            Value::Record(values)
        }
    })
}
