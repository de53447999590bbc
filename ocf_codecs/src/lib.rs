//! A small JSON schema language and its binary record encoding, bundled so
//! container files can be written and read end-to-end.

mod binary;
mod json;
mod schema;
mod value;

pub use schema::{Field, SchemaNode, ValueSchema};
pub use value::Value;
