//! Minimal schema for exercising the block machinery in unit tests.

use std::io::Read;

use crate::schema::Schema;
use crate::varint;

/// Records are UTF-8 lines; any line containing a newline is rejected on
/// encode after its prefix has already been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LineSchema;

impl Schema for LineSchema {
    type Record = String;

    fn parse(description: &str) -> anyhow::Result<Self> {
        if description == "line" {
            Ok(LineSchema)
        } else {
            anyhow::bail!("unknown schema {:?}", description)
        }
    }

    fn canonical_form(&self) -> String {
        "line".to_string()
    }

    fn encode(&self, record: &String, out: &mut Vec<u8>) -> anyhow::Result<()> {
        varint::encode_long(record.len() as i64, out);
        if record.contains('\n') {
            anyhow::bail!("line contains a newline");
        }
        out.extend_from_slice(record.as_bytes());
        Ok(())
    }

    fn decode<R: Read + ?Sized>(&self, src: &mut R, target: &mut String) -> anyhow::Result<()> {
        *target = varint::read_string(src)?;
        Ok(())
    }
}
