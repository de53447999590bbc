use std::collections::BTreeMap;
use std::io::{self, ErrorKind, Read, Write};

use rand::RngCore;

use crate::error::{ContainerError, Result};
use crate::schema::Schema;
use crate::varint;

/// Magic bytes opening every container file: "Obj" followed by version 1.
pub const MAGIC: [u8; 4] = *b"Obj\x01";

/// Size of the per-file sync marker in bytes.
pub const SYNC_SIZE: usize = 16;

/// Metadata key holding the UTF-8 schema description.
pub const SCHEMA_KEY: &str = "avro.schema";

/// Metadata key naming the block codec. Absent means [`NULL_CODEC`].
pub const CODEC_KEY: &str = "avro.codec";

/// The only supported block codec: payloads are stored as raw record bytes.
pub const NULL_CODEC: &str = "null";

/// Records per block before the encoder flushes automatically.
pub const DEFAULT_BLOCK_LENGTH: usize = 100;

/// Largest block payload the decoder will buffer: 64 MiB.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

pub type SyncMarker = [u8; SYNC_SIZE];

/// Decoded container file header.
///
/// Wire layout:
/// ```text
/// magic[4] | meta: map<string, bytes> | sync[16]
/// ```
/// `meta` is written as one block of entries (count, then key/value pairs)
/// terminated by a zero count. In the record schema language this is:
/// ```text
/// {"type": "record", "name": "org.apache.avro.file.Header",
///  "fields": [
///    {"name": "magic", "type": {"type": "fixed", "name": "Magic", "size": 4}},
///    {"name": "meta", "type": {"type": "map", "values": "bytes"}},
///    {"name": "sync", "type": {"type": "fixed", "name": "Sync", "size": 16}}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub meta: BTreeMap<String, Vec<u8>>,
    pub sync: SyncMarker,
}

impl Header {
    /// Header carrying exactly one metadata entry: the schema description.
    pub fn new(schema_description: &str, sync: SyncMarker) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert(SCHEMA_KEY.to_string(), schema_description.as_bytes().to_vec());
        Self {
            magic: MAGIC,
            meta,
            sync,
        }
    }

    /// Build a header whose sync marker is drawn from `rng`.
    pub fn generate<G: RngCore + ?Sized>(schema_description: &str, rng: &mut G) -> Self {
        let mut sync = [0u8; SYNC_SIZE];
        rng.fill_bytes(&mut sync);
        Self::new(schema_description, sync)
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        varint::write_fixed(w, &self.magic)?;
        if !self.meta.is_empty() {
            varint::write_long(w, self.meta.len() as i64)?;
            for (key, value) in &self.meta {
                varint::write_string(w, key)?;
                varint::write_bytes(w, value)?;
            }
        }
        varint::write_long(w, 0)?;
        varint::write_fixed(w, &self.sync)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    /// Read and validate a header, consuming exactly its bytes from `r`.
    ///
    /// Fails with [`ContainerError::Format`] on a bad magic or malformed
    /// framing. The schema entry is not checked here; see
    /// [`Header::parse_schema`].
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self> {
        let magic: [u8; 4] = varint::read_fixed(r).map_err(header_io_error)?;
        if magic != MAGIC {
            return Err(ContainerError::Format(format!(
                "bad magic {:02x?}, expected {:02x?}",
                magic, MAGIC
            )));
        }

        let meta = read_meta(r).map_err(header_io_error)?;

        let sync: SyncMarker = varint::read_fixed(r).map_err(header_io_error)?;

        Ok(Self { magic, meta, sync })
    }

    /// The embedded schema description, as stored.
    pub fn schema_description(&self) -> Result<&str> {
        let raw = self
            .meta
            .get(SCHEMA_KEY)
            .ok_or_else(|| ContainerError::Schema(format!("header has no {:?} entry", SCHEMA_KEY)))?;
        std::str::from_utf8(raw)
            .map_err(|e| ContainerError::Schema(format!("schema description is not UTF-8: {}", e)))
    }

    /// Parse the embedded schema description with `S`'s parser.
    pub fn parse_schema<S: Schema>(&self) -> Result<S> {
        let description = self.schema_description()?;
        S::parse(description).map_err(|e| ContainerError::Schema(format!("{:#}", e)))
    }

    /// Block codec named in the metadata, defaulting to [`NULL_CODEC`].
    pub fn codec(&self) -> Result<&str> {
        match self.meta.get(CODEC_KEY) {
            None => Ok(NULL_CODEC),
            Some(raw) => std::str::from_utf8(raw)
                .map_err(|_| ContainerError::Format("codec name is not UTF-8".to_string())),
        }
    }
}

fn read_meta<R: Read + ?Sized>(r: &mut R) -> io::Result<BTreeMap<String, Vec<u8>>> {
    let mut meta = BTreeMap::new();
    loop {
        let count = varint::read_long(r)?;
        if count == 0 {
            break;
        }
        if count < 0 {
            // Negative counts are followed by the block's size in bytes.
            varint::read_long(r)?;
        }
        for _ in 0..count.unsigned_abs() {
            let key = varint::read_string(r)?;
            let value = varint::read_bytes(r)?;
            meta.insert(key, value);
        }
    }
    Ok(meta)
}

fn header_io_error(err: io::Error) -> ContainerError {
    match err.kind() {
        ErrorKind::UnexpectedEof => ContainerError::Format("truncated header".to_string()),
        ErrorKind::InvalidData => ContainerError::Format(format!("malformed header: {}", err)),
        _ => ContainerError::Io(err),
    }
}
