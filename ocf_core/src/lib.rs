pub mod error;
pub mod format;
pub mod reader;
pub mod schema;
pub mod varint;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ContainerError, Result};
pub use format::{Header, SyncMarker, MAGIC, SYNC_SIZE};
pub use reader::{BlockInfo, BlockReader, BlockState, Decoder, DecoderConfig, Records};
pub use schema::Schema;
pub use writer::{BlockWriter, Encoder, EncoderConfig};
