use std::io;

/// Errors raised while reading or writing a container stream.
///
/// Clean end-of-stream is never an error: readers report it as "no more
/// blocks" and leave [`crate::Decoder::error`] empty.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Bad magic, malformed header framing, or an unusable block frame.
    #[error("invalid container file: {0}")]
    Format(String),

    /// The embedded schema is missing or the schema parser rejected it.
    #[error("schema error: {0}")]
    Schema(String),

    /// A block's trailing sync marker does not match the header's.
    #[error("invalid block: sync marker mismatch")]
    BlockSync,

    /// `decode` was called without a preceding successful `has_next`.
    #[error("no data found, call has_next first")]
    NoData,

    /// A block declares a payload larger than the configured maximum.
    #[error("block payload too large ({size} bytes, max {max})")]
    BlockTooLarge { size: u64, max: usize },

    /// Encoder or decoder configuration is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An earlier block write failed part way; the stream may hold a torn
    /// frame, so the writer refuses any further output.
    #[error("writer is poisoned by an earlier failed block write")]
    Poisoned,

    /// The per-record encode/decode primitive failed.
    #[error("record codec error: {0:#}")]
    Record(anyhow::Error),

    /// Error from the underlying byte stream.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
