use std::io::Read;

/// A parsed record schema together with its per-record binary primitives.
///
/// The container never looks inside a schema: it only needs to
/// - parse the description stored in a file header,
/// - reproduce a canonical description to store in new headers,
/// - encode one record into a block buffer, and
/// - decode one record out of a block payload.
///
/// Implementations must be deterministic: `canonical_form` of a parsed
/// description must parse back to an equivalent schema.
pub trait Schema: Sized {
    /// In-memory record type produced and consumed by this schema.
    type Record;

    /// Parse a UTF-8 schema description.
    fn parse(description: &str) -> anyhow::Result<Self>;

    /// Canonical string form, written into the header's schema entry.
    fn canonical_form(&self) -> String;

    /// Append the encoding of `record` to `out`.
    ///
    /// On error the caller discards anything appended to `out`.
    fn encode(&self, record: &Self::Record, out: &mut Vec<u8>) -> anyhow::Result<()>;

    /// Decode one record from `src` into `target`.
    fn decode<R: Read + ?Sized>(&self, src: &mut R, target: &mut Self::Record) -> anyhow::Result<()>;
}
