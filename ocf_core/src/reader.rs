use std::io::{BufRead, BufReader, Cursor, Read};

use tracing::{debug, trace, warn};

use crate::error::{ContainerError, Result};
use crate::format::{Header, SyncMarker, DEFAULT_MAX_BLOCK_SIZE, NULL_CODEC, SYNC_SIZE};
use crate::schema::Schema;
use crate::varint;

/// Decoder-side limits.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Largest block payload, in bytes, that will be buffered. Default: 64 MiB.
    pub max_block_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}

/// Framing of one block, as read from the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub record_count: u64,
    pub payload_len: usize,
}

/// Where a [`BlockReader`] stands between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// No undecoded records buffered; the next `has_next` reads a block.
    AwaitingBlock,
    /// Records of the current block are still waiting to be decoded.
    InBlock,
    /// The stream ended cleanly at a block boundary.
    Exhausted,
    /// A terminal error stopped the reader.
    Failed,
}

/// Cursor over the blocks of a container stream, positioned after the header.
///
/// Block layout:
/// ```text
/// count: varint | length: varint | payload[length] | sync[16]
/// ```
///
/// [`has_next`](BlockReader::has_next) does all the stream I/O: it pulls a
/// whole block into an owned payload buffer and checks its trailing sync
/// marker. Records are then decoded from that buffer without touching the
/// stream again.
pub struct BlockReader<R> {
    inner: R,
    sync: SyncMarker,
    config: DecoderConfig,
    /// Reused across blocks; every block overwrites it completely.
    payload: Cursor<Vec<u8>>,
    remaining: u64,
    state: BlockState,
    error: Option<ContainerError>,
    blocks_read: u64,
}

impl<R: BufRead> BlockReader<R> {
    /// Wrap a stream already positioned after a header carrying `sync`.
    pub fn new(inner: R, sync: SyncMarker, config: DecoderConfig) -> Self {
        Self {
            inner,
            sync,
            config,
            payload: Cursor::new(Vec::new()),
            remaining: 0,
            state: BlockState::AwaitingBlock,
            error: None,
            blocks_read: 0,
        }
    }

    /// Whether another record is ready to decode, reading the next block
    /// from the stream if the current one is used up.
    ///
    /// Returns `false` at a clean end of stream (with [`error`](Self::error)
    /// empty) and after any terminal error (with the error kept).
    pub fn has_next(&mut self) -> bool {
        match self.state {
            BlockState::Exhausted | BlockState::Failed => return false,
            BlockState::InBlock if self.remaining > 0 => return true,
            _ => {}
        }
        match self.next_block() {
            Ok(Some(info)) => info.record_count > 0,
            Ok(None) => false,
            Err(err) => {
                self.error = Some(err);
                false
            }
        }
    }

    /// Read the next block, discarding any undecoded records of the current one.
    ///
    /// Returns `Ok(None)` once the stream has ended cleanly or the reader has
    /// failed. Errors are returned to the caller and move the reader to
    /// [`BlockState::Failed`]; they are not stored in [`error`](Self::error).
    pub fn next_block(&mut self) -> Result<Option<BlockInfo>> {
        if matches!(self.state, BlockState::Exhausted | BlockState::Failed) {
            return Ok(None);
        }
        match self.read_block() {
            Ok(Some(info)) => {
                self.remaining = info.record_count;
                self.state = if info.record_count > 0 {
                    BlockState::InBlock
                } else {
                    BlockState::AwaitingBlock
                };
                self.blocks_read += 1;
                trace!(
                    block = self.blocks_read,
                    records = info.record_count,
                    bytes = info.payload_len,
                    "read block"
                );
                Ok(Some(info))
            }
            Ok(None) => {
                debug!(blocks = self.blocks_read, "end of container stream");
                self.remaining = 0;
                self.state = BlockState::Exhausted;
                Ok(None)
            }
            Err(err) => {
                debug!(blocks = self.blocks_read, error = %err, "block read failed");
                self.remaining = 0;
                self.state = BlockState::Failed;
                Err(err)
            }
        }
    }

    fn read_block(&mut self) -> Result<Option<BlockInfo>> {
        let count = match varint::read_long_or_eof(&mut self.inner)? {
            Some(count) => count,
            None => return Ok(None),
        };
        let len = varint::read_long(&mut self.inner)?;
        if count < 0 || len < 0 {
            return Err(ContainerError::Format(format!(
                "negative block framing (count {}, length {})",
                count, len
            )));
        }
        if len as u64 > self.config.max_block_size as u64 {
            return Err(ContainerError::BlockTooLarge {
                size: len as u64,
                max: self.config.max_block_size,
            });
        }

        let len = len as usize;
        let buf = self.payload.get_mut();
        buf.clear();
        buf.resize(len, 0);
        self.inner.read_exact(buf)?;
        self.payload.set_position(0);

        let mut sync = [0u8; SYNC_SIZE];
        let filled = varint::read_full(&mut self.inner, &mut sync)?;
        if sync != self.sync {
            let at_end = filled < SYNC_SIZE || self.inner.fill_buf()?.is_empty();
            if !at_end {
                return Err(ContainerError::BlockSync);
            }
            // TODO: decide whether a bad marker on the final block should be
            // rejected too; it is accepted for now so truncated tails still decode.
            warn!(
                block = self.blocks_read + 1,
                sync_bytes = filled,
                "sync marker mismatch at end of stream, accepting final block"
            );
        }

        Ok(Some(BlockInfo {
            record_count: count as u64,
            payload_len: len,
        }))
    }

    /// Payload of the current block, positioned at the next undecoded record.
    ///
    /// Fails with [`ContainerError::NoData`] when no record is pending.
    pub fn record_source(&mut self) -> Result<&mut Cursor<Vec<u8>>> {
        if self.remaining == 0 {
            return Err(ContainerError::NoData);
        }
        Ok(&mut self.payload)
    }

    /// Mark one record of the current block as decoded.
    pub fn record_consumed(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 && self.state == BlockState::InBlock {
            self.state = BlockState::AwaitingBlock;
        }
    }

    /// Records of the current block not yet decoded.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Terminal error recorded by [`has_next`](Self::has_next), if any.
    pub fn error(&self) -> Option<&ContainerError> {
        self.error.as_ref()
    }

    /// Blocks read so far.
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    pub fn sync(&self) -> &SyncMarker {
        &self.sync
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

/// Pull-style record stream over a container file.
///
/// Construction reads and validates the header; afterwards drive it with
/// ```text
/// while decoder.has_next() { decoder.decode(&mut record)?; }
/// ```
/// and check [`error`](Decoder::error) to tell corruption from a clean end.
pub struct Decoder<R, S> {
    header: Header,
    schema: S,
    blocks: BlockReader<BufReader<R>>,
}

impl<R: Read, S: Schema> Decoder<R, S> {
    pub fn new(inner: R) -> Result<Self> {
        Self::with_config(inner, DecoderConfig::default())
    }

    /// Read the header from `inner` and parse its schema with `S`.
    ///
    /// Fails with `Format` on a bad magic, malformed header, or a block codec
    /// other than `null`, and with `Schema` when the schema entry is missing
    /// or rejected by the parser.
    pub fn with_config(inner: R, config: DecoderConfig) -> Result<Self> {
        let mut inner = BufReader::new(inner);
        let header = Header::read_from(&mut inner)?;

        let codec = header.codec()?;
        if codec != NULL_CODEC {
            return Err(ContainerError::Format(format!(
                "unsupported block codec {:?}",
                codec
            )));
        }

        let schema = header.parse_schema::<S>()?;
        debug!(
            meta_keys = header.meta.len(),
            max_block_size = config.max_block_size,
            "container header read"
        );

        let blocks = BlockReader::new(inner, header.sync, config);
        Ok(Self {
            header,
            schema,
            blocks,
        })
    }

    /// See [`BlockReader::has_next`].
    pub fn has_next(&mut self) -> bool {
        self.blocks.has_next()
    }

    /// Decode the next record into `target`.
    ///
    /// Never touches the stream. A record decode failure is returned as
    /// [`ContainerError::Record`] and the record is not counted as consumed.
    pub fn decode(&mut self, target: &mut S::Record) -> Result<()> {
        let src = self.blocks.record_source()?;
        self.schema
            .decode(src, target)
            .map_err(ContainerError::Record)?;
        self.blocks.record_consumed();
        Ok(())
    }

    /// Last stream error, or `None` if the stream ended cleanly (or has not ended).
    pub fn error(&self) -> Option<&ContainerError> {
        self.blocks.error()
    }

    /// Iterate over the remaining records.
    ///
    /// The iterator ends at the end of the stream, so check
    /// [`error`](Decoder::error) afterwards. It also stops after yielding
    /// a record decode error.
    pub fn records(&mut self) -> Records<'_, R, S>
    where
        S::Record: Default,
    {
        Records {
            decoder: self,
            done: false,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.header.meta.get(key).map(Vec::as_slice)
    }

    pub fn sync(&self) -> &SyncMarker {
        &self.header.sync
    }

    pub fn blocks(&self) -> &BlockReader<BufReader<R>> {
        &self.blocks
    }
}

/// Iterator returned by [`Decoder::records`].
pub struct Records<'a, R, S> {
    decoder: &'a mut Decoder<R, S>,
    done: bool,
}

impl<R: Read, S: Schema> Iterator for Records<'_, R, S>
where
    S::Record: Default,
{
    type Item = Result<S::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || !self.decoder.has_next() {
            self.done = true;
            return None;
        }
        let mut record = S::Record::default();
        match self.decoder.decode(&mut record) {
            Ok(()) => Some(Ok(record)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::MAGIC;
    use crate::testing::LineSchema;

    const SYNC: SyncMarker = [0xA5; SYNC_SIZE];

    fn block(records: &[&str], sync: &SyncMarker) -> Vec<u8> {
        let mut payload = Vec::new();
        for r in records {
            varint::write_string(&mut payload, r).unwrap();
        }
        let mut out = Vec::new();
        varint::write_long(&mut out, records.len() as i64).unwrap();
        varint::write_bytes(&mut out, &payload).unwrap();
        out.extend_from_slice(sync);
        out
    }

    fn stream(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Header::new("line", SYNC).to_bytes();
        for b in blocks {
            out.extend_from_slice(b);
        }
        out
    }

    fn drain(decoder: &mut Decoder<&[u8], LineSchema>) -> Vec<String> {
        let mut out = Vec::new();
        let mut line = String::new();
        while decoder.has_next() {
            decoder.decode(&mut line).unwrap();
            out.push(line.clone());
        }
        out
    }

    #[test]
    fn reads_records_across_blocks() {
        let bytes = stream(&[block(&["a", "b"], &SYNC), block(&["c"], &SYNC)]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert_eq!(drain(&mut decoder), vec!["a", "b", "c"]);
        assert!(decoder.error().is_none());
        assert_eq!(decoder.blocks().state(), BlockState::Exhausted);
        assert_eq!(decoder.blocks().blocks_read(), 2);
    }

    #[test]
    fn state_transitions() {
        let bytes = stream(&[block(&["a"], &SYNC)]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();
        assert_eq!(decoder.blocks().state(), BlockState::AwaitingBlock);

        assert!(decoder.has_next());
        assert_eq!(decoder.blocks().state(), BlockState::InBlock);
        assert_eq!(decoder.blocks().remaining(), 1);

        let mut line = String::new();
        decoder.decode(&mut line).unwrap();
        assert_eq!(decoder.blocks().state(), BlockState::AwaitingBlock);

        assert!(!decoder.has_next());
        assert_eq!(decoder.blocks().state(), BlockState::Exhausted);
        assert!(!decoder.has_next());
    }

    #[test]
    fn decode_without_has_next() {
        let bytes = stream(&[block(&["a"], &SYNC)]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();
        let mut line = String::new();
        let err = decoder.decode(&mut line).unwrap_err();
        assert!(matches!(err, ContainerError::NoData));
        // Not terminal: the stream is still readable.
        assert!(decoder.error().is_none());
        assert!(decoder.has_next());
    }

    #[test]
    fn sync_mismatch_mid_stream_is_terminal() {
        let bytes = stream(&[
            block(&["a"], &[0u8; SYNC_SIZE]),
            block(&["b"], &SYNC),
        ]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert!(!decoder.has_next());
        assert!(matches!(decoder.error(), Some(ContainerError::BlockSync)));
        assert_eq!(decoder.blocks().state(), BlockState::Failed);
        assert!(!decoder.has_next());
    }

    #[test]
    fn sync_mismatch_on_final_block_is_tolerated() {
        let bytes = stream(&[block(&["a"], &SYNC), block(&["b"], &[0u8; SYNC_SIZE])]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert_eq!(drain(&mut decoder), vec!["a", "b"]);
        assert!(decoder.error().is_none());
    }

    #[test]
    fn truncated_trailing_sync_is_tolerated() {
        let mut bytes = stream(&[block(&["a"], &SYNC)]);
        bytes.truncate(bytes.len() - 5);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert_eq!(drain(&mut decoder), vec!["a"]);
        assert!(decoder.error().is_none());
    }

    #[test]
    fn truncated_payload_is_transport_error() {
        let mut bytes = stream(&[block(&["hello world"], &SYNC)]);
        bytes.truncate(bytes.len() - SYNC_SIZE - 3);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert!(!decoder.has_next());
        assert!(matches!(decoder.error(), Some(ContainerError::Io(_))));
    }

    #[test]
    fn oversized_block_rejected() {
        let bytes = stream(&[block(&["0123456789"], &SYNC)]);
        let config = DecoderConfig { max_block_size: 4 };
        let mut decoder = Decoder::<_, LineSchema>::with_config(bytes.as_slice(), config).unwrap();

        assert!(!decoder.has_next());
        assert!(matches!(
            decoder.error(),
            Some(ContainerError::BlockTooLarge { max: 4, .. })
        ));
    }

    #[test]
    fn negative_count_is_format_error() {
        let mut raw = Vec::new();
        varint::write_long(&mut raw, -1).unwrap();
        varint::write_long(&mut raw, 0).unwrap();
        raw.extend_from_slice(&SYNC);
        let bytes = stream(&[raw]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert!(!decoder.has_next());
        assert!(matches!(decoder.error(), Some(ContainerError::Format(_))));
    }

    #[test]
    fn empty_block_reports_no_records() {
        let bytes = stream(&[block(&[], &SYNC), block(&["x"], &SYNC)]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert!(!decoder.has_next());
        assert!(decoder.error().is_none());
        // The zero-count block left the reader awaiting the next block.
        assert!(decoder.has_next());
    }

    #[test]
    fn record_error_does_not_consume() {
        let mut raw = Vec::new();
        varint::write_long(&mut raw, 1).unwrap();
        varint::write_bytes(&mut raw, &[0x08, b'a']).unwrap(); // claims 4 bytes, has 1
        raw.extend_from_slice(&SYNC);
        let bytes = stream(&[raw]);
        let mut decoder = Decoder::<_, LineSchema>::new(bytes.as_slice()).unwrap();

        assert!(decoder.has_next());
        let mut line = String::new();
        let err = decoder.decode(&mut line).unwrap_err();
        assert!(matches!(err, ContainerError::Record(_)));
        assert_eq!(decoder.blocks().remaining(), 1);
        assert!(decoder.error().is_none());
        assert!(decoder.has_next());
    }

    #[test]
    fn rejects_non_null_codec() {
        let mut header = Header::new("line", SYNC);
        header
            .meta
            .insert(crate::format::CODEC_KEY.to_string(), b"deflate".to_vec());
        let bytes = header.to_bytes();
        let err = Decoder::<_, LineSchema>::new(bytes.as_slice()).err().unwrap();
        assert!(matches!(err, ContainerError::Format(_)), "got {err:?}");
    }

    #[test]
    fn block_reader_walks_framing() {
        let bytes = stream(&[block(&["a", "b"], &SYNC), block(&["c"], &SYNC)]);
        let mut src = bytes.as_slice();
        let header = Header::read_from(&mut src).unwrap();
        assert_eq!(header.magic, MAGIC);

        let mut blocks = BlockReader::new(src, header.sync, DecoderConfig::default());
        let first = blocks.next_block().unwrap().unwrap();
        assert_eq!(first.record_count, 2);
        assert_eq!(first.payload_len, 4);
        let second = blocks.next_block().unwrap().unwrap();
        assert_eq!(second.record_count, 1);
        assert!(blocks.next_block().unwrap().is_none());
        assert_eq!(blocks.state(), BlockState::Exhausted);
    }
}
