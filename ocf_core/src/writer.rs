use std::io::Write;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, trace, warn};

use crate::error::{ContainerError, Result};
use crate::format::{Header, SyncMarker, DEFAULT_BLOCK_LENGTH};
use crate::schema::Schema;
use crate::varint;

/// Encoder-side tunables.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Records per block before an automatic flush. Must be at least 1.
    pub block_length: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            block_length: DEFAULT_BLOCK_LENGTH,
        }
    }
}

impl EncoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_length == 0 {
            return Err(ContainerError::Config(
                "block_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Accumulates encoded records and writes them out as sync-marked blocks.
///
/// # Block layout written
/// ```text
/// count: varint | length: varint | payload[length] | sync[16]
/// ```
/// A block is written as soon as `block_length` records are pending, and
/// on [`flush_pending`](BlockWriter::flush_pending) for whatever is left.
/// The underlying stream is flushed after every block.
///
/// A failed block write poisons the writer: the stream may already hold
/// part of the frame, so every later `append` or `flush_pending` returns
/// [`ContainerError::Poisoned`] instead of writing the block again.
pub struct BlockWriter<W> {
    inner: W,
    sync: SyncMarker,
    block_length: usize,
    /// Encoded records not yet written as a block.
    pending: Vec<u8>,
    count: usize,
    blocks_written: u64,
    poisoned: bool,
}

impl<W: Write> BlockWriter<W> {
    /// Wrap a stream that already holds a header carrying `sync`.
    pub fn new(inner: W, sync: SyncMarker, block_length: usize) -> Result<Self> {
        EncoderConfig { block_length }.validate()?;
        Ok(Self {
            inner,
            sync,
            block_length,
            pending: Vec::new(),
            count: 0,
            blocks_written: 0,
            poisoned: false,
        })
    }

    /// Append one record by letting `encode` write it into the block buffer.
    ///
    /// If `encode` fails, whatever it wrote is dropped and the buffer is left
    /// exactly as before. Writes a block once `block_length` records are pending.
    pub fn append<F>(&mut self, encode: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<u8>) -> anyhow::Result<()>,
    {
        if self.poisoned {
            return Err(ContainerError::Poisoned);
        }
        let mark = self.pending.len();
        if let Err(err) = encode(&mut self.pending) {
            self.pending.truncate(mark);
            return Err(ContainerError::Record(err));
        }
        self.count += 1;
        if self.count >= self.block_length {
            self.write_block()?;
        }
        Ok(())
    }

    /// Write the pending records as a final, possibly short, block.
    ///
    /// No-op when nothing is pending.
    pub fn flush_pending(&mut self) -> Result<()> {
        if self.poisoned {
            return Err(ContainerError::Poisoned);
        }
        if self.count == 0 {
            return Ok(());
        }
        self.write_block()
    }

    fn write_block(&mut self) -> Result<()> {
        if let Err(err) = self.write_frame() {
            self.poisoned = true;
            warn!(error = %err, "block write failed, writer poisoned");
            return Err(err.into());
        }

        self.blocks_written += 1;
        trace!(
            block = self.blocks_written,
            records = self.count,
            bytes = self.pending.len(),
            "wrote block"
        );

        self.count = 0;
        self.pending.clear();
        Ok(())
    }

    fn write_frame(&mut self) -> std::io::Result<()> {
        varint::write_long(&mut self.inner, self.count as i64)?;
        varint::write_long(&mut self.inner, self.pending.len() as i64)?;
        self.inner.write_all(&self.pending)?;
        self.inner.write_all(&self.sync)?;
        self.inner.flush()
    }

    /// Whether an earlier block write failed.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Records buffered but not yet written.
    pub fn pending(&self) -> usize {
        self.count
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    pub fn sync(&self) -> &SyncMarker {
        &self.sync
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the writer and return the stream. Pending records are dropped.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Push-style record sink producing a container stream.
///
/// # Write contract
/// Construction writes the header. Call [`encode`](Encoder::encode) any
/// number of times, then [`close`](Encoder::close) (or
/// [`finish`](Encoder::finish)) on every exit path: records still pending
/// in a partial block are only written by closing.
///
/// The stream is never closed by the encoder, only written and flushed.
///
/// If writing a block fails, the encoder is poisoned: the error is returned
/// once, and every later `encode`, `close` or `finish` returns
/// [`ContainerError::Poisoned`] without touching the stream. A record
/// encode failure does not poison the encoder.
pub struct Encoder<W, S> {
    schema: S,
    blocks: BlockWriter<W>,
}

impl<W: Write, S: Schema> Encoder<W, S> {
    /// Create an encoder with the default config and an OS-seeded sync marker.
    pub fn new(schema: S, inner: W) -> Result<Self> {
        Self::with_config(schema, inner, EncoderConfig::default())
    }

    pub fn with_config(schema: S, inner: W, config: EncoderConfig) -> Result<Self> {
        Self::with_rng(schema, inner, config, &mut OsRng)
    }

    /// Create an encoder drawing the 16-byte sync marker from `rng`.
    ///
    /// Tests can pass a seeded RNG to get byte-identical output.
    pub fn with_rng<G: RngCore + ?Sized>(
        schema: S,
        mut inner: W,
        config: EncoderConfig,
        rng: &mut G,
    ) -> Result<Self> {
        config.validate()?;

        let header = Header::generate(&schema.canonical_form(), rng);
        header.write_to(&mut inner)?;
        inner.flush()?;
        debug!(block_length = config.block_length, "container header written");

        let blocks = BlockWriter::new(inner, header.sync, config.block_length)?;
        Ok(Self { schema, blocks })
    }

    /// Encode `record` into the current block.
    ///
    /// A record encode failure is returned as [`ContainerError::Record`]
    /// and leaves the block exactly as it was.
    pub fn encode(&mut self, record: &S::Record) -> Result<()> {
        let schema = &self.schema;
        self.blocks.append(|buf| schema.encode(record, buf))
    }

    /// Write any pending records as a final block.
    ///
    /// Safe to call repeatedly; does nothing when nothing is pending.
    pub fn close(&mut self) -> Result<()> {
        self.blocks.flush_pending()
    }

    /// Close the encoder and hand back the stream.
    pub fn finish(mut self) -> Result<W> {
        self.close()?;
        debug!(blocks = self.blocks.blocks_written(), "container stream finished");
        Ok(self.blocks.into_inner())
    }

    pub fn pending(&self) -> usize {
        self.blocks.pending()
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks.blocks_written()
    }

    pub fn is_poisoned(&self) -> bool {
        self.blocks.is_poisoned()
    }

    pub fn sync(&self) -> &SyncMarker {
        self.blocks.sync()
    }

    pub fn schema(&self) -> &S {
        &self.schema
    }

    pub fn get_ref(&self) -> &W {
        self.blocks.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut W {
        self.blocks.get_mut()
    }
}
