use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use ocf_codecs::{Value, ValueSchema};
use ocf_core::format::{DEFAULT_BLOCK_LENGTH, DEFAULT_MAX_BLOCK_SIZE};
use ocf_core::{
    BlockInfo, BlockReader, ContainerError, Decoder, DecoderConfig, Encoder, EncoderConfig, Header,
    Schema,
};

mod logging;

use logging::LogArgs;

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ocf",
    about = "Object container files: write, read, inspect, and verify sync-marked record blocks",
    version
)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode JSON lines into a container file
    Write {
        /// JSON lines input, one record per line ("-" reads stdin)
        input: PathBuf,
        /// Destination container file ("-" writes stdout)
        output: PathBuf,
        /// Schema description: a path to a JSON file, or inline JSON
        #[arg(short, long)]
        schema: String,
        /// Records per block before a block is written
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_LENGTH)]
        block_length: usize,
    },
    /// Decode a container file to JSON lines
    Cat {
        /// Source container file ("-" reads stdin)
        input: PathBuf,
        /// Destination file ("-" writes stdout)
        #[arg(default_value = "-")]
        output: PathBuf,
        /// Largest block payload to accept, in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_BLOCK_SIZE)]
        max_block_size: usize,
    },
    /// Print header metadata and block statistics
    Inspect {
        /// Container file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Check every block's framing and sync marker without decoding records
    Verify {
        /// Container file to verify
        file: PathBuf,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn is_stdio(path: &Path) -> bool {
    path.to_str() == Some("-")
}

fn open_input(path: &Path) -> anyhow::Result<Box<dyn Read>> {
    if is_stdio(path) {
        return Ok(Box::new(io::stdin()));
    }
    let file = File::open(path).with_context(|| format!("opening input file {:?}", path))?;
    Ok(Box::new(file))
}

fn open_output(path: &Path) -> anyhow::Result<Box<dyn Write>> {
    if is_stdio(path) {
        return Ok(Box::new(BufWriter::new(io::stdout())));
    }
    let file = File::create(path).with_context(|| format!("creating output file {:?}", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

/// `arg` names a schema file if one exists at that path, otherwise it is the
/// schema text itself.
fn load_schema(arg: &str) -> anyhow::Result<ValueSchema> {
    let text = if Path::new(arg).is_file() {
        std::fs::read_to_string(arg).with_context(|| format!("reading schema file {:?}", arg))?
    } else {
        arg.to_string()
    };
    ValueSchema::parse(&text).context("parsing schema")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

/// Header, every block read before the walk stopped, and the error that
/// stopped it (if any).
struct BlockWalk {
    header: Header,
    blocks: Vec<BlockInfo>,
    error: Option<ContainerError>,
}

fn walk_blocks(path: &Path) -> anyhow::Result<BlockWalk> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let mut src = BufReader::new(file);
    let header = Header::read_from(&mut src).with_context(|| format!("reading header of {:?}", path))?;

    let mut reader = BlockReader::new(src, header.sync, DecoderConfig::default());
    let mut blocks = Vec::new();
    let error = loop {
        match reader.next_block() {
            Ok(Some(info)) => blocks.push(info),
            Ok(None) => break None,
            Err(err) => break Some(err),
        }
    };
    Ok(BlockWalk {
        header,
        blocks,
        error,
    })
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn encode_lines<R: BufRead, W: Write>(
    src: R,
    schema: &ValueSchema,
    encoder: &mut Encoder<W, ValueSchema>,
) -> anyhow::Result<u64> {
    let mut records = 0u64;
    for (idx, line) in src.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let json: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", idx + 1))?;
        let value = Value::from_json(schema, &json).with_context(|| format!("line {}", idx + 1))?;
        encoder
            .encode(&value)
            .with_context(|| format!("line {}: encoding record", idx + 1))?;
        records += 1;
    }
    Ok(records)
}

fn run_write(
    input: PathBuf,
    output: PathBuf,
    schema_arg: &str,
    block_length: usize,
) -> anyhow::Result<()> {
    let schema = load_schema(schema_arg)?;
    let src = BufReader::new(open_input(&input)?);
    let dst = open_output(&output)?;

    let t0 = Instant::now();
    let mut encoder = Encoder::with_config(schema.clone(), dst, EncoderConfig { block_length })?;
    debug!(sync = %hex(encoder.sync()), "writing container");

    // Close before surfacing an input error so records already accepted
    // are written as a final block.
    let result = encode_lines(src, &schema, &mut encoder);
    encoder.close()?;
    let records = result?;
    let elapsed = t0.elapsed();

    eprintln!("  schema      : {}", schema.canonical_form());
    eprintln!("  block length: {}", block_length);
    eprintln!("  records     : {}", records);
    eprintln!("  blocks      : {}", encoder.blocks_written());
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    if !is_stdio(&output) {
        let size = std::fs::metadata(&output)?.len();
        eprintln!("  file size   : {}", human_bytes(size));
    }
    Ok(())
}

fn run_cat(input: PathBuf, output: PathBuf, max_block_size: usize) -> anyhow::Result<()> {
    let src = open_input(&input)?;
    let mut dst = open_output(&output)?;

    let mut decoder = Decoder::<_, ValueSchema>::with_config(src, DecoderConfig { max_block_size })
        .with_context(|| format!("reading header of {:?}", input))?;

    let mut count = 0u64;
    for record in decoder.records() {
        let value = record.with_context(|| format!("decoding record {}", count))?;
        serde_json::to_writer(&mut dst, &value.to_json())?;
        dst.write_all(b"\n")?;
        count += 1;
    }
    dst.flush()?;

    if let Some(err) = decoder.error() {
        anyhow::bail!("stream ended with an error after {} records: {}", count, err);
    }
    info!(
        records = count,
        blocks = decoder.blocks().blocks_read(),
        "decoded container"
    );
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let walk = walk_blocks(&file)?;
    let header = &walk.header;
    let file_size = std::fs::metadata(&file)?.len();

    let records: u64 = walk.blocks.iter().map(|b| b.record_count).sum();
    let payload: u64 = walk.blocks.iter().map(|b| b.payload_len as u64).sum();
    let keys: Vec<&str> = header.meta.keys().map(String::as_str).collect();

    println!("=== OCF File: {:?} ===", file);
    println!();
    println!("  magic          : {:02x?}", header.magic);
    println!("  codec          : {}", header.codec()?);
    println!("  sync marker    : {}", hex(&header.sync));
    println!("  metadata keys  : {}", keys.join(", "));
    match header.parse_schema::<ValueSchema>() {
        Ok(schema) => println!("  schema         : {}", schema.canonical_form()),
        Err(err) => println!("  schema         : <{}>", err),
    }
    println!("  block count    : {}", walk.blocks.len());
    println!("  record count   : {}", records);
    println!("  payload bytes  : {}", human_bytes(payload));
    println!("  file on disk   : {}", human_bytes(file_size));

    if show_blocks {
        println!();
        println!("  {:>8}  {:>10}  {:>12}", "block", "records", "payload");
        println!("  {}", "-".repeat(34));
        for (i, b) in walk.blocks.iter().enumerate() {
            println!(
                "  {:>8}  {:>10}  {:>12}",
                i,
                b.record_count,
                human_bytes(b.payload_len as u64)
            );
        }
    }

    if let Some(err) = walk.error {
        println!();
        println!("  stopped after block {}: {}", walk.blocks.len(), err);
        return Err(err.into());
    }
    Ok(())
}

fn run_verify(file: PathBuf) -> anyhow::Result<()> {
    let walk = walk_blocks(&file)?;
    let records: u64 = walk.blocks.iter().map(|b| b.record_count).sum();
    match walk.error {
        None => {
            println!(
                "ok: {} blocks, {} records, sync {}",
                walk.blocks.len(),
                records,
                hex(&walk.header.sync)
            );
            Ok(())
        }
        Some(err) => Err(err).with_context(|| {
            format!(
                "block {} of {:?} is invalid ({} blocks verified)",
                walk.blocks.len() + 1,
                file,
                walk.blocks.len()
            )
        }),
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.log.install();
    match cli.command {
        Commands::Write {
            input,
            output,
            schema,
            block_length,
        } => run_write(input, output, &schema, block_length),
        Commands::Cat {
            input,
            output,
            max_block_size,
        } => run_cat(input, output, max_block_size),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::Verify { file } => run_verify(file),
    }
}
