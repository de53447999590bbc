/// Integration tests: write container streams with the bundled value
/// schema, read them back, and check block framing, sync-marker
/// corruption detection, and header validation.
use ocf_codecs::{Value, ValueSchema};
use ocf_core::format::SCHEMA_KEY;
use ocf_core::{
    BlockReader, ContainerError, Decoder, DecoderConfig, Encoder, EncoderConfig, Header, Schema,
    SYNC_SIZE,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const EVENT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Event",
    "fields": [
        {"name": "seq", "type": "long"},
        {"name": "label", "type": "string"},
        {"name": "ok", "type": "boolean"}
    ]
}"#;

// ── helpers ───────────────────────────────────────────────────────────────

fn schema() -> ValueSchema {
    ValueSchema::parse(EVENT_SCHEMA).unwrap()
}

fn event(seq: i64) -> Value {
    Value::Record(vec![
        ("seq".to_string(), Value::Long(seq)),
        ("label".to_string(), Value::String(format!("event-{}", seq))),
        ("ok".to_string(), Value::Boolean(seq % 2 == 0)),
    ])
}

fn encode_events(n: i64, block_length: usize, seed: u64) -> Vec<u8> {
    let mut enc = Encoder::with_rng(
        schema(),
        Vec::new(),
        EncoderConfig { block_length },
        &mut StdRng::seed_from_u64(seed),
    )
    .unwrap();
    for seq in 0..n {
        enc.encode(&event(seq)).unwrap();
    }
    enc.finish().unwrap()
}

fn decode_all(bytes: &[u8]) -> (Vec<Value>, Option<String>) {
    let mut dec = Decoder::<_, ValueSchema>::new(bytes).unwrap();
    let mut out = Vec::new();
    let mut value = Value::Null;
    while dec.has_next() {
        dec.decode(&mut value).unwrap();
        out.push(value.clone());
    }
    (out, dec.error().map(|e| e.to_string()))
}

/// Record counts of every block, in order.
fn block_sizes(bytes: &[u8]) -> Vec<u64> {
    let mut src = bytes;
    let header = Header::read_from(&mut src).unwrap();
    let mut blocks = BlockReader::new(src, header.sync, DecoderConfig::default());
    let mut sizes = Vec::new();
    while let Some(info) = blocks.next_block().unwrap() {
        sizes.push(info.record_count);
    }
    sizes
}

fn header_len(bytes: &[u8]) -> usize {
    let mut src = bytes;
    Header::read_from(&mut src).unwrap();
    bytes.len() - src.len()
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("ocf_test_{}_{}.ocf", name, std::process::id()))
}

// ── tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_roundtrip_various_block_lengths() {
    for block_length in [1, 3, 100, 1000] {
        for n in [0, 1, 7, 250] {
            let bytes = encode_events(n, block_length, 1);
            let (decoded, err) = decode_all(&bytes);
            let expected: Vec<Value> = (0..n).map(event).collect();
            assert_eq!(decoded, expected, "n={n} block_length={block_length}");
            assert!(err.is_none(), "unexpected error {err:?}");
        }
    }
}

#[test]
fn test_250_records_in_blocks_of_100() {
    let bytes = encode_events(250, 100, 2);
    assert_eq!(block_sizes(&bytes), vec![100, 100, 50]);

    let mut dec = Decoder::<_, ValueSchema>::new(bytes.as_slice()).unwrap();
    let mut value = Value::Null;
    let mut trues = 0;
    while dec.has_next() {
        trues += 1;
        dec.decode(&mut value).unwrap();
    }
    assert_eq!(trues, 250);
    assert!(!dec.has_next());
    assert!(dec.error().is_none());
}

#[test]
fn test_exact_multiple_has_no_trailing_block() {
    let bytes = encode_events(300, 100, 3);
    assert_eq!(block_sizes(&bytes), vec![100, 100, 100]);

    let bytes = encode_events(7, 3, 3);
    assert_eq!(block_sizes(&bytes), vec![3, 3, 1]);
}

#[test]
fn test_sync_corruption_detected_mid_stream() {
    let clean = encode_events(250, 100, 4);

    // The first block's trailing sync ends where the second block starts.
    let mut src = clean.as_slice();
    let header = Header::read_from(&mut src).unwrap();
    let mut blocks = BlockReader::new(src, header.sync, DecoderConfig::default());
    blocks.next_block().unwrap();
    let first_block_end = clean.len() - blocks.get_ref().len();

    for offset in 0..SYNC_SIZE {
        let mut bytes = clean.clone();
        bytes[first_block_end - SYNC_SIZE + offset] ^= 0xff;

        let mut dec = Decoder::<_, ValueSchema>::new(bytes.as_slice()).unwrap();
        let mut value = Value::Null;
        let mut decoded = 0;
        // has_next checks the marker before any record of the block is exposed.
        while dec.has_next() {
            dec.decode(&mut value).unwrap();
            decoded += 1;
        }
        assert_eq!(decoded, 0, "offset {offset}");
        assert!(
            matches!(dec.error(), Some(ContainerError::BlockSync)),
            "offset {offset}: got {:?}",
            dec.error()
        );
    }
}

#[test]
fn test_second_block_corruption_keeps_first_block() {
    let clean = encode_events(250, 100, 5);

    // Locate the second block's sync marker via the reader.
    let mut src = clean.as_slice();
    let header = Header::read_from(&mut src).unwrap();
    let mut blocks = BlockReader::new(src, header.sync, DecoderConfig::default());
    blocks.next_block().unwrap();
    blocks.next_block().unwrap();
    let second_end = clean.len() - blocks.get_ref().len();

    let mut bytes = clean;
    bytes[second_end - 1] ^= 0x01;
    let (decoded, err) = decode_all(&bytes);
    assert_eq!(decoded.len(), 100);
    assert!(err.unwrap().contains("sync marker"));
}

#[test]
fn test_header_magic_rejected() {
    let clean = encode_events(3, 100, 6);
    for i in 0..4 {
        let mut bytes = clean.clone();
        bytes[i] = bytes[i].wrapping_add(1);
        let result = Decoder::<_, ValueSchema>::new(bytes.as_slice());
        assert!(
            matches!(result, Err(ContainerError::Format(_))),
            "byte {i} should fail with a format error"
        );
    }
}

#[test]
fn test_empty_input_is_format_error() {
    let result = Decoder::<_, ValueSchema>::new(std::io::empty());
    assert!(matches!(result, Err(ContainerError::Format(_))));
}

#[test]
fn test_schema_fidelity() {
    let bytes = encode_events(1, 100, 7);
    let dec = Decoder::<_, ValueSchema>::new(bytes.as_slice()).unwrap();
    assert_eq!(
        dec.metadata(SCHEMA_KEY).unwrap(),
        schema().canonical_form().as_bytes()
    );
    assert_eq!(dec.header().schema_description().unwrap(), schema().canonical_form());
    assert_eq!(dec.schema(), &schema());
    assert_eq!(dec.header().meta.len(), 1);
}

#[test]
fn test_unparsable_schema_is_schema_error() {
    let bytes = Header::new("{\"type\": \"nope\"}", [1u8; SYNC_SIZE]).to_bytes();
    match Decoder::<_, ValueSchema>::new(bytes.as_slice()) {
        Err(ContainerError::Schema(msg)) => assert!(msg.contains("nope"), "{msg}"),
        Err(other) => panic!("expected schema error, got {other:?}"),
        Ok(_) => panic!("expected schema error"),
    }
}

#[test]
fn test_record_decode_error_keeps_position() {
    let schema = ValueSchema::parse(r#""boolean""#).unwrap();
    let mut enc = Encoder::with_rng(
        schema,
        Vec::new(),
        EncoderConfig::default(),
        &mut StdRng::seed_from_u64(11),
    )
    .unwrap();
    enc.encode(&Value::Boolean(true)).unwrap();
    let mut bytes = enc.finish().unwrap();

    // count, length, then the single payload byte.
    let payload_at = header_len(&bytes) + 2;
    assert_eq!(bytes[payload_at], 0x01);
    bytes[payload_at] = 0x02;

    let mut dec = Decoder::<_, ValueSchema>::new(bytes.as_slice()).unwrap();
    assert!(dec.has_next());
    let mut value = Value::Null;
    let err = dec.decode(&mut value).unwrap_err();
    assert!(matches!(err, ContainerError::Record(_)), "{err:?}");

    assert!(dec.error().is_none());
    assert_eq!(dec.blocks().remaining(), 1);
    assert!(dec.has_next());
    assert!(matches!(dec.decode(&mut value), Err(ContainerError::Record(_))));
    assert_eq!(dec.blocks().remaining(), 1);
}

#[test]
fn test_idempotent_close() {
    let mut enc = Encoder::with_rng(
        schema(),
        Vec::new(),
        EncoderConfig::default(),
        &mut StdRng::seed_from_u64(8),
    )
    .unwrap();
    enc.close().unwrap();
    enc.close().unwrap();
    let bytes = enc.finish().unwrap();

    assert_eq!(bytes.len(), header_len(&bytes));
    assert!(block_sizes(&bytes).is_empty());
    let (decoded, err) = decode_all(&bytes);
    assert!(decoded.is_empty());
    assert!(err.is_none());
}

#[test]
fn test_failed_encode_does_not_corrupt_block() {
    let mut enc = Encoder::with_rng(
        schema(),
        Vec::new(),
        EncoderConfig { block_length: 4 },
        &mut StdRng::seed_from_u64(9),
    )
    .unwrap();

    enc.encode(&event(0)).unwrap();
    // Fails on the last field, after seq and label were already encoded.
    let bad = Value::Record(vec![
        ("seq".to_string(), Value::Long(99)),
        ("label".to_string(), Value::from("partial")),
        ("ok".to_string(), Value::Long(1)),
    ]);
    let err = enc.encode(&bad).unwrap_err();
    assert!(matches!(err, ContainerError::Record(_)));
    assert_eq!(enc.pending(), 1);

    enc.encode(&event(1)).unwrap();
    let bytes = enc.finish().unwrap();

    let (decoded, err) = decode_all(&bytes);
    assert_eq!(decoded, vec![event(0), event(1)]);
    assert!(err.is_none());
}

#[test]
fn test_records_iterator() {
    let bytes = encode_events(42, 10, 10);
    let mut dec = Decoder::<_, ValueSchema>::new(bytes.as_slice()).unwrap();
    let records: Vec<Value> = dec.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(records.len(), 42);
    assert_eq!(records[41], event(41));
    assert!(dec.error().is_none());
}

#[test]
fn test_sync_markers_differ_between_streams() {
    let a = Encoder::new(schema(), Vec::new()).unwrap();
    let b = Encoder::new(schema(), Vec::new()).unwrap();
    assert_ne!(a.sync(), b.sync());
}

#[test]
fn test_seeded_streams_are_identical() {
    assert_eq!(encode_events(120, 50, 11), encode_events(120, 50, 11));
    assert_ne!(encode_events(120, 50, 11), encode_events(120, 50, 12));
}

#[test]
fn test_roundtrip_through_file() {
    let path = temp_path("file_roundtrip");
    {
        let file = std::fs::File::create(&path).unwrap();
        let mut enc = Encoder::with_config(schema(), file, EncoderConfig { block_length: 16 }).unwrap();
        for seq in 0..100 {
            enc.encode(&event(seq)).unwrap();
        }
        enc.close().unwrap();
    }

    let file = std::fs::File::open(&path).unwrap();
    let mut dec = Decoder::<_, ValueSchema>::new(file).unwrap();
    let records: Vec<Value> = dec.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(records, (0..100).map(event).collect::<Vec<_>>());
    assert!(dec.error().is_none());
    assert_eq!(dec.blocks().blocks_read(), 7);

    let _ = std::fs::remove_file(&path);
}
