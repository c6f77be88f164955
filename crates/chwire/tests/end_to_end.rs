//! End-to-end checks through the public facade: inserts over every source
//! kind, multiplexed query results, and checksum failures.

use std::sync::{Arc, Once};

use chwire::block::BlockFramer;
use chwire::packet::{client, server};
use chwire::types::{SliceReader, WireRead, WireWrite};
use chwire::{
    Block, BlockColumn, BlockReader, ChError, ColumnSource, ColumnWriter, CompressionMethod, Cx,
    ErrorKind, MemoryTransport, NullAsDefault, ProtocolSettings, ReaderOptions, ReaderState, SliceSource,
    StreamSource, TransactionMode, TypeRegistry, Utf16Source, Value, VecSource, WriterOptions,
};

use proptest::prelude::*;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn settings(compression: Option<CompressionMethod>) -> ProtocolSettings {
    ProtocolSettings {
        compression,
        ..ProtocolSettings::default()
    }
}

fn decode_inserts(bytes: &[u8], settings: ProtocolSettings) -> Vec<Block> {
    let mut reader = SliceReader::new(bytes);
    let mut framer = BlockFramer::new(settings.revision, settings.compression, Arc::new(TypeRegistry::new()));
    let mut blocks = Vec::new();
    while !reader.is_empty() {
        assert_eq!(reader.read_varint().expect("code"), client::DATA);
        reader.read_string().expect("table");
        blocks.push(framer.read_block(&mut reader).expect("block"));
    }
    blocks
}

#[test]
fn insert_from_every_source_kind() {
    let settings = settings(Some(CompressionMethod::Zstd));
    let registry = TypeRegistry::new();
    let transport = MemoryTransport::transactional();
    let mut writer = ColumnWriter::open_with_types(
        transport.clone(),
        &Cx::new(),
        settings,
        &registry,
        &[
            ("id", "UInt64"),
            ("name", "String"),
            ("score", "Float64"),
            ("tags", "Array(LowCardinality(String))"),
        ],
        WriterOptions {
            mode: TransactionMode::Block,
            max_block_size: Some(2),
        },
    )
    .expect("open");

    let ids = [10u64, 20, 30];
    let names: Vec<Vec<u16>> = ["ada", "grâce", "λ"].iter().map(|s| s.encode_utf16().collect()).collect();
    let name_refs: Vec<&[u16]> = names.iter().map(Vec::as_slice).collect();
    let mut id_source = SliceSource::new(&ids);
    let mut name_source = Utf16Source::new(&name_refs);
    let mut score_source = StreamSource::new(futures::stream::iter(vec![0.5f64, -1.25, 1e300]));
    let mut tag_source = VecSource::new(vec![
        Value::from(vec!["x", "y"]),
        Value::Array(Vec::new()),
        Value::from(vec!["y", "y", "z"]),
    ]);
    let mut sources: [&mut dyn ColumnSource; 4] =
        [&mut id_source, &mut name_source, &mut score_source, &mut tag_source];
    writer.write_block(&mut sources, 3).expect("write block");
    writer.close().expect("close");

    let blocks = decode_inserts(&transport.committed(), settings);
    let sizes: Vec<usize> = blocks.iter().map(Block::rows).collect();
    assert_eq!(sizes, vec![2, 1, 0]);
    let names: Vec<Value> = blocks
        .iter()
        .filter_map(|b| b.column_by_name("name"))
        .flat_map(|c| c.values.clone())
        .collect();
    assert_eq!(names, vec![Value::from("ada"), Value::from("grâce"), Value::from("λ")]);
    let tags = &blocks[1].column_by_name("tags").expect("tags").values;
    assert_eq!(tags, &vec![Value::from(vec!["y", "y", "z"])]);
    let scores = &blocks[0].column_by_name("score").expect("score").values;
    assert_eq!(scores, &vec![Value::Float64(0.5), Value::Float64(-1.25)]);
}

/// Server packet stream built block by block.
struct ServerScript {
    framer: BlockFramer,
    bytes: Vec<u8>,
}

impl ServerScript {
    fn new(settings: ProtocolSettings) -> Self {
        Self {
            framer: BlockFramer::new(settings.revision, settings.compression, Arc::new(TypeRegistry::new())),
            bytes: Vec::new(),
        }
    }

    /// Append a block packet; returns the offset of its framed bytes.
    fn push(&mut self, code: u64, block: &Block) -> usize {
        self.bytes.put_varint(code);
        self.bytes.put_str("");
        let offset = self.bytes.len();
        let framed = self.framer.frame(block).expect("frame");
        self.bytes.put_bytes(&framed);
        offset
    }

    fn finish(mut self) -> Vec<u8> {
        self.bytes.put_varint(server::END_OF_STREAM);
        self.bytes
    }
}

fn metrics(values: &[(&str, i64)]) -> Block {
    let registry = TypeRegistry::new();
    Block::new(vec![
        BlockColumn::new(
            "metric",
            registry.get("LowCardinality(String)").expect("type"),
            values.iter().map(|(m, _)| Value::from(*m)).collect(),
        ),
        BlockColumn::new(
            "value",
            registry.get("Int64").expect("type"),
            values.iter().map(|(_, v)| Value::Int64(*v)).collect(),
        ),
    ])
    .expect("block")
}

fn drain(reader: &mut BlockReader<MemoryTransport>) -> Vec<(String, i64)> {
    let mut rows = Vec::new();
    while reader.read_row().expect("row") {
        let metric = reader.get_by_name("metric").expect("metric");
        let value = reader.get(1).expect("value");
        match (metric, value) {
            (Value::String(m), Value::Int64(v)) => rows.push((String::from_utf8(m).expect("utf8"), v)),
            other => panic!("unexpected row {other:?}"),
        }
    }
    rows
}

#[test]
fn data_totals_extremes_over_compressed_stream() {
    let settings = settings(Some(CompressionMethod::Lz4));
    let mut script = ServerScript::new(settings);
    script.push(server::DATA, &metrics(&[]));
    script.push(server::DATA, &metrics(&[("a", 1), ("b", 2)]));
    script.push(server::DATA, &metrics(&[("a", 3)]));
    script.push(server::TOTALS, &metrics(&[("", 6)]));
    script.push(server::EXTREMES, &metrics(&[("a", 1), ("b", 3)]));
    let transport = MemoryTransport::with_inbound(script.finish());

    let mut reader = BlockReader::open(
        transport.clone(),
        &Cx::new(),
        settings,
        Arc::new(TypeRegistry::new()),
        ReaderOptions::default(),
    )
    .expect("open");
    assert_eq!(reader.column_count(), 2);
    assert_eq!(
        reader.column_type(0).map(ToString::to_string).as_deref(),
        Some("LowCardinality(String)")
    );

    assert_eq!(
        drain(&mut reader),
        vec![("a".to_owned(), 1), ("b".to_owned(), 2), ("a".to_owned(), 3)]
    );
    assert_eq!(reader.state(), ReaderState::NextResultPending);

    assert!(reader.advance().expect("totals"));
    assert_eq!(reader.state(), ReaderState::Totals);
    assert_eq!(drain(&mut reader), vec![(String::new(), 6)]);
    assert_eq!(reader.state(), ReaderState::NextResultPending);

    assert!(reader.advance().expect("extremes"));
    assert_eq!(reader.state(), ReaderState::Extremes);
    assert_eq!(drain(&mut reader), vec![("a".to_owned(), 1), ("b".to_owned(), 3)]);

    assert!(!reader.advance().expect("end"));
    assert_eq!(reader.state(), ReaderState::Closed);
    assert!(!reader.read_row().expect("closed"));
    assert_eq!(transport.remaining_inbound(), 0);
}

#[test]
fn skipping_data_still_reaches_totals() {
    let settings = settings(None);
    let mut script = ServerScript::new(settings);
    script.push(server::DATA, &metrics(&[]));
    script.push(server::DATA, &metrics(&[("a", 1), ("b", 2)]));
    script.push(server::TOTALS, &metrics(&[("", 3)]));
    let mut reader = BlockReader::open(
        MemoryTransport::with_inbound(script.finish()),
        &Cx::new(),
        settings,
        Arc::new(TypeRegistry::new()),
        ReaderOptions::default(),
    )
    .expect("open");
    assert!(reader.advance().expect("skip data"));
    assert_eq!(reader.state(), ReaderState::Totals);
    assert_eq!(drain(&mut reader), vec![(String::new(), 3)]);
}

#[test]
fn flipped_checksum_bit_fails_without_values() {
    let settings = settings(Some(CompressionMethod::Lz4));
    let mut script = ServerScript::new(settings);
    script.push(server::DATA, &metrics(&[]));
    let offset = script.push(server::DATA, &metrics(&[("a", 1)]));
    let mut bytes = script.finish();
    bytes[offset + 5] ^= 0x01;

    let mut reader = BlockReader::open(
        MemoryTransport::with_inbound(bytes),
        &Cx::new(),
        settings,
        Arc::new(TypeRegistry::new()),
        ReaderOptions::default(),
    )
    .expect("open");
    let err = reader.read_row().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Checksum);
    assert!(err.is_fatal_to_connection());
    assert!(reader.get(0).is_err());
    assert!(reader.read_row().is_err());
}

#[test]
fn non_row_operation_has_no_columns() {
    let mut bytes = Vec::new();
    bytes.put_varint(server::END_OF_STREAM);
    let reader = BlockReader::open(
        MemoryTransport::with_inbound(bytes),
        &Cx::new(),
        ProtocolSettings::default(),
        Arc::new(TypeRegistry::new()),
        ReaderOptions::default(),
    )
    .expect("open");
    assert_eq!(reader.state(), ReaderState::Closed);
    assert_eq!(reader.column_count(), 0);
}

#[test]
fn manual_mode_on_plain_transport_is_rejected() {
    let err = ColumnWriter::open_with_types(
        MemoryTransport::new(),
        &Cx::new(),
        ProtocolSettings::default(),
        &TypeRegistry::new(),
        &[("id", "UInt8")],
        WriterOptions {
            mode: TransactionMode::Manual,
            max_block_size: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, ChError::TransactionUnsupported));
    assert!(err.suggestion().is_some());
}

fn scores(values: &[Option<i64>]) -> Block {
    Block::new(vec![BlockColumn::new(
        "score",
        TypeRegistry::new().get("Nullable(Int64)").expect("type"),
        values.iter().map(|v| v.map_or(Value::Null, Value::Int64)).collect(),
    )])
    .expect("block")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chunked_results_read_back_in_order(
        values in prop::collection::vec(prop::option::of(any::<i64>()), 0..40),
        chunk in 1usize..7,
        lz4 in any::<bool>(),
    ) {
        init_tracing();
        let settings = settings(lz4.then_some(CompressionMethod::Lz4));
        let mut script = ServerScript::new(settings);
        script.push(server::DATA, &scores(&[]));
        for part in values.chunks(chunk) {
            script.push(server::DATA, &scores(part));
        }
        let mut reader = BlockReader::open(
            MemoryTransport::with_inbound(script.finish()),
            &Cx::new(),
            settings,
            Arc::new(TypeRegistry::new()),
            ReaderOptions::default(),
        )
        .expect("open");
        reader
            .register_converter(0, Arc::new(NullAsDefault::new(Value::Int64(0))))
            .expect("register");
        let col0_type = reader.column_type(0).map(ToString::to_string);
        prop_assert_eq!(col0_type.as_deref(), Some("Int64"));

        let mut seen = Vec::new();
        while reader.read_row().expect("row") {
            seen.push(reader.get(0).expect("value"));
        }
        tracing::debug!(rows = seen.len(), chunk, "drained result");
        let expected: Vec<Value> = values.iter().map(|v| Value::Int64(v.unwrap_or(0))).collect();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(reader.state(), ReaderState::NextResultPending);
        prop_assert!(!reader.advance().expect("end"));
        prop_assert_eq!(reader.state(), ReaderState::Closed);
    }
}
