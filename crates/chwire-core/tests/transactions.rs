//! Transaction-mode properties of the column writer, checked against the
//! committed byte stream of a transactional memory transport.

use std::sync::{Arc, Once};

use chwire_block::{Block, BlockFramer};
use chwire_core::packet::client;
use chwire_core::{ColumnWriter, ProtocolSettings, TransactionMode, TryIterSource, WriterOptions};
use chwire_error::ChError;
use chwire_transport::MemoryTransport;
use chwire_types::{Cx, SliceReader, TypeRegistry, Value, WireRead};
use proptest::prelude::*;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        use tracing_subscriber::filter::EnvFilter;
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn writer(
    transport: &MemoryTransport,
    mode: TransactionMode,
    block_size: usize,
) -> ColumnWriter<MemoryTransport> {
    ColumnWriter::open_with_types(
        transport.clone(),
        &Cx::new(),
        ProtocolSettings::default(),
        &TypeRegistry::new(),
        &[("id", "UInt32"), ("label", "LowCardinality(Nullable(String))")],
        WriterOptions {
            mode,
            max_block_size: Some(block_size),
        },
    )
    .expect("open writer")
}

fn row(id: u32) -> Vec<Value> {
    let label = if id % 4 == 0 { Value::Null } else { Value::from(format!("l{}", id % 5)) };
    vec![Value::UInt32(id), label]
}

fn committed_blocks(transport: &MemoryTransport) -> Vec<Block> {
    let bytes = transport.committed();
    let mut reader = SliceReader::new(&bytes);
    let mut framer = BlockFramer::new(
        ProtocolSettings::default().revision,
        None,
        Arc::new(TypeRegistry::new()),
    );
    let mut blocks = Vec::new();
    while !reader.is_empty() {
        assert_eq!(reader.read_varint().expect("packet code"), client::DATA);
        assert_eq!(reader.read_string().expect("table name"), "");
        blocks.push(framer.read_block(&mut reader).expect("block"));
    }
    blocks
}

fn committed_ids(transport: &MemoryTransport) -> Vec<u32> {
    committed_blocks(transport)
        .into_iter()
        .filter(|b| b.rows() > 0)
        .flat_map(|b| b.into_columns().swap_remove(0).values)
        .map(|v| match v {
            Value::UInt32(id) => id,
            other => panic!("unexpected id {other:?}"),
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Op {
    Write(u32),
    Flush,
    Commit,
    Rollback,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1u32..12).prop_map(Op::Write),
        1 => Just(Op::Flush),
        2 => Just(Op::Commit),
        2 => Just(Op::Rollback),
    ]
}

#[test]
fn block_mode_failure_after_two_blocks() {
    init_tracing();
    let transport = MemoryTransport::transactional();
    let mut writer = writer(&transport, TransactionMode::Block, 4);
    let ids = (0..20u32).map(|i| if i == 9 { Err("upstream closed") } else { Ok(i) });
    let mut id_source = TryIterSource::new(ids);
    let mut labels = chwire_core::IterSource::new((0..20u32).map(|i| row(i).swap_remove(1)));
    let err = writer
        .write_block(&mut [&mut id_source, &mut labels], 20)
        .unwrap_err();
    assert!(matches!(err, ChError::Source { row: 9, .. }), "{err:?}");
    assert_eq!(writer.stats().committed_rows, 8);
    assert_eq!(committed_ids(&transport), (0..8).collect::<Vec<_>>());
    writer.close().expect("close");
    assert_eq!(committed_ids(&transport), (0..8).collect::<Vec<_>>());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn block_mode_commits_exactly_the_full_blocks(block_size in 1usize..9, fail_at in 0u32..60) {
        init_tracing();
        let transport = MemoryTransport::transactional();
        let mut writer = writer(&transport, TransactionMode::Block, block_size);
        let ids = (0..100u32).map(move |i| if i == fail_at { Err(format!("boom at {i}")) } else { Ok(i) });
        let mut id_source = TryIterSource::new(ids);
        let mut labels = chwire_core::VecSource::new((0..100u32).map(|i| row(i).swap_remove(1)).collect());
        let result = writer.write_block(&mut [&mut id_source, &mut labels], 100);
        prop_assert!(result.is_err());

        let full_blocks = fail_at as usize / block_size;
        let expected: Vec<u32> = (0..u32::try_from(full_blocks * block_size).expect("small")).collect();
        prop_assert_eq!(writer.stats().committed_rows, (full_blocks * block_size) as u64);
        prop_assert_eq!(transport.committed_blocks(), full_blocks);
        prop_assert_eq!(committed_ids(&transport), expected);
    }

    #[test]
    fn manual_mode_keeps_rows_of_surviving_commits(ops in prop::collection::vec(op(), 1..24), block_size in 1usize..6) {
        init_tracing();
        let transport = MemoryTransport::transactional();
        let mut writer = writer(&transport, TransactionMode::Manual, block_size);
        let mut next_id = 0u32;
        let mut pending: Vec<u32> = Vec::new();
        let mut durable: Vec<u32> = Vec::new();
        for op in ops {
            match op {
                Op::Write(n) => {
                    for _ in 0..n {
                        writer.write_row(row(next_id)).expect("write");
                        pending.push(next_id);
                        next_id += 1;
                    }
                }
                Op::Flush => writer.flush().expect("flush"),
                Op::Commit => {
                    writer.commit().expect("commit");
                    durable.append(&mut pending);
                }
                Op::Rollback => {
                    writer.rollback().expect("rollback");
                    pending.clear();
                }
            }
            let stats = writer.stats();
            prop_assert_eq!(stats.committed_rows, durable.len() as u64);
            prop_assert_eq!(
                stats.committed_rows + stats.provisional_rows + stats.buffered_rows + stats.discarded_rows,
                u64::from(next_id)
            );
        }
        writer.close().expect("close");
        prop_assert_eq!(transport.provisional_blocks(), 0);
        prop_assert_eq!(committed_ids(&transport), durable);
    }

    #[test]
    fn auto_mode_block_sizes(rows in 0u32..50, block_size in 1usize..10) {
        init_tracing();
        let transport = MemoryTransport::new();
        let mut writer = writer(&transport, TransactionMode::Auto, block_size);
        for id in 0..rows {
            writer.write_row(row(id)).expect("write");
        }
        writer.close().expect("close");
        let blocks = committed_blocks(&transport);
        let (last, data) = blocks.split_last().expect("terminator");
        prop_assert_eq!(last.rows(), 0);
        prop_assert!(data.iter().all(|b| b.rows() > 0 && b.rows() <= block_size));
        prop_assert_eq!(committed_ids(&transport), (0..rows).collect::<Vec<_>>());
    }
}
