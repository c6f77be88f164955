use std::io;
use std::ops::Range;
use std::sync::Arc;

use chwire_error::{ChError, Result};
use chwire_types::Cx;
use parking_lot::Mutex;
use tracing::trace;

use crate::traits::{BlockAcknowledger, BlockId, Transport};

#[derive(Debug, Default)]
struct MemoryTransportInner {
    inbound: Vec<u8>,
    read_pos: usize,
    /// Every byte ever written, in order.
    outbound: Vec<u8>,
    /// Start of the bytes written since the last acknowledgment.
    unacknowledged_from: usize,
    provisional: Vec<(BlockId, Range<usize>)>,
    committed: Vec<u8>,
    committed_blocks: usize,
    rolled_back_blocks: usize,
    next_block: u64,
    flushes: usize,
    write_budget: Option<usize>,
    /// Bytes on the wire that belong to no complete acknowledged block.
    torn_bytes: usize,
}

/// In-memory transport for tests.
///
/// Inbound bytes are scripted up front or pushed later; outbound bytes are
/// captured. Clones share the same state, so a test can hand one clone to a
/// writer or reader and inspect the other.
///
/// A transactional instance keeps an acknowledgment ledger: acknowledged
/// blocks stay provisional until committed, and [`MemoryTransport::committed`]
/// only shows committed blocks. A plain instance treats every written byte as
/// committed.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryTransportInner>>,
    transactional: bool,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport supporting [`BlockAcknowledger`].
    #[must_use]
    pub fn transactional() -> Self {
        Self {
            transactional: true,
            ..Self::default()
        }
    }

    /// Plain transport whose reads are served from `bytes`.
    #[must_use]
    pub fn with_inbound(bytes: Vec<u8>) -> Self {
        let transport = Self::new();
        transport.inner.lock().inbound = bytes;
        transport
    }

    #[must_use]
    pub const fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Append bytes for later reads.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.inner.lock().inbound.extend_from_slice(bytes);
    }

    #[must_use]
    pub fn remaining_inbound(&self) -> usize {
        let inner = self.inner.lock();
        inner.inbound.len() - inner.read_pos
    }

    /// Every byte written so far, committed or not.
    #[must_use]
    pub fn outbound(&self) -> Vec<u8> {
        self.inner.lock().outbound.clone()
    }

    /// Bytes of committed blocks, in commit order.
    #[must_use]
    pub fn committed(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        if self.transactional {
            inner.committed.clone()
        } else {
            inner.outbound.clone()
        }
    }

    #[must_use]
    pub fn provisional_blocks(&self) -> usize {
        self.inner.lock().provisional.len()
    }

    #[must_use]
    pub fn committed_blocks(&self) -> usize {
        self.inner.lock().committed_blocks
    }

    #[must_use]
    pub fn rolled_back_blocks(&self) -> usize {
        self.inner.lock().rolled_back_blocks
    }

    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.inner.lock().flushes
    }

    /// Accept `bytes` more bytes, then fail every write with a broken pipe.
    pub fn fail_writes_after(&self, bytes: usize) {
        self.inner.lock().write_budget = Some(bytes);
    }

    /// Bytes cut off by a failed write, together with the unacknowledged
    /// bytes written before it. None of them can become committed.
    #[must_use]
    pub fn torn_bytes(&self) -> usize {
        self.inner.lock().torn_bytes
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write_all(&mut self, cx: &Cx, bytes: &[u8]) -> Result<()> {
        cx.checkpoint()?;
        let mut inner = self.inner.lock();
        if let Some(budget) = inner.write_budget {
            if bytes.len() > budget {
                let accepted = &bytes[..budget];
                inner.outbound.extend_from_slice(accepted);
                inner.write_budget = Some(0);
                // The pending block is torn; keep it out of the next acknowledgment.
                let torn = inner.outbound.len() - inner.unacknowledged_from;
                inner.torn_bytes += torn;
                inner.unacknowledged_from = inner.outbound.len();
                trace!(bytes = torn, "write torn");
                return Err(ChError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "memory transport write budget exhausted",
                )));
            }
            inner.write_budget = Some(budget - bytes.len());
        }
        inner.outbound.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self, cx: &Cx) -> Result<()> {
        cx.checkpoint()?;
        self.inner.lock().flushes += 1;
        Ok(())
    }

    fn read_exact(&mut self, cx: &Cx, buf: &mut [u8]) -> Result<()> {
        cx.checkpoint()?;
        let mut inner = self.inner.lock();
        let start = inner.read_pos;
        let available = inner.inbound.len() - start;
        if available < buf.len() {
            return Err(ChError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "memory transport has {available} bytes, read wants {}",
                    buf.len()
                ),
            )));
        }
        buf.copy_from_slice(&inner.inbound[start..start + buf.len()]);
        inner.read_pos += buf.len();
        Ok(())
    }

    fn block_acknowledger(&mut self) -> Option<&mut dyn BlockAcknowledger> {
        if self.transactional {
            Some(self)
        } else {
            None
        }
    }
}

impl BlockAcknowledger for MemoryTransport {
    fn acknowledge(&mut self, cx: &Cx) -> Result<BlockId> {
        cx.checkpoint()?;
        let mut inner = self.inner.lock();
        let id = BlockId(inner.next_block);
        inner.next_block += 1;
        let range = inner.unacknowledged_from..inner.outbound.len();
        inner.unacknowledged_from = inner.outbound.len();
        trace!(block = id.0, bytes = range.len(), "block acknowledged");
        inner.provisional.push((id, range));
        Ok(id)
    }

    fn commit(&mut self, cx: &Cx, through: BlockId) -> Result<()> {
        cx.checkpoint()?;
        let mut inner = self.inner.lock();
        if !inner.provisional.iter().any(|(id, _)| *id == through) {
            return Err(ChError::invalid_state(format!(
                "block {} is not provisional",
                through.0
            )));
        }
        let split = inner
            .provisional
            .iter()
            .position(|(id, _)| *id > through)
            .unwrap_or(inner.provisional.len());
        let durable: Vec<_> = inner.provisional.drain(..split).collect();
        for (_, range) in &durable {
            let bytes = inner.outbound[range.clone()].to_vec();
            inner.committed.extend_from_slice(&bytes);
        }
        inner.committed_blocks += durable.len();
        trace!(through = through.0, blocks = durable.len(), "blocks committed");
        Ok(())
    }

    fn rollback(&mut self, cx: &Cx) -> Result<usize> {
        cx.checkpoint()?;
        let mut inner = self.inner.lock();
        let dropped = inner.provisional.len();
        inner.provisional.clear();
        inner.unacknowledged_from = inner.outbound.len();
        inner.rolled_back_blocks += dropped;
        trace!(blocks = dropped, "blocks rolled back");
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_serve_scripted_bytes() {
        let cx = Cx::new();
        let mut transport = MemoryTransport::with_inbound(vec![1, 2, 3]);
        let mut buf = [0u8; 2];
        transport.read_exact(&cx, &mut buf).expect("read");
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.remaining_inbound(), 1);
        let err = transport.read_exact(&cx, &mut buf).unwrap_err();
        assert!(err.is_fatal_to_connection());
    }

    #[test]
    fn plain_transport_commits_everything() {
        let cx = Cx::new();
        let mut transport = MemoryTransport::new();
        assert!(transport.block_acknowledger().is_none());
        transport.write_all(&cx, b"abc").expect("write");
        assert_eq!(transport.committed(), b"abc");
    }

    #[test]
    fn ledger_commits_and_rolls_back() {
        let cx = Cx::new();
        let observer = MemoryTransport::transactional();
        let mut transport = observer.clone();

        transport.write_all(&cx, b"one").expect("write");
        let first = transport.acknowledge(&cx).expect("ack");
        transport.write_all(&cx, b"two").expect("write");
        transport.acknowledge(&cx).expect("ack");
        transport.commit(&cx, first).expect("commit");
        assert_eq!(observer.committed(), b"one");
        assert_eq!(observer.provisional_blocks(), 1);

        assert_eq!(transport.rollback(&cx).expect("rollback"), 1);
        transport.write_all(&cx, b"three").expect("write");
        let third = transport.acknowledge(&cx).expect("ack");
        transport.commit(&cx, third).expect("commit");

        assert_eq!(observer.committed(), b"onethree");
        assert_eq!(observer.outbound(), b"onetwothree");
        assert_eq!(observer.committed_blocks(), 2);
        assert_eq!(observer.rolled_back_blocks(), 1);
        assert!(transport.commit(&cx, third).is_err());
    }

    #[test]
    fn cancelled_context_blocks_io() {
        let cx = Cx::new();
        cx.cancel();
        let mut transport = MemoryTransport::new();
        assert!(matches!(
            transport.write_all(&cx, b"x"),
            Err(ChError::Cancelled)
        ));
        assert!(transport.outbound().is_empty());
    }

    #[test]
    fn write_budget_cuts_off_writes() {
        let cx = Cx::new();
        let mut transport = MemoryTransport::new();
        transport.fail_writes_after(4);
        transport.write_all(&cx, b"ab").expect("within budget");
        assert!(transport.write_all(&cx, b"cdef").is_err());
        assert_eq!(transport.outbound(), b"abcd");
    }

    #[test]
    fn torn_write_never_reaches_the_ledger() {
        let cx = Cx::new();
        let observer = MemoryTransport::transactional();
        let mut transport = observer.clone();
        transport.write_all(&cx, b"one").expect("write");
        let first = transport.acknowledge(&cx).expect("ack");
        transport.commit(&cx, first).expect("commit");

        transport.write_all(&cx, b"t").expect("write");
        transport.fail_writes_after(2);
        assert!(transport.write_all(&cx, b"wo!").is_err());
        assert_eq!(observer.torn_bytes(), 3);

        let second = transport.acknowledge(&cx).expect("ack");
        transport.commit(&cx, second).expect("commit");
        assert_eq!(observer.committed(), b"one");
        assert_eq!(observer.outbound(), b"onetwo");
    }
}
