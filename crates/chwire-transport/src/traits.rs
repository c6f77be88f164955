use chwire_error::Result;
use chwire_types::Cx;

/// Identifier of one block handed to a [`BlockAcknowledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

/// Ordered, reliable byte delivery to and from the server.
///
/// One operation drives a transport at a time. Implementations check `cx`
/// for cancellation before doing any I/O.
pub trait Transport: Send {
    /// The name of this transport (e.g., "memory", "tcp").
    fn name(&self) -> &'static str;

    /// Write all of `bytes`.
    fn write_all(&mut self, cx: &Cx, bytes: &[u8]) -> Result<()>;

    /// Push buffered writes to the peer.
    fn flush(&mut self, cx: &Cx) -> Result<()>;

    /// Fill `buf` completely or fail.
    fn read_exact(&mut self, cx: &Cx, buf: &mut [u8]) -> Result<()>;

    /// Transactional block acknowledgment, when the transport supports it.
    fn block_acknowledger(&mut self) -> Option<&mut dyn BlockAcknowledger> {
        None
    }
}

/// Transactional acknowledgment of sent blocks.
///
/// Blocks become provisional once acknowledged and durable once committed.
/// A rollback discards every provisional block, including ones whose bytes
/// already reached the peer.
pub trait BlockAcknowledger {
    /// Seal the bytes written since the previous acknowledgment as one
    /// provisional block.
    fn acknowledge(&mut self, cx: &Cx) -> Result<BlockId>;

    /// Make every provisional block up to and including `through` durable.
    fn commit(&mut self, cx: &Cx, through: BlockId) -> Result<()>;

    /// Discard all provisional blocks. Returns how many were dropped.
    fn rollback(&mut self, cx: &Cx) -> Result<usize>;
}
