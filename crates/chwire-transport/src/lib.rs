//! Transport collaborators for the chwire engine.
//!
//! The engine needs ordered byte delivery and, for Manual-mode writes, a way
//! to acknowledge sent blocks transactionally. [`MemoryTransport`] implements
//! both and doubles as the test fixture; [`TcpTransport`] is a plain socket.

pub mod memory;
pub mod tcp;
pub mod traits;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
pub use traits::{BlockAcknowledger, BlockId, Transport};
