//! Adapter from a [`Transport`] to the codec's [`WireRead`].

use chwire_error::Result;
use chwire_transport::Transport;
use chwire_types::{Cx, WireRead};

/// Reads decode bytes straight from a transport, checking `cx` on every
/// pull.
pub struct TransportReader<'a> {
    transport: &'a mut dyn Transport,
    cx: &'a Cx,
    bytes_read: u64,
}

impl<'a> TransportReader<'a> {
    pub fn new(transport: &'a mut dyn Transport, cx: &'a Cx) -> Self {
        Self {
            transport,
            cx,
            bytes_read: 0,
        }
    }

    #[must_use]
    pub const fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl WireRead for TransportReader<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.transport.read_exact(self.cx, buf)?;
        self.bytes_read += buf.len() as u64;
        Ok(())
    }
}
