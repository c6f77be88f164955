use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use chwire_error::Result;
use chwire_types::Cx;
use tracing::debug;

use crate::traits::Transport;

const TCP_BUFFER_SIZE: usize = 128 * 1024;

/// Byte transport over a connected TCP stream.
///
/// Carries no acknowledgment ledger, so it cannot back a Manual-mode writer.
#[derive(Debug)]
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs, timeout: Option<Duration>) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        debug!(peer = ?stream.peer_addr().ok(), "tcp transport connected");
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        let read_half = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::with_capacity(TCP_BUFFER_SIZE, read_half),
            writer: BufWriter::with_capacity(TCP_BUFFER_SIZE, stream),
        })
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn write_all(&mut self, cx: &Cx, bytes: &[u8]) -> Result<()> {
        cx.checkpoint()?;
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self, cx: &Cx) -> Result<()> {
        cx.checkpoint()?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, cx: &Cx, buf: &mut [u8]) -> Result<()> {
        cx.checkpoint()?;
        self.reader.read_exact(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn bytes_cross_a_loopback_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let echo = thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).expect("server read");
            socket.write_all(&buf).expect("server write");
        });

        let cx = Cx::new();
        let mut transport =
            TcpTransport::connect(addr, Some(Duration::from_secs(5))).expect("connect");
        transport.write_all(&cx, b"hello").expect("write");
        transport.flush(&cx).expect("flush");
        let mut reply = [0u8; 5];
        transport.read_exact(&cx, &mut reply).expect("read");
        assert_eq!(&reply, b"hello");
        assert!(transport.block_acknowledger().is_none());
        echo.join().expect("echo thread");
    }
}
