//! Byte streams that connections can run on.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

/// Non-blocking byte stream owned by a single connection.
///
/// Reads with nothing available are expected to fail with
/// `ErrorKind::WouldBlock` rather than block.
pub trait StreamInterface: Read + Write + Send {
    /// Shuts down both halves of the stream.
    fn close(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StreamInterface for TcpStream {
    fn close(&mut self) -> std::io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}
