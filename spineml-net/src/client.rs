//! Blocking client side of the protocol.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::handshake::HandshakeStage;
use crate::protocol::{self, DataType, Direction, Marker};
use crate::{Error, Result};

/// Default limit on how long a single read may block.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connecting to a server, used mostly for testing and as a simple
/// example of an external tool.
///
/// Only analog data can be negotiated.
pub struct Client {
    stream: TcpStream,
    direction: Direction,
    data_size: u32,
}

impl Client {
    /// Connects and performs the whole handshake.
    pub fn connect<A: ToSocketAddrs>(addr: A, direction: Direction, data_size: u32) -> Result<Self> {
        Self::connect_with_timeout(addr, direction, data_size, DEFAULT_READ_TIMEOUT)
    }

    pub fn connect_with_timeout<A: ToSocketAddrs>(
        addr: A,
        direction: Direction,
        data_size: u32,
        read_timeout: Duration,
    ) -> Result<Self> {
        if direction == Direction::Unset {
            return Err(Error::Other("client direction must be set".to_string()));
        }
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(read_timeout))?;
        let mut client = Client {
            stream,
            direction,
            data_size,
        };
        client.handshake()?;
        Ok(client)
    }

    fn handshake(&mut self) -> Result<()> {
        self.stream.write_all(&[self.direction.marker().byte()])?;
        self.expect_marker(HandshakeStage::AwaitingDirection, Marker::Hello)?;
        self.stream.write_all(&[DataType::Analog.marker().byte()])?;
        self.expect_marker(HandshakeStage::AwaitingDataType, Marker::Received)?;
        self.stream
            .write_all(&protocol::encode_data_size(self.data_size))?;
        self.expect_marker(HandshakeStage::AwaitingDataSize, Marker::Received)?;
        debug!(
            "handshake done: {} x{} on {}",
            self.direction,
            self.data_size,
            self.stream.peer_addr()?
        );
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(Error::PeerDisconnected),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(Error::TimedOut { reads: 1 })
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn expect_marker(&mut self, stage: HandshakeStage, marker: Marker) -> Result<()> {
        let byte = self.read_byte()?;
        if byte != marker.byte() {
            return Err(Error::UnexpectedByte { stage, byte });
        }
        Ok(())
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn data_size(&self) -> u32 {
        self.data_size
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    /// Sends a single frame to the server and waits for the acknowledgment.
    /// Only valid for source clients.
    pub fn send_frame(&mut self, samples: &[f64]) -> Result<()> {
        if self.direction != Direction::Source {
            return Err(Error::InvalidState(format!(
                "can't send frames as {}",
                self.direction
            )));
        }
        if samples.len() != self.data_size as usize {
            return Err(Error::WrongByteCount {
                expected: (self.data_size as usize).saturating_mul(protocol::SAMPLE_SIZE),
                actual: samples.len() * protocol::SAMPLE_SIZE,
            });
        }
        self.stream.write_all(&protocol::encode_frame(samples))?;
        match self.read_byte()? {
            b if b == Marker::Received.byte() => Ok(()),
            b => Err(Error::UnexpectedAck(b)),
        }
    }

    /// Receives a single frame from the server and acknowledges it. Only
    /// valid for target clients.
    pub fn recv_frame(&mut self) -> Result<Vec<f64>> {
        if self.direction != Direction::Target {
            return Err(Error::InvalidState(format!(
                "can't receive frames as {}",
                self.direction
            )));
        }
        let len = protocol::frame_len(self.data_size).ok_or_else(|| {
            Error::Other(format!("frame of {} doubles is too large", self.data_size))
        })?;
        let mut buf = vec![0; len];
        self.read_exact(&mut buf)?;
        self.stream.write_all(&[Marker::Received.byte()])?;
        Ok(protocol::decode_frame(&buf))
    }

    /// Closes the connection. Target clients first send `FINISHED`, following
    /// the acknowledgment of the last received frame. The server only reads
    /// it once it has written out the next frame.
    pub fn finish(mut self) -> Result<()> {
        if self.direction == Direction::Target {
            self.stream.write_all(&[Marker::Finished.byte()])?;
        }
        self.stream.shutdown(Shutdown::Both)?;
        Ok(())
    }
}
