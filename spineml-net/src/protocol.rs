//! Wire-level definitions for the streaming protocol.
//!
//! Every exchange on the wire is either a single marker byte, the 4-byte data
//! size sent during the handshake, or a frame of raw doubles. Frames carry no
//! length prefix, their size is fixed for the lifetime of a connection.

use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::io::{ErrorKind, Read, Write};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian, NativeEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, Result};

/// Size of a single sample on the wire.
pub const SAMPLE_SIZE: usize = std::mem::size_of::<f64>();

/// Byte accepted in place of `Marker::DataNums`, used by hand-written test
/// clients.
pub const DEBUG_NUMS_ALIAS: u8 = b'a';

/// List of all marker bytes understood by the protocol.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Marker {
    /// Client wants to exchange numeric (analog) data
    DataNums = 31,
    /// Client wants to exchange spikes, reserved
    DataSpikes = 32,
    /// Client wants to exchange impulses, reserved
    DataImpulses = 33,
    /// Response to the direction announcement
    Hello = 41,
    /// Acknowledgment of a handshake step or a frame
    Received = 42,
    Abort = 43,
    Finished = 44,
    /// Client announces it will send data
    AmSource = 45,
    /// Client announces it will receive data
    AmTarget = 46,
    NotSet = 99,
}

impl Marker {
    pub fn byte(self) -> u8 {
        self.into()
    }

    /// Parses a marker byte, returning `None` for bytes outside the protocol.
    pub fn parse(byte: u8) -> Option<Marker> {
        Marker::try_from(byte).ok()
    }
}

/// Data direction, as announced by the client.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    Unset,
    /// Client sends frames to the server
    Source,
    /// Client receives frames from the server
    Target,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Unset
    }
}

impl Direction {
    /// Interprets the first handshake byte.
    pub fn from_byte(byte: u8) -> Option<Direction> {
        match Marker::parse(byte)? {
            Marker::AmSource => Some(Direction::Source),
            Marker::AmTarget => Some(Direction::Target),
            _ => None,
        }
    }

    /// Marker byte a client sends to announce this direction.
    pub fn marker(&self) -> Marker {
        match self {
            Direction::Source => Marker::AmSource,
            Direction::Target => Marker::AmTarget,
            Direction::Unset => Marker::NotSet,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

impl FromStr for Direction {
    type Err = Error;
    fn from_str(s: &str) -> core::result::Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "source" | "src" => Ok(Direction::Source),
            "target" | "tgt" => Ok(Direction::Target),
            _ => Err(Error::Other(format!(
                "failed parsing direction from string: {}",
                s
            ))),
        }
    }
}

/// Type of data exchanged over a connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DataType {
    Unset,
    /// Doubles, one frame of `data_size` values per timestep
    Analog,
    /// Spikes, not implemented
    Event,
    /// Impulses, not implemented
    Impulse,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Unset
    }
}

impl DataType {
    /// Interprets the second handshake byte.
    pub fn from_byte(byte: u8) -> Option<DataType> {
        if byte == DEBUG_NUMS_ALIAS {
            return Some(DataType::Analog);
        }
        match Marker::parse(byte)? {
            Marker::DataNums => Some(DataType::Analog),
            Marker::DataSpikes => Some(DataType::Event),
            Marker::DataImpulses => Some(DataType::Impulse),
            _ => None,
        }
    }

    pub fn marker(&self) -> Marker {
        match self {
            DataType::Analog => Marker::DataNums,
            DataType::Event => Marker::DataSpikes,
            DataType::Impulse => Marker::DataImpulses,
            DataType::Unset => Marker::NotSet,
        }
    }

    pub fn is_supported(&self) -> bool {
        *self == DataType::Analog
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Analog => write!(f, "analog"),
            Self::Event => write!(f, "event"),
            Self::Impulse => write!(f, "impulse"),
        }
    }
}

/// Number of bytes in a frame of `data_size` samples, `None` if it doesn't
/// fit in `usize`.
pub fn frame_len(data_size: u32) -> Option<usize> {
    (data_size as usize).checked_mul(SAMPLE_SIZE)
}

/// Decodes the data size sent in the last handshake stage, least
/// significant byte first.
pub fn decode_data_size(bytes: [u8; 4]) -> u32 {
    LittleEndian::read_u32(&bytes)
}

pub fn encode_data_size(data_size: u32) -> [u8; 4] {
    let mut buf = [0; 4];
    LittleEndian::write_u32(&mut buf, data_size);
    buf
}

/// Encodes samples as raw doubles in native byte order.
pub fn encode_frame(samples: &[f64]) -> Vec<u8> {
    let mut buf = vec![0; samples.len() * SAMPLE_SIZE];
    NativeEndian::write_f64_into(samples, &mut buf);
    buf
}

/// Decodes raw doubles in native byte order. Trailing bytes that don't make
/// up a whole sample are ignored.
pub fn decode_frame(bytes: &[u8]) -> Vec<f64> {
    let count = bytes.len() / SAMPLE_SIZE;
    let mut samples = vec![0.; count];
    NativeEndian::read_f64_into(&bytes[..count * SAMPLE_SIZE], &mut samples);
    samples
}

/// Attempts a single non-blocking read.
///
/// Returns the number of bytes read, zero meaning nothing was available yet.
/// End of stream is reported as `Error::PeerDisconnected`.
pub fn try_read<S: Read>(stream: &mut S, buf: &mut [u8]) -> Result<usize> {
    match stream.read(buf) {
        Ok(0) if !buf.is_empty() => Err(Error::PeerDisconnected),
        Ok(n) => Ok(n),
        Err(ref e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
            Ok(0)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

/// Writes the whole buffer using a single write call. Partial writes are
/// never resumed.
pub fn write_once<S: Write>(stream: &mut S, bytes: &[u8]) -> Result<()> {
    let written = match stream.write(bytes) {
        Ok(n) => n,
        Err(ref e) if e.kind() == ErrorKind::WouldBlock => 0,
        Err(e) => return Err(Error::Io(e)),
    };
    if written != bytes.len() {
        return Err(Error::ShortWrite {
            expected: bytes.len(),
            written,
        });
    }
    Ok(())
}

/// Writes the whole buffer, retrying partial and would-block writes until
/// `timeout` runs out. Anything left unwritten at that point is reported as
/// a short write, as is a write that accepts zero bytes.
pub fn write_all_within<S: Write>(
    stream: &mut S,
    bytes: &[u8],
    timeout: Duration,
    wait: Duration,
) -> Result<()> {
    let start = Instant::now();
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => break,
            Ok(n) => {
                written += n;
                continue;
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => (),
            Err(e) => return Err(Error::Io(e)),
        }
        if start.elapsed() >= timeout {
            break;
        }
        thread::sleep(wait);
    }
    if written != bytes.len() {
        return Err(Error::ShortWrite {
            expected: bytes.len(),
            written,
        });
    }
    Ok(())
}

/// Writes a single marker byte.
pub fn write_marker<S: Write>(stream: &mut S, marker: Marker) -> Result<()> {
    write_once(stream, &[marker.byte()])
}
