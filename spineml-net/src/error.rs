use std::net::SocketAddr;

use thiserror::Error;

use crate::handshake::HandshakeStage;
use crate::protocol::DataType;

pub type Result<T> = core::result::Result<T, Error>;

/// Enumeration of errors that may occur during network operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unexpected byte {byte:#04x} while {stage}")]
    UnexpectedByte { stage: HandshakeStage, byte: u8 },
    #[error("read {actual} bytes, expected {expected}")]
    WrongByteCount { expected: usize, actual: usize },
    #[error("data size {size} exceeds the limit of {max} doubles")]
    DataSizeTooLarge { size: u32, max: u32 },
    #[error("unexpected acknowledgment byte {0:#04x}")]
    UnexpectedAck(u8),
    #[error("peer aborted the connection")]
    PeerAborted,
    #[error("peer finished the exchange")]
    PeerFinished,

    #[error("timed out after {reads} reads without data")]
    TimedOut { reads: u32 },

    #[error("wrote {written} bytes, expected {expected}")]
    ShortWrite { expected: usize, written: usize },
    #[error("peer disconnected")]
    PeerDisconnected,
    #[error("socket closed")]
    SocketClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data type not implemented: {0}")]
    Unimplemented(DataType),

    #[error("failed binding listener to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Config(String),
    #[error("failed parsing config: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("invalid connection state: {0}")]
    InvalidState(String),

    #[error("other: {0}")]
    Other(String),
}

/// Coarse classification of connection failures.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureKind {
    /// Unexpected byte value or wrong byte count
    ProtocolViolation,
    /// Bounded retry counter exceeded
    Timeout,
    /// System call failure or write count mismatch
    Io,
    /// Spike or impulse negotiation was requested
    Unimplemented,
    /// Anything not caused by the peer
    Internal,
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::UnexpectedByte { .. }
            | Error::UnexpectedAck(_)
            | Error::WrongByteCount { .. }
            | Error::DataSizeTooLarge { .. }
            | Error::PeerAborted => FailureKind::ProtocolViolation,
            Error::TimedOut { .. } => FailureKind::Timeout,
            Error::ShortWrite { .. }
            | Error::PeerDisconnected
            | Error::SocketClosed
            | Error::Io(_)
            | Error::Bind { .. } => FailureKind::Io,
            Error::Unimplemented(_) => FailureKind::Unimplemented,
            _ => FailureKind::Internal,
        }
    }

    /// Orderly endings don't mark a connection as failed.
    pub fn is_orderly(&self) -> bool {
        matches!(self, Error::SocketClosed | Error::PeerFinished)
    }
}
