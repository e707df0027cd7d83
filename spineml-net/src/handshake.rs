//! Handshake performed at the start of every connection.
//!
//! The client announces, in three separate steps, the data direction, the
//! data type and the number of doubles exchanged per timestep. Each step is
//! acknowledged by the server with a single byte. Stages only ever move
//! forward, and every negotiated value is written exactly once.

use std::fmt::{Display, Formatter};
use std::io::{Read, Write};

use crate::protocol::{self, DataType, Direction, Marker};
use crate::config::DEFAULT_MAX_DATA_SIZE;
use crate::retry::IdleCounter;
use crate::{Error, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandshakeStage {
    AwaitingDirection,
    AwaitingDataType,
    AwaitingDataSize,
    Complete,
}

impl HandshakeStage {
    /// Number of bytes the client is expected to send in this stage.
    pub fn expected_len(&self) -> usize {
        match self {
            HandshakeStage::AwaitingDirection | HandshakeStage::AwaitingDataType => 1,
            HandshakeStage::AwaitingDataSize => 4,
            HandshakeStage::Complete => 0,
        }
    }
}

impl Display for HandshakeStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingDirection => write!(f, "awaiting direction"),
            Self::AwaitingDataType => write!(f, "awaiting data type"),
            Self::AwaitingDataSize => write!(f, "awaiting data size"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Connection parameters agreed on during the handshake.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Negotiated {
    pub direction: Direction,
    pub data_type: DataType,
    /// Number of doubles per timestep
    pub data_size: u32,
}

/// Server side of the handshake.
#[derive(Debug)]
pub struct Handshake {
    stage: HandshakeStage,
    direction: Direction,
    data_type: DataType,
    data_size: u32,
    max_data_size: u32,
}

impl Default for Handshake {
    fn default() -> Self {
        Handshake {
            stage: HandshakeStage::AwaitingDirection,
            direction: Direction::Unset,
            data_type: DataType::Unset,
            data_size: 0,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
        }
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handshake rejecting clients that ask for more than
    /// `max_data_size` doubles per timestep.
    pub fn with_max_data_size(max_data_size: u32) -> Self {
        Handshake {
            max_data_size,
            ..Self::default()
        }
    }

    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Makes a single attempt at completing the current stage.
    ///
    /// Returns the negotiated parameters once the last stage is done. If
    /// nothing was available to read the idle counter is bumped and `None`
    /// is returned, the caller is expected to try again later.
    pub fn poll<S: Read + Write>(
        &mut self,
        stream: &mut S,
        idle: &mut IdleCounter,
    ) -> Result<Option<Negotiated>> {
        let expected = self.stage.expected_len();
        if expected == 0 {
            return Err(Error::InvalidState(
                "handshake already complete".to_string(),
            ));
        }

        let mut buf = [0u8; 4];
        let count = protocol::try_read(stream, &mut buf[..expected])?;
        if count == 0 {
            if idle.count() == 0 {
                trace!("handshake {}: no data yet", self.stage);
            }
            idle.record_idle()?;
            return Ok(None);
        }
        idle.reset();
        trace!("handshake {}: got {:?}", self.stage, &buf[..count]);

        match self.stage {
            HandshakeStage::AwaitingDirection => {
                let direction = Direction::from_byte(buf[0]).ok_or(Error::UnexpectedByte {
                    stage: self.stage,
                    byte: buf[0],
                })?;
                protocol::write_marker(stream, Marker::Hello)?;
                self.direction = direction;
                self.stage = HandshakeStage::AwaitingDataType;
                debug!("client direction: {}", direction);
                Ok(None)
            }
            HandshakeStage::AwaitingDataType => {
                let data_type = DataType::from_byte(buf[0]).ok_or(Error::UnexpectedByte {
                    stage: self.stage,
                    byte: buf[0],
                })?;
                if !data_type.is_supported() {
                    return Err(Error::Unimplemented(data_type));
                }
                protocol::write_marker(stream, Marker::Received)?;
                self.data_type = data_type;
                self.stage = HandshakeStage::AwaitingDataSize;
                debug!("client data type: {}", data_type);
                Ok(None)
            }
            HandshakeStage::AwaitingDataSize => {
                if count != expected {
                    return Err(Error::WrongByteCount {
                        expected,
                        actual: count,
                    });
                }
                let data_size = protocol::decode_data_size(buf);
                if data_size > self.max_data_size {
                    return Err(Error::DataSizeTooLarge {
                        size: data_size,
                        max: self.max_data_size,
                    });
                }
                protocol::write_marker(stream, Marker::Received)?;
                self.data_size = data_size;
                self.stage = HandshakeStage::Complete;
                debug!("client data size: {} doubles per timestep", data_size);
                Ok(Some(Negotiated {
                    direction: self.direction,
                    data_type: self.data_type,
                    data_size: self.data_size,
                }))
            }
            HandshakeStage::Complete => unreachable!(),
        }
    }
}
