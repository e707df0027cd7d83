//! This library provides the networking core used to stream per-timestep
//! sample vectors between an experiment engine and external numeric clients.
//!
//! # Overview
//!
//! A `Server` listens on a single TCP port. Every client that connects gets
//! its own `Connection`, running on a dedicated thread. The connection first
//! goes through a short byte-level handshake in which the client announces
//! the data direction, the data type and the number of doubles exchanged per
//! timestep. After that both sides exchange fixed-size frames of doubles,
//! each frame acknowledged with a single byte.
//!
//! Connections are kept in a `Registry`, which also owns the cooperative stop
//! flag shared by the listener and all the connection threads. The host
//! application interacts with running connections only through the
//! `ServerHandle`: polling status flags, pushing samples to clients that
//! consume data and pulling frames from clients that produce it.
//!
//! # Data direction
//!
//! Direction is always expressed from the client's point of view. A client
//! announcing itself as a *target* receives frames from the server, while a
//! *source* client sends frames to the server.
//!
//! # Limitations
//!
//! Only analog (numeric) data is supported. Spike and impulse data types are
//! recognized by the handshake, but any attempt to negotiate them fails the
//! connection. There is no authentication or encryption, the socket is plain
//! TCP.

#[macro_use]
extern crate log;

pub mod protocol;

mod client;
mod config;
mod connection;
mod error;
mod handshake;
#[cfg(test)]
mod mock;
mod registry;
mod retry;
mod server;
mod transport;
mod util;

pub use client::Client;
pub use config::{
    ServerConfig, COOPERATIVE_MAX_IDLE_READS, DEFAULT_MAX_DATA_SIZE, DEFAULT_PORT,
    THREADED_MAX_IDLE_READS,
};
pub use connection::{Connection, ConnectionId, ConnectionStatus, Session, Step};
pub use error::{Error, FailureKind, Result};
pub use handshake::{Handshake, HandshakeStage, Negotiated};
pub use protocol::{DataType, Direction, Marker};
pub use registry::Registry;
pub use retry::IdleCounter;
pub use server::{QueryStatus, Server, ServerHandle};
pub use transport::StreamInterface;
