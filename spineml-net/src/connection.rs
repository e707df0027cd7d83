//! Single client connection.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::handshake::{Handshake, Negotiated};
use crate::protocol::{self, DataType, Direction, Marker};
use crate::retry::IdleCounter;
use crate::transport::StreamInterface;
use crate::util::lock;
use crate::{Error, FailureKind, Result, ServerConfig};

/// Largest number of bytes asked for by a single read of frame data.
const READ_CHUNK: usize = 64 * 1024;

/// Registry-unique identifier of a connection.
pub type ConnectionId = u32;

/// Outcome of a single step of the connection's protocol loop.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Step {
    /// Nothing was available to read
    Idle,
    /// Handshake moved on to the next stage
    Advanced,
    /// Handshake finished
    Established,
    /// Not enough samples were queued by the host to make up a frame
    Waiting,
    /// Frame was written to a target client
    Sent,
    /// Part of a frame was read from a source client
    Partial,
    /// Whole frame was read from a source client and acknowledged
    Received,
}

/// Protocol progress of a connection, owned by whatever drives its I/O.
#[derive(Debug)]
pub struct Session {
    handshake: Handshake,
    idle: IdleCounter,
    negotiated: Option<Negotiated>,
    /// Samples of the frame currently being read from a source client
    samples: Vec<f64>,
    /// Trailing bytes of an incomplete sample
    carry: Vec<u8>,
    /// Reusable read buffer, at most `READ_CHUNK` bytes
    chunk: Vec<u8>,
}

impl Session {
    pub fn new(max_idle_reads: u32, max_data_size: u32) -> Self {
        Session {
            handshake: Handshake::with_max_data_size(max_data_size),
            idle: IdleCounter::new(max_idle_reads),
            negotiated: None,
            samples: Vec::new(),
            carry: Vec::with_capacity(protocol::SAMPLE_SIZE),
            chunk: Vec::new(),
        }
    }
}

/// State shared with the host, guarded by the connection mutex.
#[derive(Debug, Default)]
struct Shared {
    negotiated: Option<Negotiated>,
    queue: VecDeque<f64>,
    unacknowledged: bool,
    failure: Option<(FailureKind, String)>,
}

#[derive(Debug, Copy, Clone)]
struct Settings {
    max_idle_reads: u32,
    max_data_size: u32,
    idle_wait: Duration,
    frame_wait: Duration,
    write_timeout: Duration,
}

/// Connection with a single client, as seen by the server.
///
/// # Threading
///
/// A connection is driven by a single thread calling `run` (or repeatedly
/// calling `step`), while the host application inspects it and moves samples
/// in and out from any other thread. Status flags are atomics, samples and
/// negotiated parameters sit behind a mutex that is only ever held for the
/// duration of a copy.
///
/// # Data flow
///
/// For target clients the host pushes samples with `push_samples`, and
/// every `data_size` queued samples are sent out as a single frame. For
/// source clients each received frame is appended to the same queue, from
/// where the host takes it with `pop_frame`.
///
/// Frames are written within the configured write timeout, retrying while
/// the socket buffer is full. Frames read from source clients are decoded as
/// the bytes arrive, memory grows with the data actually received rather
/// than with the negotiated size.
///
/// A target connection only reads from the socket while it waits for an
/// acknowledgment. A target client that finishes or disconnects while no
/// frame is in flight is noticed only after the host queues the next frame.
pub struct Connection<S: StreamInterface = TcpStream> {
    id: ConnectionId,
    peer_addr: SocketAddr,
    accepted_at: DateTime<Utc>,
    settings: Settings,

    stream: Mutex<Option<S>>,
    shared: Mutex<Shared>,

    established: AtomicBool,
    failed: AtomicBool,
    updated: AtomicBool,
}

impl<S: StreamInterface> Connection<S> {
    pub fn new(id: ConnectionId, stream: S, peer_addr: SocketAddr, config: &ServerConfig) -> Self {
        Connection {
            id,
            peer_addr,
            accepted_at: Utc::now(),
            settings: Settings {
                max_idle_reads: config.max_idle_reads,
                max_data_size: config.max_data_size,
                idle_wait: config.idle_wait(),
                frame_wait: config.frame_wait(),
                write_timeout: config.write_timeout(),
            },
            stream: Mutex::new(Some(stream)),
            shared: Mutex::new(Shared::default()),
            established: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            updated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Whether new frames from a source client are waiting in the queue.
    pub fn is_updated(&self) -> bool {
        self.updated.load(Ordering::Acquire)
    }

    /// Whether the socket was released, either by the connection itself or
    /// by the host.
    pub fn is_closed(&self) -> bool {
        lock(&self.stream).is_none()
    }

    pub fn direction(&self) -> Direction {
        lock(&self.shared)
            .negotiated
            .map(|n| n.direction)
            .unwrap_or_default()
    }

    pub fn data_type(&self) -> DataType {
        lock(&self.shared)
            .negotiated
            .map(|n| n.data_type)
            .unwrap_or_default()
    }

    /// Number of doubles per timestep, zero until the handshake is done.
    pub fn data_size(&self) -> u32 {
        lock(&self.shared)
            .negotiated
            .map(|n| n.data_size)
            .unwrap_or(0)
    }

    /// Whether a frame was sent to a target client and not yet acknowledged.
    pub fn is_unacknowledged(&self) -> bool {
        lock(&self.shared).unacknowledged
    }

    /// Kind and description of the error that failed this connection.
    pub fn failure(&self) -> Option<(FailureKind, String)> {
        lock(&self.shared).failure.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        let shared = lock(&self.shared);
        let negotiated = shared.negotiated;
        ConnectionStatus {
            id: self.id,
            peer_addr: self.peer_addr,
            accepted_at: self.accepted_at,
            direction: negotiated.map(|n| n.direction).unwrap_or_default(),
            data_type: negotiated.map(|n| n.data_type).unwrap_or_default(),
            data_size: negotiated.map(|n| n.data_size).unwrap_or(0),
            established: self.is_established(),
            failed: self.is_failed(),
            updated: self.is_updated(),
            queued: shared.queue.len(),
            failure: shared.failure.as_ref().map(|(kind, _)| *kind),
        }
    }

    /// Queues samples to be sent out to a target client.
    pub fn push_samples(&self, samples: &[f64]) {
        lock(&self.shared).queue.extend(samples.iter().copied());
    }

    /// Takes a single frame of `data_size` samples off the queue.
    pub fn pop_frame(&self) -> Option<Vec<f64>> {
        let mut shared = lock(&self.shared);
        let size = shared.negotiated.map(|n| n.data_size as usize).unwrap_or(0);
        if size == 0 || shared.queue.len() < size {
            return None;
        }
        let frame = shared.queue.drain(..size).collect();
        if shared.queue.len() < size {
            self.updated.store(false, Ordering::Release);
        }
        Some(frame)
    }

    /// Takes all the queued samples.
    pub fn drain_samples(&self) -> Vec<f64> {
        let mut shared = lock(&self.shared);
        self.updated.store(false, Ordering::Release);
        shared.queue.drain(..).collect()
    }

    /// Number of samples currently queued.
    pub fn queued(&self) -> usize {
        lock(&self.shared).queue.len()
    }

    /// Closes the socket if it's still open. Calling it again does nothing.
    pub fn close_socket(&self) {
        if let Some(mut stream) = lock(&self.stream).take() {
            if let Err(e) = stream.close() {
                debug!("connection {}: failed shutting down stream: {}", self.id, e);
            }
            debug!("connection {}: socket closed", self.id);
        }
        self.established.store(false, Ordering::Release);
    }

    pub fn session(&self) -> Session {
        Session::new(self.settings.max_idle_reads, self.settings.max_data_size)
    }

    /// Performs a single step of the protocol, either a handshake stage
    /// attempt or one iteration of the data exchange.
    ///
    /// Any error other than the socket being closed or the client finishing
    /// the exchange marks the connection as failed.
    pub fn step(&self, session: &mut Session) -> Result<Step> {
        if self.is_failed() {
            return Err(Error::InvalidState(format!(
                "connection {} already failed",
                self.id
            )));
        }
        let negotiated = session.negotiated;
        let result = self.with_stream(|stream| match negotiated {
            None => self.handshake_step(stream, session),
            Some(negotiated) => match negotiated.direction {
                Direction::Target => self.target_step(stream, session, negotiated.data_size),
                Direction::Source => self.source_step(stream, session, negotiated.data_size),
                Direction::Unset => Err(Error::InvalidState(
                    "data direction not set after handshake".to_string(),
                )),
            },
        });
        if let Err(e) = &result {
            if !e.is_orderly() {
                self.fail(e);
            }
        }
        result
    }

    /// Drives the connection until it fails, gets closed or `stop` is set,
    /// then closes the socket.
    pub fn run(&self, stop: &AtomicBool) {
        info!("connection {}: started for {}", self.id, self.peer_addr);
        let mut session = self.session();
        while !stop.load(Ordering::Acquire) {
            match self.step(&mut session) {
                Ok(Step::Idle) | Ok(Step::Waiting) => thread::sleep(self.settings.idle_wait),
                Ok(Step::Sent) => thread::sleep(self.settings.frame_wait),
                Ok(_) => (),
                Err(e) => {
                    if e.is_orderly() {
                        info!("connection {}: {}", self.id, e);
                    }
                    break;
                }
            }
        }
        self.close_socket();
        info!("connection {}: finished", self.id);
    }

    fn with_stream<T>(&self, f: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        match lock(&self.stream).as_mut() {
            Some(stream) => f(stream),
            None => Err(Error::SocketClosed),
        }
    }

    fn fail(&self, e: &Error) {
        warn!("connection {}: failed: {}", self.id, e);
        lock(&self.shared).failure = Some((e.kind(), e.to_string()));
        self.failed.store(true, Ordering::Release);
        self.established.store(false, Ordering::Release);
    }

    fn handshake_step(&self, stream: &mut S, session: &mut Session) -> Result<Step> {
        match session.handshake.poll(stream, &mut session.idle)? {
            Some(negotiated) => {
                lock(&self.shared).negotiated = Some(negotiated);
                session.negotiated = Some(negotiated);
                self.established.store(true, Ordering::Release);
                info!(
                    "connection {}: established, {} {} x{}",
                    self.id, negotiated.direction, negotiated.data_type, negotiated.data_size
                );
                Ok(Step::Established)
            }
            None if session.idle.count() > 0 => Ok(Step::Idle),
            None => Ok(Step::Advanced),
        }
    }

    fn target_step(&self, stream: &mut S, session: &mut Session, data_size: u32) -> Result<Step> {
        if lock(&self.shared).unacknowledged {
            let mut buf = [0u8; 1];
            if protocol::try_read(stream, &mut buf)? == 0 {
                session.idle.record_idle()?;
                return Ok(Step::Idle);
            }
            session.idle.reset();
            match Marker::parse(buf[0]) {
                Some(Marker::Received) => lock(&self.shared).unacknowledged = false,
                Some(Marker::Abort) => return Err(Error::PeerAborted),
                Some(Marker::Finished) => return Err(Error::PeerFinished),
                _ => return Err(Error::UnexpectedAck(buf[0])),
            }
        }

        let size = data_size as usize;
        let samples: Vec<f64> = {
            let mut shared = lock(&self.shared);
            if size == 0 || shared.queue.len() < size {
                return Ok(Step::Waiting);
            }
            shared.queue.drain(..size).collect()
        };
        protocol::write_all_within(
            stream,
            &protocol::encode_frame(&samples),
            self.settings.write_timeout,
            self.settings.idle_wait,
        )?;
        lock(&self.shared).unacknowledged = true;
        trace!("connection {}: sent frame of {} samples", self.id, size);
        Ok(Step::Sent)
    }

    fn source_step(&self, stream: &mut S, session: &mut Session, data_size: u32) -> Result<Step> {
        let size = data_size as usize;
        if size == 0 {
            return Ok(Step::Waiting);
        }
        // never ask for more than what's left of the current frame
        let remaining = (size - session.samples.len()) as u64 * protocol::SAMPLE_SIZE as u64
            - session.carry.len() as u64;
        let want = remaining.min(READ_CHUNK as u64) as usize;
        if session.chunk.len() < want {
            session.chunk.resize(want, 0);
        }

        let count = protocol::try_read(stream, &mut session.chunk[..want])?;
        if count == 0 {
            session.idle.record_idle()?;
            return Ok(Step::Idle);
        }
        session.idle.reset();

        session.carry.extend_from_slice(&session.chunk[..count]);
        let whole = session.carry.len() / protocol::SAMPLE_SIZE * protocol::SAMPLE_SIZE;
        session
            .samples
            .extend(protocol::decode_frame(&session.carry[..whole]));
        session.carry.drain(..whole);
        if session.samples.len() < size {
            return Ok(Step::Partial);
        }

        let samples = std::mem::take(&mut session.samples);
        lock(&self.shared).queue.extend(samples);
        self.updated.store(true, Ordering::Release);
        protocol::write_marker(stream, Marker::Received)?;
        trace!("connection {}: received frame of {} samples", self.id, data_size);
        Ok(Step::Received)
    }
}

impl<S: StreamInterface + 'static> Connection<S> {
    /// Runs the connection on a new dedicated thread.
    pub fn spawn(self: Arc<Self>, stop: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(format!("connection-{}", self.id))
            .spawn(move || self.run(&stop))?;
        Ok(handle)
    }
}

/// Snapshot of a connection's state.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub accepted_at: DateTime<Utc>,
    pub direction: Direction,
    pub data_type: DataType,
    pub data_size: u32,
    pub established: bool,
    pub failed: bool,
    pub updated: bool,
    /// Number of samples waiting in the queue
    pub queued: usize,
    pub failure: Option<FailureKind>,
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = if self.failed {
            "failed"
        } else if self.established {
            "established"
        } else {
            "pending"
        };
        write!(
            f,
            "#{} {} [{}] {} {} x{} (queued: {}, since {})",
            self.id,
            self.peer_addr,
            state,
            self.direction,
            self.data_type,
            self.data_size,
            self.queued,
            self.accepted_at.format("%H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedStream;

    fn connection(chunks: Vec<Vec<u8>>, max_idle_reads: u32) -> Connection<ScriptedStream> {
        let config = ServerConfig {
            max_idle_reads,
            ..Default::default()
        };
        Connection::new(
            1,
            ScriptedStream::new(chunks),
            "127.0.0.1:40000".parse().unwrap(),
            &config,
        )
    }

    fn establish(conn: &Connection<ScriptedStream>, session: &mut Session) {
        loop {
            match conn.step(session).unwrap() {
                Step::Established => return,
                _ => continue,
            }
        }
    }

    fn written(conn: &Connection<ScriptedStream>) -> Vec<u8> {
        conn.with_stream(|s| Ok(s.written.clone())).unwrap()
    }

    fn writes(conn: &Connection<ScriptedStream>) -> Vec<usize> {
        conn.with_stream(|s| Ok(s.writes.clone())).unwrap()
    }

    fn push_chunk(conn: &Connection<ScriptedStream>, chunk: Vec<u8>) {
        conn.with_stream(|s| {
            s.push(chunk);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn handshake_sets_parameters() {
        let conn = connection(vec![vec![46], vec![31], vec![3, 0, 0, 0]], 10);
        assert!(!conn.is_established());
        assert_eq!(conn.direction(), Direction::Unset);
        let mut session = conn.session();
        establish(&conn, &mut session);
        assert!(conn.is_established());
        assert!(!conn.is_failed());
        assert_eq!(conn.direction(), Direction::Target);
        assert_eq!(conn.data_type(), DataType::Analog);
        assert_eq!(conn.data_size(), 3);
    }

    #[test]
    fn target_frames_are_exact_and_acknowledged() {
        let conn = connection(vec![vec![46], vec![31], vec![3, 0, 0, 0]], 10);
        let mut session = conn.session();
        establish(&conn, &mut session);

        // nothing queued yet
        assert_eq!(conn.step(&mut session).unwrap(), Step::Waiting);

        conn.push_samples(&[1., 2., 3., 4., 5., 6., 7.]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Sent);
        assert!(conn.is_unacknowledged());

        // waiting for the acknowledgment
        assert_eq!(conn.step(&mut session).unwrap(), Step::Idle);
        push_chunk(&conn, vec![Marker::Received.byte()]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Sent);

        // single sample left, not enough for a frame
        push_chunk(&conn, vec![Marker::Received.byte()]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Waiting);
        assert!(!conn.is_unacknowledged());
        assert_eq!(conn.queued(), 1);

        let written = written(&conn);
        assert_eq!(&written[..3], &[41, 42, 42]);
        assert_eq!(&writes(&conn)[3..], &[24, 24]);
        assert_eq!(
            protocol::decode_frame(&written[3..]),
            vec![1., 2., 3., 4., 5., 6.]
        );
    }

    #[test]
    fn wrong_acknowledgment_fails() {
        let conn = connection(vec![vec![46], vec![31], vec![1, 0, 0, 0]], 10);
        let mut session = conn.session();
        establish(&conn, &mut session);
        conn.push_samples(&[1.]);
        conn.step(&mut session).unwrap();
        push_chunk(&conn, vec![b'x']);
        assert!(matches!(
            conn.step(&mut session),
            Err(Error::UnexpectedAck(b'x'))
        ));
        assert!(conn.is_failed());
        assert!(!conn.is_established());
        assert_eq!(
            conn.failure().map(|(kind, _)| kind),
            Some(FailureKind::ProtocolViolation)
        );
        // failed connections stay failed
        assert!(conn.step(&mut session).is_err());
    }

    #[test]
    fn finished_is_not_a_failure() {
        let conn = connection(vec![vec![46], vec![31], vec![1, 0, 0, 0]], 10);
        let mut session = conn.session();
        establish(&conn, &mut session);
        conn.push_samples(&[1.]);
        conn.step(&mut session).unwrap();
        push_chunk(&conn, vec![Marker::Finished.byte()]);
        assert!(matches!(conn.step(&mut session), Err(Error::PeerFinished)));
        assert!(!conn.is_failed());
    }

    #[test]
    fn missing_acknowledgment_times_out() {
        let conn = connection(vec![vec![46], vec![31], vec![1, 0, 0, 0]], 4);
        let mut session = conn.session();
        establish(&conn, &mut session);
        conn.push_samples(&[1.]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Sent);
        for _ in 0..4 {
            assert_eq!(conn.step(&mut session).unwrap(), Step::Idle);
            assert!(!conn.is_failed());
        }
        assert!(matches!(
            conn.step(&mut session),
            Err(Error::TimedOut { .. })
        ));
        assert!(conn.is_failed());
        assert_eq!(
            conn.failure().map(|(kind, _)| kind),
            Some(FailureKind::Timeout)
        );
    }

    #[test]
    fn source_frames_are_queued_and_acknowledged() {
        let frame = protocol::encode_frame(&[0.5, -1.5]);
        let conn = connection(
            vec![
                vec![45],
                vec![31],
                vec![2, 0, 0, 0],
                frame[..5].to_vec(),
                vec![],
                frame[5..].to_vec(),
            ],
            10,
        );
        let mut session = conn.session();
        establish(&conn, &mut session);
        assert!(!conn.is_updated());

        assert_eq!(conn.step(&mut session).unwrap(), Step::Partial);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Idle);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Received);
        assert!(conn.is_updated());
        assert_eq!(written(&conn), vec![41, 42, 42, 42]);

        assert_eq!(conn.pop_frame(), Some(vec![0.5, -1.5]));
        assert!(!conn.is_updated());
        assert_eq!(conn.pop_frame(), None);
    }

    #[test]
    fn large_target_frame_survives_partial_writes() {
        let conn = connection(vec![vec![46], vec![31], vec![0xe8, 0x03, 0, 0]], 10);
        let mut session = conn.session();
        establish(&conn, &mut session);
        conn.with_stream(|s| {
            s.write_limit = Some(1000);
            Ok(())
        })
        .unwrap();
        let samples: Vec<f64> = (0..1000).map(f64::from).collect();
        conn.push_samples(&samples);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Sent);
        assert!(!conn.is_failed());
        assert_eq!(&writes(&conn)[3..], &[1000; 8]);
        assert_eq!(protocol::decode_frame(&written(&conn)[3..]), samples);
    }

    #[test]
    fn finish_after_last_ack_is_seen_with_next_frame() {
        let conn = connection(vec![vec![46], vec![31], vec![1, 0, 0, 0]], 10);
        let mut session = conn.session();
        establish(&conn, &mut session);
        conn.push_samples(&[1.]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Sent);
        push_chunk(&conn, vec![Marker::Received.byte(), Marker::Finished.byte()]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Waiting);
        // nothing in flight, so the finished marker stays unread
        assert_eq!(conn.step(&mut session).unwrap(), Step::Waiting);
        conn.push_samples(&[2.]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Sent);
        assert!(matches!(conn.step(&mut session), Err(Error::PeerFinished)));
        assert!(!conn.is_failed());
    }

    #[test]
    fn oversized_data_size_fails_handshake() {
        let conn = connection(
            vec![vec![45], vec![31], vec![255, 255, 255, 255], vec![1]],
            10,
        );
        let mut session = conn.session();
        assert_eq!(conn.step(&mut session).unwrap(), Step::Advanced);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Advanced);
        assert!(matches!(
            conn.step(&mut session),
            Err(Error::DataSizeTooLarge { size: u32::MAX, .. })
        ));
        assert!(conn.is_failed());
        assert!(!conn.is_established());
        assert_eq!(
            conn.failure().map(|(kind, _)| kind),
            Some(FailureKind::ProtocolViolation)
        );
        assert_eq!(written(&conn), vec![41, 42]);
    }

    #[test]
    fn huge_source_frame_is_read_as_it_arrives() {
        let config = ServerConfig {
            max_data_size: u32::MAX,
            ..Default::default()
        };
        let conn = Connection::new(
            1,
            ScriptedStream::new(vec![vec![45], vec![31], vec![255, 255, 255, 255], vec![1]]),
            "127.0.0.1:40000".parse().unwrap(),
            &config,
        );
        let mut session = conn.session();
        establish(&conn, &mut session);
        assert_eq!(conn.data_size(), u32::MAX);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Partial);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Idle);
        assert_eq!(conn.queued(), 0);
        assert!(!conn.is_failed());
        assert!(session.chunk.len() <= READ_CHUNK);
    }

    #[test]
    fn source_samples_split_across_reads() {
        let frame = protocol::encode_frame(&[1.0, 2.0, 3.0]);
        let conn = connection(
            vec![
                vec![45],
                vec![31],
                vec![3, 0, 0, 0],
                frame[..3].to_vec(),
                frame[3..13].to_vec(),
                frame[13..].to_vec(),
            ],
            10,
        );
        let mut session = conn.session();
        establish(&conn, &mut session);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Partial);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Partial);
        assert_eq!(session.samples, vec![1.0]);
        assert_eq!(conn.step(&mut session).unwrap(), Step::Received);
        assert_eq!(conn.pop_frame(), Some(vec![1.0, 2.0, 3.0]));
        assert!(session.samples.is_empty());
        assert!(session.carry.is_empty());
    }

    #[test]
    fn peer_disconnect_fails() {
        let conn = connection(vec![vec![45]], 10);
        conn.with_stream(|s| {
            s.eof = true;
            Ok(())
        })
        .unwrap();
        let mut session = conn.session();
        assert_eq!(conn.step(&mut session).unwrap(), Step::Advanced);
        assert!(matches!(
            conn.step(&mut session),
            Err(Error::PeerDisconnected)
        ));
        assert!(conn.is_failed());
    }

    #[test]
    fn close_socket_is_idempotent() {
        let conn = connection(vec![vec![46], vec![31], vec![3, 0, 0, 0]], 10);
        let mut session = conn.session();
        establish(&conn, &mut session);
        conn.close_socket();
        assert!(!conn.is_established());
        assert!(conn.is_closed());
        conn.close_socket();
        assert!(!conn.is_established());
        assert!(matches!(conn.step(&mut session), Err(Error::SocketClosed)));
        assert!(!conn.is_failed());
    }

    #[test]
    fn run_exits_on_stop() {
        let conn = connection(vec![], 1000);
        let stop = AtomicBool::new(true);
        conn.run(&stop);
        assert!(conn.is_closed());
        assert!(!conn.is_failed());
    }
}
