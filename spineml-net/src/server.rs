//! Listening side of the protocol.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::connection::{Connection, ConnectionId};
use crate::registry::Registry;
use crate::{Error, Result, ServerConfig};

/// Aggregate status of all connections, as seen by the host.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct QueryStatus {
    /// At least one connection has failed
    pub failed: bool,
    /// At least one source connection has new frames waiting
    pub updated: bool,
}

/// Entry point for starting the server.
pub struct Server;

impl Server {
    /// Binds the listener and starts accepting connections on a background
    /// thread.
    pub fn start(config: ServerConfig) -> Result<ServerHandle> {
        config.validate()?;
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        set_backlog(&listener, config.backlog).map_err(|source| Error::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);

        let registry = Arc::new(Registry::new());
        let stop = registry.stop_flag();
        let _registry = registry.clone();
        let listener_thread = thread::Builder::new()
            .name("spineml-listener".to_string())
            .spawn(move || accept_loop(listener, config, _registry, stop))?;

        Ok(ServerHandle {
            local_addr,
            registry,
            listener: Some(listener_thread),
        })
    }
}

#[cfg(unix)]
fn set_backlog(listener: &TcpListener, backlog: u32) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let backlog = backlog.min(libc::c_int::max_value() as u32) as libc::c_int;
    // calling listen again on a listening socket only updates the queue length
    let res = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if res != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_backlog(_listener: &TcpListener, _backlog: u32) -> std::io::Result<()> {
    Ok(())
}

fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<Registry>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = accept(stream, peer_addr, &config, &registry) {
                    error!("failed setting up connection from {}: {}", peer_addr, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(config.poll_wait()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("failed accepting connection: {}", e);
                thread::sleep(config.poll_wait());
            }
        }
    }
    debug!("listener stopped");
}

fn accept(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: &ServerConfig,
    registry: &Registry,
) -> Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    let id = registry.next_id()?;
    let connection = Arc::new(Connection::new(id, stream, peer_addr, config));
    let thread = connection.clone().spawn(registry.stop_flag())?;
    registry.register(connection, Some(thread));
    info!("accepted connection {} from {}", id, peer_addr);
    Ok(())
}

/// Handle to a running server.
///
/// Dropping the handle stops the server the same way `stop` does.
pub struct ServerHandle {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    listener: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to, with the actual port when the
    /// configured one was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.registry.get(id)
    }

    pub fn query(&self) -> QueryStatus {
        QueryStatus {
            failed: self.registry.any_failed(),
            updated: self.registry.any_updated(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some() && !self.registry.is_stopping()
    }

    /// Stops accepting new connections, closes all the existing ones and
    /// waits for every thread to finish.
    pub fn stop(&mut self) {
        self.registry.stop_flag().store(true, Ordering::Release);
        if let Some(handle) = self.listener.take() {
            if handle.join().is_err() {
                error!("listener thread panicked");
            }
            info!("server on {} stopped", self.local_addr);
        }
        self.registry.shutdown();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
