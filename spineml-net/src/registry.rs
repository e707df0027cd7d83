use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use fnv::FnvHashMap;
use id_pool::IdPool;

use crate::connection::{Connection, ConnectionId, ConnectionStatus};
use crate::transport::StreamInterface;
use crate::util::lock;
use crate::{Error, Result};

struct Entry<S: StreamInterface> {
    connection: Arc<Connection<S>>,
    thread: Option<JoinHandle<()>>,
}

/// Collection of all the connections accepted by a server.
///
/// Owns the stop flag shared by the listener and every connection thread.
/// Connections are only ever removed by `reap` or `shutdown`, so ids handed
/// out to the host stay valid until then.
pub struct Registry<S: StreamInterface = TcpStream> {
    connections: Mutex<FnvHashMap<ConnectionId, Entry<S>>>,
    id_pool: Mutex<IdPool>,
    stop: Arc<AtomicBool>,
}

impl<S: StreamInterface> Default for Registry<S> {
    fn default() -> Self {
        Registry {
            connections: Mutex::new(FnvHashMap::default()),
            id_pool: Mutex::new(IdPool::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<S: StreamInterface> Registry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> Result<ConnectionId> {
        lock(&self.id_pool)
            .request_id()
            .ok_or_else(|| Error::Other("connection id pool exhausted".to_string()))
    }

    /// Adds a connection along with the handle of the thread driving it.
    pub fn register(&self, connection: Arc<Connection<S>>, thread: Option<JoinHandle<()>>) {
        let id = connection.id();
        lock(&self.connections).insert(id, Entry { connection, thread });
        debug!("registered connection {}", id);
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection<S>>> {
        lock(&self.connections)
            .get(&id)
            .map(|e| e.connection.clone())
    }

    /// Ids of all the registered connections, in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = lock(&self.connections).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn connections(&self) -> Vec<Arc<Connection<S>>> {
        let connections = lock(&self.connections);
        let mut out: Vec<_> = connections.values().map(|e| e.connection.clone()).collect();
        out.sort_by_key(|c| c.id());
        out
    }

    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn any_failed(&self) -> bool {
        lock(&self.connections)
            .values()
            .any(|e| e.connection.is_failed())
    }

    pub fn any_updated(&self) -> bool {
        lock(&self.connections)
            .values()
            .any(|e| e.connection.is_updated())
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.connections().iter().map(|c| c.status()).collect()
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Removes connections whose sockets were closed, joining their
    /// threads and returning their ids to the pool. Failed connections
    /// that still hold a socket are kept so the host can inspect them.
    pub fn reap(&self) -> Vec<ConnectionId> {
        let removed: Vec<Entry<S>> = {
            let mut connections = lock(&self.connections);
            let ids: Vec<_> = connections
                .iter()
                .filter(|(_, e)| e.connection.is_closed())
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| connections.remove(id)).collect()
        };

        let mut ids = Vec::with_capacity(removed.len());
        for entry in removed {
            let id = entry.connection.id();
            self.join(id, entry.thread);
            if lock(&self.id_pool).return_id(id).is_err() {
                warn!("connection {}: id was not taken from the pool", id);
            }
            debug!("reaped connection {}", id);
            ids.push(id);
        }
        ids.sort_unstable();
        ids
    }

    /// Sets the stop flag, closes every socket and joins every connection
    /// thread. Safe to call more than once.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let entries: Vec<Entry<S>> = lock(&self.connections).drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.connection.close_socket();
        }
        for entry in entries {
            self.join(entry.connection.id(), entry.thread);
        }
    }

    fn join(&self, id: ConnectionId, thread: Option<JoinHandle<()>>) {
        if let Some(handle) = thread {
            if handle.join().is_err() {
                error!("connection {}: thread panicked", id);
            }
        }
    }
}
