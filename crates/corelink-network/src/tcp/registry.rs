use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tracing::debug;

use crate::{guard, tcp::TcpConnection};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown connection")]
    UnknownConnection,
}

/// Map of live connections keyed by remote endpoint.
///
/// A connection enters the map as soon as its socket is usable (after
/// connect or accept) and leaves it when a transport error tears it
/// down or `close_all` clears the map. All operations run under one
/// internal mutex.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<SocketAddr, Arc<TcpConnection>>>,
}

impl ConnectionRegistry {
    /// Registries are always shared: the owning server or client holds
    /// the `Arc`, each connection a weak back-reference.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { connections: Mutex::new(HashMap::new()) })
    }

    pub fn add(&self, conn: Arc<TcpConnection>) {
        guard(&self.connections).insert(conn.remote_endpoint(), conn);
    }

    pub fn remove(&self, remote: &SocketAddr) -> Option<Arc<TcpConnection>> {
        guard(&self.connections).remove(remote)
    }

    pub fn len(&self) -> usize {
        guard(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        guard(&self.connections).is_empty()
    }

    /// Closes every connection (awaiting each close) and clears the
    /// map.
    pub fn close_all(&self) {
        let mut connections = guard(&self.connections);
        for conn in connections.values() {
            conn.close();
        }
        connections.clear();
    }

    pub fn send_async(&self, target: &SocketAddr, data: Vec<u8>) {
        let conn = guard(&self.connections).get(target).cloned();
        match conn {
            Some(conn) => conn.send_async(data),
            None => debug!(%target, "send to unregistered endpoint dropped"),
        }
    }

    pub fn send_sync(&self, target: &SocketAddr, data: Vec<u8>) -> bool {
        // The send waits for its completion; don't hold the map lock
        // across that.
        let conn = guard(&self.connections).get(target).cloned();
        match conn {
            Some(conn) => conn.send_sync(data),
            None => false,
        }
    }

    /// Every registered connection gets its own async submission of the
    /// same bytes.
    pub fn send_to_all(&self, data: &[u8]) {
        let connections = guard(&self.connections);
        for conn in connections.values() {
            conn.send_async(data.to_vec());
        }
    }

    /// Local `(host, port)` of the socket connected to `remote`. The
    /// lock is held across the whole lookup and query.
    pub fn local_endpoint_for_remote(
        &self,
        remote: &SocketAddr,
    ) -> Result<SocketAddr, RegistryError> {
        guard(&self.connections)
            .get(remote)
            .map(|conn| conn.local_endpoint())
            .ok_or(RegistryError::UnknownConnection)
    }
}
