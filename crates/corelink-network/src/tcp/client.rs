use std::{io, net::SocketAddr, sync::Arc};

use corelink_runtime::{IoRuntime, PoolConfig};
use tracing::debug;

use crate::{
    FramingConfig,
    tcp::{ConnectionRegistry, RegistryError, TcpConnection},
};

/// Auto-reconnecting single-peer wrapper.
///
/// Construction attempts one connect and swallows its failure; every
/// send first checks whether the connection is gone and reconnects
/// before submitting. A client therefore stays usable across server
/// restarts.
pub struct TcpClient {
    runtime: IoRuntime,
    server: SocketAddr,
    config: FramingConfig,
    registry: Arc<ConnectionRegistry>,
}

impl TcpClient {
    /// A client with its own small runtime: one reactor, two workers.
    pub fn with_new_runtime(server: SocketAddr, config: FramingConfig) -> io::Result<Self> {
        let runtime = IoRuntime::with_config(PoolConfig::with_workers(2))?;
        Ok(Self::new(runtime, server, config))
    }

    pub fn new(runtime: IoRuntime, server: SocketAddr, config: FramingConfig) -> Self {
        let client =
            Self { runtime, server, config, registry: ConnectionRegistry::new() };
        client.try_connect();
        client
    }

    fn try_connect(&self) {
        if let Err(err) =
            TcpConnection::connect(&self.runtime, &self.registry, self.server, self.config.clone())
        {
            debug!(?err, server = %self.server, "connect attempt failed");
        }
    }

    /// Reconnects when the registry has gone empty; every send calls
    /// this first.
    pub fn connect_if_needed(&self) {
        if self.registry.is_empty() {
            self.try_connect();
        }
    }

    pub fn send_async(&self, data: Vec<u8>) {
        self.connect_if_needed();
        self.registry.send_async(&self.server, data);
    }

    pub fn send_sync(&self, data: Vec<u8>) -> bool {
        self.connect_if_needed();
        self.registry.send_sync(&self.server, data)
    }

    pub fn server_endpoint(&self) -> SocketAddr {
        self.server
    }

    /// Local `(host, port)` of the connection to the server.
    pub fn client_endpoint(&self) -> Result<SocketAddr, RegistryError> {
        self.registry.local_endpoint_for_remote(&self.server)
    }

    pub fn is_connected(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn close(&self) {
        self.registry.close_all();
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.close();
    }
}
