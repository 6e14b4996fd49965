use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
};

use corelink_runtime::{IoRuntime, ListenerHandle};
use corelink_sync::SyncEvent;
use tracing::{info, warn};

use crate::{
    FramingConfig, NULL_ENDPOINT, guard,
    tcp::{ConnectionRegistry, RegistryError, TcpConnection},
};

/// Accepting side of the framed transport.
///
/// Owns the listen socket and a registry of accepted connections. Every
/// accepted socket gets the server's framing hooks and starts reading
/// immediately; sends are addressed by the client's remote endpoint.
pub struct TcpServer {
    runtime: IoRuntime,
    listen_port: u16,
    config: FramingConfig,
    registry: Arc<ConnectionRegistry>,
    acceptor: Mutex<Option<ListenerHandle>>,
}

impl TcpServer {
    /// Binds the acceptor on a freshly created runtime owned (shared)
    /// by this server.
    pub fn with_new_runtime(listen_port: u16, config: FramingConfig) -> io::Result<Self> {
        Self::new(IoRuntime::new()?, listen_port, config)
    }

    /// Binds the acceptor and starts accepting.
    pub fn new(runtime: IoRuntime, listen_port: u16, config: FramingConfig) -> io::Result<Self> {
        let server = Self {
            runtime,
            listen_port,
            config,
            registry: ConnectionRegistry::new(),
            acceptor: Mutex::new(None),
        };
        server.open_acceptor()?;
        Ok(server)
    }

    /// No-op when the acceptor is already open.
    pub fn open_acceptor(&self) -> io::Result<()> {
        let mut acceptor = guard(&self.acceptor);
        if acceptor.is_some() {
            return Ok(());
        }

        let listener =
            std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port)))?;
        let handle = self.runtime.listen_tcp(listener)?;
        Self::arm_accept(
            handle.clone(),
            self.runtime.clone(),
            Arc::clone(&self.registry),
            self.config.clone(),
        );
        *acceptor = Some(handle);
        Ok(())
    }

    fn arm_accept(
        handle: ListenerHandle,
        runtime: IoRuntime,
        registry: Arc<ConnectionRegistry>,
        config: FramingConfig,
    ) {
        let next = handle.clone();
        handle.accept(move |res| {
            match res {
                Ok((stream, peer)) => {
                    info!(%peer, "client connected");
                    if let Err(err) =
                        TcpConnection::from_accepted(&runtime, &registry, stream, config.clone())
                    {
                        warn!(?err, %peer, "couldn't start accepted connection");
                    }
                }
                // Acceptor closed; stop re-arming.
                Err(err) if err.is_aborted() => return,
                Err(err) => warn!(?err, "accept failed"),
            }
            Self::arm_accept(next, runtime, registry, config);
        });
    }

    /// Posts the acceptor close, awaits it, then closes every accepted
    /// connection.
    pub fn close_acceptor(&self) {
        let handle = guard(&self.acceptor).take();
        if let Some(handle) = handle {
            let closed = Arc::new(SyncEvent::new());
            let ev = Arc::clone(&closed);
            handle.close(move || ev.signal());
            closed.wait();
        }
        self.registry.close_all();
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn send_to_client_async(&self, client: &SocketAddr, data: Vec<u8>) {
        self.registry.send_async(client, data);
    }

    pub fn send_to_client_sync(&self, client: &SocketAddr, data: Vec<u8>) -> bool {
        self.registry.send_sync(client, data)
    }

    pub fn send_to_all(&self, data: &[u8]) {
        self.registry.send_to_all(data);
    }

    /// The server-side endpoint a given client should respond to:
    /// the wildcard listen endpoint for [`NULL_ENDPOINT`], otherwise
    /// the local side of that client's socket.
    pub fn server_endpoint_for_client(
        &self,
        client: &SocketAddr,
    ) -> Result<SocketAddr, RegistryError> {
        if *client == NULL_ENDPOINT {
            return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.listen_port)));
        }
        self.registry.local_endpoint_for_remote(client)
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.close_acceptor();
    }
}
