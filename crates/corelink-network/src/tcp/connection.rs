use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use corelink_runtime::{
    IoFailure, IoRuntime, SocketOptions, TcpHandle, set_socket_buf_size,
};
use corelink_sync::{InitialState, NotifyKind, ResetKind, SyncEvent};
use tracing::debug;

use crate::{FramingConfig, guard, tcp::ConnectionRegistry};

/// Initial reservation for each connection's receive buffer.
pub const DEFAULT_RECV_RESERVE: usize = 512 * 1024;

/// One framed TCP socket hosted by the runtime.
///
/// The connection runs a continuous read loop: it reads `min_read`
/// bytes, asks the check hook how much of the frame is still missing,
/// reads exactly that many more bytes onto the tail, and hands the
/// complete frame to the message hook before starting over. A hook
/// error drops the partial frame and restarts the loop; a transport
/// error tears the connection down and removes it from its registry.
///
/// The registry and every in-flight completion hold a share of the
/// connection; it is freed once the last of them lets go.
pub struct TcpConnection {
    handle: TcpHandle,
    registry: Weak<ConnectionRegistry>,
    config: FramingConfig,
    recv_buf: Arc<Mutex<Vec<u8>>>,
    remote: SocketAddr,
    local: SocketAddr,
    closing: AtomicBool,
    closed: Arc<SyncEvent>,
    weak_self: Weak<TcpConnection>,
}

impl TcpConnection {
    /// Connects to `peer`, registers with `registry` and starts the
    /// read loop. Blocks the caller until the connect resolves.
    pub fn connect(
        runtime: &IoRuntime,
        registry: &Arc<ConnectionRegistry>,
        peer: SocketAddr,
        config: FramingConfig,
    ) -> io::Result<Arc<Self>> {
        let resolved = Arc::new(SyncEvent::new());
        let outcome: Arc<Mutex<Option<Result<SocketAddr, IoFailure>>>> =
            Arc::new(Mutex::new(None));

        let opts = SocketOptions {
            nodelay: config.send_option.nodelay(),
            buf_size: config.socket_buf_size,
        };
        let handle = {
            let resolved = Arc::clone(&resolved);
            let outcome = Arc::clone(&outcome);
            runtime.connect_tcp(peer, opts, move |res| {
                *guard(&outcome) = Some(res);
                resolved.signal();
            })
        };
        resolved.wait();

        let local = match guard(&outcome).take() {
            Some(Ok(local)) => local,
            Some(Err(IoFailure::Os(err))) => return Err(err),
            Some(Err(IoFailure::Aborted)) | None => {
                return Err(io::Error::from(io::ErrorKind::ConnectionAborted));
            }
        };

        Ok(Self::host(handle, registry, peer, local, config))
    }

    /// Wraps a freshly accepted stream, registers it with `registry`
    /// and starts the read loop.
    pub fn from_accepted(
        runtime: &IoRuntime,
        registry: &Arc<ConnectionRegistry>,
        stream: mio::net::TcpStream,
        config: FramingConfig,
    ) -> io::Result<Arc<Self>> {
        stream.set_nodelay(config.send_option.nodelay())?;
        if let Some(size) = config.socket_buf_size {
            set_socket_buf_size(&stream, size);
        }
        let remote = stream.peer_addr()?;
        let local = stream.local_addr()?;
        let handle = runtime.register_tcp(stream);

        Ok(Self::host(handle, registry, remote, local, config))
    }

    fn host(
        handle: TcpHandle,
        registry: &Arc<ConnectionRegistry>,
        remote: SocketAddr,
        local: SocketAddr,
        config: FramingConfig,
    ) -> Arc<Self> {
        let conn = Arc::new_cyclic(|weak| Self {
            handle,
            registry: Arc::downgrade(registry),
            config,
            recv_buf: Arc::new(Mutex::new(Vec::with_capacity(DEFAULT_RECV_RESERVE))),
            remote,
            local,
            closing: AtomicBool::new(false),
            closed: Arc::new(SyncEvent::with_options(
                NotifyKind::All,
                ResetKind::Manual,
                InitialState::Unsignalled,
            )),
            weak_self: weak.clone(),
        });
        registry.add(Arc::clone(&conn));
        Arc::clone(&conn).start_read();
        conn
    }

    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    fn start_read(self: Arc<Self>) {
        let min = self.config.min_read;
        let buf = Arc::clone(&self.recv_buf);
        let handle = self.handle.clone();
        handle.read_exact(buf, 0, min, move |res| self.on_min_read(res));
    }

    fn on_min_read(self: Arc<Self>, res: Result<usize, IoFailure>) {
        match res {
            // A posted close cancelled the read.
            Err(IoFailure::Aborted) => {}
            Err(IoFailure::Os(err)) => {
                debug!(?err, remote = %self.remote, "tcp read failed");
                self.destroy();
            }
            Ok(n) if n != self.config.min_read => self.start_read(),
            Ok(_) => {
                let min_read = self.config.min_read;
                self.advance(min_read);
            }
        }
    }

    /// Runs the check hook over the `have` bytes read so far and either
    /// finishes the frame or reads the remainder onto its tail.
    fn advance(self: Arc<Self>, have: usize) {
        let remaining = {
            let buf = guard(&self.recv_buf);
            (self.config.check_bytes)(&buf[..have])
        };

        match remaining {
            Err(err) => {
                debug!(%err, remote = %self.remote, "dropping malformed frame");
                self.start_read();
            }
            Ok(0) => {
                {
                    let buf = guard(&self.recv_buf);
                    (self.config.on_message)(&buf[..have]);
                }
                self.start_read();
            }
            Ok(needed) => {
                let buf = Arc::clone(&self.recv_buf);
                let handle = self.handle.clone();
                handle.read_exact(buf, have, needed, move |res| match res {
                    Err(IoFailure::Aborted) => {}
                    Err(IoFailure::Os(err)) => {
                        debug!(?err, remote = %self.remote, "tcp read failed");
                        self.destroy();
                    }
                    Ok(n) if n != needed => self.start_read(),
                    Ok(_) => self.advance(have + needed),
                });
            }
        }
    }

    /// Submits an async write; the completion only logs failures (and
    /// tears the connection down on a real transport error).
    pub fn send_async(&self, data: Vec<u8>) {
        let this = self.weak_self.upgrade();
        self.handle.write_all(data, move |res| {
            if let Err(err) = res
                && !err.is_aborted()
            {
                debug!(?err, "tcp send failed");
                if let Some(conn) = &this {
                    conn.destroy();
                }
            }
        });
    }

    /// Waits on the caller's thread for the write completion.
    pub fn send_sync(&self, data: Vec<u8>) -> bool {
        let done = Arc::new(SyncEvent::new());
        let sent = Arc::new(AtomicBool::new(false));
        let this = self.weak_self.upgrade();
        {
            let done = Arc::clone(&done);
            let sent = Arc::clone(&sent);
            self.handle.write_all(data, move |res| {
                let failed = match res {
                    Ok(_) => {
                        sent.store(true, Ordering::Release);
                        false
                    }
                    Err(err) => {
                        if !err.is_aborted() {
                            debug!(?err, "tcp send failed");
                        }
                        !err.is_aborted()
                    }
                };
                // Release the waiter before any teardown work.
                done.signal();
                if failed && let Some(conn) = &this {
                    conn.destroy();
                }
            });
        }
        done.wait();
        sent.load(Ordering::Acquire)
    }

    /// Posts the socket close to the runtime and waits until it has
    /// happened on the reactor thread. Idempotent: if the connection is
    /// already closing, this just waits for that close to land. Does
    /// not touch the registry; error paths and `close_all` handle the
    /// map entry.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            self.closed.wait();
            return;
        }
        let closed = Arc::clone(&self.closed);
        self.handle.close(move || closed.signal());
        self.closed.wait();
    }

    /// Transport-error teardown: leave the registry, then close the
    /// socket without waiting.
    fn destroy(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.remote);
        }
        let closed = Arc::clone(&self.closed);
        self.handle.close(move || closed.signal());
    }
}
