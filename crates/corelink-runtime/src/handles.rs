use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use mio::Token;

use crate::{IoFailure, reactor::Command, runtime::Shared};

/// Receive buffer shared between a connection and the reactor's read
/// ops. The reactor writes into it only while an op it was handed is in
/// flight.
pub type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Submission handle for a TCP stream hosted by the runtime.
///
/// Per-handle reads complete in submission order, as do writes.
/// Nothing is ordered across handles.
#[derive(Clone)]
pub struct TcpHandle {
    token: Token,
    shared: Arc<Shared>,
}

impl TcpHandle {
    pub(crate) fn new(token: Token, shared: Arc<Shared>) -> Self {
        Self { token, shared }
    }

    /// Reads exactly `len` bytes into `buf[offset..offset + len]`. The
    /// buffer is grown to fit if needed.
    pub fn read_exact(
        &self,
        buf: SharedBuf,
        offset: usize,
        len: usize,
        completion: impl FnOnce(Result<usize, IoFailure>) + Send + 'static,
    ) {
        self.shared.send(Command::Read {
            token: self.token,
            buf,
            offset,
            len,
            completion: Box::new(completion),
        });
    }

    pub fn write_all(
        &self,
        data: Vec<u8>,
        completion: impl FnOnce(Result<usize, IoFailure>) + Send + 'static,
    ) {
        self.shared.send(Command::Write {
            token: self.token,
            data,
            completion: Box::new(completion),
        });
    }

    /// Closes the socket on the reactor thread; outstanding operations
    /// complete as aborted. `notify` fires from the reactor once the
    /// socket is gone and must not block. Closing twice is harmless,
    /// `notify` fires either way.
    pub fn close(&self, notify: impl FnOnce() + Send + 'static) {
        self.shared.send(Command::Close { token: self.token, notify: Box::new(notify) });
    }
}

/// Submission handle for an accepting socket.
#[derive(Clone)]
pub struct ListenerHandle {
    token: Token,
    shared: Arc<Shared>,
}

impl ListenerHandle {
    pub(crate) fn new(token: Token, shared: Arc<Shared>) -> Self {
        Self { token, shared }
    }

    /// Accepts one connection. The completion receives the raw stream
    /// before it is hosted anywhere; pass it to
    /// [`IoRuntime::register_tcp`](crate::IoRuntime::register_tcp) to
    /// start reading from it.
    pub fn accept(
        &self,
        completion: impl FnOnce(Result<(mio::net::TcpStream, SocketAddr), IoFailure>)
        + Send
        + 'static,
    ) {
        self.shared.send(Command::Accept { token: self.token, completion: Box::new(completion) });
    }

    pub fn close(&self, notify: impl FnOnce() + Send + 'static) {
        self.shared.send(Command::Close { token: self.token, notify: Box::new(notify) });
    }
}

/// Submission handle for a UDP socket.
#[derive(Clone)]
pub struct UdpHandle {
    token: Token,
    shared: Arc<Shared>,
}

impl UdpHandle {
    pub(crate) fn new(token: Token, shared: Arc<Shared>) -> Self {
        Self { token, shared }
    }

    pub fn send_to(
        &self,
        data: Vec<u8>,
        target: SocketAddr,
        completion: impl FnOnce(Result<usize, IoFailure>) + Send + 'static,
    ) {
        self.shared.send(Command::SendTo {
            token: self.token,
            data,
            target,
            completion: Box::new(completion),
        });
    }

    /// Receives one datagram, delivered as an owned copy.
    pub fn recv_from(
        &self,
        completion: impl FnOnce(Result<(Vec<u8>, SocketAddr), IoFailure>) + Send + 'static,
    ) {
        self.shared.send(Command::RecvFrom { token: self.token, completion: Box::new(completion) });
    }

    pub fn close(&self, notify: impl FnOnce() + Send + 'static) {
        self.shared.send(Command::Close { token: self.token, notify: Box::new(notify) });
    }
}
