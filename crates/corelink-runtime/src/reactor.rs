use std::{
    collections::{HashMap, VecDeque},
    io::{self, Read, Write},
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use corelink_sync::Worker;
use corelink_utils::safe_panic;
use mio::{
    Events, Interest, Poll, Registry, Token,
    net::{TcpListener, TcpStream, UdpSocket},
};
use tracing::{debug, warn};

use crate::{
    IoFailure, guard,
    handles::SharedBuf,
    runtime::{Shared, WAKER_TOKEN},
    socket::{SocketOptions, apply_tcp_options},
};

pub(crate) type ReadCompletion = Box<dyn FnOnce(Result<usize, IoFailure>) + Send>;
pub(crate) type WriteCompletion = Box<dyn FnOnce(Result<usize, IoFailure>) + Send>;
pub(crate) type ConnectCompletion = Box<dyn FnOnce(Result<SocketAddr, IoFailure>) + Send>;
pub(crate) type AcceptCompletion =
    Box<dyn FnOnce(Result<(TcpStream, SocketAddr), IoFailure>) + Send>;
pub(crate) type SendToCompletion = Box<dyn FnOnce(Result<usize, IoFailure>) + Send>;
pub(crate) type RecvFromCompletion =
    Box<dyn FnOnce(Result<(Vec<u8>, SocketAddr), IoFailure>) + Send>;
pub(crate) type CloseNotify = Box<dyn FnOnce() + Send>;

/// Largest UDP datagram the receive scratch buffer must hold.
const DATAGRAM_SCRATCH_SIZE: usize = 64 * 1024;

pub(crate) enum Command {
    RegisterTcp { token: Token, stream: TcpStream },
    ConnectTcp { token: Token, addr: SocketAddr, opts: SocketOptions, completion: ConnectCompletion },
    Read { token: Token, buf: SharedBuf, offset: usize, len: usize, completion: ReadCompletion },
    Write { token: Token, data: Vec<u8>, completion: WriteCompletion },
    RegisterListener { token: Token, listener: TcpListener },
    Accept { token: Token, completion: AcceptCompletion },
    RegisterUdp { token: Token, socket: UdpSocket },
    SendTo { token: Token, data: Vec<u8>, target: SocketAddr, completion: SendToCompletion },
    RecvFrom { token: Token, completion: RecvFromCompletion },
    Close { token: Token, notify: CloseNotify },
    Shutdown,
}

impl Command {
    /// Completes the command as cancelled without touching any socket.
    pub(crate) fn abort(self) {
        match self {
            Self::ConnectTcp { completion, .. } => completion(Err(IoFailure::Aborted)),
            Self::Read { completion, .. } => completion(Err(IoFailure::Aborted)),
            Self::Write { completion, .. } => completion(Err(IoFailure::Aborted)),
            Self::Accept { completion, .. } => completion(Err(IoFailure::Aborted)),
            Self::SendTo { completion, .. } => completion(Err(IoFailure::Aborted)),
            Self::RecvFrom { completion, .. } => completion(Err(IoFailure::Aborted)),
            Self::Close { notify, .. } => notify(),
            Self::RegisterTcp { .. }
            | Self::RegisterListener { .. }
            | Self::RegisterUdp { .. }
            | Self::Shutdown => {}
        }
    }
}

struct ReadOp {
    buf: SharedBuf,
    offset: usize,
    len: usize,
    done: usize,
    completion: ReadCompletion,
}

struct WriteOp {
    data: Vec<u8>,
    written: usize,
    completion: WriteCompletion,
}

struct SendToOp {
    data: Vec<u8>,
    target: SocketAddr,
    completion: SendToCompletion,
}

struct PendingConnect {
    opts: SocketOptions,
    completion: ConnectCompletion,
}

enum ConnectOutcome {
    Pending,
    Connected,
    Failed,
}

enum WriteOutcome {
    Done(Result<usize, IoFailure>),
    Blocked,
}

struct TcpState {
    stream: TcpStream,
    connect: Option<PendingConnect>,
    reads: VecDeque<ReadOp>,
    writes: VecDeque<WriteOp>,
    /// True if WRITABLE interest is currently registered. Outside of
    /// connects this tracks whether writes are pending.
    writable_armed: bool,
}

impl TcpState {
    fn registered(stream: TcpStream) -> Self {
        Self {
            stream,
            connect: None,
            reads: VecDeque::new(),
            writes: VecDeque::new(),
            writable_armed: false,
        }
    }

    fn connecting(stream: TcpStream, pending: PendingConnect) -> Self {
        Self {
            stream,
            connect: Some(pending),
            reads: VecDeque::new(),
            writes: VecDeque::new(),
            writable_armed: true,
        }
    }

    /// Resolves an in-flight nonblocking connect once the socket
    /// reports writable.
    fn finish_connect(
        &mut self,
        token: Token,
        registry: &Registry,
        shared: &Shared,
    ) -> ConnectOutcome {
        match self.stream.take_error() {
            Ok(None) => {}
            Ok(Some(err)) | Err(err) => return self.fail_connect(err, shared),
        }
        match self.stream.peer_addr() {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                return ConnectOutcome::Pending;
            }
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {
                return ConnectOutcome::Pending;
            }
            Err(err) => return self.fail_connect(err, shared),
        }

        let Some(pending) = self.connect.take() else {
            return ConnectOutcome::Connected;
        };
        if let Err(err) = apply_tcp_options(&self.stream, pending.opts) {
            let completion = pending.completion;
            shared.post_task(Box::new(move || completion(Err(err.into()))));
            return ConnectOutcome::Failed;
        }
        let local = match self.stream.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                let completion = pending.completion;
                shared.post_task(Box::new(move || completion(Err(err.into()))));
                return ConnectOutcome::Failed;
            }
        };

        let interest = if self.writes.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if let Err(err) = registry.reregister(&mut self.stream, token, interest) {
            let completion = pending.completion;
            shared.post_task(Box::new(move || completion(Err(err.into()))));
            return ConnectOutcome::Failed;
        }
        self.writable_armed = !self.writes.is_empty();

        let completion = pending.completion;
        shared.post_task(Box::new(move || completion(Ok(local))));
        ConnectOutcome::Connected
    }

    fn fail_connect(&mut self, err: io::Error, shared: &Shared) -> ConnectOutcome {
        if let Some(pending) = self.connect.take() {
            let completion = pending.completion;
            shared.post_task(Box::new(move || completion(Err(err.into()))));
        }
        ConnectOutcome::Failed
    }

    /// Drives the front read op until it completes or the socket runs
    /// dry. Completed ops are popped and their handlers posted to the
    /// pool, preserving submission order.
    fn progress_reads(&mut self, shared: &Shared) {
        loop {
            let Some(op) = self.reads.front_mut() else { return };

            let mut buf = guard(&op.buf);
            if buf.len() < op.offset + op.len {
                buf.resize(op.offset + op.len, 0);
            }
            let result = loop {
                if op.done == op.len {
                    break Ok(op.len);
                }
                match self.stream.read(&mut buf[op.offset + op.done..op.offset + op.len]) {
                    Ok(0) => break Err(IoFailure::from(io::Error::from(
                        io::ErrorKind::UnexpectedEof,
                    ))),
                    Ok(n) => op.done += n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => break Err(e.into()),
                }
            };
            drop(buf);

            let op = self.reads.pop_front().unwrap();
            let completion = op.completion;
            shared.post_task(Box::new(move || completion(result)));
        }
    }

    fn progress_writes(&mut self, token: Token, registry: &Registry, shared: &Shared) {
        loop {
            let Some(op) = self.writes.front_mut() else { break };

            let outcome = loop {
                if op.written == op.data.len() {
                    break WriteOutcome::Done(Ok(op.written));
                }
                match self.stream.write(&op.data[op.written..]) {
                    Ok(0) => {
                        break WriteOutcome::Done(Err(IoFailure::from(io::Error::from(
                            io::ErrorKind::WriteZero,
                        ))));
                    }
                    Ok(n) => op.written += n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        break WriteOutcome::Blocked;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => break WriteOutcome::Done(Err(e.into())),
                }
            };

            match outcome {
                WriteOutcome::Blocked => {
                    self.arm_writable(token, registry);
                    return;
                }
                WriteOutcome::Done(result) => {
                    let op = self.writes.pop_front().unwrap();
                    let completion = op.completion;
                    shared.post_task(Box::new(move || completion(result)));
                }
            }
        }

        self.disarm_writable(token, registry);
    }

    fn arm_writable(&mut self, token: Token, registry: &Registry) {
        if self.writable_armed {
            return;
        }
        if let Err(err) = registry.reregister(
            &mut self.stream,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            debug!(?err, "tcp: reregister arm writable");
            return;
        }
        self.writable_armed = true;
    }

    fn disarm_writable(&mut self, token: Token, registry: &Registry) {
        if !self.writable_armed {
            return;
        }
        if let Err(err) = registry.reregister(&mut self.stream, token, Interest::READABLE) {
            debug!(?err, "tcp: reregister drop writable");
            return;
        }
        self.writable_armed = false;
    }

    fn abort_ops(&mut self, shared: &Shared) {
        if let Some(pending) = self.connect.take() {
            let completion = pending.completion;
            shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
        }
        for op in self.reads.drain(..) {
            let completion = op.completion;
            shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
        }
        for op in self.writes.drain(..) {
            let completion = op.completion;
            shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
        }
    }
}

struct ListenerState {
    listener: TcpListener,
    accepts: VecDeque<AcceptCompletion>,
}

impl ListenerState {
    fn progress(&mut self, shared: &Shared) {
        while !self.accepts.is_empty() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let completion = self.accepts.pop_front().unwrap();
                    shared.post_task(Box::new(move || completion(Ok((stream, addr)))));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let completion = self.accepts.pop_front().unwrap();
                    shared.post_task(Box::new(move || completion(Err(e.into()))));
                }
            }
        }
    }

    fn abort_ops(&mut self, shared: &Shared) {
        for completion in self.accepts.drain(..) {
            shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
        }
    }
}

struct UdpState {
    socket: UdpSocket,
    sends: VecDeque<SendToOp>,
    recvs: VecDeque<RecvFromCompletion>,
    writable_armed: bool,
}

impl UdpState {
    fn progress_sends(&mut self, token: Token, registry: &Registry, shared: &Shared) {
        loop {
            let Some(op) = self.sends.front() else { break };

            match self.socket.send_to(&op.data, op.target) {
                Ok(n) => {
                    let op = self.sends.pop_front().unwrap();
                    let completion = op.completion;
                    shared.post_task(Box::new(move || completion(Ok(n))));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.writable_armed {
                        if let Err(err) = registry.reregister(
                            &mut self.socket,
                            token,
                            Interest::READABLE | Interest::WRITABLE,
                        ) {
                            debug!(?err, "udp: reregister arm writable");
                            return;
                        }
                        self.writable_armed = true;
                    }
                    return;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let op = self.sends.pop_front().unwrap();
                    let completion = op.completion;
                    shared.post_task(Box::new(move || completion(Err(e.into()))));
                }
            }
        }

        if self.writable_armed {
            if let Err(err) =
                registry.reregister(&mut self.socket, token, Interest::READABLE)
            {
                debug!(?err, "udp: reregister drop writable");
                return;
            }
            self.writable_armed = false;
        }
    }

    fn progress_recvs(&mut self, scratch: &mut [u8], shared: &Shared) {
        while !self.recvs.is_empty() {
            match self.socket.recv_from(scratch) {
                Ok((n, from)) => {
                    let completion = self.recvs.pop_front().unwrap();
                    let datagram = scratch[..n].to_vec();
                    shared.post_task(Box::new(move || completion(Ok((datagram, from)))));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let completion = self.recvs.pop_front().unwrap();
                    shared.post_task(Box::new(move || completion(Err(e.into()))));
                }
            }
        }
    }

    fn abort_ops(&mut self, shared: &Shared) {
        for op in self.sends.drain(..) {
            let completion = op.completion;
            shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
        }
        for completion in self.recvs.drain(..) {
            shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
        }
    }
}

/// Single-threaded mio poll loop.
///
/// Owns every socket hosted by the runtime. All socket access happens
/// here; the rest of the system talks to it through the command queue
/// and gets results back as completions posted to the pool workers.
pub(crate) struct Reactor {
    core: Mutex<Core>,
    shared: Arc<Shared>,
}

impl Reactor {
    pub(crate) fn new(poll: Poll, shared: Arc<Shared>) -> Self {
        Self {
            core: Mutex::new(Core {
                poll,
                events: Events::with_capacity(256),
                tcp: HashMap::new(),
                listeners: HashMap::new(),
                udp: HashMap::new(),
                scratch: vec![0; DATAGRAM_SCRATCH_SIZE],
            }),
            shared,
        }
    }

    /// Aborts whatever survived the shutdown command. Only sound once
    /// the reactor thread has been joined.
    pub(crate) fn abort_remaining(&self) {
        guard(&self.core).cancel_all(&self.shared);
    }
}

impl Worker for Reactor {
    fn iterate(&self) {
        guard(&self.core).run_once(&self.shared);
    }

    fn on_terminate(&self) {
        self.shared.wake();
    }
}

struct Core {
    poll: Poll,
    events: Events,
    tcp: HashMap<Token, TcpState>,
    listeners: HashMap<Token, ListenerState>,
    udp: HashMap<Token, UdpState>,
    scratch: Vec<u8>,
}

impl Core {
    fn run_once(&mut self, shared: &Shared) {
        if let Err(err) = self.poll.poll(&mut self.events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                return;
            }
            safe_panic!("reactor poll failed: {err}");
            return;
        }

        let mut ready = Vec::new();
        for event in self.events.iter() {
            if event.token() != WAKER_TOKEN {
                ready.push((event.token(), event.is_readable(), event.is_writable()));
            }
        }

        // Commands first: a socket registered in this batch cannot have
        // produced an event yet, and a close must win over stale events.
        while let Some(cmd) = shared.commands.try_pop() {
            self.apply(cmd, shared);
        }

        for (token, readable, writable) in ready {
            self.handle_event(token, readable, writable, shared);
        }
    }

    fn apply(&mut self, cmd: Command, shared: &Shared) {
        match cmd {
            Command::RegisterTcp { token, mut stream } => {
                if let Err(err) =
                    self.poll.registry().register(&mut stream, token, Interest::READABLE)
                {
                    warn!(?err, "couldn't register tcp stream");
                    return;
                }
                self.tcp.insert(token, TcpState::registered(stream));
            }
            Command::ConnectTcp { token, addr, opts, completion } => {
                let mut stream = match TcpStream::connect(addr) {
                    Ok(stream) => stream,
                    Err(err) => {
                        shared.post_task(Box::new(move || completion(Err(err.into()))));
                        return;
                    }
                };
                if let Err(err) = self.poll.registry().register(
                    &mut stream,
                    token,
                    Interest::READABLE | Interest::WRITABLE,
                ) {
                    shared.post_task(Box::new(move || completion(Err(err.into()))));
                    return;
                }
                self.tcp.insert(
                    token,
                    TcpState::connecting(stream, PendingConnect { opts, completion }),
                );
            }
            Command::Read { token, buf, offset, len, completion } => {
                let Some(state) = self.tcp.get_mut(&token) else {
                    shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
                    return;
                };
                state.reads.push_back(ReadOp { buf, offset, len, done: 0, completion });
                if state.connect.is_none() {
                    // The readable edge may already have fired; make
                    // whatever progress the kernel buffer allows now.
                    state.progress_reads(shared);
                }
            }
            Command::Write { token, data, completion } => {
                let Some(state) = self.tcp.get_mut(&token) else {
                    shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
                    return;
                };
                state.writes.push_back(WriteOp { data, written: 0, completion });
                if state.connect.is_none() {
                    state.progress_writes(token, self.poll.registry(), shared);
                }
            }
            Command::RegisterListener { token, mut listener } => {
                if let Err(err) =
                    self.poll.registry().register(&mut listener, token, Interest::READABLE)
                {
                    warn!(?err, "couldn't register tcp listener");
                    return;
                }
                self.listeners.insert(token, ListenerState { listener, accepts: VecDeque::new() });
            }
            Command::Accept { token, completion } => {
                let Some(state) = self.listeners.get_mut(&token) else {
                    shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
                    return;
                };
                state.accepts.push_back(completion);
                state.progress(shared);
            }
            Command::RegisterUdp { token, mut socket } => {
                if let Err(err) =
                    self.poll.registry().register(&mut socket, token, Interest::READABLE)
                {
                    warn!(?err, "couldn't register udp socket");
                    return;
                }
                self.udp.insert(
                    token,
                    UdpState {
                        socket,
                        sends: VecDeque::new(),
                        recvs: VecDeque::new(),
                        writable_armed: false,
                    },
                );
            }
            Command::SendTo { token, data, target, completion } => {
                let Some(state) = self.udp.get_mut(&token) else {
                    shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
                    return;
                };
                state.sends.push_back(SendToOp { data, target, completion });
                state.progress_sends(token, self.poll.registry(), shared);
            }
            Command::RecvFrom { token, completion } => {
                let Some(state) = self.udp.get_mut(&token) else {
                    shared.post_task(Box::new(move || completion(Err(IoFailure::Aborted))));
                    return;
                };
                state.recvs.push_back(completion);
                state.progress_recvs(&mut self.scratch, shared);
            }
            Command::Close { token, notify } => {
                self.close_token(token, shared);
                // Signalled from the reactor so a closer blocked inside
                // a completion handler cannot starve itself.
                notify();
            }
            Command::Shutdown => self.cancel_all(shared),
        }
    }

    fn handle_event(&mut self, token: Token, readable: bool, writable: bool, shared: &Shared) {
        let mut failed_connect = false;
        if let Some(state) = self.tcp.get_mut(&token) {
            if state.connect.is_some() {
                match state.finish_connect(token, self.poll.registry(), shared) {
                    ConnectOutcome::Pending => {}
                    ConnectOutcome::Connected => {
                        state.progress_reads(shared);
                        state.progress_writes(token, self.poll.registry(), shared);
                    }
                    ConnectOutcome::Failed => failed_connect = true,
                }
            } else {
                if readable {
                    state.progress_reads(shared);
                }
                if writable {
                    state.progress_writes(token, self.poll.registry(), shared);
                }
            }

            if failed_connect
                && let Some(mut state) = self.tcp.remove(&token)
            {
                state.abort_ops(shared);
                let _ = self.poll.registry().deregister(&mut state.stream);
            }
            return;
        }

        if let Some(state) = self.listeners.get_mut(&token) {
            if readable {
                state.progress(shared);
            }
            return;
        }

        if let Some(state) = self.udp.get_mut(&token) {
            if readable {
                state.progress_recvs(&mut self.scratch, shared);
            }
            if writable {
                state.progress_sends(token, self.poll.registry(), shared);
            }
            return;
        }

        // Stale event for a socket closed in the same batch.
        debug!(?token, "event for unknown token");
    }

    fn close_token(&mut self, token: Token, shared: &Shared) {
        if let Some(mut state) = self.tcp.remove(&token) {
            state.abort_ops(shared);
            let _ = self.poll.registry().deregister(&mut state.stream);
            let _ = state.stream.shutdown(std::net::Shutdown::Both);
        } else if let Some(mut state) = self.listeners.remove(&token) {
            state.abort_ops(shared);
            let _ = self.poll.registry().deregister(&mut state.listener);
        } else if let Some(mut state) = self.udp.remove(&token) {
            state.abort_ops(shared);
            let _ = self.poll.registry().deregister(&mut state.socket);
        }
    }

    fn cancel_all(&mut self, shared: &Shared) {
        let tokens: Vec<Token> = self
            .tcp
            .keys()
            .chain(self.listeners.keys())
            .chain(self.udp.keys())
            .copied()
            .collect();
        for token in tokens {
            self.close_token(token, shared);
        }
    }
}
