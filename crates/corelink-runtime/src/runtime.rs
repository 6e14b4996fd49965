use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};

use corelink_sync::{ConcurrentQueue, WorkerThread};
use mio::{Poll, Token, Waker};
use tracing::debug;

use crate::{
    IoFailure, Task, guard,
    handles::{ListenerHandle, TcpHandle, UdpHandle},
    pool::{CompletionWorker, PoolConfig},
    reactor::{Command, Reactor},
    socket::SocketOptions,
};

pub(crate) const WAKER_TOKEN: Token = Token(0);

/// State shared between the public handles, the reactor and the pool.
pub(crate) struct Shared {
    pub(crate) commands: ConcurrentQueue<Command>,
    pub(crate) completions: ConcurrentQueue<Task>,
    waker: Waker,
    next_token: AtomicUsize,
    stopped: AtomicBool,
}

impl Shared {
    fn new(waker: Waker) -> Self {
        Self {
            commands: ConcurrentQueue::new(),
            completions: ConcurrentQueue::new(),
            waker,
            // Token 0 belongs to the waker.
            next_token: AtomicUsize::new(1),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            debug!(?err, "reactor waker failed");
        }
    }

    pub(crate) fn alloc_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Hands a command to the reactor; after shutdown the command is
    /// completed as aborted instead.
    pub(crate) fn send(&self, cmd: Command) {
        if self.stopped.load(Ordering::Acquire) {
            cmd.abort();
            return;
        }
        self.commands.push(cmd);
        self.wake();
    }

    /// Schedules a completion onto the pool workers. Not gated on
    /// `stopped`: cancellation completions produced during shutdown
    /// still have to run before the workers drain out.
    pub(crate) fn post_task(&self, task: Task) {
        self.completions.push(task);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn mark_stopped(&self) -> bool {
        self.stopped.swap(true, Ordering::AcqRel)
    }
}

/// While this token lives, pool workers block waiting for completions
/// instead of exiting when the queue runs transiently dry. Dropping it
/// pushes one tombstone per worker.
struct KeepAlive {
    shared: Arc<Shared>,
    tombstones: usize,
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        for _ in 0..self.tombstones {
            self.shared.completions.push_tombstone();
        }
    }
}

/// Proactor over a mio reactor thread and a pool of completion workers.
///
/// Async socket operations are submitted through the socket handles and
/// return immediately; their completion handlers later run on a pool
/// worker. Cloning is cheap and shares the runtime; the last clone to
/// drop shuts it down.
#[derive(Clone)]
pub struct IoRuntime {
    core: Arc<RuntimeCore>,
}

struct RuntimeCore {
    shared: Arc<Shared>,
    reactor: WorkerThread<Reactor>,
    workers: Vec<WorkerThread<CompletionWorker>>,
    keep_alive: Mutex<Option<KeepAlive>>,
}

impl IoRuntime {
    /// Default pool: hardware concurrency with a floor of one worker.
    pub fn new() -> io::Result<Self> {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shared = Arc::new(Shared::new(waker));

        let reactor = WorkerThread::new(Reactor::new(poll, Arc::clone(&shared)));
        reactor.start().expect("freshly created reactor cannot be running");

        let worker_count = config.workers.max(1);
        let workers: Vec<_> = (0..worker_count)
            .map(|i| {
                let worker = WorkerThread::new(CompletionWorker::new(
                    Arc::clone(&shared),
                    config.core_for(i),
                    config.priority,
                ));
                worker.start().expect("freshly created pool worker cannot be running");
                worker
            })
            .collect();

        let keep_alive = KeepAlive { shared: Arc::clone(&shared), tombstones: worker_count };
        Ok(Self {
            core: Arc::new(RuntimeCore {
                shared,
                reactor,
                workers,
                keep_alive: Mutex::new(Some(keep_alive)),
            }),
        })
    }

    /// Schedules `task` onto a pool worker.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        if self.core.shared.is_stopped() {
            debug!("post after shutdown, dropping task");
            return;
        }
        self.core.shared.post_task(Box::new(task));
    }

    pub fn worker_count(&self) -> usize {
        self.core.workers.len()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.core.shared
    }

    /// Hosts an accepted or otherwise preconnected stream.
    pub fn register_tcp(&self, stream: mio::net::TcpStream) -> TcpHandle {
        let token = self.core.shared.alloc_token();
        self.core.shared.send(Command::RegisterTcp { token, stream });
        TcpHandle::new(token, Arc::clone(&self.core.shared))
    }

    /// Starts a nonblocking connect. The completion reports the local
    /// endpoint on success; reads and writes may be submitted on the
    /// returned handle right away and are held back until the connect
    /// resolves.
    pub fn connect_tcp(
        &self,
        addr: SocketAddr,
        opts: SocketOptions,
        completion: impl FnOnce(Result<SocketAddr, IoFailure>) + Send + 'static,
    ) -> TcpHandle {
        let token = self.core.shared.alloc_token();
        self.core.shared.send(Command::ConnectTcp {
            token,
            addr,
            opts,
            completion: Box::new(completion),
        });
        TcpHandle::new(token, Arc::clone(&self.core.shared))
    }

    pub fn listen_tcp(&self, listener: std::net::TcpListener) -> io::Result<ListenerHandle> {
        listener.set_nonblocking(true)?;
        let listener = mio::net::TcpListener::from_std(listener);
        let token = self.core.shared.alloc_token();
        self.core.shared.send(Command::RegisterListener { token, listener });
        Ok(ListenerHandle::new(token, Arc::clone(&self.core.shared)))
    }

    pub fn register_udp(&self, socket: std::net::UdpSocket) -> io::Result<UdpHandle> {
        socket.set_nonblocking(true)?;
        let socket = mio::net::UdpSocket::from_std(socket);
        let token = self.core.shared.alloc_token();
        self.core.shared.send(Command::RegisterUdp { token, socket });
        Ok(UdpHandle::new(token, Arc::clone(&self.core.shared)))
    }

    /// Stops intake, cancels outstanding I/O, drops the keep-alive and
    /// joins reactor and workers, in that order. Idempotent; also runs
    /// when the last clone drops.
    pub fn shutdown(&self) {
        self.core.shutdown_now();
    }
}

impl RuntimeCore {
    fn shutdown_now(&self) {
        if self.shared.mark_stopped() {
            return;
        }

        // Cancel outstanding I/O on the reactor thread, then join it.
        self.shared.commands.push(Command::Shutdown);
        self.shared.wake();
        self.reactor.stop();

        // Whatever raced the shutdown command.
        while let Some(cmd) = self.shared.commands.try_pop() {
            cmd.abort();
        }
        self.reactor.worker().abort_remaining();

        // Tombstones let idle workers run off the end of the queue once
        // the cancellation completions above have been drained.
        drop(guard(&self.keep_alive).take());

        let me = thread::current().id();
        for worker in &self.workers {
            worker.request_stop();
        }
        for worker in &self.workers {
            // A worker that triggers shutdown itself cannot self-join.
            if worker.thread_id().ok() == Some(me) {
                continue;
            }
            worker.join();
        }

        // Workers can exit on the terminating flag with completions
        // still queued; run the leftovers here so nobody blocked on a
        // sync operation misses its (aborted) completion. `is_empty`
        // ignores tombstones, `try_pop` consumes them.
        while !self.shared.completions.is_empty() {
            if let Some(task) = self.shared.completions.try_pop() {
                task();
            }
        }
    }
}

impl Drop for RuntimeCore {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
