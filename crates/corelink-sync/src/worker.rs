use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
};

use tracing::warn;

use crate::{ThreadError, guard};

/// Body of a long-running cooperative thread.
///
/// `iterate` is called repeatedly until the owning [`WorkerThread`] is
/// stopped. Implementations that block inside `iterate` (for example on
/// a queue pop) override `on_terminate` to unblock themselves.
pub trait Worker: Send + Sync + 'static {
    fn iterate(&self);

    /// Called from the stopping thread before the join.
    fn on_terminate(&self) {}
}

/// Drives a [`Worker`] on a dedicated thread.
///
/// Lifecycle: not-started → `start` → running → `stop` → joined.
/// `start` rejects a second call while the thread is running; after a
/// `stop` the worker may be started again.
pub struct WorkerThread<W: Worker> {
    worker: Arc<W>,
    terminating: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<W: Worker> WorkerThread<W> {
    pub fn new(worker: W) -> Self {
        Self {
            worker: Arc::new(worker),
            terminating: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn worker(&self) -> &Arc<W> {
        &self.worker
    }

    pub fn is_started(&self) -> bool {
        guard(&self.handle).is_some()
    }

    pub fn start(&self) -> Result<(), ThreadError> {
        let mut handle = guard(&self.handle);
        if handle.is_some() {
            return Err(ThreadError::AlreadyStarted);
        }

        self.terminating.store(false, Ordering::Release);
        let worker = Arc::clone(&self.worker);
        let terminating = Arc::clone(&self.terminating);
        *handle = Some(thread::spawn(move || {
            while !terminating.load(Ordering::Acquire) {
                worker.iterate();
            }
        }));
        Ok(())
    }

    /// Flags the loop as terminating and lets the worker unblock
    /// itself. Does not join; pair with [`join`](Self::join) or use
    /// [`stop`](Self::stop). Splitting the two lets a pool flag every
    /// worker before joining any of them.
    pub fn request_stop(&self) {
        if guard(&self.handle).is_none() {
            return;
        }
        self.terminating.store(true, Ordering::Release);
        self.worker.on_terminate();
    }

    pub fn join(&self) {
        let handle = guard(&self.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("worker thread panicked before join");
            }
        }
    }

    pub fn stop(&self) {
        self.request_stop();
        self.join();
    }

    pub fn thread_id(&self) -> Result<ThreadId, ThreadError> {
        guard(&self.handle)
            .as_ref()
            .map(|h| h.thread().id())
            .ok_or(ThreadError::NotStarted)
    }

    #[cfg(unix)]
    pub fn native_handle(&self) -> Result<std::os::unix::thread::RawPthread, ThreadError> {
        use std::os::unix::thread::JoinHandleExt;
        guard(&self.handle)
            .as_ref()
            .map(|h| h.as_pthread_t())
            .ok_or(ThreadError::NotStarted)
    }
}

impl<W: Worker> Drop for WorkerThread<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owns a set of joinable threads addressed by [`ThreadId`].
pub struct ThreadGroup {
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadGroup {
    pub fn new() -> Self {
        Self { threads: Mutex::new(Vec::new()) }
    }

    pub fn create_thread(&self, f: impl FnOnce() + Send + 'static) -> ThreadId {
        let handle = thread::spawn(f);
        let id = handle.thread().id();
        guard(&self.threads).push(handle);
        id
    }

    pub fn add(&self, handle: JoinHandle<()>) -> Result<(), ThreadError> {
        let mut threads = guard(&self.threads);
        if threads.iter().any(|h| h.thread().id() == handle.thread().id()) {
            return Err(ThreadError::AlreadyInGroup);
        }
        threads.push(handle);
        Ok(())
    }

    pub fn remove(&self, id: ThreadId) -> Option<JoinHandle<()>> {
        let mut threads = guard(&self.threads);
        let index = threads.iter().position(|h| h.thread().id() == id)?;
        Some(threads.swap_remove(index))
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        guard(&self.threads).iter().any(|h| h.thread().id() == id)
    }

    pub fn is_this_thread_in(&self) -> bool {
        self.contains(thread::current().id())
    }

    pub fn join_all(&self) -> Result<(), ThreadError> {
        if self.is_this_thread_in() {
            return Err(ThreadError::SelfJoin);
        }

        let threads = std::mem::take(&mut *guard(&self.threads));
        for handle in threads {
            if handle.join().is_err() {
                warn!("grouped thread panicked before join");
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        guard(&self.threads).len()
    }

    pub fn is_empty(&self) -> bool {
        guard(&self.threads).is_empty()
    }
}

impl Default for ThreadGroup {
    fn default() -> Self {
        Self::new()
    }
}
