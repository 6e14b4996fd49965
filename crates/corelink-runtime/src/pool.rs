use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use corelink_sync::Worker;
use corelink_utils::{ThreadPriority, boot_thread};

use crate::runtime::Shared;

/// Shape of the completion worker pool.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of completion workers; clamped to at least one.
    pub workers: usize,
    /// Optional per-worker core pinning, indexed by worker.
    pub cores: Option<Vec<usize>>,
    pub priority: ThreadPriority,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            cores: None,
            priority: ThreadPriority::OsDefault,
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers, ..Self::default() }
    }

    pub(crate) fn core_for(&self, index: usize) -> Option<usize> {
        self.cores.as_ref().and_then(|cores| cores.get(index).copied())
    }
}

/// Pool worker draining the runtime's scheduled completions.
pub(crate) struct CompletionWorker {
    shared: Arc<Shared>,
    core: Option<usize>,
    priority: ThreadPriority,
    booted: AtomicBool,
}

impl CompletionWorker {
    pub(crate) fn new(shared: Arc<Shared>, core: Option<usize>, priority: ThreadPriority) -> Self {
        Self { shared, core, priority, booted: AtomicBool::new(false) }
    }
}

impl Worker for CompletionWorker {
    fn iterate(&self) {
        if !self.booted.swap(true, Ordering::Relaxed) {
            boot_thread(self.core, self.priority);
        }

        if let Some(task) = self.shared.completions.pop() {
            task();
        }
    }

    fn on_terminate(&self) {
        self.shared.completions.push_tombstone();
    }
}
