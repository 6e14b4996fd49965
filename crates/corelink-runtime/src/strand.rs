use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use crate::{IoRuntime, Task, guard};

/// Serializing wrapper around posted tasks.
///
/// Tasks posted through one strand run one at a time, in posting order,
/// on whichever pool worker picks up the drain. Tasks on different
/// strands still run concurrently.
#[derive(Clone)]
pub struct Strand {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: IoRuntime,
    state: Mutex<State>,
}

struct State {
    queue: VecDeque<Task>,
    running: bool,
}

impl Strand {
    pub fn new(runtime: &IoRuntime) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime: runtime.clone(),
                state: Mutex::new(State { queue: VecDeque::new(), running: false }),
            }),
        }
    }

    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        if self.inner.runtime.shared().is_stopped() {
            // No workers left to drain the strand; run the task here so
            // its submissions still resolve (as aborted).
            task();
            return;
        }

        {
            let mut state = guard(&self.inner.state);
            state.queue.push_back(Box::new(task));
            if state.running {
                return;
            }
            state.running = true;
        }

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.post(move || Inner::drain(&inner));
    }
}

impl Inner {
    fn drain(inner: &Arc<Self>) {
        loop {
            let task = {
                let mut state = guard(&inner.state);
                match state.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        state.running = false;
                        return;
                    }
                }
            };
            task();
        }
    }
}
