use std::{collections::HashMap, hash::Hash, sync::Mutex, time::Duration};

use tracing::{debug, warn};

use crate::{ConcurrentQueue, HandlerError, Worker, WorkerThread, guard};

/// What happens to messages still queued when the thread shuts down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainPolicy {
    Discard,
    ProcessRemaining,
}

type Decoder<K, M> = Box<dyn Fn(&M) -> Result<K, HandlerError> + Send + Sync>;
type Handler<M> = Box<dyn Fn(M) -> Result<(), HandlerError> + Send + Sync>;

struct Dispatcher<K, M> {
    queue: ConcurrentQueue<M>,
    decoder: Decoder<K, M>,
    handlers: Mutex<HashMap<K, Handler<M>>>,
}

impl<K: Eq + Hash, M> Dispatcher<K, M> {
    /// Decode and handler failures are logged here and the message
    /// dropped; the dispatch loop itself keeps running.
    fn dispatch(&self, msg: M) {
        let id = match (self.decoder)(&msg) {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "message decode failed, dropping message");
                return;
            }
        };

        let handlers = guard(&self.handlers);
        match handlers.get(&id) {
            Some(handler) => {
                if let Err(err) = handler(msg) {
                    warn!(%err, "message handler failed");
                }
            }
            None => debug!("no handler registered for message, dropping"),
        }
    }
}

impl<K, M> Worker for Dispatcher<K, M>
where
    K: Eq + Hash + Send + Sync + 'static,
    M: Send + 'static,
{
    fn iterate(&self) {
        if let Some(msg) = self.queue.pop() {
            self.dispatch(msg);
        }
    }

    fn on_terminate(&self) {
        // Break the blocked pop so the loop can observe termination.
        self.queue.push_tombstone();
    }
}

/// Worker thread that pops messages, decodes an id per message and
/// invokes the handler registered for that id.
///
/// Dispatch runs on the queue's own thread, so handlers never execute
/// on the pushing thread.
pub struct MessageQueueThread<K, M>
where
    K: Eq + Hash + Send + Sync + 'static,
    M: Send + 'static,
{
    thread: WorkerThread<Dispatcher<K, M>>,
    drain: DrainPolicy,
}

impl<K, M> MessageQueueThread<K, M>
where
    K: Eq + Hash + Send + Sync + 'static,
    M: Send + 'static,
{
    /// Creates the queue and starts its thread.
    pub fn new(
        decoder: impl Fn(&M) -> Result<K, HandlerError> + Send + Sync + 'static,
        drain: DrainPolicy,
    ) -> Self {
        let thread = WorkerThread::new(Dispatcher {
            queue: ConcurrentQueue::new(),
            decoder: Box::new(decoder),
            handlers: Mutex::new(HashMap::new()),
        });
        thread.start().expect("freshly created worker cannot be running");
        Self { thread, drain }
    }

    /// At most one handler per id; a second registration for the same
    /// id fails.
    pub fn register_handler(
        &self,
        id: K,
        handler: impl Fn(M) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> Result<(), HandlerError> {
        let mut handlers = guard(&self.thread.worker().handlers);
        if handlers.contains_key(&id) {
            return Err(HandlerError::AlreadyRegistered);
        }
        handlers.insert(id, Box::new(handler));
        Ok(())
    }

    pub fn push(&self, msg: M) {
        self.thread.worker().queue.push(msg);
    }

    pub fn len(&self) -> usize {
        self.thread.worker().queue.len()
    }

    /// Blocks until the queue has gone empty or `timeout` elapsed;
    /// returns whether it drained. Useful in shutdown paths and tests.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.len() > 0 {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl<K, M> Drop for MessageQueueThread<K, M>
where
    K: Eq + Hash + Send + Sync + 'static,
    M: Send + 'static,
{
    fn drop(&mut self) {
        self.thread.stop();

        if self.drain == DrainPolicy::ProcessRemaining {
            let worker = self.thread.worker();
            // try_pop also consumes leftover shutdown tombstones (as
            // `None`); keep going until no items remain behind them.
            while !worker.queue.is_empty() {
                if let Some(msg) = worker.queue.try_pop() {
                    worker.dispatch(msg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn id_of(msg: &(u32, usize)) -> Result<u32, HandlerError> {
        Ok(msg.0)
    }

    #[test]
    fn routes_by_decoded_id_in_order() {
        let mqt = MessageQueueThread::new(id_of, DrainPolicy::Discard);

        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(AtomicUsize::new(0));

        {
            let seen_a = Arc::clone(&seen_a);
            mqt.register_handler(1, move |(_, seq)| {
                seen_a.lock().unwrap().push(seq);
                Ok(())
            })
            .unwrap();
        }
        {
            let seen_b = Arc::clone(&seen_b);
            mqt.register_handler(2, move |_| {
                seen_b.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        for seq in 0..10 {
            mqt.push((1, seq));
            mqt.push((2, seq));
        }
        assert!(mqt.wait_idle(Duration::from_secs(5)));

        // The final message can still be inside its handler when the
        // queue reports empty.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while seen_b.load(Ordering::SeqCst) < 10 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*seen_a.lock().unwrap(), (0..10).collect::<Vec<_>>());
        assert_eq!(seen_b.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn duplicate_handler_rejected() {
        let mqt = MessageQueueThread::new(id_of, DrainPolicy::Discard);
        mqt.register_handler(1, |_| Ok(())).unwrap();
        assert_eq!(
            mqt.register_handler(1, |_| Ok(())),
            Err(HandlerError::AlreadyRegistered)
        );
    }

    #[test]
    fn handler_error_does_not_kill_the_loop() {
        let mqt = MessageQueueThread::new(id_of, DrainPolicy::Discard);
        let ok = Arc::new(AtomicUsize::new(0));

        mqt.register_handler(1, |_| Err(HandlerError::Handler("nope".into()))).unwrap();
        {
            let ok = Arc::clone(&ok);
            mqt.register_handler(2, move |_| {
                ok.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        }

        mqt.push((1, 0));
        mqt.push((2, 0));
        assert!(mqt.wait_idle(Duration::from_secs(5)));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ok.load(Ordering::SeqCst) < 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(ok.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drain_policy_processes_remaining_on_drop() {
        let handled = Arc::new(AtomicUsize::new(0));
        {
            let mqt = MessageQueueThread::new(id_of, DrainPolicy::ProcessRemaining);
            let handled = Arc::clone(&handled);
            mqt.register_handler(1, move |_| {
                handled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

            // Stop the dispatch thread first so the messages stay queued
            // and must be drained by the destructor.
            mqt.thread.stop();
            for seq in 0..5 {
                mqt.push((1, seq));
            }
        }
        assert_eq!(handled.load(Ordering::SeqCst), 5);
    }
}
