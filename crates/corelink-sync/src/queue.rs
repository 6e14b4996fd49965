use std::{collections::VecDeque, sync::Mutex, time::Duration};

use crate::{InitialState, NotifyKind, QueueError, ResetKind, SyncEvent, guard};

enum Slot<T> {
    Item(T),
    /// Sentinel that unblocks one blocked `pop` at shutdown.
    Tombstone,
}

enum End {
    Front,
    Back,
}

/// Unbounded MPMC FIFO with blocking, timed and non-blocking pops plus
/// a back-end steal for work-stealing consumers.
///
/// A blocked `pop` is broken by `push_tombstone`; the unblocked call
/// returns `None` so shutdown paths can tell "no more work" apart from
/// a popped item.
pub struct ConcurrentQueue<T> {
    items: Mutex<VecDeque<Slot<T>>>,
    item_event: SyncEvent,
}

impl<T> ConcurrentQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            item_event: SyncEvent::with_options(
                NotifyKind::One,
                ResetKind::Manual,
                InitialState::Unsignalled,
            ),
        }
    }

    pub fn len(&self) -> usize {
        guard(&self.items).iter().filter(|s| matches!(s, Slot::Item(_))).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, item: T) {
        guard(&self.items).push_back(Slot::Item(item));
        self.item_event.signal();
    }

    /// Enqueues a tombstone; exactly one blocked `pop` per call returns
    /// `None`.
    pub fn push_tombstone(&self) {
        guard(&self.items).push_back(Slot::Tombstone);
        self.item_event.signal();
    }

    /// Blocks until an item or a tombstone arrives. `None` means the
    /// wait was broken by a tombstone.
    pub fn pop(&self) -> Option<T> {
        loop {
            self.item_event.wait();
            match self.pop_now(End::Front) {
                Some(Slot::Item(item)) => return Some(item),
                Some(Slot::Tombstone) => return None,
                // Another consumer won the race; wait again.
                None => {}
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        match self.pop_now(End::Front) {
            Some(Slot::Item(item)) => Some(item),
            _ => None,
        }
    }

    pub fn try_pop_or_fail(&self) -> Result<T, QueueError> {
        self.try_pop().ok_or(QueueError::Empty)
    }

    /// `None` on timeout or when beaten to the item by another consumer.
    pub fn timed_pop(&self, timeout: Duration) -> Option<T> {
        if self.item_event.wait_for(timeout) { self.try_pop() } else { None }
    }

    pub fn timed_pop_or_fail(&self, timeout: Duration) -> Result<T, QueueError> {
        if !self.item_event.wait_for(timeout) {
            return Err(QueueError::Timeout);
        }
        self.try_pop().ok_or(QueueError::Empty)
    }

    /// Non-blocking pop from the back, LIFO relative to `push`.
    pub fn try_steal(&self) -> Option<T> {
        match self.pop_now(End::Back) {
            Some(Slot::Item(item)) => Some(item),
            _ => None,
        }
    }

    /// Borrows the item at `index` (if any) under the queue lock.
    /// Positions are only stable while no other consumer runs.
    pub fn peek<R>(&self, index: usize, f: impl FnOnce(Option<&T>) -> R) -> R {
        let items = guard(&self.items);
        let item = items.get(index).and_then(|slot| match slot {
            Slot::Item(item) => Some(item),
            Slot::Tombstone => None,
        });
        f(item)
    }

    /// Drops every queued item. Callers must make sure no consumer is
    /// blocked in `pop` at this point.
    pub fn clear(&self) {
        guard(&self.items).clear();
        self.item_event.reset();
    }

    fn pop_now(&self, end: End) -> Option<Slot<T>> {
        let mut items = guard(&self.items);
        let slot = match end {
            End::Front => items.pop_front(),
            End::Back => items.pop_back(),
        };
        if items.is_empty() {
            self.item_event.reset();
        }
        slot
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn fifo_single_thread() {
        let q = ConcurrentQueue::new();
        for i in 0..8 {
            q.push(i);
        }
        for i in 0..8 {
            assert_eq!(q.try_pop(), Some(i));
        }
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn steal_takes_from_the_back() {
        let q = ConcurrentQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.try_steal(), Some(3));
        assert_eq!(q.try_pop(), Some(1));
    }

    #[test]
    fn timed_pop_times_out() {
        let q: ConcurrentQueue<u32> = ConcurrentQueue::new();
        assert_eq!(q.timed_pop(Duration::from_millis(20)), None);
        assert_eq!(q.timed_pop_or_fail(Duration::from_millis(20)), Err(QueueError::Timeout));
    }

    #[test]
    fn try_pop_or_fail_reports_empty() {
        let q: ConcurrentQueue<u32> = ConcurrentQueue::new();
        assert_eq!(q.try_pop_or_fail(), Err(QueueError::Empty));
        q.push(5);
        assert_eq!(q.try_pop_or_fail(), Ok(5));
    }

    #[test]
    fn peek_borrows_without_removal() {
        let q = ConcurrentQueue::new();
        q.push("a");
        q.push("b");
        assert_eq!(q.peek(1, |item| item.copied()), Some("b"));
        assert_eq!(q.peek(2, |item| item.copied()), None);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn tombstone_unblocks_exactly_one_pop_per_call() {
        let q: Arc<ConcurrentQueue<u32>> = Arc::new(ConcurrentQueue::new());
        let unblocked = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let q = Arc::clone(&q);
                let unblocked = Arc::clone(&unblocked);
                thread::spawn(move || {
                    assert_eq!(q.pop(), None);
                    unblocked.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        q.push_tombstone();
        while unblocked.load(Ordering::SeqCst) < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(unblocked.load(Ordering::SeqCst), 1);

        q.push_tombstone();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(unblocked.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn producers_keep_their_submission_order() {
        const PER_PRODUCER: usize = 1000;
        let q: Arc<ConcurrentQueue<(usize, usize)>> = Arc::new(ConcurrentQueue::new());

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        q.push((p, seq));
                    }
                })
            })
            .collect();

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut last_seen = [0usize; 4];
                let mut total = 0;
                while total < 4 * PER_PRODUCER {
                    if let Some((p, seq)) = q.pop() {
                        // Each consumer observes a linear extension of
                        // every producer's per-thread order.
                        assert!(seq >= last_seen[p]);
                        last_seen[p] = seq;
                        total += 1;
                    }
                }
            })
        };

        for h in producers {
            h.join().unwrap();
        }
        consumer.join().unwrap();
    }
}
