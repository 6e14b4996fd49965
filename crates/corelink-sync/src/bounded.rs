use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, PoisonError},
};

use crate::guard;

/// Fixed-capacity blocking ring buffer.
///
/// `push_front` blocks while the buffer is full, `pop_back` blocks while
/// it is empty. Ordering is strict FIFO for any number of producers and
/// consumers.
pub struct BoundedBuffer<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedBuffer<T> {
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bounded buffer needs a non-zero capacity");
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn push_front(&self, item: T) {
        let mut items = guard(&self.items);
        while items.len() == self.capacity {
            items = self.not_full.wait(items).unwrap_or_else(PoisonError::into_inner);
        }
        items.push_front(item);
        drop(items);

        self.not_empty.notify_one();
    }

    pub fn pop_back(&self) -> T {
        let mut items = guard(&self.items);
        while items.is_empty() {
            items = self.not_empty.wait(items).unwrap_or_else(PoisonError::into_inner);
        }
        let item = items.pop_back().unwrap();
        drop(items);

        self.not_full.notify_one();
        item
    }

    pub fn len(&self) -> usize {
        guard(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        guard(&self.items).is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
