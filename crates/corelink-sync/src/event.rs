use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

use crate::guard;

/// How many waiters a `signal` releases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifyKind {
    One,
    All,
}

/// Whether a satisfied wait clears the signalled state itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetKind {
    Auto,
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitialState {
    Unsignalled,
    Signalled,
}

/// Wait/notify event over a mutex and condition variable.
///
/// In auto-reset mode a returning `wait` atomically clears the signal
/// before the next waiter can observe it. `NotifyKind::All` forces
/// manual reset; broadcasting with auto-reset would make it a race
/// which single waiter consumes the signal.
pub struct SyncEvent {
    flag: Mutex<bool>,
    cond: Condvar,
    notify_all: bool,
    auto_reset: bool,
}

impl SyncEvent {
    /// Auto-reset, notify-one, initially unsignalled.
    pub fn new() -> Self {
        Self::with_options(NotifyKind::One, ResetKind::Auto, InitialState::Unsignalled)
    }

    pub fn with_options(notify: NotifyKind, reset: ResetKind, initial: InitialState) -> Self {
        let notify_all = notify == NotifyKind::All;
        Self {
            flag: Mutex::new(initial == InitialState::Signalled),
            cond: Condvar::new(),
            notify_all,
            auto_reset: !notify_all && reset == ResetKind::Auto,
        }
    }

    /// Blocks until the event is signalled.
    pub fn wait(&self) {
        let mut flag = guard(&self.flag);
        while !*flag {
            flag = self.cond.wait(flag).unwrap_or_else(PoisonError::into_inner);
        }
        if self.auto_reset {
            *flag = false;
        }
    }

    /// Returns `true` if signalled within `timeout`. The state is left
    /// untouched on timeout.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let flag = guard(&self.flag);
        let (mut flag, result) = self
            .cond
            .wait_timeout_while(flag, timeout, |signalled| !*signalled)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && !*flag {
            return false;
        }
        if self.auto_reset {
            *flag = false;
        }
        true
    }

    pub fn signal(&self) {
        {
            let mut flag = guard(&self.flag);
            *flag = true;
        }

        if self.notify_all {
            self.cond.notify_all();
        } else {
            self.cond.notify_one();
        }
    }

    /// Forces the event back to unsignalled. Must not be called while
    /// waiters are blocked on it.
    pub fn reset(&self) {
        *guard(&self.flag) = false;
    }
}

impl Default for SyncEvent {
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
    fn initially_signalled_passes_through() {
        let ev =
            SyncEvent::with_options(NotifyKind::One, ResetKind::Auto, InitialState::Signalled);
        ev.wait();
        // Auto-reset consumed the signal.
        assert!(!ev.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn wait_for_times_out_without_signal() {
        let ev = SyncEvent::new();
        assert!(!ev.wait_for(Duration::from_millis(20)));
    }

    #[test]
    fn manual_reset_broadcast_releases_all_waiters() {
        let ev = Arc::new(SyncEvent::with_options(
            NotifyKind::All,
            ResetKind::Manual,
            InitialState::Unsignalled,
        ));
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ev = Arc::clone(&ev);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    ev.wait();
                    released.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        // Give every thread time to block before the broadcast.
        thread::sleep(Duration::from_millis(50));
        ev.signal();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn auto_reset_releases_one_waiter_per_signal() {
        let ev = Arc::new(SyncEvent::new());
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let ev = Arc::clone(&ev);
                let released = Arc::clone(&released);
                thread::spawn(move || {
                    ev.wait();
                    released.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        for expected in 1..=3 {
            ev.signal();
            while released.load(Ordering::SeqCst) < expected {
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(released.load(Ordering::SeqCst), expected);
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
