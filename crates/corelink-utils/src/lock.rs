use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks ignoring poisoning.
///
/// Callers hold their locks only for short critical sections that never
/// leave state half-updated, so a panicked peer does not invalidate the
/// protected data.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
