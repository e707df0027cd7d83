use std::sync::{Mutex, MutexGuard};

/// Locks the mutex, recovering the guard if another thread panicked while
/// holding it. Guarded data is plain values that stay consistent between
/// statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
