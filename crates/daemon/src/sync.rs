//! Small synchronisation helpers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquires `mutex` even when a previous holder panicked.
///
/// All state behind these locks stays internally consistent across a
/// panic (plain counters and queues), so continuing with the inner
/// value is always safe.
pub(crate) fn hold<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
