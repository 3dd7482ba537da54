//! In-memory store backends.

pub mod lock_store;
pub mod message_store;
pub mod responder_directory;
pub mod run_store;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the inner data if a previous holder
/// panicked. Store rows stay usable either way.
pub(crate) fn lock_rows<T>(rows: &Mutex<T>) -> MutexGuard<'_, T> {
    rows.lock().unwrap_or_else(PoisonError::into_inner)
}
