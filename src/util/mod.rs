// src/util/mod.rs

//! Small helpers shared across modules.

pub mod duration;

pub use duration::{format_duration, parse_duration};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Panics inside step code are caught at the fan-out boundary; shared state
/// must stay readable afterwards.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
