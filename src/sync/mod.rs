//! Async coordination primitives with explicit wait queues.

use std::sync::{MutexGuard as StdGuard, PoisonError};

/// Level-triggered boolean with waiters.
pub mod condition;
/// FIFO-fair, dataless async lock.
pub mod mutex;
/// Coalesces concurrent calls to one in-flight operation.
pub mod single_flight;

pub use condition::Condition;
pub use mutex::{Mutex, MutexGuard};
pub use single_flight::{SingleFlight, SingleFlightError};

/// The wait queues stay consistent across a panicking holder, so poisoning is ignored.
fn lock_ignoring_poison<T>(mutex: &std::sync::Mutex<T>) -> StdGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
