//! Outstanding-work counter with a blocking wait-for-zero.
//!
//! Uses `Mutex + Condvar` from std, the same shape as a counting semaphore
//! but waiting for the count to *reach* zero instead of leave it.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Number of batch statements enqueued but not yet executed.
///
/// Producers increment once per enqueued statement, workers decrement once
/// per successful execution. [`await_zero`](OutstandingCounter::await_zero)
/// only returns once the count is observed at zero under the lock.
#[derive(Debug, Default)]
pub struct OutstandingCounter {
    count: Mutex<usize>,
    zero: Condvar,
}

impl OutstandingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking holder cannot leave the count half-updated, so poison is ignored.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment(&self) {
        *self.lock() += 1;
    }

    /// Subtract one and wake every waiter when the count hits zero.
    pub fn decrement(&self) {
        let mut count = self.lock();
        debug_assert!(*count > 0, "decrement without matching increment");
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// Current value
    pub fn get(&self) -> usize {
        *self.lock()
    }

    /// Block until the count reads zero.
    ///
    /// Spurious wakeups re-check the predicate; nothing but a drained
    /// counter ends the wait.
    pub fn await_zero(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self
                .zero
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`await_zero`](Self::await_zero) but gives up after `timeout`.
    ///
    /// Returns `true` if the counter reached zero.
    pub fn await_zero_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .zero
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}
