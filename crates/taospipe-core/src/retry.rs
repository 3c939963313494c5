//! Fixed-interval retry around store calls

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::error::StoreError;
use crate::store::{Row, Store};

/// Sleep between attempts when none is configured.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// How many times to re-run a failed statement and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever, `Some(0)` is a single attempt
    pub max_retries: Option<u32>,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Keep trying until the store accepts the statement.
    pub const fn forever(interval: Duration) -> Self {
        Self {
            max_retries: None,
            interval,
        }
    }

    /// Exactly one attempt.
    pub const fn once() -> Self {
        Self {
            max_retries: Some(0),
            interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub const fn bounded(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            interval,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::forever(DEFAULT_RETRY_INTERVAL)
    }
}

/// Run a write statement, retrying per `policy`.
///
/// Returns the affected row count on first success, or the last error once
/// the budget is spent. With an unbounded policy this only returns `Ok`.
pub fn execute_with_retry<S: Store + ?Sized>(
    store: &S,
    sql: &str,
    policy: &RetryPolicy,
) -> Result<u64, StoreError> {
    with_retry(sql, policy, || store.execute(sql))
}

/// Read-path counterpart of [`execute_with_retry`].
pub fn query_with_retry<S: Store + ?Sized>(
    store: &S,
    sql: &str,
    policy: &RetryPolicy,
) -> Result<Vec<Row>, StoreError> {
    with_retry(sql, policy, || store.query(sql))
}

/// Run a write statement until the store accepts it.
///
/// The batch path's executor: failures of any kind, panics included, are
/// logged and retried after `interval`; nothing is ever given up.
pub fn execute_until_accepted<S: Store + ?Sized>(store: &S, sql: &str, interval: Duration) -> u64 {
    let mut attempt = 0u64;
    loop {
        attempt += 1;
        match guarded(&mut || store.execute(sql)) {
            Ok(rows) => return rows,
            Err(err) => {
                log::warn!("attempt {attempt} failed: {err}, retrying in {interval:?}\n{sql}");
                std::thread::sleep(interval);
            }
        }
    }
}

fn with_retry<T>(
    sql: &str,
    policy: &RetryPolicy,
    mut attempt_fn: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut remaining = policy.max_retries;
    let mut attempt = 0u64;
    loop {
        attempt += 1;
        let err = match guarded(&mut attempt_fn) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if let Some(n) = remaining.as_mut() {
            if *n == 0 {
                log::error!("statement failed after {attempt} attempt(s): {err}\n{sql}");
                return Err(err);
            }
            if !err.is_retryable() {
                log::error!("statement failed permanently: {err}\n{sql}");
                return Err(err);
            }
            *n -= 1;
        }
        log::warn!(
            "attempt {attempt} failed: {err}, retrying in {:?}\n{sql}",
            policy.interval
        );
        std::thread::sleep(policy.interval);
    }
}

/// A panicking store counts as a failed attempt instead of unwinding the worker.
fn guarded<T>(
    attempt_fn: &mut impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    match panic::catch_unwind(AssertUnwindSafe(attempt_fn)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(StoreError::Panicked(msg))
        }
    }
}
