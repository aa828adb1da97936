//! Retry with backoff and jitter for transient database failures.
//!
//! Only connection-class errors are worth retrying; query syntax and
//! constraint problems will fail identically every time and return
//! immediately.

use std::time::Duration;

/// Delay for retry `i` (0-based): `base * factor^i ± U(-base, base)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base: Duration::from_millis(500),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base.as_secs_f64();
        let exponential = base * self.factor.powi(retry as i32);
        let jitter = fastrand::f64() * 2.0 * base - base;
        Duration::from_secs_f64((exponential + jitter).max(0.0))
    }
}

/// Whether an operation that failed with `err` may succeed on a retry
/// against a fresh connection.
pub fn is_recoverable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,

        // Postgres class 08: connection exceptions
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),

        _ => false,
    }
}
