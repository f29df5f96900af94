//! Retry delay timer.
//!
//! The connector sleeps through this trait so tests can drive the retry state
//! machine without waiting on the wall clock.

use std::time::Duration;

use futures_util::future::BoxFuture;

/// Source of retry delays.
pub trait RetryTimer: Send + Sync + 'static {
    /// A future that resolves after `delay`. Dropping it cancels the timer.
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()>;
}

/// Tokio-backed timer used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl RetryTimer for TokioTimer {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(delay))
    }
}
