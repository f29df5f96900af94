//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream attempt fails (connect error, timeout, bad status, read error):
//!     → connector records the failure and asks retries.rs for a decision
//!     → timer.rs sleeps the fixed delay (cancelled if viewers leave)
//!     → reconnect, or give up and terminate viewers
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; waiting for upstream headers has a deadline
//! - Only upstream connectivity failures are retried
//! - The timer is injectable so retry behaviour is testable without real delays

pub mod retries;
pub mod timer;

pub use retries::{RetryDecision, RetryPolicy};
pub use timer::{RetryTimer, TokioTimer};
