//! Retry policy for the upstream connection.
//!
//! # Responsibilities
//! - Hold the retry ceiling and the fixed delay between attempts
//! - Decide, when a retry timer fires, whether to reconnect or give up
//!
//! # Design Decisions
//! - Fixed delay, no jitter: there is exactly one upstream connection per
//!   camera, so there is no herd to spread out
//! - The counter bounds consecutive failures; reaching Streaming resets it

use std::time::Duration;

use crate::config::RetryConfig;

/// What to do once the retry delay has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Issue connection attempt number `attempt` (1-based within the cycle).
    Reconnect { attempt: u32 },
    /// The ceiling is reached; terminate viewers.
    GiveUp,
}

/// Bounded fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Decide after `failures` consecutive failed attempts.
    pub fn decide(&self, failures: u32) -> RetryDecision {
        if failures < self.max_attempts {
            RetryDecision::Reconnect {
                attempt: failures + 1,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }
}
