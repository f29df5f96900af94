//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay sessions and the HTTP layer produce:
//!     → logging.rs (structured log events, stream/viewer fields)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Viewer disconnects are routine and logged at debug, never as errors
//! - Metrics are cheap (atomic increments) and optional

pub mod logging;
pub mod metrics;
