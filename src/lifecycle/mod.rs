//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Spawn relay sessions → Bind listener → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → End every viewer → Stop accepting → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then sessions, then listeners
//! - Viewer bodies never end on their own, so shutdown closes them first

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{trigger_on_signal, wait_for_termination};
pub use startup::{serve, StartupError};
