//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake, PEM material from config)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - TLS is optional and handled transparently by axum-server
//! - Missing certificate files are reported before binding

pub mod tls;

pub use tls::load_tls_config;
