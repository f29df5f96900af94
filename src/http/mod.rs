//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, one route per stream)
//!     → relay session admits the viewer (waits for the boundary)
//!     → response.rs (fixed header block, streaming body)
//!     → Send to viewer until it disconnects or the session ends it
//!
//! GET / → directory.rs (JSON listing of streams)
//! ```

pub mod directory;
pub mod response;
pub mod server;

pub use server::HttpServer;
