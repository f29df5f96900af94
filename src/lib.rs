//! MJPEG relay library: one upstream camera connection fanned out to many viewers.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod recorder;
pub mod relay;
pub mod resilience;

pub use config::schema::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
