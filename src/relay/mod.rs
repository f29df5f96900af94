//! MJPEG relay engine.
//!
//! # Data Flow
//! ```text
//! camera ──GET──▶ upstream.rs (HttpUpstream)
//!     → connector.rs (Connecting → Streaming, retry state machine)
//!     → boundary.rs (boundary token from Content-Type)
//!     → rewriter.rs (CRLF before every frame marker)
//!     → registry.rs (join-at-boundary fan-out)
//!     → viewer.rs (per-viewer bounded buffer → HTTP body)
//! session.rs owns all of the above in one task per stream.
//! ```
//!
//! # Design Decisions
//! - At most one upstream connection per session, regardless of viewer count
//! - Upstream failures are retried inside the connector and never reach viewers
//!   as errors, only as the end of their stream
//! - Viewers are only admitted once a boundary is known

pub mod boundary;
pub mod connector;
pub mod registry;
pub mod rewriter;
pub mod session;
pub mod upstream;
pub mod viewer;

pub use boundary::extract_boundary;
pub use connector::{ConnectorSettings, ConnectorState};
pub use rewriter::FrameRewriter;
pub use session::{RelaySession, SessionHandle, SessionOptions, SessionStatus};
pub use upstream::{ByteStream, HttpUpstream, UpstreamError, UpstreamResponse, UpstreamSource};
pub use viewer::{ViewerId, ViewerStream};
