//! Errors surfaced to callers of the relay.

use thiserror::Error;

/// Errors returned by session construction and `handle_viewer`.
///
/// Upstream failures never appear here: the connector retries them, and a
/// viewer only ever observes their end result as [`RelayError::Terminated`]
/// or a closed stream.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or unusable configuration; fatal to session creation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The upstream episode ended before the viewer could be admitted.
    #[error("upstream unavailable; viewer terminated before the stream started")]
    Terminated,

    /// The session task has stopped (shutdown).
    #[error("relay session {0:?} is not running")]
    SessionClosed(String),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
