//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Every stream has a usable source URL and a unique, absolute path
//! - Validate value ranges (retry ceiling, buffer sizes, connect timeout)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{RelayConfig, RetryConfig};
use crate::relay::upstream::endpoint_url;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("stream {0:?} is declared more than once")]
    DuplicateName(String),

    #[error("stream {stream:?}: path {path:?} must start with '/'")]
    RelativePath { stream: String, path: String },

    #[error("stream {stream:?}: path '/' is reserved for the directory")]
    ReservedPath { stream: String },

    #[error("path {0:?} is used by more than one stream")]
    DuplicatePath(String),

    #[error("stream {0:?}: please provide a source MJPEG URL")]
    MissingUrl(String),

    #[error("stream {stream:?}: {reason}")]
    InvalidUrl { stream: String, reason: String },

    #[error("{scope}: retries.max_attempts must be at least 1")]
    NoAttempts { scope: String },

    #[error("viewers.buffer_chunks must be at least 1")]
    EmptyViewerBuffer,

    #[error("timeouts.connect_secs must be at least 1")]
    ZeroConnectTimeout,

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    let mut names = HashSet::new();
    let mut paths = HashSet::new();
    for stream in &config.streams {
        if !names.insert(stream.name.as_str()) {
            errors.push(ValidationError::DuplicateName(stream.name.clone()));
        }

        if !stream.path.starts_with('/') {
            errors.push(ValidationError::RelativePath {
                stream: stream.name.clone(),
                path: stream.path.clone(),
            });
        } else if stream.path == "/" && config.directory.enabled {
            errors.push(ValidationError::ReservedPath {
                stream: stream.name.clone(),
            });
        }
        if !paths.insert(stream.path.as_str()) {
            errors.push(ValidationError::DuplicatePath(stream.path.clone()));
        }

        match stream.url.as_deref().map(str::trim) {
            None | Some("") => errors.push(ValidationError::MissingUrl(stream.name.clone())),
            Some(url) => {
                if let Err(e) = endpoint_url(url, stream.force_https) {
                    errors.push(ValidationError::InvalidUrl {
                        stream: stream.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Some(retries) = &stream.retries {
            check_retries(retries, &format!("stream {:?}", stream.name), &mut errors);
        }
    }

    check_retries(&config.retries, "retries", &mut errors);

    if config.viewers.buffer_chunks == 0 {
        errors.push(ValidationError::EmptyViewerBuffer);
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_retries(retries: &RetryConfig, scope: &str, errors: &mut Vec<ValidationError>) {
    if retries.max_attempts == 0 {
        errors.push(ValidationError::NoAttempts {
            scope: scope.to_string(),
        });
    }
}
