//! Upstream MJPEG source.
//!
//! # Responsibilities
//! - Issue the single GET to the camera (HTTP or HTTPS)
//! - Surface the `Content-Type` header and the body as a chunk stream
//! - Classify transport and protocol failures for the retry machine

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use url::Url;

use crate::error::RelayError;

/// Upstream body as an unbounded sequence of chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// Failures talking to the upstream source. All of them are retried.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Could not connect or send the request.
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    /// Response headers did not arrive in time.
    #[error("no response headers after {0:?}")]
    HeaderTimeout(Duration),

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The `Content-Type` carries no usable boundary parameter.
    #[error("content type {0:?} has no usable boundary")]
    MissingBoundary(Option<String>),

    /// Reading the body failed.
    #[error("read failed: {0}")]
    Read(#[source] reqwest::Error),

    /// The body produced no bytes within the idle window.
    #[error("no data for {0:?}")]
    ReadIdle(Duration),

    /// Any other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpstreamError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connect(_) => "connect",
            UpstreamError::HeaderTimeout(_) => "header_timeout",
            UpstreamError::Status(_) => "status",
            UpstreamError::MissingBoundary(_) => "protocol",
            UpstreamError::Read(_) => "read",
            UpstreamError::ReadIdle(_) => "read_idle",
            UpstreamError::Io(_) => "io",
        }
    }
}

/// Headers and body of one upstream episode.
pub struct UpstreamResponse {
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Something that can open the upstream stream.
#[async_trait]
pub trait UpstreamSource: Send + Sync + 'static {
    /// Open a new connection and wait for response headers.
    async fn connect(&self) -> Result<UpstreamResponse, UpstreamError>;

    /// Target description for logs.
    fn describe(&self) -> String;
}

/// HTTP(S) upstream backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    url: Url,
}

impl HttpUpstream {
    /// Build an upstream for `url`, switching the scheme to HTTPS when
    /// `force_https` is set.
    pub fn new(url: &str, force_https: bool, connect_timeout: Duration) -> Result<Self, RelayError> {
        let url = endpoint_url(url, force_https)?;
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RelayError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl UpstreamSource for HttpUpstream {
    async fn connect(&self) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(UpstreamError::Connect)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

        let body = response.bytes_stream().map_err(UpstreamError::Read).boxed();

        Ok(UpstreamResponse { content_type, body })
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Parse and normalize the configured upstream URL.
pub fn endpoint_url(raw: &str, force_https: bool) -> Result<Url, RelayError> {
    let mut url = Url::parse(raw)
        .map_err(|e| RelayError::Configuration(format!("invalid upstream URL {:?}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(RelayError::Configuration(format!(
                "unsupported upstream scheme {:?}",
                other
            )))
        }
    }

    if force_https && url.scheme() == "http" {
        url.set_scheme("https").map_err(|_| {
            RelayError::Configuration(format!("cannot switch {:?} to https", raw))
        })?;
    }
    Ok(url)
}
