//! Upstream connection lifecycle and retry state machine.
//!
//! # States
//! - Idle: no upstream connection
//! - Connecting: request issued, waiting for response headers
//! - Streaming: boundary resolved, body chunks flowing
//! - Retrying: an attempt failed, the retry timer is pending
//! - Exhausted: the retry ceiling was hit (transient, reported then Idle)
//!
//! # State Transitions
//! ```text
//! Idle → Connecting: start() on first viewer
//! Connecting → Streaming: headers received, boundary resolved
//! Connecting/Streaming → Retrying: connect/read/protocol failure (failures += 1)
//! Retrying → Connecting: timer fired, failures < max_attempts
//! Retrying → Exhausted → Idle: timer fired, failures == max_attempts
//! Streaming → Idle: upstream ended normally
//! any → Idle: shutdown() when the last viewer leaves
//! ```
//!
//! The connector never runs on its own: the owning session polls
//! [`UpstreamConnector::next_event`], which is cancel-safe, alongside its
//! command channel.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::time::{Instant, Sleep};

use crate::observability::metrics;
use crate::relay::boundary::extract_boundary;
use crate::relay::rewriter::FrameRewriter;
use crate::relay::upstream::{ByteStream, UpstreamError, UpstreamResponse, UpstreamSource};
use crate::resilience::{RetryDecision, RetryPolicy, RetryTimer};

/// Externally visible connector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    Idle,
    Connecting,
    Streaming,
    Retrying,
    Exhausted,
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectorState::Idle => "idle",
            ConnectorState::Connecting => "connecting",
            ConnectorState::Streaming => "streaming",
            ConnectorState::Retrying => "retrying",
            ConnectorState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// What the session needs to act on.
#[derive(Debug)]
pub enum ConnectorEvent {
    /// Headers arrived; viewers may be registered with `boundary`.
    Streaming { boundary: String },
    /// A corrected body chunk.
    Chunk(Bytes),
    /// Upstream closed the body normally.
    Ended,
    /// Retry ceiling reached after `failures` consecutive failures.
    Exhausted { failures: u32 },
}

/// Timing knobs for the connector.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorSettings {
    pub retry: RetryPolicy,
    /// Deadline for response headers.
    pub header_timeout: Duration,
    /// Longest silence tolerated on the body; `None` waits forever.
    pub read_idle: Option<Duration>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            header_timeout: Duration::from_secs(5),
            read_idle: Some(Duration::from_secs(30)),
        }
    }
}

struct StreamingEpisode {
    body: ByteStream,
    rewriter: FrameRewriter,
    idle: Option<(Duration, Pin<Box<Sleep>>)>,
}

impl StreamingEpisode {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpstreamError> {
        let item = match &mut self.idle {
            Some((window, deadline)) => tokio::select! {
                item = self.body.next() => item,
                _ = deadline.as_mut() => return Err(UpstreamError::ReadIdle(*window)),
            },
            None => self.body.next().await,
        };

        match item {
            Some(Ok(chunk)) => {
                if let Some((window, deadline)) = &mut self.idle {
                    deadline.as_mut().reset(Instant::now() + *window);
                }
                Ok(Some(self.rewriter.rewrite(chunk)))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

enum Phase {
    Idle,
    Connecting(BoxFuture<'static, Result<UpstreamResponse, UpstreamError>>),
    Streaming(StreamingEpisode),
    Retrying(BoxFuture<'static, ()>),
}

/// Owns the one upstream connection of a session.
pub struct UpstreamConnector {
    stream: Arc<str>,
    upstream: Arc<dyn UpstreamSource>,
    timer: Arc<dyn RetryTimer>,
    settings: ConnectorSettings,
    phase: Phase,
    failures: u32,
    connects: u64,
}

impl UpstreamConnector {
    pub fn new(
        stream: Arc<str>,
        upstream: Arc<dyn UpstreamSource>,
        timer: Arc<dyn RetryTimer>,
        settings: ConnectorSettings,
    ) -> Self {
        Self {
            stream,
            upstream,
            timer,
            settings,
            phase: Phase::Idle,
            failures: 0,
            connects: 0,
        }
    }

    pub fn state(&self) -> ConnectorState {
        match self.phase {
            Phase::Idle => ConnectorState::Idle,
            Phase::Connecting(_) => ConnectorState::Connecting,
            Phase::Streaming(_) => ConnectorState::Streaming,
            Phase::Retrying(_) => ConnectorState::Retrying,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Consecutive failed attempts in the current cycle.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Connection attempts issued over the connector's lifetime.
    pub fn connects(&self) -> u64 {
        self.connects
    }

    /// Idle → Connecting. No-op if a connection or retry is already in flight.
    pub fn start(&mut self) {
        if self.is_idle() {
            self.failures = 0;
            self.begin_attempt();
        }
    }

    /// Drop any connection, pending attempt or retry timer and return to Idle.
    /// Returns whether anything was torn down.
    pub fn shutdown(&mut self) -> bool {
        let was_active = !self.is_idle();
        self.phase = Phase::Idle;
        self.failures = 0;
        if was_active {
            tracing::debug!(stream = %self.stream, "Upstream connection released");
        }
        was_active
    }

    /// Wait for the next event worth reporting to the session.
    ///
    /// Failures are handled internally (Retrying); only boundary resolution,
    /// chunks, normal end and exhaustion come out. Pending forever while Idle.
    pub async fn next_event(&mut self) -> ConnectorEvent {
        loop {
            match &mut self.phase {
                Phase::Idle => std::future::pending::<()>().await,
                Phase::Connecting(attempt) => match attempt.as_mut().await {
                    Ok(response) => {
                        if let Some(event) = self.on_headers(response) {
                            return event;
                        }
                    }
                    Err(e) => self.fail(e),
                },
                Phase::Streaming(episode) => match episode.next_chunk().await {
                    Ok(Some(chunk)) => return ConnectorEvent::Chunk(chunk),
                    Ok(None) => {
                        tracing::info!(stream = %self.stream, "Upstream stream ended");
                        self.phase = Phase::Idle;
                        self.failures = 0;
                        return ConnectorEvent::Ended;
                    }
                    Err(e) => self.fail(e),
                },
                Phase::Retrying(delay) => {
                    delay.as_mut().await;
                    match self.settings.retry.decide(self.failures) {
                        RetryDecision::Reconnect { attempt } => {
                            tracing::info!(
                                stream = %self.stream,
                                attempt,
                                max_attempts = self.settings.retry.max_attempts(),
                                "Retrying upstream request"
                            );
                            self.begin_attempt();
                        }
                        RetryDecision::GiveUp => {
                            let failures = self.failures;
                            self.phase = Phase::Idle;
                            self.failures = 0;
                            return ConnectorEvent::Exhausted { failures };
                        }
                    }
                }
            }
        }
    }

    fn begin_attempt(&mut self) {
        self.connects += 1;
        metrics::record_upstream_connect(&self.stream);
        tracing::debug!(
            stream = %self.stream,
            upstream = %self.upstream.describe(),
            "Sending upstream request"
        );

        let upstream = Arc::clone(&self.upstream);
        let timeout = self.settings.header_timeout;
        self.phase = Phase::Connecting(Box::pin(async move {
            match tokio::time::timeout(timeout, upstream.connect()).await {
                Ok(result) => result,
                Err(_) => Err(UpstreamError::HeaderTimeout(timeout)),
            }
        }));
    }

    fn on_headers(&mut self, response: UpstreamResponse) -> Option<ConnectorEvent> {
        let boundary = extract_boundary(response.content_type.as_deref().unwrap_or_default());
        if boundary.is_empty() {
            self.fail(UpstreamError::MissingBoundary(response.content_type));
            return None;
        }

        tracing::info!(stream = %self.stream, boundary = %boundary, "Upstream streaming");
        self.failures = 0;
        let idle = self
            .settings
            .read_idle
            .map(|window| (window, Box::pin(tokio::time::sleep(window))));
        self.phase = Phase::Streaming(StreamingEpisode {
            body: response.body,
            rewriter: FrameRewriter::new(&boundary),
            idle,
        });
        Some(ConnectorEvent::Streaming { boundary })
    }

    fn fail(&mut self, error: UpstreamError) {
        self.failures += 1;
        tracing::warn!(
            stream = %self.stream,
            failures = self.failures,
            error = %error,
            "Upstream request failed"
        );
        metrics::record_upstream_failure(&self.stream, error.kind());
        self.phase = Phase::Retrying(self.timer.sleep(self.settings.retry.delay()));
    }
}
