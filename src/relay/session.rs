//! Relay session: one upstream, many viewers.
//!
//! # Data Flow
//! ```text
//! SessionHandle::handle_viewer()
//!     → Command::Attach over the session channel
//!     → session task: start connector if Idle
//!         → boundary resolved? register now : defer until Streaming
//!     → Admission (boundary + chunk receiver) back to the caller
//!
//! Connector events (same task, strictly ordered with commands):
//!     Streaming → begin episode, drain deferred viewers
//!     Chunk     → registry.deliver (join-at-boundary fan-out)
//!     Ended / Exhausted → terminate every viewer, back to Idle
//!     (status reads Exhausted until the next viewer arrives)
//!
//! ViewerStream dropped → Command::Detach → last viewer gone → connector Idle
//! ```
//!
//! All session state lives in a single task; handles only send messages.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{RetryConfig, StreamConfig, TimeoutConfig, ViewerConfig};
use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::relay::connector::{ConnectorEvent, ConnectorSettings, ConnectorState, UpstreamConnector};
use crate::relay::registry::{Departure, SubscriberRegistry};
use crate::relay::upstream::{HttpUpstream, UpstreamSource};
use crate::relay::viewer::{Admission, ViewerGuard, ViewerId, ViewerStream};
use crate::resilience::{RetryPolicy, RetryTimer, TokioTimer};

/// Messages from handles and viewer guards to the session task.
#[derive(Debug)]
pub(crate) enum Command {
    Attach {
        id: ViewerId,
        reply: oneshot::Sender<Admission>,
    },
    Detach {
        id: ViewerId,
    },
    Shutdown,
}

/// Point-in-time view of a session, published after every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: ConnectorState,
    /// Registered viewers plus viewers waiting for a boundary.
    pub viewers: usize,
    /// Upstream connection attempts since the session started.
    pub connects: u64,
    /// Consecutive failures in the current retry cycle.
    pub failures: u32,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: ConnectorState::Idle,
            viewers: 0,
            connects: 0,
            failures: 0,
        }
    }
}

/// Everything a session needs besides its upstream and timer.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub name: String,
    pub connector: ConnectorSettings,
    pub buffer_chunks: usize,
}

impl SessionOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connector: ConnectorSettings::default(),
            buffer_chunks: ViewerConfig::default().buffer_chunks,
        }
    }

    /// Derive options for a configured stream.
    pub fn from_config(
        stream: &StreamConfig,
        default_retries: &RetryConfig,
        timeouts: &TimeoutConfig,
        viewers: &ViewerConfig,
    ) -> Self {
        let retries = stream.retries.as_ref().unwrap_or(default_retries);
        Self {
            name: stream.name.clone(),
            connector: ConnectorSettings {
                retry: RetryPolicy::from(retries),
                header_timeout: timeouts.connect(),
                read_idle: timeouts.read_idle(),
            },
            buffer_chunks: viewers.buffer_chunks,
        }
    }
}

/// The task that owns a session's state.
pub struct RelaySession {
    name: Arc<str>,
    connector: UpstreamConnector,
    registry: SubscriberRegistry,
    /// Viewers that arrived before the boundary was resolved.
    deferred: Vec<(ViewerId, oneshot::Sender<Admission>)>,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<SessionStatus>,
    /// The last retry cycle gave up and no viewer has arrived since.
    exhausted: bool,
}

impl RelaySession {
    /// Spawn the session task for a configured stream, talking HTTP(S) to its URL.
    ///
    /// Fails with [`RelayError::Configuration`] when the stream has no usable URL.
    /// Must be called from within a Tokio runtime.
    pub fn from_config(
        stream: &StreamConfig,
        default_retries: &RetryConfig,
        timeouts: &TimeoutConfig,
        viewers: &ViewerConfig,
    ) -> RelayResult<SessionHandle> {
        let url = stream
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                RelayError::Configuration(format!(
                    "stream {:?}: please provide a source MJPEG URL",
                    stream.name
                ))
            })?;
        let upstream = HttpUpstream::new(url, stream.force_https, timeouts.connect())?;
        let options = SessionOptions::from_config(stream, default_retries, timeouts, viewers);
        Ok(Self::spawn(options, Arc::new(upstream), Arc::new(TokioTimer)))
    }

    /// Spawn a session task with an explicit upstream and timer.
    pub fn spawn(
        options: SessionOptions,
        upstream: Arc<dyn UpstreamSource>,
        timer: Arc<dyn RetryTimer>,
    ) -> SessionHandle {
        let name: Arc<str> = Arc::from(options.name.as_str());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let session = RelaySession {
            name: Arc::clone(&name),
            connector: UpstreamConnector::new(Arc::clone(&name), upstream, timer, options.connector),
            registry: SubscriberRegistry::new(options.buffer_chunks),
            deferred: Vec::new(),
            commands: command_rx,
            status: status_tx,
            exhausted: false,
        };
        tokio::spawn(session.run());

        SessionHandle {
            name,
            commands: command_tx,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        tracing::debug!(stream = %self.name, "Relay session started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                event = self.connector.next_event() => self.on_event(event),
            }
            self.publish();
        }

        self.commands.close();
        self.terminate_all("session shutdown");
        self.connector.shutdown();
        self.publish();
        tracing::debug!(stream = %self.name, "Relay session stopped");
    }

    fn on_command(&mut self, command: Command) {
        // A failed episode leaves no boundary to announce while retrying.
        if self.connector.state() != ConnectorState::Streaming {
            self.registry.end_episode();
        }
        match command {
            Command::Attach { id, reply } => {
                self.exhausted = false;
                if self.connector.is_idle() {
                    tracing::debug!(stream = %self.name, "First viewer, opening upstream");
                    self.connector.start();
                }
                if self.registry.boundary().is_some() {
                    if self.registry.register(id, reply) {
                        tracing::debug!(stream = %self.name, viewer = %id, total = self.viewer_count(), "Viewer registered");
                    }
                } else {
                    self.deferred.push((id, reply));
                    tracing::debug!(stream = %self.name, viewer = %id, waiting = self.deferred.len(), "Viewer waiting for boundary");
                }
            }
            Command::Detach { id } => {
                let was_attached = self.registry.unregister(id);
                let before = self.deferred.len();
                self.deferred.retain(|(waiting, _)| *waiting != id);
                if was_attached || self.deferred.len() != before {
                    tracing::debug!(stream = %self.name, viewer = %id, total = self.viewer_count(), "Viewer closed");
                }
                self.release_if_unwatched();
            }
            Command::Shutdown => {}
        }
    }

    fn on_event(&mut self, event: ConnectorEvent) {
        match event {
            ConnectorEvent::Streaming { boundary } => {
                let ended = self.registry.begin_episode(&boundary);
                if ended > 0 {
                    tracing::info!(stream = %self.name, ended, boundary = %boundary, "Boundary changed, ended viewers announced the old one");
                }
                for (id, reply) in std::mem::take(&mut self.deferred) {
                    if self.registry.register(id, reply) {
                        tracing::debug!(stream = %self.name, viewer = %id, "Viewer registered");
                    }
                }
                self.release_if_unwatched();
            }
            ConnectorEvent::Chunk(chunk) => {
                let delivery = self.registry.deliver(&chunk);
                metrics::record_bytes_forwarded(&self.name, delivery.bytes);
                for (id, departure) in delivery.departed {
                    match departure {
                        Departure::Evicted => {
                            tracing::warn!(stream = %self.name, viewer = %id, "Viewer too slow, buffer full; disconnecting");
                            metrics::record_viewer_evicted(&self.name);
                        }
                        Departure::Disconnected => {
                            tracing::debug!(stream = %self.name, viewer = %id, "Viewer gone");
                        }
                    }
                }
                self.release_if_unwatched();
            }
            ConnectorEvent::Ended => {
                self.terminate_all("upstream ended");
            }
            ConnectorEvent::Exhausted { failures } => {
                tracing::warn!(stream = %self.name, failures, "Upstream failed after retries, closing all viewers");
                metrics::record_retry_exhausted(&self.name);
                self.exhausted = true;
                self.terminate_all("retries exhausted");
            }
        }
    }

    fn viewer_count(&self) -> usize {
        self.registry.len() + self.deferred.len()
    }

    /// Tear the upstream down once nobody is watching.
    fn release_if_unwatched(&mut self) {
        if self.viewer_count() == 0 && self.connector.shutdown() {
            tracing::debug!(stream = %self.name, "No listening viewers, upstream closed");
            self.registry.end_episode();
        }
    }

    fn terminate_all(&mut self, reason: &'static str) {
        let attached = self.registry.terminate_all();
        let deferred = self.deferred.len();
        // Dropping the replies fails the waiting handle_viewer calls.
        self.deferred.clear();
        self.registry.end_episode();
        if attached + deferred > 0 {
            tracing::info!(stream = %self.name, attached, deferred, reason, "Closed all viewers");
        }
    }

    fn publish(&self) {
        let state = if self.exhausted && self.connector.is_idle() {
            ConnectorState::Exhausted
        } else {
            self.connector.state()
        };
        let status = SessionStatus {
            state,
            viewers: self.viewer_count(),
            connects: self.connector.connects(),
            failures: self.connector.failures(),
        };
        metrics::set_viewers(&self.name, status.viewers);
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Cloneable entry point to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accept a new viewer.
    ///
    /// Opens the upstream if needed and resolves once the boundary for the
    /// current episode is known. The returned stream starts at the next frame
    /// marker. Fails with [`RelayError::Terminated`] if the upstream ends or
    /// exhausts its retries first.
    pub async fn handle_viewer(&self) -> RelayResult<ViewerStream> {
        let id = ViewerId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Attach { id, reply: reply_tx })
            .map_err(|_| RelayError::SessionClosed(self.name.to_string()))?;
        // Detaches on every exit path, including cancellation of this future.
        let guard = ViewerGuard::new(id, self.commands.clone());

        match reply_rx.await {
            Ok(admission) => Ok(ViewerStream::new(id, admission, guard)),
            Err(_) if self.commands.is_closed() => Err(RelayError::SessionClosed(self.name.to_string())),
            Err(_) => Err(RelayError::Terminated),
        }
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// End every viewer and stop the session task.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
