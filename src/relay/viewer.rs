//! Viewer identity and the downstream byte stream handed to HTTP handlers.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

use crate::relay::session::Command;

/// Global counter for viewer IDs; only uniqueness matters.
static VIEWER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an attached viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(u64);

impl ViewerId {
    /// Generate a new unique viewer ID.
    pub fn new() -> Self {
        Self(VIEWER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// What a viewer receives once registered: the boundary it was announced and
/// the receiving end of its chunk buffer.
#[derive(Debug)]
pub struct Admission {
    pub boundary: String,
    pub receiver: mpsc::Receiver<Bytes>,
}

/// Detaches the viewer from its session when dropped.
#[derive(Debug)]
pub(crate) struct ViewerGuard {
    id: ViewerId,
    commands: mpsc::UnboundedSender<Command>,
}

impl ViewerGuard {
    pub(crate) fn new(id: ViewerId, commands: mpsc::UnboundedSender<Command>) -> Self {
        Self { id, commands }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        // The session may already be gone; nothing left to detach from then.
        let _ = self.commands.send(Command::Detach { id: self.id });
    }
}

/// Corrected multipart bytes for one viewer.
///
/// The stream ends when the session terminates the viewer (upstream end,
/// retry exhaustion, slow-consumer eviction or shutdown). Dropping it
/// unregisters the viewer.
#[derive(Debug)]
pub struct ViewerStream {
    id: ViewerId,
    boundary: String,
    receiver: mpsc::Receiver<Bytes>,
    _guard: ViewerGuard,
}

impl ViewerStream {
    pub(crate) fn new(id: ViewerId, admission: Admission, guard: ViewerGuard) -> Self {
        Self {
            id,
            boundary: admission.boundary,
            receiver: admission.receiver,
            _guard: guard,
        }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    /// Boundary token to announce in the viewer's `Content-Type`.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Wait for the next chunk; `None` once the session ended this viewer.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }
}

impl Stream for ViewerStream {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
