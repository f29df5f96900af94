//! Attached viewers and join-at-boundary fan-out.
//!
//! # Responsibilities
//! - Hand each viewer its boundary and chunk buffer exactly once on register
//! - Start pending viewers at the first frame marker they see
//! - Forward every chunk, in order, to joined viewers
//! - Evict viewers whose buffer is full (slow consumers)
//!
//! # Design Decisions
//! - Per-viewer buffers are bounded; a full buffer ends that viewer instead of
//!   dropping chunks, since a dropped chunk corrupts the frame it belongs to
//! - Viewers survive an upstream reconnect only if the new episode announces
//!   the same boundary, and they rejoin at the next marker
//! - A rejoining viewer always gets CRLF before that marker, since the part it
//!   was receiving was cut short

use std::collections::{HashMap, HashSet};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;

use crate::relay::boundary::{find_marker, frame_marker};
use crate::relay::viewer::{Admission, ViewerId};

const CRLF: &[u8] = b"\r\n";

/// Why a viewer left the registry during delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The viewer's stream was dropped.
    Disconnected,
    /// The viewer's buffer was full.
    Evicted,
}

#[derive(Debug)]
struct Viewer {
    sender: mpsc::Sender<Bytes>,
    boundary: String,
    /// Has been sent bytes in an earlier episode or this one.
    streamed: bool,
}

#[derive(Debug)]
struct Episode {
    boundary: String,
    marker: Vec<u8>,
}

/// Outcome of fanning one chunk out.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Viewers that received bytes.
    pub delivered: usize,
    /// Bytes written across all viewers.
    pub bytes: usize,
    /// Viewers removed while delivering.
    pub departed: Vec<(ViewerId, Departure)>,
}

/// Viewers attached to one relay session.
#[derive(Debug)]
pub struct SubscriberRegistry {
    attached: HashMap<ViewerId, Viewer>,
    pending: HashSet<ViewerId>,
    episode: Option<Episode>,
    buffer_chunks: usize,
}

impl SubscriberRegistry {
    pub fn new(buffer_chunks: usize) -> Self {
        Self {
            attached: HashMap::new(),
            pending: HashSet::new(),
            episode: None,
            buffer_chunks: buffer_chunks.max(1),
        }
    }

    /// Boundary of the current episode, if one is streaming.
    pub fn boundary(&self) -> Option<&str> {
        self.episode.as_ref().map(|e| e.boundary.as_str())
    }

    /// Start a new upstream episode with `boundary`.
    ///
    /// Attached viewers go back to pending so they restart at a frame marker.
    /// Viewers that were announced a different boundary are ended. Returns the
    /// number of viewers ended.
    pub fn begin_episode(&mut self, boundary: &str) -> usize {
        let before = self.attached.len();
        self.attached.retain(|_, viewer| viewer.boundary == boundary);
        self.pending = self.attached.keys().copied().collect();
        self.episode = Some(Episode {
            boundary: boundary.to_string(),
            marker: frame_marker(boundary),
        });
        before - self.attached.len()
    }

    /// Forget the current boundary; `register` is refused until the next episode.
    pub fn end_episode(&mut self) {
        self.episode = None;
    }

    /// Attach a viewer and send it its admission.
    ///
    /// Returns `false` without attaching when no boundary is resolved yet or the
    /// viewer stopped waiting for its admission.
    pub fn register(&mut self, id: ViewerId, admission: oneshot::Sender<Admission>) -> bool {
        let Some(episode) = &self.episode else {
            return false;
        };
        let (sender, receiver) = mpsc::channel(self.buffer_chunks);
        let boundary = episode.boundary.clone();
        let ticket = Admission {
            boundary: boundary.clone(),
            receiver,
        };
        if admission.send(ticket).is_err() {
            return false;
        }
        self.attached.insert(
            id,
            Viewer {
                sender,
                boundary,
                streamed: false,
            },
        );
        self.pending.insert(id);
        true
    }

    /// Fan a corrected chunk out to every attached viewer.
    pub fn deliver(&mut self, chunk: &Bytes) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(episode) = &self.episode else {
            return delivery;
        };

        for (id, viewer) in self.attached.iter_mut() {
            let payload = if self.pending.contains(id) {
                let Some(offset) = find_marker(chunk, &episode.marker, 0) else {
                    continue;
                };
                if viewer.streamed {
                    rejoin_at(chunk, offset)
                } else {
                    chunk.slice(offset..)
                }
            } else {
                chunk.clone()
            };

            let len = payload.len();
            match viewer.sender.try_send(payload) {
                Ok(()) => {
                    viewer.streamed = true;
                    delivery.delivered += 1;
                    delivery.bytes += len;
                }
                Err(TrySendError::Full(_)) => delivery.departed.push((*id, Departure::Evicted)),
                Err(TrySendError::Closed(_)) => {
                    delivery.departed.push((*id, Departure::Disconnected))
                }
            }
        }

        for (id, _) in &delivery.departed {
            self.attached.remove(id);
        }
        let attached = &self.attached;
        self.pending.retain(|id| attached.contains_key(id));
        // Whoever is still pending and saw a marker has now joined.
        if find_marker(chunk, &episode.marker, 0).is_some() {
            self.pending.clear();
        }

        delivery
    }

    /// Detach a viewer. Returns whether it was attached.
    pub fn unregister(&mut self, id: ViewerId) -> bool {
        self.pending.remove(&id);
        self.attached.remove(&id).is_some()
    }

    /// End every attached viewer's stream and clear both sets.
    pub fn terminate_all(&mut self) -> usize {
        let count = self.attached.len();
        // Dropping the senders ends the receivers once drained.
        self.attached.clear();
        self.pending.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// Attached viewers still waiting for their first frame marker.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_attached(&self, id: ViewerId) -> bool {
        self.attached.contains_key(&id)
    }
}

/// Slice `chunk` so it resumes at the marker at `offset` with CRLF in front.
fn rejoin_at(chunk: &Bytes, offset: usize) -> Bytes {
    if offset >= CRLF.len() && &chunk[offset - CRLF.len()..offset] == CRLF {
        return chunk.slice(offset - CRLF.len()..);
    }
    let mut out = BytesMut::with_capacity(CRLF.len() + chunk.len() - offset);
    out.extend_from_slice(CRLF);
    out.extend_from_slice(&chunk[offset..]);
    out.freeze()
}
