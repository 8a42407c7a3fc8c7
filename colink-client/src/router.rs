//! Response routing.
//!
//! Decoded frames become [`ServerMessage`]s. Most are published on the
//! session event stream; SHARED_LIST and ADD_SHARE responses are handed to
//! the one-shot reply registered for them, matched first by the echoed
//! request id and otherwise by the most recent registration for the same
//! command and project.

use bytes::{Bytes, BytesMut};
use colink_protocol::{CommandTag, FrameCodec, RequestId, ServerMessage};
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::{broadcast, oneshot};

/// Upper bound on buffered fragment bytes per command tag.
pub const MAX_REASSEMBLY_SIZE: usize = 1024 * 1024;

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Notifications published to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The first connection was established.
    Connected,
    /// An established connection failed; recovery has started.
    Disconnected,
    /// Recovery succeeded and the cached session was replayed.
    Reconnected,
    /// Recovery gave up after the configured number of attempts.
    ReconnectFailed { attempts: u32 },
    /// A frame or payload could not be decoded.
    Error(String),
    /// A routed server message.
    Message(ServerMessage),
}

type ProjectKey = (u32, String);

struct PendingEntry {
    key: ProjectKey,
    reply: oneshot::Sender<ServerMessage>,
}

/// Routes inbound frames to the event stream or to pending replies.
pub struct Router {
    events: broadcast::Sender<SessionEvent>,
    pending: DashMap<RequestId, PendingEntry>,
    by_project: DashMap<ProjectKey, RequestId>,
    fragments: parking_lot::Mutex<HashMap<u32, BytesMut>>,
}

impl Router {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            events,
            pending: DashMap::new(),
            by_project: DashMap::new(),
            fragments: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    /// Registers a one-shot reply for a `tag` response on `project_id`.
    ///
    /// A later registration for the same command and project takes over the
    /// project fallback; the earlier one can still be matched by request id.
    pub fn register(
        &self,
        tag: CommandTag,
        project_id: &str,
    ) -> (RequestId, oneshot::Receiver<ServerMessage>) {
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        let key = (tag.code(), project_id.to_string());
        if let Some(previous) = self.by_project.insert(key.clone(), id) {
            tracing::debug!(
                "{} for project {} re-registered; request {} now matchable by id only",
                tag,
                project_id,
                previous
            );
        }
        self.pending.insert(id, PendingEntry { key, reply: tx });
        (id, rx)
    }

    /// Abandons a pending reply.
    pub fn cancel(&self, id: &RequestId) {
        if let Some((_, entry)) = self.pending.remove(id) {
            self.by_project.remove_if(&entry.key, |_, current| current == id);
        }
    }

    /// Number of replies still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops every pending reply; waiters observe a closed channel.
    pub fn clear_pending(&self) {
        self.by_project.clear();
        self.pending.clear();
    }

    /// Discards partially reassembled messages.
    ///
    /// Fragments never span sockets, so this runs whenever the transport is
    /// lost or replaced.
    pub fn reset_fragments(&self) {
        let mut buffers = self.fragments.lock();
        if !buffers.is_empty() {
            tracing::debug!("discarding {} partial fragmented messages", buffers.len());
            buffers.clear();
        }
    }

    /// Decodes one complete frame and routes it. Never fails; problems are
    /// reported as [`SessionEvent::Error`].
    pub fn route_frame(&self, codec: &dyn FrameCodec, frame: &[u8]) {
        let decoded = match codec.decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("failed to decode frame: {}", e);
                self.emit(SessionEvent::Error(format!("frame decode failed: {}", e)));
                return;
            }
        };

        let tag = decoded.command_tag;
        if let Some(payload) = self.reassemble(tag, decoded.fragment, decoded.payload) {
            self.dispatch(tag, &payload);
        }
    }

    /// Routes a complete payload for `tag`.
    pub fn dispatch(&self, tag: u32, payload: &[u8]) {
        let message = match ServerMessage::decode(tag, payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("failed to decode payload for tag {}: {}", tag, e);
                self.emit(SessionEvent::Error(format!(
                    "payload decode failed for tag {}: {}",
                    tag, e
                )));
                return;
            }
        };

        if let ServerMessage::Unhandled { tag, .. } = message {
            tracing::debug!("unhandled packet tag={}", tag);
        }

        match message.correlation() {
            Some(correlation) => {
                let request_id = correlation.request_id;
                let key = (message.command_tag(), correlation.project_id.to_string());
                self.resolve(request_id, key, message);
            }
            None => self.emit(SessionEvent::Message(message)),
        }
    }

    fn resolve(&self, request_id: Option<RequestId>, key: ProjectKey, message: ServerMessage) {
        let id = request_id
            .filter(|id| self.pending.contains_key(id))
            .or_else(|| self.by_project.get(&key).map(|entry| *entry.value()));

        let Some(id) = id else {
            tracing::debug!(
                "dropping tag={} for project {}: no pending reply",
                key.0,
                key.1
            );
            return;
        };

        let Some((_, entry)) = self.pending.remove(&id) else {
            tracing::debug!("pending reply {} already consumed", id);
            return;
        };
        self.by_project.remove_if(&entry.key, |_, current| *current == id);

        if entry.reply.send(message).is_err() {
            tracing::debug!("pending reply {} was abandoned by its caller", id);
        }
    }

    fn reassemble(&self, tag: u32, fragment: bool, payload: Bytes) -> Option<Bytes> {
        let mut buffers = self.fragments.lock();

        if fragment {
            let buffer = buffers.entry(tag).or_default();
            if buffer.len() + payload.len() > MAX_REASSEMBLY_SIZE {
                buffers.remove(&tag);
                drop(buffers);
                tracing::warn!("fragmented message for tag {} exceeds limit", tag);
                self.emit(SessionEvent::Error(format!(
                    "fragmented message for tag {} exceeds {} bytes",
                    tag, MAX_REASSEMBLY_SIZE
                )));
                return None;
            }
            buffer.extend_from_slice(&payload);
            return None;
        }

        match buffers.remove(&tag) {
            Some(mut buffer) => {
                buffer.extend_from_slice(&payload);
                Some(buffer.freeze())
            }
            None => Some(payload),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
