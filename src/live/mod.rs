//! Per-estimate rooms for live collaboration.
//!
//! Every estimate with at least one connected editor has a room: a broadcast
//! channel plus the list of editor ids. Events carry the id of the client
//! that caused them so a subscriber never sees its own updates echoed back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::LiveUpdate;

/// Channel capacity per room
const CHANNEL_CAPACITY: usize = 256;

/// `client_id` used for updates made through the HTTP API.
pub const SERVER_CLIENT_ID: &str = "server";

/// Events sent to connected editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// First message on a new connection.
    Connected {
        client_id: String,
        estimate_id: String,
        active_editors: Vec<String>,
    },
    EditorJoined {
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    EditorLeft {
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    EstimateUpdated {
        #[serde(flatten)]
        update: LiveUpdate,
        client_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A message from this client was rejected.
    Error { message: String },
}

impl LiveEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::EditorJoined { .. } => "editor_joined",
            Self::EditorLeft { .. } => "editor_left",
            Self::EstimateUpdated { .. } => "estimate_updated",
            Self::Error { .. } => "error",
        }
    }
}

/// Messages accepted from connected editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    UpdateEstimate {
        #[serde(flatten)]
        update: LiveUpdate,
    },
}

#[derive(Debug, Clone)]
struct Envelope {
    from: String,
    event: LiveEvent,
}

struct Room {
    sender: broadcast::Sender<Envelope>,
    editors: Vec<String>,
}

impl Room {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            editors: Vec::new(),
        }
    }
}

/// Registry of live rooms, shared across connections.
#[derive(Clone, Default)]
pub struct LiveHub {
    rooms: Arc<Mutex<HashMap<String, Room>>>,
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new editor on `estimate_id` under a generated client id.
    ///
    /// The other editors in the room are sent `editor_joined`.
    pub fn join(&self, estimate_id: &str) -> Subscription {
        let client_id = Uuid::new_v4().to_string();
        let mut rooms = self.rooms.lock().expect("live hub lock poisoned");
        let room = rooms
            .entry(estimate_id.to_string())
            .or_insert_with(Room::new);

        let receiver = room.sender.subscribe();
        room.editors.push(client_id.clone());
        let _ = room.sender.send(Envelope {
            from: client_id.clone(),
            event: LiveEvent::EditorJoined {
                client_id: client_id.clone(),
                timestamp: Utc::now(),
            },
        });

        debug!(estimate_id, %client_id, editors = room.editors.len(), "editor joined");
        Subscription {
            estimate_id: estimate_id.to_string(),
            client_id,
            receiver,
        }
    }

    /// Remove an editor. The remaining editors are sent `editor_left`, and
    /// the room is dropped once it is empty. Returns false if the client was
    /// not registered.
    pub fn leave(&self, estimate_id: &str, client_id: &str) -> bool {
        let mut rooms = self.rooms.lock().expect("live hub lock poisoned");
        let Some(room) = rooms.get_mut(estimate_id) else {
            return false;
        };
        let Some(index) = room.editors.iter().position(|id| id == client_id) else {
            return false;
        };

        room.editors.remove(index);
        let _ = room.sender.send(Envelope {
            from: client_id.to_string(),
            event: LiveEvent::EditorLeft {
                client_id: client_id.to_string(),
                timestamp: Utc::now(),
            },
        });
        debug!(estimate_id, client_id, editors = room.editors.len(), "editor left");

        if room.editors.is_empty() {
            rooms.remove(estimate_id);
        }
        true
    }

    /// Relay an update from `client_id` to everyone else in the room.
    /// Returns the number of editors it was delivered to.
    pub fn relay(&self, estimate_id: &str, client_id: &str, update: LiveUpdate) -> usize {
        self.publish(
            estimate_id,
            client_id,
            LiveEvent::EstimateUpdated {
                update,
                client_id: client_id.to_string(),
                timestamp: Utc::now(),
            },
        )
    }

    /// Relay an update made outside the live channel to every editor.
    pub fn publish_update(&self, estimate_id: &str, update: LiveUpdate) -> usize {
        self.relay(estimate_id, SERVER_CLIENT_ID, update)
    }

    fn publish(&self, estimate_id: &str, from: &str, event: LiveEvent) -> usize {
        let rooms = self.rooms.lock().expect("live hub lock poisoned");
        let Some(room) = rooms.get(estimate_id) else {
            return 0;
        };

        let event_type = event.event_type();
        // Receivers include the sender's own, which skips it.
        let delivered = room
            .sender
            .send(Envelope {
                from: from.to_string(),
                event,
            })
            .map(|count| count.saturating_sub(usize::from(room.editors.iter().any(|e| e == from))))
            .unwrap_or(0);

        debug!(estimate_id, event_type, delivered, "published live event");
        delivered
    }

    pub fn active_editors(&self, estimate_id: &str) -> Vec<String> {
        let rooms = self.rooms.lock().expect("live hub lock poisoned");
        rooms
            .get(estimate_id)
            .map(|room| room.editors.clone())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().expect("live hub lock poisoned").len()
    }
}

/// One editor's view of a room.
pub struct Subscription {
    estimate_id: String,
    client_id: String,
    receiver: broadcast::Receiver<Envelope>,
}

impl Subscription {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Next event caused by someone else. `None` once the room is gone.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.from == self.client_id => continue,
                Ok(envelope) => return Some(envelope.event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        estimate_id = %self.estimate_id,
                        client_id = %self.client_id,
                        skipped,
                        "editor fell behind, dropped live events"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
