mod sweep;
mod ws;

pub use sweep::deliver_pending;

use axum::{Router, routing::get};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(ws::notifications_ws))
}

/// Push events carried over the notification websocket. `messages_updated`
/// names the counterpart's phone number so the client can refresh only the
/// affected conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Connected { timestamp: String },
    ContactsUpdated { timestamp: String },
    MessagesUpdated { sender: String, timestamp: String },
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

impl Event {
    pub fn connected() -> Self {
        Self::Connected {
            timestamp: now_rfc3339(),
        }
    }

    pub fn contacts_updated() -> Self {
        Self::ContactsUpdated {
            timestamp: now_rfc3339(),
        }
    }

    pub fn messages_updated(sender_phone: &str) -> Self {
        Self::MessagesUpdated {
            sender: sender_phone.to_owned(),
            timestamp: now_rfc3339(),
        }
    }
}

/// Handle returned by [`PresenceRegistry::register`]; needed to unregister
/// exactly the connection that registered, even when the same user holds
/// several sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionId(u64);

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<Event>,
}

/// Process-wide map from user id to live push connections. All access goes
/// through register/unregister/notify; the map itself never leaves this
/// module. Entries are ephemeral and die with the connection.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Vec<Connection>>>>,
    next_id: Arc<AtomicU64>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: Uuid, tx: mpsc::UnboundedSender<Event>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut map = self.inner.lock().unwrap();
        map.entry(user_id).or_default().push(Connection { id, tx });
        ConnectionId(id)
    }

    /// Idempotent; safe to call for a connection that never finished
    /// registering.
    pub fn unregister(&self, user_id: Uuid, connection: ConnectionId) {
        let mut map = self.inner.lock().unwrap();
        if let Some(connections) = map.get_mut(&user_id) {
            connections.retain(|c| c.id != connection.0);
            if connections.is_empty() {
                map.remove(&user_id);
            }
        }
    }

    /// Fans `event` out to every live connection for `user_id`. Sends are
    /// channel writes and never block on the peer socket. Returns true iff at
    /// least one connection took the event; the message ledger uses this to
    /// mark a message delivered at send time.
    pub fn notify(&self, user_id: Uuid, event: &Event) -> bool {
        let mut map = self.inner.lock().unwrap();
        let Some(connections) = map.get_mut(&user_id) else {
            return false;
        };

        let mut notified = false;
        connections.retain(|c| match c.tx.send(event.clone()) {
            Ok(()) => {
                notified = true;
                true
            }
            Err(_) => false,
        });
        if connections.is_empty() {
            map.remove(&user_id);
        }
        notified
    }
}
