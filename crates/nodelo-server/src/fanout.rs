//! In-memory, room-keyed publish/subscribe for chat events.
//!
//! Every chat maps to one room. Delivery is at-most-once to whoever is in the
//! room right now: a connection whose queue is full or closed simply misses
//! the event and refetches over HTTP.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use nodelo_shared::constants::ROOM_PREFIX;
use nodelo_shared::SenderType;
use nodelo_store::Message;

/// Per-connection queue depth.
const CONNECTION_QUEUE: usize = 64;

pub type ConnectionId = u64;

/// Events pushed to real-time clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    #[serde(rename_all = "camelCase")]
    UserTyping {
        chat_id: Uuid,
        is_typing: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MessagesRead { chat_id: Uuid, read_by: SenderType },
    #[serde(rename_all = "camelCase")]
    ChatJoined { chat_id: Uuid },
    Error { message: String },
}

pub fn room_name(chat_id: Uuid) -> String {
    format!("{ROOM_PREFIX}{chat_id}")
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl Registry {
    fn deliver(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.connections.get(&id) else {
            return false;
        };
        if tx.try_send(event).is_err() {
            debug!(conn = id, "Dropping event for slow or closed connection");
            return false;
        }
        true
    }
}

/// Shared handle; clones refer to the same rooms.
#[derive(Clone, Default)]
pub struct FanOut {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back the queue its events arrive on.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(CONNECTION_QUEUE);
        self.registry.write().await.connections.insert(id, tx);
        debug!(conn = id, "Connection registered");
        (id, rx)
    }

    /// Drop a connection and remove it from every room it joined.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut registry = self.registry.write().await;
        registry.connections.remove(&id);
        registry.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        debug!(conn = id, "Connection closed");
    }

    /// Add a connection to a chat's room and acknowledge with `chatJoined`.
    pub async fn join(&self, id: ConnectionId, chat_id: Uuid) {
        let mut registry = self.registry.write().await;
        if !registry.connections.contains_key(&id) {
            return;
        }
        let members = registry.rooms.entry(chat_id).or_default();
        members.insert(id);

        info!(
            room = %room_name(chat_id),
            conn = id,
            members = members.len(),
            "Joined room"
        );

        registry.deliver(id, ServerEvent::ChatJoined { chat_id });
    }

    pub async fn leave(&self, id: ConnectionId, chat_id: Uuid) {
        let mut registry = self.registry.write().await;
        let now_empty = match registry.rooms.get_mut(&chat_id) {
            Some(members) => {
                members.remove(&id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            registry.rooms.remove(&chat_id);
        }
        debug!(room = %room_name(chat_id), conn = id, "Left room");
    }

    /// Send to every member of the room. Returns how many queues accepted it.
    pub async fn publish(&self, chat_id: Uuid, event: ServerEvent) -> usize {
        self.broadcast(chat_id, None, event).await
    }

    /// Send to every member except `sender`, e.g. typing indicators.
    pub async fn publish_except(
        &self,
        chat_id: Uuid,
        sender: ConnectionId,
        event: ServerEvent,
    ) -> usize {
        self.broadcast(chat_id, Some(sender), event).await
    }

    async fn broadcast(
        &self,
        chat_id: Uuid,
        skip: Option<ConnectionId>,
        event: ServerEvent,
    ) -> usize {
        let registry = self.registry.read().await;
        let Some(members) = registry.rooms.get(&chat_id) else {
            return 0;
        };

        members
            .iter()
            .filter(|id| Some(**id) != skip)
            .filter(|id| registry.deliver(**id, event.clone()))
            .count()
    }

    pub async fn is_member(&self, id: ConnectionId, chat_id: Uuid) -> bool {
        self.registry
            .read()
            .await
            .rooms
            .get(&chat_id)
            .is_some_and(|members| members.contains(&id))
    }

    pub async fn member_count(&self, chat_id: Uuid) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(&chat_id)
            .map_or(0, HashSet::len)
    }
}
