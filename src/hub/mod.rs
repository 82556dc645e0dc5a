pub mod events;

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{
    Mutex, RwLock,
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
};
use uuid::Uuid;

use crate::{
    AppError, AppResult, directory,
    models::{Message, Role},
    store,
};

pub use events::{ClientEvent, ServerEvent};

/// Unique handle for one room membership, so a closing socket removes
/// exactly its own entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

struct Subscriber {
    id: SubscriberId,
    user_id: Uuid,
    tx: UnboundedSender<ServerEvent>,
}

/// In-memory map from conversation id to the sockets currently in its room.
/// Owned exclusively by the hub; transient, rebuilt by clients on reconnect.
#[derive(Default, Clone)]
struct RoomRegistry {
    inner: Arc<RwLock<HashMap<Uuid, Vec<Subscriber>>>>,
    /// Per-room ordering locks, kept separate from membership: a room that
    /// empties and refills must hand out the same mutex, or a send still
    /// holding the old lock could interleave with one under a fresh lock.
    locks: Arc<RwLock<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl RoomRegistry {
    async fn subscribe(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        tx: UnboundedSender<ServerEvent>,
    ) -> SubscriberId {
        let id = SubscriberId::new();
        let mut rooms = self.inner.write().await;
        rooms
            .entry(conversation_id)
            .or_default()
            .push(Subscriber { id, user_id, tx });
        id
    }

    async fn unsubscribe(&self, conversation_id: Uuid, subscriber_id: SubscriberId) {
        let mut rooms = self.inner.write().await;
        if let Some(subscribers) = rooms.get_mut(&conversation_id) {
            subscribers.retain(|s| s.id != subscriber_id);
            if subscribers.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    /// Serializes send/markRead processing within one room, so persistence
    /// happens-before broadcast and all members observe the same order.
    /// Rooms are independent of each other.
    async fn order_lock(&self, conversation_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.write().await;
        locks.entry(conversation_id).or_default().clone()
    }

    /// Fan-out to the room. Dead senders are dropped on the way.
    async fn broadcast(&self, conversation_id: Uuid, event: &ServerEvent, exclude_user: Option<Uuid>) {
        let mut rooms = self.inner.write().await;
        if let Some(subscribers) = rooms.get_mut(&conversation_id) {
            subscribers.retain(|s| {
                if exclude_user == Some(s.user_id) {
                    return true;
                }
                s.tx.send(event.clone()).is_ok()
            });
        }
    }

    async fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        let rooms = self.inner.read().await;
        rooms.get(&conversation_id).map(|s| s.len()).unwrap_or(0)
    }
}

/// The realtime hub: room membership plus the event paths that persist and
/// fan out. Holds no durable state of its own.
#[derive(Clone)]
pub struct Hub {
    registry: RoomRegistry,
    pool: SqlitePool,
}

impl Hub {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            registry: RoomRegistry::default(),
            pool,
        }
    }

    /// Membership only, no other side effects. The socket loop keeps its
    /// own joined set, which makes repeat joins from one socket no-ops.
    pub async fn join(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        tx: UnboundedSender<ServerEvent>,
    ) -> SubscriberId {
        let id = self.registry.subscribe(conversation_id, user_id, tx).await;
        tracing::debug!(%conversation_id, %user_id, "joined room");
        id
    }

    /// Convenience for in-process clients: join with a fresh channel.
    pub async fn subscribe(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> (SubscriberId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = unbounded_channel();
        (self.join(conversation_id, user_id, tx).await, rx)
    }

    /// Idempotent, safe without a prior join.
    pub async fn leave(&self, conversation_id: Uuid, subscriber_id: SubscriberId) {
        self.registry.unsubscribe(conversation_id, subscriber_id).await;
    }

    /// Validate, persist, bump conversation activity, then broadcast to
    /// every room member (the sender's other tabs included; clients filter
    /// duplicates by id). Persistence failure propagates without any
    /// broadcast, so no one can observe a message that was never stored.
    pub async fn send(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: Role,
        body: &str,
    ) -> AppResult<Message> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::InvalidInput("empty message body".to_owned()));
        }

        // a message belongs to exactly one conversation and its sender must
        // be one of the two participants, on every transport
        let conversation = directory::fetch(&self.pool, conversation_id).await?;
        if !conversation.participant(user_id) {
            return Err(AppError::Forbidden);
        }

        let lock = self.registry.order_lock(conversation_id).await;
        let _room = lock.lock().await;

        let message = store::create(&self.pool, conversation_id, user_id, role, body).await?;
        directory::touch(&self.pool, conversation_id, message.created_at).await?;

        self.registry
            .broadcast(
                conversation_id,
                &ServerEvent::MessageReceived { message: message.clone() },
                None,
            )
            .await;

        Ok(message)
    }

    /// Flips a message to read and tells the room. The marking user must be
    /// a participant of the conversation; room membership alone is not
    /// authorization. Marking one's own message is rejected.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<bool> {
        let conversation = directory::fetch(&self.pool, conversation_id).await?;
        if !conversation.participant(user_id) {
            return Err(AppError::Forbidden);
        }

        let lock = self.registry.order_lock(conversation_id).await;
        let _room = lock.lock().await;

        let flipped = store::mark_read(&self.pool, conversation_id, message_id, user_id).await?;
        if flipped {
            self.registry
                .broadcast(conversation_id, &ServerEvent::MessageRead { message_id }, None)
                .await;
        }
        Ok(flipped)
    }

    /// Ephemeral: nothing persisted, sender's own tabs excluded. Expiry is
    /// the sending client's debounce, not a hub timer.
    pub async fn typing(&self, conversation_id: Uuid, user_id: Uuid) {
        self.registry
            .broadcast(
                conversation_id,
                &ServerEvent::Typing { conversation_id, user_id },
                Some(user_id),
            )
            .await;
    }

    pub async fn stop_typing(&self, conversation_id: Uuid, user_id: Uuid) {
        self.registry
            .broadcast(
                conversation_id,
                &ServerEvent::StopTyping { conversation_id, user_id },
                Some(user_id),
            )
            .await;
    }

    pub async fn room_size(&self, conversation_id: Uuid) -> usize {
        self.registry.subscriber_count(conversation_id).await
    }
}
