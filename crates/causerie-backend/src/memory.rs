//! Loopback backend used by the test suite and single-process deployments.
//!
//! Rows live in process memory behind a mutex; committed changes fan out
//! over a tokio broadcast channel to every feed subscription, mirroring how
//! the hosted store republishes committed rows. Slow subscribers that lag
//! past the channel capacity lose events, the same at-least-once,
//! no-replay contract the real feed has.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use causerie_shared::{ChatUser, Message, Room};

use crate::error::BackendError;
use crate::feed::{ChangeEvent, ChangeFeed, FeedFilter, FeedSubscription, TableRow};
use crate::objects::ObjectStore;
use crate::presence::{PresenceChannel, PresenceEvent, PresenceState};
use crate::rows::{NewMessage, NewRoom, RowStore};

const FEED_CAPACITY: usize = 256;
const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Default)]
struct Tables {
    rooms: Vec<Room>,
    messages: Vec<Message>,
    users: Vec<ChatUser>,
}

/// In-memory row store, change feed, presence channel, and object store in
/// one value. Clone the `Arc` and hand it to each seam.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    feed_tx: broadcast::Sender<ChangeEvent>,
    presence: Mutex<HashMap<String, PresenceState>>,
    presence_tx: broadcast::Sender<PresenceEvent>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    live_subscriptions: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let (feed_tx, _) = broadcast::channel(FEED_CAPACITY);
        let (presence_tx, _) = broadcast::channel(FEED_CAPACITY);
        Arc::new(Self {
            tables: Mutex::new(Tables::default()),
            feed_tx,
            presence: Mutex::new(HashMap::new()),
            presence_tx,
            objects: Mutex::new(HashMap::new()),
            live_subscriptions: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of live feed subscriptions. The room manager keeps this at
    /// most one per widget instance.
    pub fn live_subscriptions(&self) -> usize {
        self.live_subscriptions.load(Ordering::SeqCst)
    }

    /// Insert a fully-formed message row (timestamps included) and publish
    /// its feed event. Used to import existing rows and to build fixtures.
    pub fn insert_message_row(&self, message: Message) {
        let mut tables = lock(&self.tables);
        bump_room(&mut tables.rooms, &message);
        tables.messages.push(message.clone());
        drop(tables);
        self.emit(ChangeEvent::Insert(TableRow::Message(message)));
    }

    /// Snapshot of the `chat_users` table.
    pub fn chat_users(&self) -> Vec<ChatUser> {
        lock(&self.tables).users.clone()
    }

    fn emit(&self, event: ChangeEvent) {
        // No receivers is fine; nobody is subscribed yet.
        let _ = self.feed_tx.send(event);
    }

    fn emit_presence(&self, event: PresenceEvent) {
        let _ = self.presence_tx.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Denormalise a freshly inserted message into its room row.
fn bump_room(rooms: &mut [Room], message: &Message) {
    if let Some(room) = rooms.iter_mut().find(|r| r.id == message.room_id) {
        room.updated_at = message.created_at;
        room.last_message = Some(message.clone());
        if !message.is_from_admin {
            room.unread_count += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// RowStore
// ---------------------------------------------------------------------------

#[async_trait]
impl RowStore for MemoryBackend {
    async fn messages_for_room(
        &self,
        room_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, BackendError> {
        let tables = lock(&self.tables);
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        messages.truncate(limit as usize);
        Ok(messages)
    }

    async fn insert_message(&self, draft: NewMessage) -> Result<Message, BackendError> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            room_id: draft.room_id,
            user_id: draft.user_id,
            guest_session_id: draft.guest_session_id,
            content: draft.content,
            message_type: draft.message_type,
            file_url: draft.file_url,
            file_name: draft.file_name,
            file_size: draft.file_size,
            is_from_admin: draft.is_from_admin,
            created_at: Utc::now(),
        };

        let room_event = {
            let mut tables = lock(&self.tables);
            bump_room(&mut tables.rooms, &message);
            tables.messages.push(message.clone());
            tables
                .rooms
                .iter()
                .find(|r| r.id == message.room_id)
                .cloned()
        };

        self.emit(ChangeEvent::Insert(TableRow::Message(message.clone())));
        if let Some(room) = room_event {
            self.emit(ChangeEvent::Update {
                new: TableRow::Room(room),
                old: None,
            });
        }
        Ok(message)
    }

    async fn room(&self, room_id: &str) -> Result<Option<Room>, BackendError> {
        Ok(lock(&self.tables)
            .rooms
            .iter()
            .find(|r| r.id == room_id)
            .cloned())
    }

    async fn insert_room(&self, draft: NewRoom) -> Result<Room, BackendError> {
        let now = Utc::now();
        let room = Room {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            is_guest_room: draft.is_guest_room,
            guest_session_id: draft.guest_session_id,
            created_at: now,
            updated_at: now,
            last_message: None,
            unread_count: 0,
            assigned_admin_id: None,
        };
        lock(&self.tables).rooms.push(room.clone());
        self.emit(ChangeEvent::Insert(TableRow::Room(room.clone())));
        Ok(room)
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, BackendError> {
        let mut rooms = lock(&self.tables).rooms.clone();
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rooms)
    }

    async fn delete_room(&self, room_id: &str) -> Result<(), BackendError> {
        let removed = {
            let mut tables = lock(&self.tables);
            let before = tables.rooms.len();
            let mut removed_room = None;
            tables.rooms.retain(|r| {
                if r.id == room_id {
                    removed_room = Some(r.clone());
                    false
                } else {
                    true
                }
            });
            if tables.rooms.len() == before {
                return Err(BackendError::NotFound);
            }
            tables.messages.retain(|m| m.room_id != room_id);
            removed_room
        };

        if let Some(room) = removed {
            self.emit(ChangeEvent::Delete(TableRow::Room(room)));
        }
        Ok(())
    }

    async fn assign_admin(&self, room_id: &str, admin_id: &str) -> Result<(), BackendError> {
        let updated = {
            let mut tables = lock(&self.tables);
            let room = tables
                .rooms
                .iter_mut()
                .find(|r| r.id == room_id)
                .ok_or(BackendError::NotFound)?;
            room.assigned_admin_id = Some(admin_id.to_string());
            room.clone()
        };
        self.emit(ChangeEvent::Update {
            new: TableRow::Room(updated),
            old: None,
        });
        Ok(())
    }

    async fn touch_last_seen(
        &self,
        user_id: Option<&str>,
        guest_session_id: Option<&str>,
    ) -> Result<(), BackendError> {
        let now = Utc::now();
        let mut tables = lock(&self.tables);

        if let Some(user) = tables.users.iter_mut().find(|u| {
            u.user_id.as_deref() == user_id && u.guest_session_id.as_deref() == guest_session_id
        }) {
            user.last_seen = now;
            return Ok(());
        }

        tables.users.push(ChatUser {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.map(str::to_string),
            guest_session_id: guest_session_id.map(str::to_string),
            name: None,
            email: None,
            is_admin: false,
            assigned_admin_id: None,
            last_seen: now,
            created_at: now,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChangeFeed
// ---------------------------------------------------------------------------

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, filters: Vec<FeedFilter>) -> Result<FeedSubscription, BackendError> {
        let mut feed_rx = self.feed_tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let forwarder = tokio::spawn(async move {
            loop {
                match feed_rx.recv().await {
                    Ok(event) => {
                        if filters.iter().any(|f| f.matches(event.row()))
                            && tx.send(event).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Feed subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(FeedSubscription::new(rx, forwarder)
            .with_gauge(Arc::clone(&self.live_subscriptions)))
    }
}

// ---------------------------------------------------------------------------
// PresenceChannel
// ---------------------------------------------------------------------------

#[async_trait]
impl PresenceChannel for MemoryBackend {
    async fn subscribe(&self) -> Result<mpsc::Receiver<PresenceEvent>, BackendError> {
        let mut presence_rx = self.presence_tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        tokio::spawn(async move {
            loop {
                match presence_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn track(&self, state: PresenceState) -> Result<(), BackendError> {
        let key = state.identity.clone();
        let joined = lock(&self.presence).insert(key.clone(), state).is_none();
        if joined {
            self.emit_presence(PresenceEvent::Join { key });
        }
        self.emit_presence(PresenceEvent::Sync);
        Ok(())
    }

    fn presence_state(&self) -> HashMap<String, PresenceState> {
        lock(&self.presence).clone()
    }

    async fn unsubscribe(&self, identity: &str) -> Result<(), BackendError> {
        if lock(&self.presence).remove(identity).is_some() {
            self.emit_presence(PresenceEvent::Leave {
                key: identity.to_string(),
            });
            self.emit_presence(PresenceEvent::Sync);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<String, BackendError> {
        let key = format!("{bucket}/{path}");
        lock(&self.objects).insert(key.clone(), bytes);
        Ok(format!("memory://{key}"))
    }
}
