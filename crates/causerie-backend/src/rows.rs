//! Typed CRUD surface over the hosted row tables.

use async_trait::async_trait;

use causerie_shared::{Message, MessageKind, Room};

use crate::error::BackendError;

/// Draft for a message insert. The store assigns `id` and `created_at` and
/// hands back the confirmed row.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub room_id: String,
    pub user_id: Option<String>,
    pub guest_session_id: Option<String>,
    pub content: String,
    pub message_type: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub is_from_admin: bool,
}

/// Draft for a room insert.
#[derive(Debug, Clone, Default)]
pub struct NewRoom {
    pub name: Option<String>,
    pub is_guest_room: bool,
    pub guest_session_id: Option<String>,
}

/// CRUD and ordered query over rooms, messages, and chat users.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// Fetch up to `limit` messages for a room, ascending by creation time.
    async fn messages_for_room(
        &self,
        room_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, BackendError>;

    /// Insert a message and return the confirmed row.
    async fn insert_message(&self, draft: NewMessage) -> Result<Message, BackendError>;

    /// Fetch a single room by id.
    async fn room(&self, room_id: &str) -> Result<Option<Room>, BackendError>;

    /// Insert a room and return the confirmed row.
    async fn insert_room(&self, draft: NewRoom) -> Result<Room, BackendError>;

    /// List all rooms, most recently updated first, with the last-message
    /// snapshot denormalised in.
    async fn list_rooms(&self) -> Result<Vec<Room>, BackendError>;

    /// Delete a room and its messages.
    async fn delete_room(&self, room_id: &str) -> Result<(), BackendError>;

    /// Point a room at an assigned admin.
    async fn assign_admin(&self, room_id: &str, admin_id: &str) -> Result<(), BackendError>;

    /// Upsert the last-seen touch for a registered user or guest session.
    async fn touch_last_seen(
        &self,
        user_id: Option<&str>,
        guest_session_id: Option<&str>,
    ) -> Result<(), BackendError>;
}
