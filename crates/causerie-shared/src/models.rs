//! Domain model structs exchanged with the hosted row store.
//!
//! Field names and shapes mirror the wire tables (`chat_rooms`, `messages`,
//! `chat_users`) so rows deserialize directly into these structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Payload kind of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    System,
}

/// A single chat message.
///
/// Messages are immutable once created; the only lifecycle transition is
/// arrival (a direct insert or a change-feed delivery of the same row).
/// At most one of `user_id`/`guest_session_id` is set for non-system
/// messages; pure system/admin messages carry neither and are attributed by
/// `is_from_admin` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    /// Registered author, when the sender is signed in.
    pub user_id: Option<String>,
    /// Guest session that produced the message, for anonymous senders.
    pub guest_session_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    #[serde(default)]
    pub is_from_admin: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

/// A conversation room.
///
/// `updated_at`, `last_message`, and `unread_count` are denormalised by the
/// row store on every message insert; `unread_count` resets to zero on an
/// explicit mark-as-read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub is_guest_room: bool,
    pub guest_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    pub assigned_admin_id: Option<String>,
}

// ---------------------------------------------------------------------------
// ChatUser
// ---------------------------------------------------------------------------

/// A chat participant row.
///
/// Registered users carry `user_id`/`name`/`email`; anonymous visitors carry
/// only a `guest_session_id`. Presence (online/typing) is ephemeral channel
/// state and never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub user_id: Option<String>,
    pub guest_session_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    pub assigned_admin_id: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// A file handed to `send` before upload.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Original file name, extension included.
    pub name: String,
    /// MIME type as reported by the picker (e.g. `image/png`).
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
