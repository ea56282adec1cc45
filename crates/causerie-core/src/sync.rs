//! Message synchronization.
//!
//! Loads history pages, performs validated sends, and reconciles feed
//! events into the local sequence. The feed may deliver a row the sender
//! already appended, in either order; deduplication on message id is the
//! only ordering assumption made anywhere in this module.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use causerie_backend::{ChangeEvent, NewMessage, ObjectStore, RowStore, TableRow};
use causerie_shared::constants::{HISTORY_PAGE_SIZE, UPLOAD_BUCKET};
use causerie_shared::{
    Attachment, Message, MessageKind, Room, ValidationError, WidgetConfig, WidgetError,
};

use crate::store::ChatStore;

// ---------------------------------------------------------------------------
// Pure reconciliation
// ---------------------------------------------------------------------------

/// Fold one message-table event into a room's sequence. Returns whether the
/// sequence changed.
///
/// Inserts append idempotently; updates refresh in place (messages are
/// immutable upstream, so an update is a replay of a known row); deletes
/// remove by id.
pub fn apply_message_event(
    messages: &mut Vec<Message>,
    room_id: &str,
    event: &ChangeEvent,
) -> bool {
    match event {
        ChangeEvent::Insert(TableRow::Message(msg)) if msg.room_id == room_id => {
            if messages.iter().any(|m| m.id == msg.id) {
                false
            } else {
                messages.push(msg.clone());
                true
            }
        }
        ChangeEvent::Update {
            new: TableRow::Message(msg),
            ..
        } if msg.room_id == room_id => {
            match messages.iter_mut().find(|m| m.id == msg.id) {
                Some(slot) => *slot = msg.clone(),
                None => messages.push(msg.clone()),
            }
            true
        }
        ChangeEvent::Delete(TableRow::Message(msg)) => {
            let before = messages.len();
            messages.retain(|m| m.id != msg.id);
            before != messages.len()
        }
        _ => false,
    }
}

/// Fold one rooms-table event into the current room. A delete of the
/// current room clears it.
pub fn apply_room_event(current: &mut Option<Room>, event: &ChangeEvent) -> bool {
    let Some(room) = current.as_mut() else {
        return false;
    };
    match event {
        ChangeEvent::Insert(TableRow::Room(updated))
        | ChangeEvent::Update {
            new: TableRow::Room(updated),
            ..
        } if updated.id == room.id => {
            *room = updated.clone();
            true
        }
        ChangeEvent::Delete(TableRow::Room(deleted)) if deleted.id == room.id => {
            *current = None;
            true
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

/// Loads history, performs sends, and re-syncs after the surface resumes.
pub struct MessageSynchronizer {
    rows: Arc<dyn RowStore>,
    objects: Option<Arc<dyn ObjectStore>>,
    store: ChatStore,
    config: WidgetConfig,
    /// Timestamp of the last successful full synchronization.
    watermark: Mutex<DateTime<Utc>>,
    has_new: AtomicBool,
}

impl MessageSynchronizer {
    pub fn new(
        rows: Arc<dyn RowStore>,
        objects: Option<Arc<dyn ObjectStore>>,
        store: ChatStore,
        config: WidgetConfig,
    ) -> Self {
        Self {
            rows,
            objects,
            store,
            config,
            watermark: Mutex::new(Utc::now()),
            has_new: AtomicBool::new(false),
        }
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        *self
            .watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn advance_watermark(&self) {
        *self
            .watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Whether remote messages arrived while the surface was hidden.
    pub fn has_new_messages(&self) -> bool {
        self.has_new.load(Ordering::SeqCst)
    }

    pub fn mark_read(&self) {
        self.has_new.store(false, Ordering::SeqCst);
    }

    /// Fetch the room's history (ascending by creation time), replace the
    /// store sequence, and advance the watermark.
    pub async fn load_history(&self, room_id: &str) -> Result<Vec<Message>, WidgetError> {
        let mut messages = self
            .rows
            .messages_for_room(room_id, HISTORY_PAGE_SIZE)
            .await
            .map_err(|e| WidgetError::Remote(e.to_string()))?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        self.store.set_messages(messages.clone());
        self.advance_watermark();

        debug!(room = room_id, count = messages.len(), "History loaded");
        Ok(messages)
    }

    /// Validate, upload, and insert a message, then append the confirmed
    /// row. The insert is awaited, so the appended row is never a
    /// placeholder; the feed delivering the same row later is a no-op.
    pub async fn send(
        &self,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<Message, WidgetError> {
        let content = self.config.clamp_draft(content.trim());
        if content.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }

        let state = self.store.snapshot();
        let room = state
            .current_room
            .as_ref()
            .ok_or(WidgetError::NotInitialized)?;

        let mut draft = NewMessage {
            room_id: room.id.clone(),
            content,
            ..Default::default()
        };
        match &state.user {
            Some(user) => {
                draft.user_id = user.user_id.clone();
                draft.is_from_admin = user.is_admin;
            }
            None => draft.guest_session_id = state.session_id.clone(),
        }

        if let Some(attachment) = attachment {
            if self.config.enable_uploads {
                self.config.permits_attachment(&attachment)?;
                draft.file_url = Some(self.upload(&attachment).await?);
                draft.file_size = Some(attachment.size());
                draft.file_name = Some(attachment.name);
                draft.message_type = MessageKind::File;
            } else {
                warn!("Uploads disabled, attachment ignored");
            }
        }

        let confirmed = self
            .rows
            .insert_message(draft)
            .await
            .map_err(|e| WidgetError::Remote(e.to_string()))?;

        self.store.add_message(confirmed.clone());
        // Re-reads the room under the store lock; the awaited insert above
        // may have raced a feed delivery that already bumped it.
        let snapshot = confirmed.clone();
        self.store.update_current_room(move |room| {
            room.updated_at = snapshot.created_at;
            room.last_message = Some(snapshot);
        });
        self.store
            .refresh_input_lock(self.config.input_locked_after_send);
        self.mark_read();

        info!(message = %confirmed.id, room = %confirmed.room_id, "Message sent");
        Ok(confirmed)
    }

    async fn upload(&self, attachment: &Attachment) -> Result<String, WidgetError> {
        let objects = self.objects.as_ref().ok_or(WidgetError::NotInitialized)?;

        let ext = Path::new(&attachment.name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let path = format!("{}/{}.{}", Utc::now().timestamp_millis(), Uuid::new_v4(), ext);

        objects
            .upload(UPLOAD_BUCKET, &path, attachment.bytes.clone())
            .await
            .map_err(|e| WidgetError::Remote(format!("Upload failed: {e}")))
    }

    /// Re-fetch after the surface becomes visible again. The feed is not
    /// replayed for the hidden period, so the store sequence is replaced
    /// wholesale; anything newer than the watermark raises the
    /// has-new-messages flag.
    pub async fn sync_on_resume(&self, room_id: &str) -> Result<(), WidgetError> {
        let since = self.watermark();

        let mut messages = self
            .rows
            .messages_for_room(room_id, HISTORY_PAGE_SIZE)
            .await
            .map_err(|e| WidgetError::Remote(e.to_string()))?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        if messages.iter().any(|m| m.created_at > since) {
            self.has_new.store(true, Ordering::SeqCst);
        }

        self.store.set_messages(messages);
        self.advance_watermark();

        debug!(room = room_id, "Resynchronized after resume");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_backend::{MemoryBackend, NewRoom};

    fn message(id: &str, room: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            room_id: room.to_string(),
            user_id: None,
            guest_session_id: Some("s1".to_string()),
            content: format!("message {id}"),
            message_type: Default::default(),
            file_url: None,
            file_name: None,
            file_size: None,
            is_from_admin: false,
            created_at: at,
        }
    }

    fn synchronizer(
        backend: &Arc<MemoryBackend>,
        store: &ChatStore,
        config: WidgetConfig,
    ) -> MessageSynchronizer {
        MessageSynchronizer::new(
            backend.clone() as Arc<dyn RowStore>,
            Some(backend.clone() as Arc<dyn ObjectStore>),
            store.clone(),
            config,
        )
    }

    async fn open_room(backend: &Arc<MemoryBackend>, store: &ChatStore) -> Room {
        let room = backend
            .insert_room(NewRoom {
                is_guest_room: true,
                guest_session_id: Some("s1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        store.set_current_room(Some(room.clone()));
        room
    }

    #[test]
    fn test_apply_message_event_idempotent() {
        let now = Utc::now();
        let mut messages = Vec::new();
        let event = ChangeEvent::Insert(TableRow::Message(message("m1", "r1", now)));

        assert!(apply_message_event(&mut messages, "r1", &event));
        assert!(!apply_message_event(&mut messages, "r1", &event));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_apply_message_event_ignores_other_rooms() {
        let mut messages = Vec::new();
        let event =
            ChangeEvent::Insert(TableRow::Message(message("m1", "elsewhere", Utc::now())));

        assert!(!apply_message_event(&mut messages, "r1", &event));
        assert!(messages.is_empty());
    }

    #[test]
    fn test_apply_message_event_delete() {
        let now = Utc::now();
        let mut messages = vec![message("m1", "r1", now), message("m2", "r1", now)];
        let event = ChangeEvent::Delete(TableRow::Message(message("m1", "r1", now)));

        assert!(apply_message_event(&mut messages, "r1", &event));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m2");
    }

    #[test]
    fn test_apply_room_event_delete_clears_current() {
        let now = Utc::now();
        let room = Room {
            id: "r1".to_string(),
            name: None,
            is_guest_room: true,
            guest_session_id: None,
            created_at: now,
            updated_at: now,
            last_message: None,
            unread_count: 0,
            assigned_admin_id: None,
        };
        let mut current = Some(room.clone());

        assert!(apply_room_event(
            &mut current,
            &ChangeEvent::Delete(TableRow::Room(room))
        ));
        assert!(current.is_none());
    }

    #[tokio::test]
    async fn test_guest_send_round_trip() {
        let backend = MemoryBackend::new();
        let store = ChatStore::new();
        store.set_session_id("s1".to_string());
        let room = open_room(&backend, &store).await;
        let sync = synchronizer(&backend, &store, WidgetConfig::default());

        sync.send("hello", None).await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.messages.len(), 1);
        let sent = &state.messages[0];
        assert_eq!(sent.room_id, room.id);
        assert_eq!(sent.content, "hello");
        assert_eq!(sent.guest_session_id.as_deref(), Some("s1"));
        assert_eq!(sent.message_type, MessageKind::Text);
        assert!(!sent.is_from_admin);

        let current = state.current_room.unwrap();
        assert_eq!(current.last_message.unwrap().id, sent.id);
        assert_eq!(current.updated_at, sent.created_at);
    }

    #[tokio::test]
    async fn test_send_rejects_empty_content() {
        let backend = MemoryBackend::new();
        let store = ChatStore::new();
        store.set_session_id("s1".to_string());
        open_room(&backend, &store).await;
        let sync = synchronizer(&backend, &store, WidgetConfig::default());

        let err = sync.send("   ", None).await.unwrap_err();
        assert!(matches!(
            err,
            WidgetError::Validation(ValidationError::EmptyContent)
        ));
        assert!(store.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_send_without_room_rejects() {
        let backend = MemoryBackend::new();
        let store = ChatStore::new();
        let sync = synchronizer(&backend, &store, WidgetConfig::default());

        assert!(matches!(
            sync.send("hello", None).await.unwrap_err(),
            WidgetError::NotInitialized
        ));
    }

    #[tokio::test]
    async fn test_send_uploads_attachment() {
        let backend = MemoryBackend::new();
        let store = ChatStore::new();
        store.set_session_id("s1".to_string());
        open_room(&backend, &store).await;
        let sync = synchronizer(&backend, &store, WidgetConfig::default());

        let sent = sync
            .send(
                "see attached",
                Some(Attachment {
                    name: "photo.png".to_string(),
                    mime_type: "image/png".to_string(),
                    bytes: vec![0u8; 128],
                }),
            )
            .await
            .unwrap();

        assert_eq!(sent.message_type, MessageKind::File);
        assert_eq!(sent.file_name.as_deref(), Some("photo.png"));
        assert_eq!(sent.file_size, Some(128));
        let url = sent.file_url.unwrap();
        assert!(url.starts_with("memory://chat-files/"));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_send_rejects_oversize_attachment() {
        let backend = MemoryBackend::new();
        let store = ChatStore::new();
        store.set_session_id("s1".to_string());
        open_room(&backend, &store).await;
        let config = WidgetConfig {
            max_file_size: 64,
            ..Default::default()
        };
        let sync = synchronizer(&backend, &store, config);

        let err = sync
            .send(
                "too big",
                Some(Attachment {
                    name: "big.png".to_string(),
                    mime_type: "image/png".to_string(),
                    bytes: vec![0u8; 65],
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WidgetError::Validation(ValidationError::FileTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_history_orders_ascending() {
        let backend = MemoryBackend::new();
        let store = ChatStore::new();
        let room = open_room(&backend, &store).await;
        let sync = synchronizer(&backend, &store, WidgetConfig::default());

        let base = Utc::now();
        backend.insert_message_row(message("m2", &room.id, base));
        backend.insert_message_row(message(
            "m1",
            &room.id,
            base - chrono::Duration::seconds(10),
        ));

        let loaded = sync.load_history(&room.id).await.unwrap();
        assert!(loaded
            .windows(2)
            .all(|pair| pair[0].created_at <= pair[1].created_at));
        assert_eq!(loaded[0].id, "m1");
    }

    #[tokio::test]
    async fn test_resume_reconciliation_flags_new_messages() {
        let backend = MemoryBackend::new();
        let store = ChatStore::new();
        store.set_session_id("s1".to_string());
        let room = open_room(&backend, &store).await;
        let sync = synchronizer(&backend, &store, WidgetConfig::default());

        sync.send("before backgrounding", None).await.unwrap();
        sync.load_history(&room.id).await.unwrap();
        let original = store.snapshot().messages.len();
        assert!(!sync.has_new_messages());

        // Two remote inserts while the surface is hidden.
        for content in ["first while away", "second while away"] {
            backend
                .insert_message(NewMessage {
                    room_id: room.id.clone(),
                    content: content.to_string(),
                    is_from_admin: true,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        sync.sync_on_resume(&room.id).await.unwrap();

        assert_eq!(store.snapshot().messages.len(), original + 2);
        assert!(sync.has_new_messages());

        sync.mark_read();
        assert!(!sync.has_new_messages());
    }
}
