//! Widget composition root.
//!
//! A `ChatClient` is built explicitly from a validated config and injected
//! backend handles; its lifecycle is owned by the embedding application.
//! Nothing here is a module-level singleton.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::warn;

use causerie_backend::{ChangeFeed, MemoryBackend, ObjectStore, PresenceChannel, RowStore};
use causerie_shared::{Attachment, ChatUser, Room, SessionFile, WidgetConfig, WidgetError};

use crate::presence::{PresenceSummary, PresenceTracker};
use crate::rooms::RoomManager;
use crate::store::ChatStore;
use crate::sync::MessageSynchronizer;

/// Bundle of backend interface handles injected into the client.
#[derive(Clone)]
pub struct Backend {
    pub rows: Arc<dyn RowStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub presence: Arc<dyn PresenceChannel>,
    pub objects: Option<Arc<dyn ObjectStore>>,
}

impl Backend {
    /// Wire every seam to one in-memory loopback backend.
    pub fn loopback() -> (Self, Arc<MemoryBackend>) {
        let memory = MemoryBackend::new();
        let backend = Self {
            rows: memory.clone(),
            feed: memory.clone(),
            presence: memory.clone(),
            objects: Some(memory.clone()),
        };
        (backend, memory)
    }
}

/// The embeddable chat client: owns the store, synchronizer, room manager,
/// and presence tracker for one widget instance.
pub struct ChatClient {
    config: WidgetConfig,
    store: ChatStore,
    session_id: String,
    sync: Arc<MessageSynchronizer>,
    rooms: RoomManager,
    presence: PresenceTracker,
    last_error: Mutex<Option<String>>,
}

impl ChatClient {
    /// Build a client. The guest session id is read (or minted) from
    /// `session` and seeds both the store and the presence identity, so
    /// remounts with the same config never create a second tracked key.
    pub fn new(
        config: WidgetConfig,
        backend: Backend,
        session: &SessionFile,
    ) -> Result<Self, WidgetError> {
        let config = config.validate();
        let session_id = session.get_or_create(config.guest_session_expiry)?;

        let store = ChatStore::new();
        store.set_session_id(session_id.clone());

        let sync = Arc::new(MessageSynchronizer::new(
            backend.rows.clone(),
            backend.objects.clone(),
            store.clone(),
            config.clone(),
        ));
        let rooms = RoomManager::new(
            backend.rows.clone(),
            backend.feed.clone(),
            store.clone(),
            sync.clone(),
            config.clone(),
        );
        let presence = PresenceTracker::new(
            backend.presence.clone(),
            session_id.clone(),
            config.enable_presence,
        );

        Ok(Self {
            config,
            store,
            session_id,
            sync,
            rooms,
            presence,
            last_error: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Last human-readable failure from a fire-and-forget operation.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// Begin presence tracking (no-op when disabled).
    pub async fn start(&self) {
        self.presence.start().await;
    }

    pub fn set_user(&self, user: Option<ChatUser>) {
        self.store.set_user(user);
    }

    /// Create a room for the current identity and subscribe to it.
    pub async fn create_room(&self, name: Option<String>) -> Result<Room, WidgetError> {
        self.rooms.create_room(name).await
    }

    /// Join an existing room and subscribe to it.
    pub async fn join_room(&self, room_id: &str) -> Result<Room, WidgetError> {
        self.rooms.join_room(room_id).await
    }

    /// Make sure a room is current: rejoin the existing one, or create a
    /// fresh room on first open.
    pub async fn ensure_room(&self) -> Result<Room, WidgetError> {
        match self.store.snapshot().current_room {
            Some(room) => self.rooms.join_room(&room.id).await,
            None => self.rooms.create_room(None).await,
        }
    }

    /// Fire-and-forget send: a failure lands in `last_error` instead of
    /// being thrown, and the caller re-attempts explicitly. A send before
    /// any room exists is silently dropped.
    pub async fn send_message(&self, content: &str, attachment: Option<Attachment>) {
        match self.sync.send(content, attachment).await {
            Ok(_) => *lock(&self.last_error) = None,
            Err(WidgetError::NotInitialized) => {}
            Err(e) => {
                warn!(error = %e, "Send failed");
                *lock(&self.last_error) = Some(e.to_string());
            }
        }
    }

    /// Re-sync after the surface becomes visible again. A no-op without a
    /// current room.
    pub async fn resume(&self) {
        let Some(room) = self.store.snapshot().current_room else {
            return;
        };
        if let Err(e) = self.sync.sync_on_resume(&room.id).await {
            warn!(error = %e, "Resume sync failed");
            *lock(&self.last_error) = Some(e.to_string());
        }
    }

    /// Whether remote messages arrived while the surface was hidden.
    pub fn has_new_messages(&self) -> bool {
        self.sync.has_new_messages()
    }

    pub fn mark_as_read(&self) {
        self.rooms.mark_as_read();
    }

    /// Forward input activity to the typing indicator.
    pub async fn set_typing(&self, typing: bool) {
        self.presence.set_typing(typing).await;
    }

    /// Aggregate presence of everyone else on the channel.
    pub fn presence_summary(&self) -> PresenceSummary {
        self.presence.summary()
    }

    /// Release the feed subscription, presence channel, and timers.
    pub async fn shutdown(&self) {
        self.rooms.teardown().await;
        self.presence.shutdown().await;
    }

    /// Shut down and clear the store; used on sign-out and session expiry.
    pub async fn sign_out(&self) {
        self.shutdown().await;
        self.store.reset();
        *lock(&self.last_error) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_backend::NewMessage;

    fn client(dir: &tempfile::TempDir) -> (ChatClient, Arc<MemoryBackend>) {
        let (backend, memory) = Backend::loopback();
        let session = SessionFile::at(dir.path().join("session.json"));
        let client = ChatClient::new(WidgetConfig::default(), backend, &session).unwrap();
        (client, memory)
    }

    #[tokio::test]
    async fn test_widget_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _memory) = client(&dir);
        client.start().await;

        let room = client.ensure_room().await.unwrap();
        client.send_message("hello", None).await;

        let state = client.store().snapshot();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].room_id, room.id);
        assert_eq!(
            state.messages[0].guest_session_id.as_deref(),
            Some(client.session_id())
        );
        assert!(client.last_error().is_none());
        // A guest send locks the input until an admin replies.
        assert!(state.input_locked);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_ensure_room_rejoins_current() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _memory) = client(&dir);

        let first = client.ensure_room().await.unwrap();
        let second = client.ensure_room().await.unwrap();
        assert_eq!(first.id, second.id);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_failure_is_recorded_not_thrown() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _memory) = client(&dir);
        client.ensure_room().await.unwrap();

        client.send_message("   ", None).await;

        assert!(client.last_error().unwrap().contains("empty"));
        assert!(client.store().snapshot().messages.is_empty());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_resume_after_backgrounding() {
        let dir = tempfile::tempdir().unwrap();
        let (client, memory) = client(&dir);
        let room = client.ensure_room().await.unwrap();
        client.send_message("before", None).await;
        // Drop realtime delivery; resume is the fallback path under test.
        client.shutdown().await;

        for content in ["reply one", "reply two"] {
            memory
                .insert_message(NewMessage {
                    room_id: room.id.clone(),
                    content: content.to_string(),
                    is_from_admin: true,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        client.resume().await;

        assert!(client.has_new_messages());
        assert_eq!(client.store().snapshot().messages.len(), 3);

        client.mark_as_read();
        assert!(!client.has_new_messages());
        assert_eq!(client.store().snapshot().unread_count, 0);
    }

    #[tokio::test]
    async fn test_sign_out_resets_store() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _memory) = client(&dir);
        client.ensure_room().await.unwrap();
        client.send_message("hello", None).await;

        client.sign_out().await;

        let state = client.store().snapshot();
        assert!(state.current_room.is_none());
        assert!(state.messages.is_empty());
        assert!(state.session_id.is_none());
    }
}
