//! Room lifecycle: creation, joining, and the per-room feed subscription.
//!
//! At most one feed subscription is live per widget instance. Switching
//! rooms tears the previous subscription down (and waits for its dispatch
//! task to stop) before the next one is opened, so no room ever receives
//! duplicate delivery.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use std::sync::Arc;

use causerie_backend::{
    ChangeEvent, ChangeFeed, FeedFilter, NewRoom, RowStore, Table, TableRow,
};
use causerie_shared::{Room, WidgetConfig, WidgetError};

use crate::store::ChatStore;
use crate::sync::{apply_message_event, apply_room_event, MessageSynchronizer};

struct ActiveRoom {
    room_id: String,
    dispatcher: JoinHandle<()>,
}

/// Creates and joins rooms and owns the live change-feed subscription for
/// the current room.
pub struct RoomManager {
    rows: Arc<dyn RowStore>,
    feed: Arc<dyn ChangeFeed>,
    store: ChatStore,
    sync: Arc<MessageSynchronizer>,
    config: WidgetConfig,
    // tokio mutex: held across the teardown/subscribe sequence so two
    // concurrent room switches cannot leave two subscriptions live.
    active: tokio::sync::Mutex<Option<ActiveRoom>>,
}

impl RoomManager {
    pub fn new(
        rows: Arc<dyn RowStore>,
        feed: Arc<dyn ChangeFeed>,
        store: ChatStore,
        sync: Arc<MessageSynchronizer>,
        config: WidgetConfig,
    ) -> Self {
        Self {
            rows,
            feed,
            store,
            sync,
            config,
            active: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a room for the current identity, make it current, load its
    /// (empty) history, and start its feed subscription.
    pub async fn create_room(&self, name: Option<String>) -> Result<Room, WidgetError> {
        let state = self.store.snapshot();
        let session_id = state.session_id.ok_or(WidgetError::NotInitialized)?;
        let is_guest = state.user.is_none();

        let room = self
            .rows
            .insert_room(NewRoom {
                name,
                is_guest_room: is_guest,
                guest_session_id: is_guest.then_some(session_id),
            })
            .await
            .map_err(|e| WidgetError::Remote(e.to_string()))?;
        info!(room = %room.id, guest = is_guest, "Room created");

        self.store.set_current_room(Some(room.clone()));
        self.sync.load_history(&room.id).await?;
        self.resubscribe(&room.id).await;
        Ok(room)
    }

    /// Join an existing room: make it current, load its history, and
    /// replace the live subscription.
    pub async fn join_room(&self, room_id: &str) -> Result<Room, WidgetError> {
        let room = self
            .rows
            .room(room_id)
            .await
            .map_err(|e| WidgetError::Remote(e.to_string()))?
            .ok_or_else(|| WidgetError::Remote(format!("Room {room_id} not found")))?;

        self.store.set_current_room(Some(room.clone()));
        self.sync.load_history(room_id).await?;
        self.resubscribe(room_id).await;
        Ok(room)
    }

    /// Reset the unread counter and the has-new-messages flag.
    pub fn mark_as_read(&self) {
        self.store.set_unread_count(0);
        self.sync.mark_read();
    }

    /// Tear down the live subscription, if any.
    pub async fn teardown(&self) {
        let mut active = self.active.lock().await;
        release(&mut active).await;
    }

    /// Replace the live subscription with one scoped to `room_id`. The
    /// previous subscription is fully released first. A subscribe failure
    /// is logged, not surfaced: the widget degrades to non-realtime and
    /// resume reconciliation covers the gap.
    async fn resubscribe(&self, room_id: &str) {
        let mut active = self.active.lock().await;
        release(&mut active).await;

        let filters = vec![
            FeedFilter::room(Table::Messages, room_id),
            FeedFilter::room(Table::Rooms, room_id),
        ];
        let mut sub = match self.feed.subscribe(filters).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(room = room_id, error = %e, "Feed subscribe failed, continuing without realtime");
                return;
            }
        };

        let store = self.store.clone();
        let config = self.config.clone();
        let viewer_is_admin = self
            .store
            .snapshot()
            .user
            .as_ref()
            .map_or(false, |u| u.is_admin);
        let room = room_id.to_string();

        let dispatcher = tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                dispatch_feed_event(&store, &config, &room, viewer_is_admin, event);
            }
            debug!(room = %room, "Feed dispatcher stopped");
        });

        *active = Some(ActiveRoom {
            room_id: room_id.to_string(),
            dispatcher,
        });
        info!(room = room_id, "Subscribed to room feed");
    }
}

async fn release(active: &mut Option<ActiveRoom>) {
    if let Some(previous) = active.take() {
        previous.dispatcher.abort();
        let _ = previous.dispatcher.await;
        debug!(room = %previous.room_id, "Feed subscription released");
    }
}

/// Fold one feed event into the store in a single synchronous step: the
/// message sequence, the viewer's unread counter, the input lock, and the
/// current room row all change together.
fn dispatch_feed_event(
    store: &ChatStore,
    config: &WidgetConfig,
    room_id: &str,
    viewer_is_admin: bool,
    event: ChangeEvent,
) {
    store.with_mut(|state| match event.table() {
        Table::Messages => {
            let fresh_insert = matches!(
                &event,
                ChangeEvent::Insert(TableRow::Message(m))
                    if m.room_id == room_id && !state.messages.iter().any(|x| x.id == m.id)
            );
            if apply_message_event(&mut state.messages, room_id, &event) {
                if fresh_insert {
                    if let ChangeEvent::Insert(TableRow::Message(m)) = &event {
                        if m.is_from_admin != viewer_is_admin {
                            state.unread_count += 1;
                        }
                    }
                }
                state.input_locked = config.input_locked_after_send
                    && state.messages.last().map_or(false, |m| !m.is_from_admin);
            }
        }
        Table::Rooms => {
            apply_room_event(&mut state.current_room, &event);
        }
    });
}
