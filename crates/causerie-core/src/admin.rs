//! Operator console: a live projection over every room.
//!
//! The console folds the unscoped room and message feeds into its own room
//! list and per-room message cache, independent of the single-conversation
//! widget store. Writes go through the row store and are patched into the
//! projection in place, so the operator UI never needs a full reload to see
//! its own actions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use causerie_backend::{
    ChangeEvent, ChangeFeed, FeedFilter, NewMessage, RowStore, Table, TableRow,
};
use causerie_shared::constants::HISTORY_PAGE_SIZE;
use causerie_shared::{Message, MessageKind, Room, ValidationError, WidgetError};

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// In-memory projection folded from the room and message feeds.
#[derive(Debug, Clone, Default)]
pub struct AdminState {
    /// All rooms, most recently updated first.
    pub rooms: Vec<Room>,
    /// Message cache per room id.
    pub room_messages: HashMap<String, Vec<Message>>,
    pub selected_room: Option<String>,
    /// Last human-readable failure from a console operation.
    pub last_error: Option<String>,
}

/// Message counts for one room's cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub total: usize,
    pub from_admin: usize,
    pub from_visitors: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Fold a rooms-table event into the room list. Unknown rows on update are
/// upserted: the feed is at-least-once and the matching insert may have
/// been missed.
pub fn fold_room_event(rooms: &mut Vec<Room>, event: &ChangeEvent) -> bool {
    match event {
        ChangeEvent::Insert(TableRow::Room(room)) => {
            if rooms.iter().any(|r| r.id == room.id) {
                false
            } else {
                rooms.insert(0, room.clone());
                true
            }
        }
        ChangeEvent::Update {
            new: TableRow::Room(room),
            ..
        } => {
            match rooms.iter_mut().find(|r| r.id == room.id) {
                Some(slot) => *slot = room.clone(),
                None => rooms.insert(0, room.clone()),
            }
            true
        }
        ChangeEvent::Delete(TableRow::Room(room)) => {
            let before = rooms.len();
            rooms.retain(|r| r.id != room.id);
            before != rooms.len()
        }
        _ => false,
    }
}

/// Fold a messages-table event into the per-room cache and the room list's
/// denormalised fields. A visitor-origin insert bumps the room's unread
/// counter.
pub fn fold_message_event(state: &mut AdminState, event: &ChangeEvent) -> bool {
    match event {
        ChangeEvent::Insert(TableRow::Message(message)) => {
            let cache = state.room_messages.entry(message.room_id.clone()).or_default();
            if cache.iter().any(|m| m.id == message.id) {
                return false;
            }
            cache.push(message.clone());

            if let Some(room) = state.rooms.iter_mut().find(|r| r.id == message.room_id) {
                room.last_message = Some(message.clone());
                room.updated_at = message.created_at;
                if !message.is_from_admin {
                    room.unread_count += 1;
                }
            }
            true
        }
        ChangeEvent::Delete(TableRow::Message(message)) => {
            match state.room_messages.get_mut(&message.room_id) {
                Some(cache) => {
                    let before = cache.len();
                    cache.retain(|m| m.id != message.id);
                    before != cache.len()
                }
                None => false,
            }
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

/// Read/write projection over all rooms for operator use.
pub struct AdminConsole {
    rows: Arc<dyn RowStore>,
    feed: Arc<dyn ChangeFeed>,
    admin_id: String,
    state_tx: watch::Sender<AdminState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AdminConsole {
    pub fn new(rows: Arc<dyn RowStore>, feed: Arc<dyn ChangeFeed>, admin_id: String) -> Self {
        let (state_tx, _) = watch::channel(AdminState::default());
        Self {
            rows,
            feed,
            admin_id,
            state_tx,
            worker: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> AdminState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AdminState> {
        self.state_tx.subscribe()
    }

    pub fn select_room(&self, room_id: Option<String>) {
        self.state_tx
            .send_modify(|state| state.selected_room = room_id);
    }

    /// Start folding the unscoped room and message feeds. A subscribe
    /// failure is logged; the console still works through explicit loads.
    pub async fn start(&self) {
        let filters = vec![
            FeedFilter::table(Table::Rooms),
            FeedFilter::table(Table::Messages),
        ];
        let mut sub = match self.feed.subscribe(filters).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "Console feed subscribe failed, continuing without realtime");
                return;
            }
        };

        let state_tx = self.state_tx.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                state_tx.send_modify(|state| {
                    match event.table() {
                        Table::Rooms => fold_room_event(&mut state.rooms, &event),
                        Table::Messages => fold_message_event(state, &event),
                    };
                });
            }
            debug!("Console feed dispatcher stopped");
        });

        *lock(&self.worker) = Some(worker);
        info!("Console subscribed to room and message feeds");
    }

    /// Load every room, most recently updated first.
    pub async fn load_rooms(&self) -> Result<(), WidgetError> {
        let rooms = self
            .rows
            .list_rooms()
            .await
            .map_err(|e| self.record_error("Failed to load rooms", e))?;
        self.state_tx.send_modify(|state| state.rooms = rooms);
        Ok(())
    }

    /// Load one room's history into the cache.
    pub async fn load_room_messages(&self, room_id: &str) -> Result<(), WidgetError> {
        let mut messages = self
            .rows
            .messages_for_room(room_id, HISTORY_PAGE_SIZE)
            .await
            .map_err(|e| self.record_error("Failed to load messages", e))?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let room_id = room_id.to_string();
        self.state_tx.send_modify(|state| {
            state.room_messages.insert(room_id, messages);
        });
        Ok(())
    }

    /// Send into a room as the operator. The admin-origin flag is always
    /// set, whatever identity the console runs under.
    pub async fn send_message(
        &self,
        room_id: &str,
        content: &str,
    ) -> Result<Message, WidgetError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }

        let message = self
            .rows
            .insert_message(NewMessage {
                room_id: room_id.to_string(),
                content: content.to_string(),
                message_type: MessageKind::Text,
                is_from_admin: true,
                ..Default::default()
            })
            .await
            .map_err(|e| self.record_error("Failed to send message", e))?;

        let folded = message.clone();
        self.state_tx.send_modify(|state| {
            fold_message_event(state, &ChangeEvent::Insert(TableRow::Message(folded)));
        });
        info!(message = %message.id, room = room_id, "Admin message sent");
        Ok(message)
    }

    /// Delete a room; its cached messages and any selection go with it.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), WidgetError> {
        self.rows
            .delete_room(room_id)
            .await
            .map_err(|e| self.record_error("Failed to delete room", e))?;

        let room_id = room_id.to_string();
        self.state_tx.send_modify(|state| {
            state.rooms.retain(|r| r.id != room_id);
            state.room_messages.remove(&room_id);
            if state.selected_room.as_deref() == Some(room_id.as_str()) {
                state.selected_room = None;
            }
        });
        info!(room = %room_id, "Room deleted");
        Ok(())
    }

    /// Reset a room's unread counter and record the operator's read touch.
    ///
    /// The touch is one global last-seen row for the admin identity, not a
    /// per-room marker: once any room is marked, every room reads as
    /// caught-up on the server side. This mirrors the hosted row model,
    /// which has no per-room-per-admin read state.
    pub async fn mark_as_read(&self, room_id: &str) -> Result<(), WidgetError> {
        self.rows
            .touch_last_seen(Some(&self.admin_id), None)
            .await
            .map_err(|e| self.record_error("Failed to mark as read", e))?;

        let room_id = room_id.to_string();
        self.state_tx.send_modify(|state| {
            if let Some(room) = state.rooms.iter_mut().find(|r| r.id == room_id) {
                room.unread_count = 0;
            }
        });
        Ok(())
    }

    /// Point a room at an assigned admin; the room list reflects the
    /// assignment immediately, without a reload.
    pub async fn assign_admin(&self, room_id: &str, admin_id: &str) -> Result<(), WidgetError> {
        self.rows
            .assign_admin(room_id, admin_id)
            .await
            .map_err(|e| self.record_error("Failed to assign admin", e))?;

        let room_id = room_id.to_string();
        let admin_id = admin_id.to_string();
        self.state_tx.send_modify(|state| {
            if let Some(room) = state.rooms.iter_mut().find(|r| r.id == room_id) {
                room.assigned_admin_id = Some(admin_id);
            }
        });
        Ok(())
    }

    /// Message counts and last activity for one room's cache.
    pub fn room_stats(&self, room_id: &str) -> RoomStats {
        let state = self.state_tx.borrow();
        let messages = state.room_messages.get(room_id);
        match messages {
            Some(messages) => {
                let from_admin = messages.iter().filter(|m| m.is_from_admin).count();
                RoomStats {
                    total: messages.len(),
                    from_admin,
                    from_visitors: messages.len() - from_admin,
                    last_activity: messages.last().map(|m| m.created_at),
                }
            }
            None => RoomStats::default(),
        }
    }

    /// Stop folding feed events.
    pub async fn shutdown(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
        }
    }

    fn record_error(&self, context: &str, cause: impl std::fmt::Display) -> WidgetError {
        let rendered = format!("{context}: {cause}");
        warn!("{rendered}");
        self.state_tx
            .send_modify(|state| state.last_error = Some(rendered.clone()));
        WidgetError::Remote(rendered)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
