//! Client state store.
//!
//! The single source of truth for one widget instance: session, current
//! user, current room, the ordered message sequence, unread count, and the
//! input lock. State lives behind a `tokio::sync::watch` channel, so every
//! mutation is synchronous and every observer sees a complete snapshot,
//! never a partially-updated room/messages pair.
//!
//! The store is constructed explicitly and handed to each component that
//! needs it; there is no module-level instance.

use tokio::sync::watch;

use causerie_shared::{ChatUser, Message, Room};

/// One consistent snapshot of the widget state.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub session_id: Option<String>,
    pub user: Option<ChatUser>,
    pub current_room: Option<Room>,
    pub messages: Vec<Message>,
    pub unread_count: u32,
    pub input_locked: bool,
}

/// Handle to the shared widget state. Cheap to clone; every clone observes
/// the same underlying channel.
#[derive(Clone)]
pub struct ChatStore {
    tx: watch::Sender<ChatState>,
}

impl ChatStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ChatState::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> ChatState {
        self.tx.borrow().clone()
    }

    /// Observe state changes. Each received value is a full snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.tx.subscribe()
    }

    pub fn set_session_id(&self, id: String) {
        self.tx.send_modify(|state| state.session_id = Some(id));
    }

    pub fn set_user(&self, user: Option<ChatUser>) {
        self.tx.send_modify(|state| state.user = user);
    }

    pub fn set_current_room(&self, room: Option<Room>) {
        self.tx.send_modify(|state| state.current_room = room);
    }

    /// Replace the message sequence wholesale.
    pub fn set_messages(&self, messages: Vec<Message>) {
        self.tx.send_modify(|state| state.messages = messages);
    }

    /// Append a message. No-op when a message with the same id is already
    /// present: the change feed and a direct write may both deliver the
    /// same row, in either order. Returns whether the sequence changed.
    pub fn add_message(&self, message: Message) -> bool {
        let mut added = false;
        self.tx.send_modify(|state| {
            if !state.messages.iter().any(|m| m.id == message.id) {
                state.messages.push(message.clone());
                added = true;
            }
        });
        added
    }

    pub fn set_unread_count(&self, count: u32) {
        self.tx.send_modify(|state| state.unread_count = count);
    }

    pub fn set_input_locked(&self, locked: bool) {
        self.tx.send_modify(|state| state.input_locked = locked);
    }

    /// Recompute the input lock from the tail of the sequence: locked while
    /// the conversation is waiting on an admin reply.
    pub fn refresh_input_lock(&self, locked_after_send: bool) {
        self.tx.send_modify(|state| {
            state.input_locked = locked_after_send
                && state.messages.last().map_or(false, |m| !m.is_from_admin);
        });
    }

    /// Read-modify-write on the current room in one synchronous step, so a
    /// caller resuming after an await cannot lose a concurrent update.
    pub fn update_current_room(&self, f: impl FnOnce(&mut Room)) {
        self.tx.send_modify(|state| {
            if let Some(room) = state.current_room.as_mut() {
                f(room);
            }
        });
    }

    /// Apply one closure to the whole state in a single synchronous step.
    /// Kept crate-private so external mutation stays on the named setters.
    pub(crate) fn with_mut(&self, f: impl FnOnce(&mut ChatState)) {
        self.tx.send_modify(f);
    }

    /// Clear every field; used on sign-out and session expiry.
    pub fn reset(&self) {
        self.tx.send_replace(ChatState::default());
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}
