//! # causerie-core
//!
//! Client-side realtime chat synchronization for the Causerie widget.
//!
//! The core keeps a local view of rooms and messages consistent with a
//! hosted row store under a change feed, performs validated optimistic
//! sends, tracks presence and typing over a shared channel, and re-syncs
//! from history when the surface resumes after being backgrounded. It
//! reaches the outside world only through the `causerie-backend` traits.

pub mod admin;
pub mod client;
pub mod presence;
pub mod rooms;
pub mod store;
pub mod sync;

pub use admin::{AdminConsole, AdminState, RoomStats};
pub use client::{Backend, ChatClient};
pub use presence::{summarize, PresenceSummary, PresenceTracker, TypingMachine};
pub use rooms::RoomManager;
pub use store::{ChatState, ChatStore};
pub use sync::{apply_message_event, apply_room_event, MessageSynchronizer};

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise tracing for embedders that do not bring their own
/// subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("causerie_core=debug,causerie_backend=info,causerie_shared=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
