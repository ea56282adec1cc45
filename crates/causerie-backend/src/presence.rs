//! Ephemeral presence channel.
//!
//! Per-participant liveness and typing state is broadcast on a shared
//! channel keyed by identity. State lives only while the channel is up and
//! is discarded on disconnect; nothing here is persisted as a row.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::BackendError;

/// State payload tracked for one participant key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceState {
    pub identity: String,
    pub online_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub typing: bool,
    pub typing_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Channel lifecycle events.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// The tracked state map changed; re-read it via `presence_state`.
    Sync,
    Join { key: String },
    Leave { key: String },
}

/// Shared ephemeral key→state broadcast.
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    /// Open the channel and return its event stream.
    async fn subscribe(&self) -> Result<mpsc::Receiver<PresenceEvent>, BackendError>;

    /// Publish the local participant's state under its identity key.
    /// Tracking the same key again replaces the previous payload.
    async fn track(&self, state: PresenceState) -> Result<(), BackendError>;

    /// Snapshot of every currently tracked participant.
    fn presence_state(&self) -> HashMap<String, PresenceState>;

    /// Drop the participant's key and release the channel.
    async fn unsubscribe(&self, identity: &str) -> Result<(), BackendError>;
}
