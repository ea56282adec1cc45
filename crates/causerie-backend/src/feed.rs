//! Change-feed subscription types.
//!
//! Row changes arrive as a tagged union so consumers handle every event
//! kind and table exhaustively. Delivery is at-least-once and ordering is
//! not guaranteed relative to direct writes; consumers deduplicate on row
//! id rather than trusting delivery order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use causerie_shared::{Message, Room};

use crate::error::BackendError;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Tables observable through the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Rooms,
    Messages,
}

/// A changed row, tagged by table.
#[derive(Debug, Clone)]
pub enum TableRow {
    Room(Room),
    Message(Message),
}

impl TableRow {
    pub fn table(&self) -> Table {
        match self {
            TableRow::Room(_) => Table::Rooms,
            TableRow::Message(_) => Table::Messages,
        }
    }
}

/// One change delivered by the feed.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Insert(TableRow),
    Update { new: TableRow, old: Option<TableRow> },
    Delete(TableRow),
}

impl ChangeEvent {
    /// The row carried by the event: the new row for inserts and updates,
    /// the old row for deletes.
    pub fn row(&self) -> &TableRow {
        match self {
            ChangeEvent::Insert(row) => row,
            ChangeEvent::Update { new, .. } => new,
            ChangeEvent::Delete(row) => row,
        }
    }

    pub fn table(&self) -> Table {
        self.row().table()
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Server-side filter for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: Table,
    /// Restrict to rows belonging to one room; `None` observes the whole
    /// table.
    pub room_id: Option<String>,
}

impl FeedFilter {
    /// Observe a whole table.
    pub fn table(table: Table) -> Self {
        Self {
            table,
            room_id: None,
        }
    }

    /// Observe one room's rows in `table`.
    pub fn room(table: Table, room_id: impl Into<String>) -> Self {
        Self {
            table,
            room_id: Some(room_id.into()),
        }
    }

    /// Whether a row passes this filter.
    pub fn matches(&self, row: &TableRow) -> bool {
        match row {
            TableRow::Message(m) => {
                self.table == Table::Messages
                    && self.room_id.as_deref().map_or(true, |id| id == m.room_id)
            }
            TableRow::Room(r) => {
                self.table == Table::Rooms
                    && self.room_id.as_deref().map_or(true, |id| id == r.id)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live feed subscription.
///
/// Events are read off `recv`; dropping the subscription aborts the
/// forwarder and releases the stream. The optional gauge counts live
/// subscriptions for diagnostics and tests.
pub struct FeedSubscription {
    rx: mpsc::Receiver<ChangeEvent>,
    forwarder: JoinHandle<()>,
    gauge: Option<Arc<AtomicUsize>>,
}

impl FeedSubscription {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>, forwarder: JoinHandle<()>) -> Self {
        Self {
            rx,
            forwarder,
            gauge: None,
        }
    }

    /// Count this subscription in `gauge` until it is dropped.
    pub fn with_gauge(mut self, gauge: Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        self.gauge = Some(gauge);
        self
    }

    /// Receive the next event; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.forwarder.abort();
        if let Some(gauge) = &self.gauge {
            gauge.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Subscribe to row changes.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open one subscription delivering every event that matches any of
    /// `filters`.
    async fn subscribe(&self, filters: Vec<FeedFilter>) -> Result<FeedSubscription, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: &str, room: &str) -> Message {
        Message {
            id: id.to_string(),
            room_id: room.to_string(),
            user_id: None,
            guest_session_id: None,
            content: "salut".to_string(),
            message_type: Default::default(),
            file_url: None,
            file_name: None,
            file_size: None,
            is_from_admin: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_scoping() {
        let row = TableRow::Message(message("m1", "r1"));

        assert!(FeedFilter::table(Table::Messages).matches(&row));
        assert!(FeedFilter::room(Table::Messages, "r1").matches(&row));
        assert!(!FeedFilter::room(Table::Messages, "r2").matches(&row));
        assert!(!FeedFilter::table(Table::Rooms).matches(&row));
    }

    #[test]
    fn test_event_row_selection() {
        let insert = ChangeEvent::Insert(TableRow::Message(message("m1", "r1")));
        assert_eq!(insert.table(), Table::Messages);

        let delete = ChangeEvent::Delete(TableRow::Message(message("m2", "r1")));
        match delete.row() {
            TableRow::Message(m) => assert_eq!(m.id, "m2"),
            TableRow::Room(_) => panic!("expected a message row"),
        }
    }
}
