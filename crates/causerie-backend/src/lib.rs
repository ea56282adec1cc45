// Backend interfaces consumed by the Causerie synchronization core.
//
// The core never talks to a concrete service; it sees four seams (row
// store, change feed, presence channel, object store) and stays ignorant
// of how they are implemented. A loopback in-memory implementation backs
// the test suite and single-process deployments.

pub mod feed;
pub mod memory;
pub mod objects;
pub mod presence;
pub mod rows;

mod error;

pub use error::BackendError;
pub use feed::{ChangeEvent, ChangeFeed, FeedFilter, FeedSubscription, Table, TableRow};
pub use memory::MemoryBackend;
pub use objects::ObjectStore;
pub use presence::{PresenceChannel, PresenceEvent, PresenceState};
pub use rows::{NewMessage, NewRoom, RowStore};
