//! Durable offline queue of pending server writes.
//!
//! Writes that could not be confirmed while the device was offline are
//! appended here and replayed later by the
//! [`SyncDispatcher`](crate::sync::SyncDispatcher), oldest first.

mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::{OfflineQueue, QueueError};
pub use types::{DestinationKind, HttpMethod, PendingOperation, QueuedOperation};
