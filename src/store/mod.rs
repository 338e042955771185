//! Persistent state store
//!
//! The queue keeps all durable state in a handful of named records. The
//! backing store only has to offer atomic get/set per key; there are no
//! transactions across keys, which is why every reader re-fetches before
//! acting (see `records::QueueStore`).

pub mod memory;
pub mod records;
pub mod sqlite;

pub use memory::MemoryStateStore;
pub use records::{
    CollectorSettings, ProviderMode, QueueSettings, QueueStore, WatchdogRecord,
};
pub use sqlite::SqliteStateStore;

use futures::future::BoxFuture;
use serde_json::Value;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite or connection pool failure
    #[error("State database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be encoded or decoded
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure while preparing the store
    #[error("State store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async key-value store holding JSON documents
///
/// Implementations must make each `get`/`set`/`remove` atomic for its key.
pub trait StateStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>>;

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>>;

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>>;
}
