//! The archive queue
//!
//! `types` and `normalize` define the persisted records and their
//! invariants; `engine` drives items through the tab/save state machine,
//! serialized by `scheduler` and bounded by `watchdog`; `lifecycle` holds the
//! user commands that start, stop and edit the queue.

pub mod engine;
pub mod lifecycle;
pub mod normalize;
pub mod scheduler;
pub mod types;
pub mod watchdog;

pub use engine::QueueEngine;
pub use lifecycle::{LifecycleResult, QueueLifecycle};
pub use normalize::{LinkCandidate, author_queue_items, validate_queue_url};
pub use scheduler::{EngineScheduler, RunTicket};
pub use types::{
    QueueItem, QueueItemStatus, QueueRuntime, QueueSnapshot, QueueTrigger, RuntimeStatus, TabId,
};
pub use watchdog::QueueWatchdog;
