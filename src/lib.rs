pub mod commands;
pub mod config;
pub mod error;
pub mod provider;
pub mod queue;
pub mod store;
pub mod tabs;
pub mod utils;

pub use commands::{CommandRequest, CommandResponse, QueueCommand, dispatch, handle_request};
pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use provider::{
    ConnectorBridgeProvider, ProviderDiagnostics, ProviderOrchestrator, SaveOutcome, SaveProvider,
};
pub use queue::{
    LifecycleResult, LinkCandidate, QueueEngine, QueueItem, QueueItemStatus, QueueLifecycle,
    QueueRuntime, QueueSnapshot, QueueTrigger, RuntimeStatus,
};
pub use store::{MemoryStateStore, QueueStore, SqliteStateStore, StateStore, StoreError};
pub use tabs::{ChromiumTabController, TabController, TabEvent, TabId, TabStatus};
