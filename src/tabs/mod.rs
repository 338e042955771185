//! Browser tab abstraction
//!
//! The queue engine only ever needs three operations on a tab (open, poll
//! status, close) plus two events (load complete, removed). A tab handle is
//! an opaque integer that may stop being valid at any moment, so every
//! operation treats "not found" as an ordinary outcome rather than an error.

pub mod browser;
pub mod chromium;

pub use browser::{BrowserSession, find_browser_executable, launch_browser};
pub use chromium::ChromiumTabController;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use crate::queue::types::TabId;

/// What a status poll observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Loading,
    Complete,
    /// Closed, crashed or never known to the controller
    Missing,
}

impl TabStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Complete => "complete",
            Self::Missing => "missing",
        }
    }
}

/// Result of asking the host to open a tab
///
/// `id` is `None` when the host created something but could not identify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedTab {
    pub id: Option<TabId>,
}

/// Tab lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    Updated { tab_id: TabId, load_complete: bool },
    Removed { tab_id: TabId },
}

#[derive(Debug, thiserror::Error)]
pub enum TabError {
    #[error("Failed to open tab: {0}")]
    Open(String),

    #[error("Failed to query tab {tab_id}: {message}")]
    Query { tab_id: TabId, message: String },

    #[error("Failed to close tab {tab_id}: {message}")]
    Close { tab_id: TabId, message: String },

    #[error("Failed to capture tab {tab_id}: {message}")]
    Capture { tab_id: TabId, message: String },
}

/// Host tab operations consumed by the queue engine
pub trait TabController: Send + Sync {
    /// Open a new background tab at `url`.
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<OpenedTab, TabError>>;

    /// Poll load state. Callers treat an error as [`TabStatus::Missing`].
    fn status(&self, tab_id: TabId) -> BoxFuture<'_, Result<TabStatus, TabError>>;

    /// Close a tab. Best-effort: callers log and swallow errors.
    fn close(&self, tab_id: TabId) -> BoxFuture<'_, Result<(), TabError>>;

    /// Serialized document of a loaded tab, when the host can provide one
    fn capture_html(&self, tab_id: TabId) -> BoxFuture<'_, Result<Option<String>, TabError>> {
        let _ = tab_id;
        Box::pin(async { Ok(None) })
    }

    fn subscribe(&self) -> broadcast::Receiver<TabEvent>;
}
