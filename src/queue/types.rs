//! Core queue record types
//!
//! `QueueItem` and `QueueRuntime` are the two records the engine and the
//! lifecycle handlers mutate. Both serialize in camelCase because the
//! persisted layout is shared with the UI layer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::GENERIC_FAILURE_MESSAGE;

/// Host tab identifier
pub type TabId = i64;

/// Lifecycle state of a single queue item
///
/// ```text
/// pending -> opening_tab -> saving_snapshot -> archived
///                  \               \--------> failed
///                   \--------------------------> failed (closed / timeout)
/// opening_tab | saving_snapshot --(stop)--> cancelled
/// failed | cancelled --(retry)--> pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    OpeningTab,
    SavingSnapshot,
    Archived,
    Failed,
    Cancelled,
}

impl QueueItemStatus {
    /// Stable snake_case wire representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::OpeningTab => "opening_tab",
            Self::SavingSnapshot => "saving_snapshot",
            Self::Archived => "archived",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted status token. Unknown tokens yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "opening_tab" => Some(Self::OpeningTab),
            "saving_snapshot" => Some(Self::SavingSnapshot),
            "archived" => Some(Self::Archived),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// In flight: a tab is open (or being opened) for this item
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::OpeningTab | Self::SavingSnapshot)
    }

    /// Statuses that carry a `lastError` and can be retried
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One web page awaiting (or having undergone) the save operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub url: String,
    pub title: String,
    pub status: QueueItemStatus,
    /// Incremented only when a tab open is attempted
    pub attempts: u32,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueItem {
    /// Create a fresh `pending` item. `url` must already be validated.
    #[must_use]
    pub fn new(url: impl Into<String>, title: impl Into<String>, now: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            title: title.into(),
            status: QueueItemStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    fn stamp(&mut self, now: i64) {
        self.updated_at = now.max(self.created_at);
    }

    /// pending -> opening_tab, counting the attempt
    pub fn begin_opening(&mut self, now: i64) {
        self.status = QueueItemStatus::OpeningTab;
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = None;
        self.stamp(now);
    }

    pub fn begin_saving(&mut self, now: i64) {
        self.status = QueueItemStatus::SavingSnapshot;
        self.last_error = None;
        self.stamp(now);
    }

    pub fn mark_archived(&mut self, now: i64) {
        self.status = QueueItemStatus::Archived;
        self.last_error = None;
        self.stamp(now);
    }

    pub fn mark_failed(&mut self, message: &str, now: i64) {
        self.status = QueueItemStatus::Failed;
        self.last_error = Some(error_message_or_default(message));
        self.stamp(now);
    }

    pub fn mark_cancelled(&mut self, message: &str, now: i64) {
        self.status = QueueItemStatus::Cancelled;
        self.last_error = Some(error_message_or_default(message));
        self.stamp(now);
    }

    /// failed | cancelled -> pending. Attempts are kept.
    pub fn reset_to_pending(&mut self, now: i64) {
        self.status = QueueItemStatus::Pending;
        self.last_error = None;
        self.stamp(now);
    }
}

fn error_message_or_default(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        GENERIC_FAILURE_MESSAGE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether the queue as a whole is processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

impl RuntimeStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Singleton record describing the queue's processing state
///
/// **INVARIANT:** `active_queue_item_id` and `active_tab_id` are either both
/// set or both `None`, and both are `None` whenever `status == Idle`.
/// Only `normalize_runtime` constructs values read from the store, so the
/// invariant holds for every value the engine sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRuntime {
    pub status: RuntimeStatus,
    pub active_queue_item_id: Option<String>,
    pub active_tab_id: Option<TabId>,
    pub controller_window_id: Option<i64>,
    /// Mirror of the armed watchdog deadline (epoch ms)
    pub next_run_at: Option<i64>,
    pub updated_at: i64,
}

impl Default for QueueRuntime {
    fn default() -> Self {
        Self {
            status: RuntimeStatus::Idle,
            active_queue_item_id: None,
            active_tab_id: None,
            controller_window_id: None,
            next_run_at: None,
            updated_at: 0,
        }
    }
}

impl QueueRuntime {
    /// The in-flight (item, tab) pair, when both halves are present
    #[must_use]
    pub fn active_context(&self) -> Option<(&str, TabId)> {
        match (&self.active_queue_item_id, self.active_tab_id) {
            (Some(item_id), Some(tab_id)) => Some((item_id.as_str(), tab_id)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_active_item(&self, item_id: &str) -> bool {
        self.active_queue_item_id.as_deref() == Some(item_id)
    }

    pub fn set_active_context(&mut self, item_id: impl Into<String>, tab_id: TabId) {
        self.active_queue_item_id = Some(item_id.into());
        self.active_tab_id = Some(tab_id);
    }

    pub fn clear_active_context(&mut self) {
        self.active_queue_item_id = None;
        self.active_tab_id = None;
        self.next_run_at = None;
    }
}

/// Why the engine was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueTrigger {
    Start,
    Resume,
    Recovery,
    Alarm,
    TabUpdated,
    /// The tab with this id went away outside the engine
    TabRemoved { tab_id: TabId },
    TabOpened,
    TabOpenFailed,
    TabMissing,
    LoadTimeout,
    SaveSuccess,
    SaveFailed,
    ContextRepaired,
    EventsLagged,
}

impl QueueTrigger {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Resume => "resume",
            Self::Recovery => "recovery",
            Self::Alarm => "alarm",
            Self::TabUpdated => "tab-updated",
            Self::TabRemoved { .. } => "tab-removed",
            Self::TabOpened => "tab-opened",
            Self::TabOpenFailed => "tab-open-failed",
            Self::TabMissing => "tab-missing",
            Self::LoadTimeout => "load-timeout",
            Self::SaveSuccess => "save-success",
            Self::SaveFailed => "save-failed",
            Self::ContextRepaired => "context-repaired",
            Self::EventsLagged => "events-lagged",
        }
    }
}

impl fmt::Display for QueueTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime plus items, as returned to the UI layer after every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub runtime: QueueRuntime,
    pub items: Vec<QueueItem>,
}
