//! Shared configuration constants for the archive queue
//!
//! Default values, persisted record keys and the human-readable failure
//! messages written into `lastError`. Messages are plain strings on purpose:
//! they are shown to operators verbatim.

/// Default watchdog period: 60 seconds
///
/// The watchdog doubles as the tab-load timeout. A tab that is still loading
/// when the alarm fires is failed, so this is the longest a single item can
/// stall before the queue moves on.
pub const DEFAULT_WATCHDOG_DELAY_SECS: u64 = 60;

/// Upper bound on one provider save call: 120 seconds
pub const DEFAULT_SAVE_TIMEOUT_SECS: u64 = 120;

/// Upper bound on one provider health check: 5 seconds
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;

/// Local connector HTTP server (Zotero desktop listens here by default)
pub const DEFAULT_CONNECTOR_URL: &str = "http://127.0.0.1:23119";

/// Connector API version header value sent with every bridge request
pub const CONNECTOR_API_VERSION: &str = "3";

/// Default cap on queue length when authoring items from collected links
pub const DEFAULT_MAX_QUEUE_LINKS: u32 = 500;

/// SQLite file name inside the storage directory
pub const STATE_DB_FILE: &str = "archive_queue.sqlite";

/// Chrome user agent string used for archive tabs
///
/// Updated: 2025-01-29 to Chrome 132 (current stable)
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

// Persisted record keys
pub const QUEUE_ITEMS_KEY: &str = "queue_items";
pub const QUEUE_RUNTIME_KEY: &str = "queue_runtime";
pub const QUEUE_SETTINGS_KEY: &str = "queue_settings";
pub const COLLECTOR_SETTINGS_KEY: &str = "collector_settings";
pub const PROVIDER_DIAGNOSTICS_KEY: &str = "provider_diagnostics";
pub const QUEUE_WATCHDOG_KEY: &str = "queue_watchdog";

// Item failure messages
pub const LOST_TAB_CONTEXT_MESSAGE: &str = "Lost active tab context.";
pub const TAB_CLOSED_MESSAGE: &str = "Tab was closed before loading completed.";
pub const TAB_LOAD_TIMEOUT_MESSAGE: &str = "Timed out waiting for the tab to finish loading.";
pub const NO_TAB_ID_MESSAGE: &str = "Tab was created without a tab id.";
pub const STOPPED_BY_USER_MESSAGE: &str = "Stopped by user.";
pub const DEFAULT_SAVE_FAILURE_MESSAGE: &str = "Save provider reported a failure.";
pub const GENERIC_FAILURE_MESSAGE: &str = "Unknown failure.";
pub const PROVIDER_DISABLED_MESSAGE: &str = "Save provider is disabled.";
pub const PROVIDER_MISSING_MESSAGE: &str = "No save provider is configured.";
