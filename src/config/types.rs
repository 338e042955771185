//! Core configuration type for the archive queue

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Directory holding the state database.
    ///
    /// **INVARIANT:** Always an absolute path (normalized in builder).
    pub(crate) storage_dir: PathBuf,

    /// Run the archive browser without a window
    pub(crate) headless: bool,

    /// Base URL of the local connector HTTP server
    pub(crate) connector_url: String,

    /// Watchdog period, which is also the longest a tab may stay loading
    ///
    /// Default: 60 seconds. `queue_settings.watchdogDelaySecs` overrides it
    /// at runtime.
    pub(crate) watchdog_delay_secs: u64,

    /// Upper bound on a single provider save call
    ///
    /// Default: 120 seconds
    pub(crate) save_timeout_secs: u64,

    /// Upper bound on a single provider health check
    ///
    /// Default: 5 seconds
    pub(crate) health_timeout_secs: u64,

    /// Browser profile directory. `None` means `{storage_dir}/chrome-profile`.
    pub(crate) chrome_data_dir: Option<PathBuf>,
}
