//! Getter methods for `QueueConfig`

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::types::QueueConfig;

impl QueueConfig {
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn connector_url(&self) -> &str {
        &self.connector_url
    }

    #[must_use]
    pub fn watchdog_delay_secs(&self) -> u64 {
        self.watchdog_delay_secs
    }

    #[must_use]
    pub fn watchdog_delay(&self) -> Duration {
        Duration::from_secs(self.watchdog_delay_secs)
    }

    #[must_use]
    pub fn save_timeout_secs(&self) -> u64 {
        self.save_timeout_secs
    }

    #[must_use]
    pub fn health_timeout_secs(&self) -> u64 {
        self.health_timeout_secs
    }

    /// Browser profile directory, defaulting to `{storage_dir}/chrome-profile`
    #[must_use]
    pub fn chrome_data_dir(&self) -> PathBuf {
        self.chrome_data_dir
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("chrome-profile"))
    }
}
