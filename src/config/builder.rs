//! Type-safe builder for `QueueConfig` using the typestate pattern
//!
//! `build()` only exists once `storage_dir` has been provided, so a config
//! without a place to keep state cannot be constructed.

use anyhow::{Result, anyhow};
use std::marker::PhantomData;
use std::path::PathBuf;

use super::types::QueueConfig;
use crate::utils::{
    DEFAULT_CONNECTOR_URL, DEFAULT_HEALTH_TIMEOUT_SECS, DEFAULT_SAVE_TIMEOUT_SECS,
    DEFAULT_WATCHDOG_DELAY_SECS,
};

// Type states for the builder
pub struct WithStorageDir;

pub struct QueueConfigBuilder<State = ()> {
    pub(crate) storage_dir: Option<PathBuf>,
    pub(crate) headless: bool,
    pub(crate) connector_url: String,
    pub(crate) watchdog_delay_secs: u64,
    pub(crate) save_timeout_secs: u64,
    pub(crate) health_timeout_secs: u64,
    pub(crate) chrome_data_dir: Option<PathBuf>,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for QueueConfigBuilder<()> {
    fn default() -> Self {
        Self {
            storage_dir: None,
            headless: true,
            connector_url: DEFAULT_CONNECTOR_URL.to_string(),
            watchdog_delay_secs: DEFAULT_WATCHDOG_DELAY_SECS,
            save_timeout_secs: DEFAULT_SAVE_TIMEOUT_SECS,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
            chrome_data_dir: None,
            _phantom: PhantomData,
        }
    }
}

impl QueueConfig {
    /// Create a builder for configuring a `QueueConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> QueueConfigBuilder<()> {
        QueueConfigBuilder::default()
    }
}

impl QueueConfigBuilder<()> {
    pub fn storage_dir(self, dir: impl Into<PathBuf>) -> QueueConfigBuilder<WithStorageDir> {
        QueueConfigBuilder {
            storage_dir: Some(dir.into()),
            headless: self.headless,
            connector_url: self.connector_url,
            watchdog_delay_secs: self.watchdog_delay_secs,
            save_timeout_secs: self.save_timeout_secs,
            health_timeout_secs: self.health_timeout_secs,
            chrome_data_dir: self.chrome_data_dir,
            _phantom: PhantomData,
        }
    }
}

// Build method only available when all required fields are set
impl QueueConfigBuilder<WithStorageDir> {
    pub fn build(self) -> Result<QueueConfig> {
        let storage_dir = self
            .storage_dir
            .ok_or_else(|| anyhow!("storage_dir is required"))?;
        let storage_dir = if storage_dir.is_absolute() {
            storage_dir
        } else {
            std::env::current_dir()?.join(storage_dir)
        };

        let connector = url::Url::parse(self.connector_url.trim())
            .map_err(|e| anyhow!("Invalid connector URL '{}': {e}", self.connector_url))?;
        if !matches!(connector.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Connector URL must use http or https: {}",
                self.connector_url
            ));
        }

        for (name, value) in [
            ("watchdog_delay_secs", self.watchdog_delay_secs),
            ("save_timeout_secs", self.save_timeout_secs),
            ("health_timeout_secs", self.health_timeout_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be greater than zero"));
            }
        }

        Ok(QueueConfig {
            storage_dir,
            headless: self.headless,
            connector_url: self.connector_url.trim().to_string(),
            watchdog_delay_secs: self.watchdog_delay_secs,
            save_timeout_secs: self.save_timeout_secs,
            health_timeout_secs: self.health_timeout_secs,
            chrome_data_dir: self.chrome_data_dir,
        })
    }
}

// Optional settings, available in any state
impl<State> QueueConfigBuilder<State> {
    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn connector_url(mut self, url: impl Into<String>) -> Self {
        self.connector_url = url.into();
        self
    }

    /// Set the watchdog period (and with it the tab-load timeout)
    ///
    /// # Example
    /// ```rust
    /// # use kodegen_tools_archive_queue::config::QueueConfig;
    /// # fn main() -> anyhow::Result<()> {
    /// let config = QueueConfig::builder()
    ///     .storage_dir("/var/lib/archive-queue")
    ///     .watchdog_delay_secs(90)
    ///     .build()?;
    /// assert_eq!(config.watchdog_delay_secs(), 90);
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn watchdog_delay_secs(mut self, secs: u64) -> Self {
        self.watchdog_delay_secs = secs;
        self
    }

    #[must_use]
    pub fn save_timeout_secs(mut self, secs: u64) -> Self {
        self.save_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn health_timeout_secs(mut self, secs: u64) -> Self {
        self.health_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn chrome_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chrome_data_dir = Some(dir.into());
        self
    }
}
