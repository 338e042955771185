//! Environment overrides for the daemon
//!
//! `ARCHIVE_QUEUE_DIR`, `ARCHIVE_QUEUE_CONNECTOR_URL` and
//! `ARCHIVE_QUEUE_HEADLESS` map onto the builder. `CHROMIUM_PATH` is read
//! later, during browser discovery.

use anyhow::{Context, Result};
use std::path::PathBuf;

use super::types::QueueConfig;

pub const STORAGE_DIR_VAR: &str = "ARCHIVE_QUEUE_DIR";
pub const CONNECTOR_URL_VAR: &str = "ARCHIVE_QUEUE_CONNECTOR_URL";
pub const HEADLESS_VAR: &str = "ARCHIVE_QUEUE_HEADLESS";

impl QueueConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let storage_dir = match lookup(STORAGE_DIR_VAR).filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir.trim()),
            None => default_storage_dir()?,
        };

        let mut builder = QueueConfig::builder().storage_dir(storage_dir);
        if let Some(url) = lookup(CONNECTOR_URL_VAR).filter(|v| !v.trim().is_empty()) {
            builder = builder.connector_url(url);
        }
        if let Some(raw) = lookup(HEADLESS_VAR) {
            builder = builder.headless(parse_flag(&raw).with_context(|| {
                format!("{HEADLESS_VAR} must be true/false, got '{raw}'")
            })?);
        }
        builder.build()
    }
}

fn default_storage_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("kodegen-archive-queue"))
        .context("Could not determine a local data directory; set ARCHIVE_QUEUE_DIR")
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
