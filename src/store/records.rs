//! Typed access to the persisted queue records
//!
//! `QueueStore` is the only way the rest of the crate touches the state
//! store. Runtime and item reads and writes always go through
//! `queue::normalize`, so no component ever sees (or writes) a record that
//! violates the queue invariants. Nothing here caches: every call is a fresh
//! round-trip to the backing store.
//!
//! The backing store is only atomic per key, so every read-modify-write of
//! `queue_items` and `queue_runtime` goes through [`QueueStore::update_state`]
//! (or one of its narrower wrappers), which holds a lock shared by all clones
//! of the store for the whole load-mutate-save.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use super::{StateStore, StoreError};
use crate::provider::ProviderDiagnostics;
use crate::queue::normalize::{
    enforce_runtime_invariants, normalize_items, normalize_runtime, sanitize_items,
};
use crate::queue::types::{QueueItem, QueueRuntime, QueueSnapshot};
use crate::utils::{
    COLLECTOR_SETTINGS_KEY, DEFAULT_MAX_QUEUE_LINKS, PROVIDER_DIAGNOSTICS_KEY, QUEUE_ITEMS_KEY,
    QUEUE_RUNTIME_KEY, QUEUE_SETTINGS_KEY, QUEUE_WATCHDOG_KEY, now_millis,
};

/// Which save provider the orchestrator should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    #[default]
    ConnectorBridge,
    Disabled,
}

impl ProviderMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectorBridge => "connector_bridge",
            Self::Disabled => "disabled",
        }
    }
}

/// Queue options record (`queue_settings`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    pub provider_mode: ProviderMode,
    /// Overrides the configured watchdog period when set
    pub watchdog_delay_secs: Option<u64>,
}

/// Link collector options record (`collector_settings`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorSettings {
    pub same_origin_only: bool,
    /// Upper bound on queue length when authoring items from links
    pub max_links: u32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            same_origin_only: false,
            max_links: DEFAULT_MAX_QUEUE_LINKS,
        }
    }
}

/// Durable watchdog deadline (`queue_watchdog`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogRecord {
    pub deadline_at: i64,
    pub period_ms: i64,
}

/// Typed, normalizing facade over a [`StateStore`]
#[derive(Clone)]
pub struct QueueStore {
    inner: Arc<dyn StateStore>,
    state_lock: Arc<Mutex<()>>,
}

impl QueueStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            state_lock: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StateStore> {
        &self.inner
    }

    pub async fn load_runtime(&self) -> Result<QueueRuntime, StoreError> {
        let raw = self.inner.get(QUEUE_RUNTIME_KEY).await?;
        Ok(normalize_runtime(raw.as_ref(), now_millis()))
    }

    /// Normalize, stamp and persist. Returns the value actually written.
    pub async fn save_runtime(&self, runtime: QueueRuntime) -> Result<QueueRuntime, StoreError> {
        let _guard = self.state_lock.lock().await;
        self.write_runtime(runtime).await
    }

    pub async fn load_items(&self) -> Result<Vec<QueueItem>, StoreError> {
        let raw = self.inner.get(QUEUE_ITEMS_KEY).await?;
        Ok(normalize_items(raw.as_ref(), now_millis()))
    }

    /// Sanitize and persist. Returns the list actually written.
    pub async fn save_items(&self, items: Vec<QueueItem>) -> Result<Vec<QueueItem>, StoreError> {
        let _guard = self.state_lock.lock().await;
        self.write_items(items).await
    }

    /// Locked read-modify-write of runtime and items together.
    ///
    /// `mutate` sees freshly loaded records; whatever it changed is written
    /// back before the lock is released. Returning `Err` aborts without
    /// writing anything.
    pub async fn try_update_state<F, R, E>(&self, mutate: F) -> Result<R, E>
    where
        F: FnOnce(&mut QueueRuntime, &mut Vec<QueueItem>) -> Result<R, E>,
        E: From<StoreError>,
    {
        let _guard = self.state_lock.lock().await;
        let mut runtime = self.load_runtime().await?;
        let mut items = self.load_items().await?;
        let runtime_before = runtime.clone();
        let items_before = items.clone();

        let result = mutate(&mut runtime, &mut items)?;

        if items != items_before {
            self.write_items(items).await?;
        }
        if runtime != runtime_before {
            self.write_runtime(runtime).await?;
        }
        Ok(result)
    }

    pub async fn update_state<F, R>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut QueueRuntime, &mut Vec<QueueItem>) -> R,
    {
        self.try_update_state(|runtime, items| Ok(mutate(runtime, items)))
            .await
    }

    pub async fn update_runtime<F, R>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut QueueRuntime) -> R,
    {
        self.update_state(|runtime, _| mutate(runtime)).await
    }

    pub async fn update_items<F, R>(&self, mutate: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Vec<QueueItem>) -> R,
    {
        self.update_state(|_, items| mutate(items)).await
    }

    /// Read-modify-write of one item by id.
    ///
    /// Returns the updated item, or `None` when the item no longer exists.
    pub async fn update_item<F>(&self, item_id: &str, mutate: F) -> Result<Option<QueueItem>, StoreError>
    where
        F: FnOnce(&mut QueueItem),
    {
        self.update_items(|items| {
            let item = items.iter_mut().find(|item| item.id == item_id)?;
            mutate(item);
            Some(item.clone())
        })
        .await
    }

    async fn write_runtime(&self, runtime: QueueRuntime) -> Result<QueueRuntime, StoreError> {
        let mut runtime = enforce_runtime_invariants(runtime);
        runtime.updated_at = now_millis();
        self.inner
            .set(QUEUE_RUNTIME_KEY, serde_json::to_value(&runtime)?)
            .await?;
        Ok(runtime)
    }

    async fn write_items(&self, items: Vec<QueueItem>) -> Result<Vec<QueueItem>, StoreError> {
        let items = sanitize_items(items);
        self.inner
            .set(QUEUE_ITEMS_KEY, serde_json::to_value(&items)?)
            .await?;
        Ok(items)
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        Ok(QueueSnapshot {
            runtime: self.load_runtime().await?,
            items: self.load_items().await?,
        })
    }

    pub async fn load_diagnostics(&self) -> Result<ProviderDiagnostics, StoreError> {
        self.load_or_default(PROVIDER_DIAGNOSTICS_KEY).await
    }

    /// Diagnostics are always replaced wholesale, never merged.
    pub async fn save_diagnostics(&self, diagnostics: &ProviderDiagnostics) -> Result<(), StoreError> {
        self.inner
            .set(PROVIDER_DIAGNOSTICS_KEY, serde_json::to_value(diagnostics)?)
            .await
    }

    pub async fn load_queue_settings(&self) -> Result<QueueSettings, StoreError> {
        self.load_or_default(QUEUE_SETTINGS_KEY).await
    }

    pub async fn save_queue_settings(&self, settings: &QueueSettings) -> Result<(), StoreError> {
        self.inner
            .set(QUEUE_SETTINGS_KEY, serde_json::to_value(settings)?)
            .await
    }

    pub async fn load_collector_settings(&self) -> Result<CollectorSettings, StoreError> {
        self.load_or_default(COLLECTOR_SETTINGS_KEY).await
    }

    pub async fn save_collector_settings(&self, settings: &CollectorSettings) -> Result<(), StoreError> {
        self.inner
            .set(COLLECTOR_SETTINGS_KEY, serde_json::to_value(settings)?)
            .await
    }

    pub async fn load_watchdog(&self) -> Result<Option<WatchdogRecord>, StoreError> {
        let Some(raw) = self.inner.get(QUEUE_WATCHDOG_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding unreadable watchdog record: {e}");
                Ok(None)
            }
        }
    }

    pub async fn save_watchdog(&self, record: WatchdogRecord) -> Result<(), StoreError> {
        self.inner
            .set(QUEUE_WATCHDOG_KEY, serde_json::to_value(record)?)
            .await
    }

    pub async fn clear_watchdog(&self) -> Result<(), StoreError> {
        self.inner.remove(QUEUE_WATCHDOG_KEY).await
    }

    /// Option records fall back to defaults when missing or unreadable.
    async fn load_or_default<T>(&self, key: &str) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Default,
    {
        let Some(raw) = self.inner.get(key).await? else {
            return Ok(T::default());
        };
        Ok(decode_or_default(key, raw))
    }
}

fn decode_or_default<T: DeserializeOwned + Default>(key: &str, raw: Value) -> T {
    serde_json::from_value(raw).unwrap_or_else(|e| {
        warn!("Record {key} is unreadable, using defaults: {e}");
        T::default()
    })
}
