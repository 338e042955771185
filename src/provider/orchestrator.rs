//! Provider resolution and save wrapping
//!
//! Every resolution rewrites `provider_diagnostics` wholesale, whether or not
//! a provider ends up usable. Save attempts never raise: provider errors and
//! panics become `SaveOutcome { ok: false, .. }`. There is no automatic retry;
//! a failed item waits for an explicit retry command.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{info, warn};

use super::{ProviderDiagnostics, SaveOutcome, SaveProvider, SaveRequest};
use crate::queue::types::{QueueItem, TabId};
use crate::store::{ProviderMode, QueueStore};
use crate::utils::{PROVIDER_DISABLED_MESSAGE, PROVIDER_MISSING_MESSAGE, now_millis};

/// Outcome of picking a provider for one save
pub struct ResolvedProvider {
    pub provider: Option<Arc<dyn SaveProvider>>,
    pub diagnostics: ProviderDiagnostics,
    pub unavailable_reason: Option<String>,
}

#[derive(Clone)]
pub struct ProviderOrchestrator {
    store: QueueStore,
    connector_bridge: Option<Arc<dyn SaveProvider>>,
}

impl ProviderOrchestrator {
    pub fn new(store: QueueStore, connector_bridge: Option<Arc<dyn SaveProvider>>) -> Self {
        Self {
            store,
            connector_bridge,
        }
    }

    /// Health-check the configured provider and persist diagnostics.
    pub async fn resolve_save_provider(&self, tab_id: Option<TabId>) -> ResolvedProvider {
        let mode = match self.store.load_queue_settings().await {
            Ok(settings) => settings.provider_mode,
            Err(e) => {
                warn!("Could not read queue settings, assuming connector bridge: {e}");
                ProviderMode::ConnectorBridge
            }
        };

        let resolved = match (mode, &self.connector_bridge) {
            (ProviderMode::Disabled, _) => unavailable(mode, PROVIDER_DISABLED_MESSAGE),
            (ProviderMode::ConnectorBridge, None) => unavailable(mode, PROVIDER_MISSING_MESSAGE),
            (ProviderMode::ConnectorBridge, Some(bridge)) => {
                let report = bridge.check_health(tab_id).await;
                let diagnostics = ProviderDiagnostics::from_health(&report, now_millis());
                if report.ok {
                    ResolvedProvider {
                        provider: Some(Arc::clone(bridge)),
                        diagnostics,
                        unavailable_reason: None,
                    }
                } else {
                    ResolvedProvider {
                        provider: None,
                        diagnostics,
                        unavailable_reason: Some(report.message),
                    }
                }
            }
        };

        self.persist(&resolved.diagnostics).await;
        resolved
    }

    /// Resolve a provider and save `item` from `tab_id`. Never fails.
    pub async fn save_queue_item_with_provider(&self, item: &QueueItem, tab_id: TabId) -> SaveOutcome {
        let resolved = self.resolve_save_provider(Some(tab_id)).await;
        let Some(provider) = resolved.provider else {
            let reason = resolved
                .unavailable_reason
                .unwrap_or_else(|| PROVIDER_MISSING_MESSAGE.to_string());
            info!("Save provider unavailable for {}: {reason}", item.url);
            return SaveOutcome::failed(reason);
        };

        let request = SaveRequest {
            tab_id,
            url: item.url.clone(),
            title: item.title.clone(),
        };
        let outcome = match AssertUnwindSafe(provider.save_web_page_with_snapshot(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => SaveOutcome::failed(e.to_string()),
            Err(_) => SaveOutcome::failed("Save provider panicked."),
        };

        let mut diagnostics = resolved.diagnostics;
        diagnostics.last_error = if outcome.ok {
            None
        } else {
            outcome.error.clone()
        };
        diagnostics.updated_at = now_millis();
        self.persist(&diagnostics).await;

        outcome
    }

    async fn persist(&self, diagnostics: &ProviderDiagnostics) {
        if let Err(e) = self.store.save_diagnostics(diagnostics).await {
            warn!("Failed to persist provider diagnostics: {e}");
        }
    }
}

fn unavailable(mode: ProviderMode, reason: &str) -> ResolvedProvider {
    ResolvedProvider {
        provider: None,
        diagnostics: ProviderDiagnostics::unavailable(mode, reason, now_millis()),
        unavailable_reason: Some(reason.to_string()),
    }
}
