//! Save providers
//!
//! A provider takes a loaded tab and persists a snapshot of it somewhere
//! outside this process. The queue never talks to a provider directly; it
//! goes through [`ProviderOrchestrator`], which health-checks the provider,
//! records diagnostics and turns every failure into a plain [`SaveOutcome`].

pub mod connector;
pub mod diagnostics;
pub mod orchestrator;

pub use connector::ConnectorBridgeProvider;
pub use diagnostics::{ConnectorBridgeDiagnostics, ProviderDiagnostics};
pub use orchestrator::{ProviderOrchestrator, ResolvedProvider};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::queue::types::TabId;

/// Result of a provider health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub ok: bool,
    pub message: String,
    pub bridge_ready: bool,
    pub connector_available: bool,
    /// `None` when the connector could not be asked
    pub zotero_online: Option<bool>,
}

/// One save call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub tab_id: TabId,
    pub url: String,
    pub title: String,
}

/// What a save call reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SaveOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
        }
    }
}

/// Failures a provider raises instead of reporting `ok: false`
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Connector request failed: {0}")]
    Request(String),

    #[error("{operation} timed out after {secs} seconds")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Invalid connector URL: {0}")]
    InvalidUrl(String),
}

/// External page-save operation
pub trait SaveProvider: Send + Sync {
    /// Check readiness. Never fails; problems are reported in the report.
    fn check_health(&self, tab_id: Option<TabId>) -> BoxFuture<'_, HealthReport>;

    fn save_web_page_with_snapshot(
        &self,
        request: SaveRequest,
    ) -> BoxFuture<'_, Result<SaveOutcome, ProviderError>>;
}
