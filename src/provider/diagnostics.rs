//! Provider health snapshot (`provider_diagnostics`)
//!
//! Booleans are tri-state: `None` serializes as `null` and means "unknown".

use serde::{Deserialize, Serialize};

use super::HealthReport;
use crate::store::ProviderMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorBridgeDiagnostics {
    pub enabled: bool,
    pub healthy: Option<bool>,
    pub connector_available: Option<bool>,
    pub zotero_online: Option<bool>,
}

impl Default for ConnectorBridgeDiagnostics {
    fn default() -> Self {
        Self {
            enabled: true,
            healthy: None,
            connector_available: None,
            zotero_online: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderDiagnostics {
    pub active_mode: ProviderMode,
    pub connector_bridge: ConnectorBridgeDiagnostics,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

impl ProviderDiagnostics {
    /// Snapshot after a health check of the connector bridge
    #[must_use]
    pub fn from_health(report: &HealthReport, now: i64) -> Self {
        Self {
            active_mode: ProviderMode::ConnectorBridge,
            connector_bridge: ConnectorBridgeDiagnostics {
                enabled: true,
                healthy: Some(report.ok),
                connector_available: Some(report.connector_available),
                zotero_online: report.zotero_online,
            },
            last_error: (!report.ok).then(|| report.message.clone()),
            updated_at: now,
        }
    }

    /// Snapshot when no health check could run
    pub fn unavailable(mode: ProviderMode, reason: impl Into<String>, now: i64) -> Self {
        Self {
            active_mode: mode,
            connector_bridge: ConnectorBridgeDiagnostics {
                enabled: mode == ProviderMode::ConnectorBridge,
                ..ConnectorBridgeDiagnostics::default()
            },
            last_error: Some(reason.into()),
            updated_at: now,
        }
    }
}
