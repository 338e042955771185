//! Provider that talks to the local Zotero connector HTTP server
//!
//! The connector listens on `127.0.0.1:23119` while Zotero desktop is running.
//! `POST /connector/ping` answers when it is up, and
//! `POST /connector/saveSnapshot` stores a page given its URL, title and HTML.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{HealthReport, ProviderError, SaveOutcome, SaveProvider, SaveRequest};
use crate::queue::types::TabId;
use crate::tabs::TabController;
use crate::utils::CONNECTOR_API_VERSION;

const API_VERSION_HEADER: &str = "X-Zotero-Connector-API-Version";
const PING_PATH: &str = "connector/ping";
const SAVE_SNAPSHOT_PATH: &str = "connector/saveSnapshot";
const ERROR_BODY_EXCERPT_CHARS: usize = 200;

pub struct ConnectorBridgeProvider {
    client: Client,
    base_url: Url,
    save_timeout_secs: u64,
    health_timeout_secs: u64,
    tabs: Option<Arc<dyn TabController>>,
}

impl ConnectorBridgeProvider {
    pub fn new(
        base_url: &str,
        save_timeout_secs: u64,
        health_timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalized).map_err(|e| ProviderError::InvalidUrl(format!("{base_url}: {e}")))?;
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            save_timeout_secs,
            health_timeout_secs,
            tabs: None,
        })
    }

    /// Capture page HTML from `tabs` and send it along with every save.
    #[must_use]
    pub fn with_tabs(mut self, tabs: Arc<dyn TabController>) -> Self {
        self.tabs = Some(tabs);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidUrl(e.to_string()))
    }

    async fn snapshot_html(&self, tab_id: TabId) -> Option<String> {
        let tabs = self.tabs.as_ref()?;
        match tabs.capture_html(tab_id).await {
            Ok(html) => html,
            Err(e) => {
                log::warn!("Saving without HTML snapshot: {e}");
                None
            }
        }
    }

    async fn ping(&self) -> Result<reqwest::StatusCode, ProviderError> {
        let url = self.endpoint(PING_PATH)?;
        let response = with_timeout(
            async {
                self.client
                    .post(url)
                    .header(API_VERSION_HEADER, CONNECTOR_API_VERSION)
                    .json(&json!({}))
                    .send()
                    .await
                    .map_err(|e| ProviderError::Request(e.to_string()))
            },
            self.health_timeout_secs,
            "Connector health check",
        )
        .await?;
        Ok(response.status())
    }
}

impl SaveProvider for ConnectorBridgeProvider {
    fn check_health(&self, tab_id: Option<TabId>) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            debug!("Checking connector health (tab: {tab_id:?})");
            match self.ping().await {
                Ok(status) if status.is_success() => HealthReport {
                    ok: true,
                    message: "Connector is ready.".to_string(),
                    bridge_ready: true,
                    connector_available: true,
                    zotero_online: Some(true),
                },
                Ok(status) => HealthReport {
                    ok: false,
                    message: format!("Connector responded with HTTP {status}."),
                    bridge_ready: false,
                    connector_available: true,
                    zotero_online: Some(false),
                },
                Err(e) => HealthReport {
                    ok: false,
                    message: format!("Connector is unreachable: {e}"),
                    bridge_ready: false,
                    connector_available: false,
                    zotero_online: None,
                },
            }
        })
    }

    fn save_web_page_with_snapshot(
        &self,
        request: SaveRequest,
    ) -> BoxFuture<'_, Result<SaveOutcome, ProviderError>> {
        Box::pin(async move {
            let url = self.endpoint(SAVE_SNAPSHOT_PATH)?;
            let html = self.snapshot_html(request.tab_id).await;
            let body = json!({
                "url": request.url,
                "title": request.title,
                "html": html,
            });

            with_timeout(
                async {
                    let response = self
                        .client
                        .post(url)
                        .header(API_VERSION_HEADER, CONNECTOR_API_VERSION)
                        .json(&body)
                        .send()
                        .await
                        .map_err(|e| ProviderError::Request(e.to_string()))?;

                    let status = response.status();
                    if status.is_success() {
                        return Ok(SaveOutcome::success());
                    }
                    let text = response.text().await.unwrap_or_default();
                    Ok(SaveOutcome::failed(failure_message(status, &text)))
                },
                self.save_timeout_secs,
                "Snapshot save",
            )
            .await
        })
    }
}

fn failure_message(status: reqwest::StatusCode, body: &str) -> String {
    let excerpt: String = body.trim().chars().take(ERROR_BODY_EXCERPT_CHARS).collect();
    if excerpt.is_empty() {
        format!("Connector save failed with HTTP {status}.")
    } else {
        format!("Connector save failed with HTTP {status}: {excerpt}")
    }
}

/// Bound a connector call, reporting which operation ran out of time.
async fn with_timeout<F, T>(
    operation: F,
    timeout_secs: u64,
    operation_name: &'static str,
) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), operation).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            operation: operation_name,
            secs: timeout_secs,
        }),
    }
}
