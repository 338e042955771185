// Archive queue daemon
//
// Reads one JSON command per line on stdin and writes one JSON response per
// line on stdout. Logs go to stderr; filter them with RUST_LOG.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kodegen_tools_archive_queue::provider::SaveProvider;
use kodegen_tools_archive_queue::tabs::launch_browser;
use kodegen_tools_archive_queue::{
    ChromiumTabController, ConnectorBridgeProvider, ProviderOrchestrator, QueueConfig,
    QueueEngine, QueueLifecycle, QueueStore, SqliteStateStore, TabController, handle_request,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = QueueConfig::from_env()?;
    info!("Archive queue state in {}", config.storage_dir().display());

    let sqlite = Arc::new(SqliteStateStore::open(config.storage_dir()).await?);
    let store = QueueStore::new(sqlite.clone());

    let session = launch_browser(config.headless(), config.chrome_data_dir()).await?;
    let tabs = Arc::new(ChromiumTabController::new(session).await?);
    let tab_controller: Arc<dyn TabController> = tabs.clone();

    let bridge: Arc<dyn SaveProvider> = Arc::new(
        ConnectorBridgeProvider::new(
            config.connector_url(),
            config.save_timeout_secs(),
            config.health_timeout_secs(),
        )?
        .with_tabs(tab_controller.clone()),
    );
    let orchestrator = ProviderOrchestrator::new(store.clone(), Some(bridge));

    let engine = QueueEngine::start(store, tab_controller, orchestrator, &config);
    let pump = engine.spawn_tab_event_pump();
    engine
        .recover_queue_engine_state()
        .await
        .context("Failed to recover queue state")?;
    let lifecycle = QueueLifecycle::new(engine.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read command")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            info!("Command input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_request(&lifecycle, &line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await?;
        stdout.flush().await?;
    }

    // Runtime state stays as-is so a running queue resumes on next start.
    engine.wait_idle().await;
    pump.abort();
    tabs.close_all().await;
    sqlite.close().await;
    if let Some(e) = pump.await.err().filter(|e| !e.is_cancelled()) {
        warn!("Tab event pump ended abnormally: {e}");
    }
    info!("Archive queue stopped");
    Ok(())
}
