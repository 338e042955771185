//! Test doubles and a wired-up engine for the archive queue test suite
//!
//! `FakeTabs` and `FakeProvider` are scripted in-memory stand-ins for the
//! browser and the connector. Both can be told to hold their next call open
//! so tests can interleave commands with an in-flight open or save.
//! `DelayedStateStore` makes every store call yield, so a command and an
//! engine run really do overlap.

#![allow(dead_code)]

use futures::future::BoxFuture;
use kodegen_tools_archive_queue::config::QueueConfig;
use kodegen_tools_archive_queue::store::{StateStore, StoreError};
use kodegen_tools_archive_queue::provider::{
    HealthReport, ProviderError, SaveOutcome, SaveProvider, SaveRequest,
};
use kodegen_tools_archive_queue::tabs::{OpenedTab, TabError};
use kodegen_tools_archive_queue::{
    MemoryStateStore, ProviderOrchestrator, QueueEngine, QueueItem, QueueItemStatus,
    QueueLifecycle, QueueRuntime, QueueStore, RuntimeStatus, TabController, TabEvent, TabId,
    TabStatus,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, broadcast};

/// A call that can be held open until the test releases it
#[derive(Default)]
pub struct Gate {
    held: Mutex<Option<Arc<Semaphore>>>,
    started: Notify,
}

impl Gate {
    pub fn hold(&self) {
        *self.held.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let one held call through and stop holding later ones.
    pub fn release(&self) {
        if let Some(semaphore) = self.held.lock().take() {
            semaphore.add_permits(1);
        }
    }

    /// Resolve once a call reached the gate.
    pub async fn started(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.started.notified())
            .await
            .expect("gated call never started");
    }

    async fn pass(&self) {
        self.started.notify_one();
        let held = self.held.lock().clone();
        if let Some(semaphore) = held {
            let permit = semaphore.acquire().await.expect("gate closed");
            permit.forget();
        }
    }
}

pub enum OpenBehavior {
    Open,
    NoId,
    Fail(String),
}

/// Scripted tab controller
pub struct FakeTabs {
    next_id: AtomicI64,
    statuses: Mutex<HashMap<TabId, TabStatus>>,
    initial_status: Mutex<TabStatus>,
    open_behavior: Mutex<OpenBehavior>,
    opened: Mutex<Vec<(TabId, String)>>,
    closed: Mutex<Vec<TabId>>,
    events: broadcast::Sender<TabEvent>,
    pub open_gate: Gate,
}

impl FakeTabs {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            next_id: AtomicI64::new(100),
            statuses: Mutex::new(HashMap::new()),
            initial_status: Mutex::new(TabStatus::Complete),
            open_behavior: Mutex::new(OpenBehavior::Open),
            opened: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            events,
            open_gate: Gate::default(),
        }
    }

    /// Status newly opened tabs report
    pub fn set_initial_status(&self, status: TabStatus) {
        *self.initial_status.lock() = status;
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        *self.open_behavior.lock() = behavior;
    }

    /// Make `tab_id` exist with `status`, as if opened before a restart.
    pub fn set_status(&self, tab_id: TabId, status: TabStatus) {
        self.statuses.lock().insert(tab_id, status);
    }

    /// Close a tab behind the engine's back.
    pub fn remove_externally(&self, tab_id: TabId) {
        self.statuses.lock().remove(&tab_id);
    }

    pub fn emit(&self, event: TabEvent) {
        let _ = self.events.send(event);
    }

    pub fn opened(&self) -> Vec<(TabId, String)> {
        self.opened.lock().clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened.lock().iter().map(|(_, url)| url.clone()).collect()
    }

    pub fn closed(&self) -> Vec<TabId> {
        self.closed.lock().clone()
    }

    pub fn last_opened_id(&self) -> Option<TabId> {
        self.opened.lock().last().map(|(id, _)| *id)
    }
}

impl TabController for FakeTabs {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<OpenedTab, TabError>> {
        Box::pin(async move {
            self.open_gate.pass().await;
            match &*self.open_behavior.lock() {
                OpenBehavior::Open => {}
                OpenBehavior::NoId => return Ok(OpenedTab { id: None }),
                OpenBehavior::Fail(message) => return Err(TabError::Open(message.clone())),
            }
            let tab_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let status = *self.initial_status.lock();
            self.statuses.lock().insert(tab_id, status);
            self.opened.lock().push((tab_id, url.to_string()));
            Ok(OpenedTab { id: Some(tab_id) })
        })
    }

    fn status(&self, tab_id: TabId) -> BoxFuture<'_, Result<TabStatus, TabError>> {
        Box::pin(async move {
            Ok(self
                .statuses
                .lock()
                .get(&tab_id)
                .copied()
                .unwrap_or(TabStatus::Missing))
        })
    }

    fn close(&self, tab_id: TabId) -> BoxFuture<'_, Result<(), TabError>> {
        Box::pin(async move {
            self.closed.lock().push(tab_id);
            match self.statuses.lock().remove(&tab_id) {
                Some(_) => Ok(()),
                None => Err(TabError::Close {
                    tab_id,
                    message: "No tab with given id".to_string(),
                }),
            }
        })
    }

    fn capture_html(&self, tab_id: TabId) -> BoxFuture<'_, Result<Option<String>, TabError>> {
        Box::pin(async move { Ok(Some(format!("<html><body>tab {tab_id}</body></html>"))) })
    }

    fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }
}

/// Memory store that sleeps before every call
pub struct DelayedStateStore {
    inner: Arc<MemoryStateStore>,
    delay: Duration,
}

impl DelayedStateStore {
    pub fn new(inner: Arc<MemoryStateStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl StateStore for DelayedStateStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>, StoreError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.remove(key).await
        })
    }
}

pub enum SaveScript {
    Outcome(SaveOutcome),
    Error(String),
    Panic,
}

/// Scripted save provider. Saves succeed unless scripted otherwise.
pub struct FakeProvider {
    health: Mutex<HealthReport>,
    script: Mutex<VecDeque<SaveScript>>,
    requests: Mutex<Vec<SaveRequest>>,
    health_checks: Mutex<Vec<Option<TabId>>>,
    pub save_gate: Gate,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            health: Mutex::new(healthy_report()),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            health_checks: Mutex::new(Vec::new()),
            save_gate: Gate::default(),
        }
    }

    pub fn set_health(&self, report: HealthReport) {
        *self.health.lock() = report;
    }

    pub fn push(&self, script: SaveScript) {
        self.script.lock().push_back(script);
    }

    pub fn requests(&self) -> Vec<SaveRequest> {
        self.requests.lock().clone()
    }

    pub fn health_checks(&self) -> Vec<Option<TabId>> {
        self.health_checks.lock().clone()
    }
}

impl SaveProvider for FakeProvider {
    fn check_health(&self, tab_id: Option<TabId>) -> BoxFuture<'_, HealthReport> {
        Box::pin(async move {
            self.health_checks.lock().push(tab_id);
            self.health.lock().clone()
        })
    }

    fn save_web_page_with_snapshot(
        &self,
        request: SaveRequest,
    ) -> BoxFuture<'_, Result<SaveOutcome, ProviderError>> {
        Box::pin(async move {
            self.requests.lock().push(request);
            self.save_gate.pass().await;
            let next = self.script.lock().pop_front();
            match next {
                None => Ok(SaveOutcome::success()),
                Some(SaveScript::Outcome(outcome)) => Ok(outcome),
                Some(SaveScript::Error(message)) => Err(ProviderError::Request(message)),
                Some(SaveScript::Panic) => panic!("scripted provider panic"),
            }
        })
    }
}

pub fn healthy_report() -> HealthReport {
    HealthReport {
        ok: true,
        message: "Connector is ready.".to_string(),
        bridge_ready: true,
        connector_available: true,
        zotero_online: Some(true),
    }
}

pub fn offline_report() -> HealthReport {
    HealthReport {
        ok: false,
        message: "Zotero is not running.".to_string(),
        bridge_ready: false,
        connector_available: true,
        zotero_online: Some(false),
    }
}

/// Engine wired to in-memory fakes
pub struct Harness {
    pub backend: Arc<MemoryStateStore>,
    pub store: QueueStore,
    pub tabs: Arc<FakeTabs>,
    pub provider: Arc<FakeProvider>,
    pub engine: Arc<QueueEngine>,
    pub lifecycle: QueueLifecycle,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryStateStore::new()))
    }

    /// A fresh engine over existing state, as after a process restart.
    pub fn with_backend(backend: Arc<MemoryStateStore>) -> Self {
        Self::with_state(backend.clone(), backend)
    }

    /// Every store call sleeps for `delay` first.
    pub fn with_store_delay(delay: Duration) -> Self {
        let backend = Arc::new(MemoryStateStore::new());
        let delayed: Arc<dyn StateStore> = Arc::new(DelayedStateStore::new(backend.clone(), delay));
        Self::with_state(backend, delayed)
    }

    fn with_state(backend: Arc<MemoryStateStore>, state: Arc<dyn StateStore>) -> Self {
        let store = QueueStore::new(state);
        let tabs = Arc::new(FakeTabs::new());
        let provider = Arc::new(FakeProvider::new());
        let bridge: Arc<dyn SaveProvider> = provider.clone();
        let orchestrator = ProviderOrchestrator::new(store.clone(), Some(bridge));
        let tab_controller: Arc<dyn TabController> = tabs.clone();
        let engine = QueueEngine::start(store.clone(), tab_controller, orchestrator, &test_config());
        let lifecycle = QueueLifecycle::new(engine.clone());
        Self {
            backend,
            store,
            tabs,
            provider,
            engine,
            lifecycle,
        }
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.engine.wait_idle())
            .await
            .expect("engine did not settle");
    }

    pub async fn items(&self) -> Vec<QueueItem> {
        self.store.load_items().await.expect("load items")
    }

    pub async fn item(&self, id: &str) -> QueueItem {
        self.items()
            .await
            .into_iter()
            .find(|item| item.id == id)
            .expect("item exists")
    }

    pub async fn runtime(&self) -> QueueRuntime {
        self.store.load_runtime().await.expect("load runtime")
    }

    /// Append pending items for `urls` and return their ids in order.
    pub async fn seed_pending(&self, urls: &[&str]) -> Vec<String> {
        let mut items = self.items().await;
        let mut ids = Vec::new();
        for (offset, url) in urls.iter().enumerate() {
            let item = QueueItem::new(*url, format!("Page {offset}"), 1_700_000_000_000);
            ids.push(item.id.clone());
            items.push(item);
        }
        self.store.save_items(items).await.expect("save items");
        ids
    }

    /// Persist one item as in flight on `tab_id` with a running queue.
    pub async fn seed_active(&self, url: &str, status: QueueItemStatus, tab_id: TabId) -> String {
        let mut item = QueueItem::new(url, "Active page", 1_700_000_000_000);
        item.status = status;
        item.attempts = 1;
        let id = item.id.clone();
        self.store.save_items(vec![item]).await.expect("save items");

        let mut runtime = QueueRuntime {
            status: RuntimeStatus::Running,
            ..QueueRuntime::default()
        };
        runtime.set_active_context(id.clone(), tab_id);
        self.store.save_runtime(runtime).await.expect("save runtime");
        id
    }

    pub async fn set_runtime_status(&self, status: RuntimeStatus) {
        let mut runtime = self.runtime().await;
        runtime.status = status;
        self.store.save_runtime(runtime).await.expect("save runtime");
    }

    /// Poll until `check` holds or five seconds pass.
    pub async fn eventually<F>(&self, mut check: F)
    where
        F: FnMut(&[QueueItem], &QueueRuntime) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let items = self.items().await;
            let runtime = self.runtime().await;
            if check(&items, &runtime) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached; runtime: {runtime:?}, items: {items:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn test_config() -> QueueConfig {
    QueueConfig::builder()
        .storage_dir(std::env::temp_dir().join("archive-queue-tests"))
        .build()
        .expect("valid test config")
}

/// Raw runtime JSON as the UI layer might have written it
pub fn raw_runtime(status: &str) -> serde_json::Value {
    json!({
        "status": status,
        "activeQueueItemId": null,
        "activeTabId": null,
        "controllerWindowId": null,
        "nextRunAt": null,
        "updatedAt": 1_700_000_000_000_i64,
    })
}
