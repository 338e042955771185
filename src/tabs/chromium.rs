//! Tab controller backed by a chromiumoxide browser
//!
//! CDP targets are identified by opaque string ids; the queue wants small
//! integers it can persist, so the controller hands out its own monotonically
//! increasing ids and keeps both directions of the mapping.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chromiumoxide::page::Page;
use chromiumoxide_cdp::cdp::browser_protocol::target::{
    CreateTargetParams, EventTargetDestroyed, TargetId,
};
use dashmap::DashMap;
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::browser::BrowserSession;
use super::{OpenedTab, TabController, TabError, TabEvent, TabId, TabStatus};

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct TabRegistry {
    pages: DashMap<TabId, Page>,
    targets: DashMap<TargetId, TabId>,
    next_id: AtomicI64,
    events: broadcast::Sender<TabEvent>,
}

impl TabRegistry {
    fn register(&self, page: Page) -> TabId {
        let tab_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.targets.insert(page.target_id().clone(), tab_id);
        self.pages.insert(tab_id, page);
        tab_id
    }

    fn forget(&self, tab_id: TabId) -> Option<Page> {
        let (_, page) = self.pages.remove(&tab_id)?;
        self.targets.remove(page.target_id());
        Some(page)
    }

    fn publish(&self, event: TabEvent) {
        // No subscribers is fine; the watchdog still bounds every wait.
        let _ = self.events.send(event);
    }
}

pub struct ChromiumTabController {
    session: BrowserSession,
    registry: Arc<TabRegistry>,
    destroyed_listener: JoinHandle<()>,
}

impl ChromiumTabController {
    /// Wrap a launched browser and start listening for target removal.
    pub async fn new(session: BrowserSession) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(TabRegistry {
            pages: DashMap::new(),
            targets: DashMap::new(),
            next_id: AtomicI64::new(1),
            events,
        });

        let mut destroyed = session
            .browser()
            .event_listener::<EventTargetDestroyed>()
            .await?;
        let listener_registry = Arc::clone(&registry);
        let destroyed_listener = tokio::spawn(async move {
            while let Some(event) = destroyed.next().await {
                let Some((_, tab_id)) = listener_registry.targets.remove(&event.target_id) else {
                    continue;
                };
                listener_registry.pages.remove(&tab_id);
                debug!("Tab {tab_id} was destroyed by the host");
                listener_registry.publish(TabEvent::Removed { tab_id });
            }
        });

        Ok(Self {
            session,
            registry,
            destroyed_listener,
        })
    }

    /// Close every tracked tab, e.g. on shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<TabId> = self.registry.pages.iter().map(|entry| *entry.key()).collect();
        for tab_id in ids {
            if let Err(e) = self.close(tab_id).await {
                warn!("{e}");
            }
        }
        info!(
            "Closed archive tabs in profile {}",
            self.session.user_data_dir().display()
        );
    }

    fn page(&self, tab_id: TabId) -> Option<Page> {
        self.registry.pages.get(&tab_id).map(|entry| entry.value().clone())
    }
}

impl Drop for ChromiumTabController {
    fn drop(&mut self) {
        self.destroyed_listener.abort();
    }
}

impl TabController for ChromiumTabController {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<OpenedTab, TabError>> {
        Box::pin(async move {
            let params = CreateTargetParams::builder()
                .url(url)
                .background(true)
                .build()
                .map_err(TabError::Open)?;
            let page = self
                .session
                .browser()
                .new_page(params)
                .await
                .map_err(|e| TabError::Open(e.to_string()))?;
            let tab_id = self.registry.register(page.clone());
            debug!("Opened tab {tab_id} for {url}");

            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                let load_complete = page.wait_for_navigation().await.is_ok();
                if registry.pages.contains_key(&tab_id) {
                    registry.publish(TabEvent::Updated {
                        tab_id,
                        load_complete,
                    });
                }
            });

            Ok(OpenedTab { id: Some(tab_id) })
        })
    }

    fn status(&self, tab_id: TabId) -> BoxFuture<'_, Result<TabStatus, TabError>> {
        Box::pin(async move {
            let Some(page) = self.page(tab_id) else {
                return Ok(TabStatus::Missing);
            };
            let result = match page.evaluate("document.readyState").await {
                Ok(result) => result,
                Err(e) => {
                    debug!("readyState query failed for tab {tab_id}: {e}");
                    return Ok(TabStatus::Missing);
                }
            };
            match result.into_value::<String>() {
                Ok(state) if state == "complete" => Ok(TabStatus::Complete),
                Ok(_) => Ok(TabStatus::Loading),
                Err(e) => Err(TabError::Query {
                    tab_id,
                    message: e.to_string(),
                }),
            }
        })
    }

    fn close(&self, tab_id: TabId) -> BoxFuture<'_, Result<(), TabError>> {
        Box::pin(async move {
            let Some(page) = self.registry.forget(tab_id) else {
                return Ok(());
            };
            page.close().await.map_err(|e| TabError::Close {
                tab_id,
                message: e.to_string(),
            })
        })
    }

    fn capture_html(&self, tab_id: TabId) -> BoxFuture<'_, Result<Option<String>, TabError>> {
        Box::pin(async move {
            let Some(page) = self.page(tab_id) else {
                return Ok(None);
            };
            page.content()
                .await
                .map(Some)
                .map_err(|e| TabError::Capture {
                    tab_id,
                    message: e.to_string(),
                })
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.registry.events.subscribe()
    }
}
