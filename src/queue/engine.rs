//! Queue engine
//!
//! Drives one queue item at a time through
//! `pending -> opening_tab -> saving_snapshot -> archived | failed`.
//!
//! A run never trusts anything it read before an await: runtime and items are
//! re-read from the store at every decision point, because lifecycle commands
//! and tab events write the same records concurrently. Runs themselves are
//! serialized by [`EngineScheduler`], so at most one run body is in flight and
//! at most one item is ever active.
//!
//! External failures (tab open/query, provider save) end up as an item-level
//! `failed` status with a readable `lastError`; the run then re-triggers
//! itself so the queue keeps moving. Only store failures escape a run, and the
//! scheduler logs those.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scheduler::{EngineScheduler, RunTicket};
use super::types::{QueueItem, QueueItemStatus, QueueTrigger, RuntimeStatus, TabId};
use super::watchdog::QueueWatchdog;
use crate::config::QueueConfig;
use crate::provider::ProviderOrchestrator;
use crate::store::{QueueStore, StoreError};
use crate::tabs::{OpenedTab, TabController, TabEvent, TabStatus};
use crate::utils::{
    DEFAULT_SAVE_FAILURE_MESSAGE, LOST_TAB_CONTEXT_MESSAGE, NO_TAB_ID_MESSAGE,
    STOPPED_BY_USER_MESSAGE, TAB_CLOSED_MESSAGE, TAB_LOAD_TIMEOUT_MESSAGE, now_millis,
};

pub struct QueueEngine {
    store: QueueStore,
    tabs: Arc<dyn TabController>,
    orchestrator: ProviderOrchestrator,
    scheduler: EngineScheduler,
    watchdog: QueueWatchdog,
    watchdog_delay: Duration,
}

impl QueueEngine {
    /// Build the engine and spawn its worker.
    ///
    /// Must be called inside a tokio runtime. Nothing runs until a trigger
    /// arrives; call [`recover_queue_engine_state`](Self::recover_queue_engine_state)
    /// once at startup.
    pub fn start(
        store: QueueStore,
        tabs: Arc<dyn TabController>,
        orchestrator: ProviderOrchestrator,
        config: &QueueConfig,
    ) -> Arc<Self> {
        let watchdog_delay = config.watchdog_delay();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let runner = weak.clone();
            let scheduler = EngineScheduler::spawn(move |trigger| {
                let engine = runner.upgrade();
                async move {
                    match engine {
                        Some(engine) => engine.run_queue_engine(trigger).await,
                        None => Ok(()),
                    }
                }
            });

            let alarm = weak.clone();
            let watchdog = QueueWatchdog::new(store.clone(), move || {
                if let Some(engine) = alarm.upgrade() {
                    engine.handle_queue_alarm();
                }
            });

            Self {
                store,
                tabs,
                orchestrator,
                scheduler,
                watchdog,
                watchdog_delay,
            }
        })
    }

    #[must_use]
    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    #[must_use]
    pub fn orchestrator(&self) -> &ProviderOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn watchdog(&self) -> &QueueWatchdog {
        &self.watchdog
    }

    /// Queue a run behind every run already scheduled.
    pub fn run_queue_engine_soon(&self, trigger: QueueTrigger) -> RunTicket {
        self.scheduler.schedule(trigger)
    }

    /// Resolve once no run is queued or executing.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Watchdog callback: let the worker decide what the alarm means.
    pub fn handle_queue_alarm(&self) -> RunTicket {
        debug!(target: "archive_queue::engine", "Watchdog alarm fired");
        self.run_queue_engine_soon(QueueTrigger::Alarm)
    }

    /// React to a load-complete notification for the active tab only.
    pub async fn handle_queue_tab_updated(
        &self,
        tab_id: TabId,
        load_complete: bool,
    ) -> Result<Option<RunTicket>, StoreError> {
        if !load_complete {
            return Ok(None);
        }
        let runtime = self.store.load_runtime().await?;
        if runtime.status != RuntimeStatus::Running || runtime.active_tab_id != Some(tab_id) {
            return Ok(None);
        }
        Ok(Some(self.run_queue_engine_soon(QueueTrigger::TabUpdated)))
    }

    /// Hand the removal of the active tab to the worker.
    ///
    /// The item is failed inside the run, against the runtime as it is then,
    /// so a pause or a newer context written meanwhile is never overwritten.
    pub async fn handle_queue_tab_removed(
        &self,
        tab_id: TabId,
    ) -> Result<Option<RunTicket>, StoreError> {
        let runtime = self.store.load_runtime().await?;
        if runtime.active_tab_id != Some(tab_id) {
            return Ok(None);
        }
        info!(target: "archive_queue::engine", "Active tab {tab_id} was closed externally");
        Ok(Some(self.run_queue_engine_soon(QueueTrigger::TabRemoved { tab_id })))
    }

    /// Startup hook: rebuild the watchdog timer and resume a running queue.
    pub async fn recover_queue_engine_state(&self) -> Result<Option<RunTicket>, StoreError> {
        let runtime = self.store.load_runtime().await?;
        if runtime.status != RuntimeStatus::Running {
            self.watchdog.clear().await?;
            info!(
                target: "archive_queue::engine",
                "Recovered queue in {} state; nothing to resume",
                runtime.status
            );
            return Ok(None);
        }
        self.watchdog.restore().await?;
        info!(target: "archive_queue::engine", "Resuming running queue after restart");
        Ok(Some(self.run_queue_engine_soon(QueueTrigger::Recovery)))
    }

    /// Forward tab events into the engine until the controller goes away.
    pub fn spawn_tab_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let mut events = self.tabs.subscribe();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        let Some(engine) = weak.upgrade() else { break };
                        warn!(target: "archive_queue::engine", "Dropped {skipped} tab events; re-checking queue");
                        engine.run_queue_engine_soon(QueueTrigger::EventsLagged);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(engine) = weak.upgrade() else { break };
                let handled = match event {
                    TabEvent::Updated {
                        tab_id,
                        load_complete,
                    } => engine.handle_queue_tab_updated(tab_id, load_complete).await,
                    TabEvent::Removed { tab_id } => engine.handle_queue_tab_removed(tab_id).await,
                };
                if let Err(e) = handled {
                    warn!(target: "archive_queue::engine", "Failed to handle {event:?}: {e}");
                }
            }
            debug!(target: "archive_queue::engine", "Tab event pump stopped");
        })
    }

    /// Advance the queue by at most one step.
    ///
    /// Safe to call redundantly: every decision is re-derived from the store.
    pub async fn run_queue_engine(&self, trigger: QueueTrigger) -> anyhow::Result<()> {
        if let QueueTrigger::TabRemoved { tab_id } = trigger {
            self.release_removed_tab(tab_id).await?;
            return Ok(());
        }

        let runtime = self.store.load_runtime().await?;
        if runtime.status != RuntimeStatus::Running {
            debug!(
                target: "archive_queue::engine",
                "Ignoring {trigger}: queue is {}",
                runtime.status
            );
            self.watchdog.clear().await?;
            return Ok(());
        }

        match runtime.active_context() {
            Some((item_id, tab_id)) => {
                let item_id = item_id.to_string();
                self.advance_active_item(&item_id, tab_id, &trigger).await?;
            }
            None => self.start_next_item().await?,
        }
        Ok(())
    }

    /// Fail the item whose tab disappeared. The tab is gone, so nothing is closed.
    async fn release_removed_tab(&self, tab_id: TabId) -> Result<(), StoreError> {
        let released = self
            .store
            .update_state(|runtime, items| {
                let (item_id, active_tab) = runtime.active_context()?;
                if active_tab != tab_id {
                    return None;
                }
                let item_id = item_id.to_string();
                if let Some(item) = items
                    .iter_mut()
                    .find(|item| item.id == item_id && item.status.is_active())
                {
                    item.mark_failed(TAB_CLOSED_MESSAGE, now_millis());
                }
                runtime.clear_active_context();
                Some(runtime.status)
            })
            .await?;

        let Some(status) = released else {
            debug!(target: "archive_queue::engine", "Tab {tab_id} is no longer active; nothing to release");
            return Ok(());
        };
        self.watchdog.clear().await?;
        if status == RuntimeStatus::Running {
            self.run_queue_engine_soon(QueueTrigger::TabMissing);
        }
        Ok(())
    }

    async fn advance_active_item(
        &self,
        item_id: &str,
        tab_id: TabId,
        trigger: &QueueTrigger,
    ) -> Result<(), StoreError> {
        let items = self.store.load_items().await?;
        let Some(item) = items.into_iter().find(|item| item.id == item_id) else {
            warn!(target: "archive_queue::engine", "Active item {item_id} no longer exists");
            self.close_tab_quietly(tab_id).await;
            return self
                .finish_active_item(item_id, None, QueueTrigger::ContextRepaired)
                .await;
        };
        if !item.status.is_active() {
            warn!(
                target: "archive_queue::engine",
                "Active item {} is {}, releasing its context",
                item.id,
                item.status
            );
            self.close_tab_quietly(tab_id).await;
            return self
                .finish_active_item(item_id, None, QueueTrigger::ContextRepaired)
                .await;
        }

        let status = match self.tabs.status(tab_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(target: "archive_queue::engine", "{e}; treating tab as missing");
                TabStatus::Missing
            }
        };

        match status {
            TabStatus::Loading if *trigger == QueueTrigger::Alarm => {
                match self.store.load_watchdog().await? {
                    Some(record) if record.deadline_at <= now_millis() => {
                        info!(target: "archive_queue::engine", "Tab {tab_id} timed out loading {}", item.url);
                        self.close_tab_quietly(tab_id).await;
                        self.finish_active_item(
                            &item.id,
                            Some(TAB_LOAD_TIMEOUT_MESSAGE),
                            QueueTrigger::LoadTimeout,
                        )
                        .await
                    }
                    Some(record) => {
                        debug!(
                            target: "archive_queue::engine",
                            "Ignoring stale alarm: tab {tab_id} has until {}",
                            record.deadline_at
                        );
                        Ok(())
                    }
                    None => self.rearm_watchdog(&item.id).await,
                }
            }
            TabStatus::Loading => {
                let armed = self.store.load_watchdog().await?.is_some() && self.watchdog.is_armed();
                if armed {
                    debug!(target: "archive_queue::engine", "Tab {tab_id} is still loading");
                    Ok(())
                } else {
                    self.rearm_watchdog(&item.id).await
                }
            }
            TabStatus::Missing => {
                info!(target: "archive_queue::engine", "Tab {tab_id} for {} is gone", item.url);
                self.finish_active_item(&item.id, Some(TAB_CLOSED_MESSAGE), QueueTrigger::TabMissing)
                    .await
            }
            TabStatus::Complete => self.save_active_item(item, tab_id).await,
        }
    }

    async fn save_active_item(&self, item: QueueItem, tab_id: TabId) -> Result<(), StoreError> {
        let saving = self
            .store
            .update_state(|runtime, items| {
                if !runtime.is_active_item(&item.id) {
                    return None;
                }
                let current = items
                    .iter_mut()
                    .find(|current| current.id == item.id && current.status.is_active())?;
                current.begin_saving(now_millis());
                runtime.next_run_at = None;
                Some(current.clone())
            })
            .await?;
        let Some(saving) = saving else {
            // Stopped, failed or removed while the status poll was in flight
            return Ok(());
        };
        // The save is bounded by the provider's own timeout, not the load watchdog.
        self.watchdog.clear().await?;

        info!(target: "archive_queue::engine", "Saving {} from tab {tab_id}", saving.url);
        let outcome = self
            .orchestrator
            .save_queue_item_with_provider(&saving, tab_id)
            .await;

        let resolution = self
            .store
            .update_state(|runtime, items| {
                // The save may have taken minutes; only the runtime decides what is active now.
                if !runtime.is_active_item(&saving.id) {
                    return SaveResolution::Discarded;
                }
                runtime.clear_active_context();
                let Some(current) = items
                    .iter_mut()
                    .find(|current| current.id == saving.id && current.status.is_active())
                else {
                    return SaveResolution::Vanished;
                };

                let now = now_millis();
                if outcome.ok {
                    current.mark_archived(now);
                    SaveResolution::Finished(QueueTrigger::SaveSuccess)
                } else {
                    let message = outcome
                        .error
                        .as_deref()
                        .map(str::trim)
                        .filter(|message| !message.is_empty())
                        .unwrap_or(DEFAULT_SAVE_FAILURE_MESSAGE);
                    current.mark_failed(message, now);
                    SaveResolution::Finished(QueueTrigger::SaveFailed)
                }
            })
            .await?;

        let next = match resolution {
            SaveResolution::Discarded => {
                info!(
                    target: "archive_queue::engine",
                    "Discarding save result for {}: queue moved on",
                    saving.url
                );
                return Ok(());
            }
            SaveResolution::Vanished => {
                warn!(target: "archive_queue::engine", "Item {} vanished during save", saving.id);
                QueueTrigger::ContextRepaired
            }
            SaveResolution::Finished(next) => {
                if outcome.ok {
                    info!(target: "archive_queue::engine", "Archived {}", saving.url);
                } else {
                    warn!(
                        target: "archive_queue::engine",
                        "Save failed for {}: {}",
                        saving.url,
                        outcome.error.as_deref().unwrap_or(DEFAULT_SAVE_FAILURE_MESSAGE)
                    );
                }
                next
            }
        };
        self.close_tab_quietly(tab_id).await;
        self.run_queue_engine_soon(next);
        Ok(())
    }

    async fn start_next_item(&self) -> Result<(), StoreError> {
        let step = self
            .store
            .update_state(|runtime, items| {
                // Time passed since the caller's read; a stop may have landed.
                if runtime.status != RuntimeStatus::Running || runtime.active_context().is_some() {
                    return NextStep::Nothing;
                }
                let now = now_millis();

                // Without an active context nothing may be in flight; heal leftovers.
                for item in items.iter_mut().filter(|item| item.status.is_active()) {
                    warn!(
                        target: "archive_queue::engine",
                        "{} lost its tab context while {}; any tab it had stays open",
                        item.url,
                        item.status
                    );
                    item.mark_failed(LOST_TAB_CONTEXT_MESSAGE, now);
                }

                match items
                    .iter_mut()
                    .find(|item| item.status == QueueItemStatus::Pending)
                {
                    Some(item) => {
                        item.begin_opening(now);
                        NextStep::Open(item.clone())
                    }
                    None => {
                        runtime.status = RuntimeStatus::Idle;
                        runtime.clear_active_context();
                        NextStep::Drained
                    }
                }
            })
            .await?;

        let item = match step {
            NextStep::Nothing => return Ok(()),
            NextStep::Drained => {
                self.watchdog.clear().await?;
                info!(target: "archive_queue::engine", "Queue drained; going idle");
                return Ok(());
            }
            NextStep::Open(item) => item,
        };
        info!(
            target: "archive_queue::engine",
            "Opening tab for {} (attempt {})",
            item.url,
            item.attempts
        );

        let tab_id = match self.tabs.open(&item.url).await {
            Ok(OpenedTab { id: Some(tab_id) }) => tab_id,
            Ok(OpenedTab { id: None }) => {
                self.fail_opening_item(&item.id, NO_TAB_ID_MESSAGE).await?;
                self.run_queue_engine_soon(QueueTrigger::TabOpenFailed);
                return Ok(());
            }
            Err(e) => {
                warn!(target: "archive_queue::engine", "{e}");
                self.fail_opening_item(&item.id, &e.to_string()).await?;
                self.run_queue_engine_soon(QueueTrigger::TabOpenFailed);
                return Ok(());
            }
        };

        let deadline = self.arm_watchdog().await?;
        let attached = self
            .store
            .update_state(|runtime, items| {
                let Some(current) = items
                    .iter_mut()
                    .find(|current| current.id == item.id && current.status == QueueItemStatus::OpeningTab)
                else {
                    // Cancelled by a stop, or removed while paused
                    return false;
                };
                if runtime.status == RuntimeStatus::Idle {
                    current.mark_cancelled(STOPPED_BY_USER_MESSAGE, now_millis());
                    return false;
                }
                runtime.set_active_context(item.id.clone(), tab_id);
                runtime.next_run_at = Some(deadline);
                true
            })
            .await?;

        if !attached {
            info!(target: "archive_queue::engine", "Queue stopped while tab {tab_id} was opening");
            self.close_tab_quietly(tab_id).await;
            self.watchdog.clear().await?;
            return Ok(());
        }

        // The load may already be done; don't wait for an event that fired early.
        self.run_queue_engine_soon(QueueTrigger::TabOpened);
        Ok(())
    }

    /// Fail the active item (when `failure` is set), release its context and
    /// the watchdog, then schedule `next`.
    async fn finish_active_item(
        &self,
        item_id: &str,
        failure: Option<&str>,
        next: QueueTrigger,
    ) -> Result<(), StoreError> {
        self.store
            .update_state(|runtime, items| {
                if let Some(message) = failure {
                    if let Some(item) = items
                        .iter_mut()
                        .find(|item| item.id == item_id && item.status.is_active())
                    {
                        item.mark_failed(message, now_millis());
                    }
                }
                if runtime.is_active_item(item_id) {
                    runtime.clear_active_context();
                }
            })
            .await?;
        self.watchdog.clear().await?;
        self.run_queue_engine_soon(next);
        Ok(())
    }

    /// An item whose tab never opened; a concurrent stop's cancellation wins.
    async fn fail_opening_item(&self, item_id: &str, message: &str) -> Result<(), StoreError> {
        self.store
            .update_item(item_id, |item| {
                if item.status == QueueItemStatus::OpeningTab {
                    item.mark_failed(message, now_millis());
                }
            })
            .await?;
        Ok(())
    }

    async fn watchdog_period(&self) -> Duration {
        match self.store.load_queue_settings().await {
            Ok(settings) => settings
                .watchdog_delay_secs
                .filter(|secs| *secs > 0)
                .map_or(self.watchdog_delay, Duration::from_secs),
            Err(e) => {
                warn!(target: "archive_queue::engine", "Using default watchdog period: {e}");
                self.watchdog_delay
            }
        }
    }

    async fn arm_watchdog(&self) -> Result<i64, StoreError> {
        let period = self.watchdog_period().await;
        self.watchdog.arm(period).await
    }

    /// Keep waiting on a loading tab: push the deadline and mirror it.
    async fn rearm_watchdog(&self, item_id: &str) -> Result<(), StoreError> {
        let deadline = self.arm_watchdog().await?;
        self.store
            .update_runtime(|runtime| {
                if runtime.is_active_item(item_id) {
                    runtime.next_run_at = Some(deadline);
                }
            })
            .await
    }

    pub(crate) async fn clear_watchdog(&self) -> Result<(), StoreError> {
        self.watchdog.clear().await
    }

    pub(crate) async fn close_tab_quietly(&self, tab_id: TabId) {
        if let Err(e) = self.tabs.close(tab_id).await {
            debug!(target: "archive_queue::engine", "Ignoring close failure: {e}");
        }
    }
}

/// What the pick step decided under the state lock
enum NextStep {
    Nothing,
    Drained,
    Open(QueueItem),
}

/// How a finished save was applied to the current state
enum SaveResolution {
    Discarded,
    Vanished,
    Finished(QueueTrigger),
}
