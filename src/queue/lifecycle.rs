//! User-facing queue commands
//!
//! Each handler checks its precondition and applies its change inside one
//! locked store transaction, then at most nudges the engine. Handlers do not
//! go through the engine's run queue; the shared store lock is what keeps a
//! command and an in-flight run from overwriting each other's writes.
//!
//! Destructive or reordering commands require a queue that is not `running`.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::engine::QueueEngine;
use super::normalize::{LinkCandidate, author_queue_items};
use super::types::{
    QueueItemStatus, QueueRuntime, QueueSnapshot, QueueTrigger, RuntimeStatus, TabId,
};
use crate::error::{QueueError, QueueResult};
use crate::store::QueueStore;
use crate::utils::{STOPPED_BY_USER_MESSAGE, now_millis};

/// Fresh queue state plus whatever the command wants to report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleResult {
    #[serde(flatten)]
    pub snapshot: QueueSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retried_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

impl LifecycleResult {
    fn new(snapshot: QueueSnapshot) -> Self {
        Self {
            snapshot,
            already_running: None,
            cancelled_item_id: None,
            retried_count: None,
            removed_count: None,
            added_count: None,
            skipped_count: None,
            total_count: None,
        }
    }
}

#[derive(Clone)]
pub struct QueueLifecycle {
    engine: Arc<QueueEngine>,
}

impl QueueLifecycle {
    pub fn new(engine: Arc<QueueEngine>) -> Self {
        Self { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<QueueEngine> {
        &self.engine
    }

    fn store(&self) -> &QueueStore {
        self.engine.store()
    }

    async fn result(&self) -> QueueResult<LifecycleResult> {
        Ok(LifecycleResult::new(self.store().snapshot().await?))
    }

    pub async fn get_queue_state(&self) -> QueueResult<LifecycleResult> {
        self.result().await
    }

    pub async fn start_queue(&self) -> QueueResult<LifecycleResult> {
        let already_running = self
            .store()
            .try_update_state(|runtime, items| {
                let status = runtime.status;
                match status {
                    RuntimeStatus::Paused => Err(precondition(
                        "Queue is paused. Resume it instead of starting.",
                        runtime,
                    )),
                    RuntimeStatus::Running => {
                        runtime.next_run_at = None;
                        Ok(true)
                    }
                    RuntimeStatus::Idle => {
                        if !items.iter().any(|item| item.status == QueueItemStatus::Pending) {
                            return Err(precondition("No pending items in the queue.", runtime));
                        }
                        runtime.status = RuntimeStatus::Running;
                        runtime.clear_active_context();
                        Ok(false)
                    }
                }
            })
            .await?;
        if !already_running {
            info!(target: "archive_queue::lifecycle", "Queue started");
        }
        self.engine.run_queue_engine_soon(QueueTrigger::Start);

        let mut result = self.result().await?;
        result.already_running = Some(already_running);
        Ok(result)
    }

    /// Stop picking new items. An in-flight tab or save is left alone.
    pub async fn pause_queue(&self) -> QueueResult<LifecycleResult> {
        self.store()
            .try_update_state(|runtime, _| {
                if runtime.status != RuntimeStatus::Running {
                    return Err(precondition("Queue is not running.", runtime));
                }
                runtime.status = RuntimeStatus::Paused;
                runtime.next_run_at = None;
                Ok(())
            })
            .await?;
        self.engine.clear_watchdog().await?;
        info!(target: "archive_queue::lifecycle", "Queue paused");
        self.result().await
    }

    pub async fn resume_queue(&self) -> QueueResult<LifecycleResult> {
        self.store()
            .try_update_state(|runtime, items| {
                if runtime.status != RuntimeStatus::Paused {
                    return Err(precondition("Queue is not paused.", runtime));
                }
                let has_pending = items.iter().any(|item| item.status == QueueItemStatus::Pending);
                if !has_pending && runtime.active_queue_item_id.is_none() {
                    return Err(precondition("Nothing left to resume.", runtime));
                }
                runtime.status = RuntimeStatus::Running;
                Ok(())
            })
            .await?;
        info!(target: "archive_queue::lifecycle", "Queue resumed");
        self.engine.run_queue_engine_soon(QueueTrigger::Resume);
        self.result().await
    }

    /// Unconditional: cancel whatever is in flight and go idle.
    pub async fn stop_queue(&self) -> QueueResult<LifecycleResult> {
        let (active_tab, cancelled_item_id) = self
            .store()
            .update_state(|runtime, items| {
                let active_tab = runtime.active_tab_id;
                let now = now_millis();

                // Any in-flight item, including one whose tab is still being
                // opened and so is not yet recorded on the runtime.
                let mut cancelled_item_id = None;
                for item in items.iter_mut().filter(|item| item.status.is_active()) {
                    item.mark_cancelled(STOPPED_BY_USER_MESSAGE, now);
                    if cancelled_item_id.is_none() || runtime.is_active_item(&item.id) {
                        cancelled_item_id = Some(item.id.clone());
                    }
                }

                runtime.status = RuntimeStatus::Idle;
                runtime.clear_active_context();
                (active_tab, cancelled_item_id)
            })
            .await?;

        self.engine.clear_watchdog().await?;
        if let Some(tab_id) = active_tab {
            self.engine.close_tab_quietly(tab_id).await;
        }
        info!(target: "archive_queue::lifecycle", "Queue stopped");

        let mut result = self.result().await?;
        result.cancelled_item_id = cancelled_item_id;
        Ok(result)
    }

    pub async fn retry_failed_queue(&self) -> QueueResult<LifecycleResult> {
        let retried = self
            .store()
            .try_update_state(|runtime, items| {
                ensure_not_running(runtime)?;
                let now = now_millis();
                let mut retried = 0usize;
                for item in items.iter_mut().filter(|item| item.status.is_retryable()) {
                    item.reset_to_pending(now);
                    retried += 1;
                }
                if retried == 0 {
                    return Err(precondition("No failed or cancelled items to retry.", runtime));
                }
                Ok::<_, QueueError>(retried)
            })
            .await?;
        info!(target: "archive_queue::lifecycle", "Reset {retried} item(s) to pending");

        let mut result = self.result().await?;
        result.retried_count = Some(retried);
        Ok(result)
    }

    /// Remove every item. The runtime goes back to idle.
    pub async fn clear_queue(&self) -> QueueResult<LifecycleResult> {
        let (removed, active_tab) = self
            .store()
            .try_update_state(|runtime, items| {
                ensure_not_running(runtime)?;
                let removed = items.len();
                items.clear();
                let active_tab = runtime.active_tab_id;
                runtime.status = RuntimeStatus::Idle;
                runtime.clear_active_context();
                Ok::<_, QueueError>((removed, active_tab))
            })
            .await?;

        if let Some(tab_id) = active_tab {
            self.engine.close_tab_quietly(tab_id).await;
        }
        self.engine.clear_watchdog().await?;
        info!(target: "archive_queue::lifecycle", "Cleared {removed} item(s)");

        let mut result = self.result().await?;
        result.removed_count = Some(removed);
        Ok(result)
    }

    pub async fn clear_archived_queue(&self) -> QueueResult<LifecycleResult> {
        let (removed, released_tab) = self
            .store()
            .try_update_state(|runtime, items| {
                ensure_not_running(runtime)?;
                let (archived, kept): (Vec<_>, Vec<_>) = std::mem::take(items)
                    .into_iter()
                    .partition(|item| item.status == QueueItemStatus::Archived);
                *items = kept;
                let removed_ids: HashSet<String> = archived.into_iter().map(|item| item.id).collect();
                let released_tab = release_removed_active(runtime, &removed_ids);
                Ok::<_, QueueError>((removed_ids.len(), released_tab))
            })
            .await?;
        self.close_released_tab(released_tab).await?;

        let mut result = self.result().await?;
        result.removed_count = Some(removed);
        Ok(result)
    }

    pub async fn remove_queue_item(&self, item_id: &str) -> QueueResult<LifecycleResult> {
        let released_tab = self
            .store()
            .try_update_state(|runtime, items| {
                ensure_not_running(runtime)?;
                let Some(index) = items.iter().position(|item| item.id == item_id) else {
                    return Err(QueueError::NotFound(item_id.to_string()));
                };
                let removed = items.remove(index);
                Ok::<_, QueueError>(release_removed_active(runtime, &HashSet::from([removed.id])))
            })
            .await?;
        self.close_released_tab(released_tab).await?;

        let mut result = self.result().await?;
        result.removed_count = Some(1);
        Ok(result)
    }

    pub async fn reverse_queue_items(&self) -> QueueResult<LifecycleResult> {
        self.store()
            .try_update_state(|runtime, items| {
                ensure_not_running(runtime)?;
                items.reverse();
                Ok::<_, QueueError>(())
            })
            .await?;
        self.result().await
    }

    /// Append collected links as pending items, capped by `collector_settings.maxLinks`.
    ///
    /// Allowed in any state: appending neither reorders nor destroys.
    pub async fn enqueue_links(&self, links: &[LinkCandidate]) -> QueueResult<LifecycleResult> {
        let settings = self.store().load_collector_settings().await?;
        let (added, skipped, total) = self
            .store()
            .update_items(|items| {
                let authored = author_queue_items(
                    std::mem::take(items),
                    links,
                    settings.max_links as usize,
                    now_millis(),
                );
                *items = authored.items;
                (authored.added_count, authored.skipped_count, items.len())
            })
            .await?;
        info!(
            target: "archive_queue::lifecycle",
            "Enqueued {added} link(s), skipped {skipped}"
        );

        let mut result = self.result().await?;
        result.added_count = Some(added);
        result.skipped_count = Some(skipped);
        result.total_count = Some(total);
        Ok(result)
    }

    async fn close_released_tab(&self, released_tab: Option<TabId>) -> QueueResult<()> {
        if let Some(tab_id) = released_tab {
            self.engine.close_tab_quietly(tab_id).await;
            self.engine.clear_watchdog().await?;
        }
        Ok(())
    }
}

/// Drop the context of an active item that was removed; returns its tab.
fn release_removed_active(runtime: &mut QueueRuntime, removed_ids: &HashSet<String>) -> Option<TabId> {
    let active_id = runtime.active_queue_item_id.as_deref()?;
    if !removed_ids.contains(active_id) {
        return None;
    }
    let tab_id = runtime.active_tab_id;
    runtime.clear_active_context();
    tab_id
}

fn ensure_not_running(runtime: &QueueRuntime) -> QueueResult<()> {
    if runtime.status == RuntimeStatus::Running {
        return Err(precondition(
            "Queue is running. Pause or stop it first.",
            runtime,
        ));
    }
    Ok(())
}

fn precondition(message: &str, runtime: &QueueRuntime) -> QueueError {
    QueueError::bad_request_with(message, json!({ "status": runtime.status.as_str() }))
}
