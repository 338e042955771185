//! End-to-end behaviour of the queue engine against scripted tabs and provider

mod common;

use common::{Harness, OpenBehavior, SaveScript, offline_report};
use kodegen_tools_archive_queue::store::{QueueSettings, WatchdogRecord};
use kodegen_tools_archive_queue::utils::{
    DEFAULT_SAVE_FAILURE_MESSAGE, LOST_TAB_CONTEXT_MESSAGE, NO_TAB_ID_MESSAGE,
    STOPPED_BY_USER_MESSAGE, TAB_CLOSED_MESSAGE, TAB_LOAD_TIMEOUT_MESSAGE, now_millis,
};
use kodegen_tools_archive_queue::{
    QueueItemStatus, QueueTrigger, RuntimeStatus, SaveOutcome, TabEvent, TabStatus,
};
use std::time::Duration;

#[tokio::test]
async fn success_path_archives_item_and_goes_idle() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Complete);

    let ticket = harness
        .engine
        .handle_queue_tab_updated(51, true)
        .await
        .expect("store")
        .expect("event for the active tab triggers a run");
    ticket.wait().await;
    harness.settle().await;

    let item = harness.item(&id).await;
    assert_eq!(item.status, QueueItemStatus::Archived);
    assert_eq!(item.last_error, None);
    assert_eq!(harness.tabs.closed(), vec![51]);

    let runtime = harness.runtime().await;
    assert_eq!(runtime.status, RuntimeStatus::Idle);
    assert_eq!(runtime.active_queue_item_id, None);
    assert_eq!(runtime.active_tab_id, None);

    let requests = harness.provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tab_id, 51);
    assert_eq!(requests[0].url, "https://example.com/a");
    assert_eq!(requests[0].title, "Active page");
}

#[tokio::test]
async fn provider_failure_marks_item_failed_with_its_message() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Complete);
    harness
        .provider
        .push(SaveScript::Outcome(SaveOutcome::failed("Bridge save failed.")));

    harness.engine.run_queue_engine_soon(QueueTrigger::TabUpdated);
    harness.settle().await;

    let item = harness.item(&id).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some("Bridge save failed."));
    assert_eq!(harness.tabs.closed(), vec![51]);
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn blank_provider_error_uses_default_message() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Complete);
    harness.provider.push(SaveScript::Outcome(SaveOutcome {
        ok: false,
        error: Some("   ".to_string()),
    }));

    harness.engine.run_queue_engine_soon(QueueTrigger::TabUpdated);
    harness.settle().await;

    let item = harness.item(&id).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some(DEFAULT_SAVE_FAILURE_MESSAGE));
}

#[tokio::test]
async fn provider_error_and_panic_fail_items_without_stopping_the_queue() {
    let harness = Harness::new();
    let ids = harness
        .seed_pending(&[
            "https://example.com/1",
            "https://example.com/2",
            "https://example.com/3",
        ])
        .await;
    harness.provider.push(SaveScript::Error("socket hang up".into()));
    harness.provider.push(SaveScript::Panic);

    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;

    let first = harness.item(&ids[0]).await;
    assert_eq!(first.status, QueueItemStatus::Failed);
    assert_eq!(
        first.last_error.as_deref(),
        Some("Connector request failed: socket hang up")
    );
    let second = harness.item(&ids[1]).await;
    assert_eq!(second.status, QueueItemStatus::Failed);
    assert_eq!(second.last_error.as_deref(), Some("Save provider panicked."));
    assert_eq!(harness.item(&ids[2]).await.status, QueueItemStatus::Archived);
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn watchdog_alarm_times_out_a_loading_tab() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Loading);
    harness
        .store
        .save_watchdog(WatchdogRecord {
            deadline_at: now_millis() - 1,
            period_ms: 60_000,
        })
        .await
        .expect("store");

    harness.engine.handle_queue_alarm().wait().await;
    harness.settle().await;

    let item = harness.item(&id).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some(TAB_LOAD_TIMEOUT_MESSAGE));
    assert_eq!(harness.tabs.closed(), vec![51]);
    let runtime = harness.runtime().await;
    assert_eq!(runtime.status, RuntimeStatus::Idle);
    assert_eq!(runtime.active_tab_id, None);
    assert!(!harness.engine.watchdog().is_armed());
}

#[tokio::test]
async fn alarm_before_the_deadline_is_ignored() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Loading);
    let deadline = now_millis() + 60_000;
    harness
        .store
        .save_watchdog(WatchdogRecord {
            deadline_at: deadline,
            period_ms: 60_000,
        })
        .await
        .expect("store");

    harness.engine.handle_queue_alarm().wait().await;
    harness.settle().await;

    assert_eq!(harness.item(&id).await.status, QueueItemStatus::OpeningTab);
    assert_eq!(harness.runtime().await.active_tab_id, Some(51));
    let record = harness.store.load_watchdog().await.expect("store");
    assert_eq!(record.map(|record| record.deadline_at), Some(deadline));
    assert!(harness.tabs.closed().is_empty());
}

#[tokio::test]
async fn long_save_does_not_time_out_the_next_tab() {
    let harness = Harness::new();
    harness
        .store
        .save_queue_settings(&QueueSettings {
            watchdog_delay_secs: Some(1),
            ..QueueSettings::default()
        })
        .await
        .expect("settings");
    let ids = harness
        .seed_pending(&["https://example.com/1", "https://example.com/2"])
        .await;
    harness.provider.save_gate.hold();

    harness.lifecycle.start_queue().await.expect("start");
    harness.provider.save_gate.started().await;
    assert!(!harness.engine.watchdog().is_armed(), "no load deadline while saving");
    let first_tab = harness.tabs.last_opened_id().expect("tab opened");

    // Outlast the watchdog period while the save is held.
    harness.tabs.set_initial_status(TabStatus::Loading);
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    harness.provider.save_gate.release();
    harness.settle().await;

    // A late alarm for the new tab arrives before its own deadline.
    harness.engine.handle_queue_alarm().wait().await;
    harness.settle().await;

    assert_eq!(harness.item(&ids[0]).await.status, QueueItemStatus::Archived);
    let second = harness.item(&ids[1]).await;
    assert_eq!(second.status, QueueItemStatus::OpeningTab);
    assert_eq!(second.last_error, None);
    assert_eq!(harness.runtime().await.active_tab_id, harness.tabs.last_opened_id());
    assert_eq!(harness.tabs.closed(), vec![first_tab]);
}

#[tokio::test]
async fn non_alarm_trigger_on_loading_tab_keeps_waiting() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Loading);

    harness.engine.run_queue_engine_soon(QueueTrigger::Resume);
    harness.settle().await;

    assert_eq!(harness.item(&id).await.status, QueueItemStatus::OpeningTab);
    let runtime = harness.runtime().await;
    assert_eq!(runtime.active_tab_id, Some(51));
    let record = harness
        .store
        .load_watchdog()
        .await
        .expect("store")
        .expect("watchdog re-armed");
    assert_eq!(runtime.next_run_at, Some(record.deadline_at));
    assert!(harness.engine.watchdog().is_armed());
    assert!(harness.tabs.closed().is_empty());
}

#[tokio::test]
async fn recurring_watchdog_fails_a_tab_that_never_loads() {
    let harness = Harness::new();
    harness
        .store
        .save_queue_settings(&QueueSettings {
            watchdog_delay_secs: Some(1),
            ..QueueSettings::default()
        })
        .await
        .expect("settings");
    harness.tabs.set_initial_status(TabStatus::Loading);
    let ids = harness.seed_pending(&["https://example.com/slow"]).await;

    harness.lifecycle.start_queue().await.expect("start");
    let id = ids[0].clone();
    harness
        .eventually(|items, runtime| {
            runtime.status == RuntimeStatus::Idle
                && items.iter().any(|item| item.id == id && item.status == QueueItemStatus::Failed)
        })
        .await;

    let item = harness.item(&ids[0]).await;
    assert_eq!(item.last_error.as_deref(), Some(TAB_LOAD_TIMEOUT_MESSAGE));
    assert_eq!(harness.tabs.closed().len(), 1);
}

#[tokio::test]
async fn tab_removed_while_saving_fails_without_closing() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::SavingSnapshot, 51)
        .await;

    let ticket = harness
        .engine
        .handle_queue_tab_removed(51)
        .await
        .expect("store")
        .expect("removal of the active tab triggers a run");
    ticket.wait().await;
    harness.settle().await;

    let item = harness.item(&id).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some(TAB_CLOSED_MESSAGE));
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
    assert!(harness.tabs.closed().is_empty(), "tab was already gone");
}

#[tokio::test]
async fn tab_removal_keeps_a_concurrent_pause() {
    let harness = Harness::with_store_delay(Duration::from_millis(5));
    let ids = harness
        .seed_pending(&["https://example.com/1", "https://example.com/2"])
        .await;
    harness.tabs.set_initial_status(TabStatus::Loading);
    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;
    let tab_id = harness.tabs.last_opened_id().expect("tab opened");

    harness.tabs.remove_externally(tab_id);
    let (removed, paused) = tokio::join!(
        harness.engine.handle_queue_tab_removed(tab_id),
        harness.lifecycle.pause_queue()
    );
    assert!(removed.expect("store").is_some());
    paused.expect("pause");
    harness.settle().await;

    let runtime = harness.runtime().await;
    assert_eq!(runtime.status, RuntimeStatus::Paused);
    assert_eq!(runtime.active_tab_id, None);
    let first = harness.item(&ids[0]).await;
    assert_eq!(first.status, QueueItemStatus::Failed);
    assert_eq!(first.last_error.as_deref(), Some(TAB_CLOSED_MESSAGE));
    assert_eq!(harness.item(&ids[1]).await.status, QueueItemStatus::Pending);
    assert_eq!(harness.tabs.opened().len(), 1);
}

#[tokio::test]
async fn tab_removal_while_paused_releases_the_item() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.set_runtime_status(RuntimeStatus::Paused).await;

    harness
        .engine
        .handle_queue_tab_removed(51)
        .await
        .expect("store")
        .expect("removal of the active tab triggers a run")
        .wait()
        .await;
    harness.settle().await;

    let item = harness.item(&id).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some(TAB_CLOSED_MESSAGE));
    let runtime = harness.runtime().await;
    assert_eq!(runtime.status, RuntimeStatus::Paused);
    assert_eq!(runtime.active_tab_id, None);
}

#[tokio::test]
async fn events_for_other_tabs_are_ignored() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Loading);

    assert!(
        harness
            .engine
            .handle_queue_tab_updated(99, true)
            .await
            .expect("store")
            .is_none()
    );
    assert!(
        harness
            .engine
            .handle_queue_tab_updated(51, false)
            .await
            .expect("store")
            .is_none()
    );
    assert!(
        harness
            .engine
            .handle_queue_tab_removed(99)
            .await
            .expect("store")
            .is_none()
    );
    harness.settle().await;

    assert_eq!(harness.item(&id).await.status, QueueItemStatus::OpeningTab);
    assert_eq!(harness.runtime().await.active_tab_id, Some(51));
}

#[tokio::test]
async fn missing_tab_on_poll_fails_item() {
    let harness = Harness::new();
    let id = harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;

    harness.engine.run_queue_engine_soon(QueueTrigger::Recovery);
    harness.settle().await;

    let item = harness.item(&id).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some(TAB_CLOSED_MESSAGE));
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn queue_processes_pending_items_in_order() {
    let harness = Harness::new();
    let urls = [
        "https://example.com/1",
        "https://example.com/2",
        "https://example.com/3",
    ];
    let ids = harness.seed_pending(&urls).await;

    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;

    assert_eq!(harness.tabs.opened_urls(), urls);
    for id in &ids {
        let item = harness.item(id).await;
        assert_eq!(item.status, QueueItemStatus::Archived);
        assert_eq!(item.attempts, 1);
    }
    let closed = harness.tabs.closed();
    let opened: Vec<_> = harness.tabs.opened().into_iter().map(|(id, _)| id).collect();
    assert_eq!(closed, opened);
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn starting_twice_never_opens_a_second_tab() {
    let harness = Harness::new();
    harness
        .seed_pending(&["https://example.com/1", "https://example.com/2"])
        .await;
    harness.tabs.set_initial_status(TabStatus::Loading);
    harness.tabs.open_gate.hold();

    harness.lifecycle.start_queue().await.expect("start");
    harness.tabs.open_gate.started().await;
    let again = harness.lifecycle.start_queue().await.expect("start again");
    assert_eq!(again.already_running, Some(true));
    harness.engine.run_queue_engine_soon(QueueTrigger::Start);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let in_flight = harness
        .items()
        .await
        .iter()
        .filter(|item| item.status.is_active())
        .count();
    assert_eq!(in_flight, 1);

    harness.tabs.open_gate.release();
    harness.settle().await;

    assert_eq!(harness.tabs.opened().len(), 1);
    let items = harness.items().await;
    assert_eq!(items[0].status, QueueItemStatus::OpeningTab);
    assert_eq!(items[1].status, QueueItemStatus::Pending);
    assert_eq!(harness.runtime().await.active_tab_id, harness.tabs.last_opened_id());
}

#[tokio::test]
async fn redundant_runs_on_idle_queue_change_nothing() {
    let harness = Harness::new();
    harness.seed_pending(&["https://example.com/1"]).await;
    harness.set_runtime_status(RuntimeStatus::Idle).await;
    let before = harness.store.snapshot().await.expect("snapshot");

    for _ in 0..3 {
        harness.engine.run_queue_engine_soon(QueueTrigger::Start);
    }
    harness.settle().await;

    assert_eq!(harness.store.snapshot().await.expect("snapshot"), before);
    assert!(harness.tabs.opened().is_empty());
}

#[tokio::test]
async fn recovery_resumes_a_running_queue() {
    let harness = Harness::new();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness.set_runtime_status(RuntimeStatus::Running).await;
    harness.tabs.set_initial_status(TabStatus::Loading);

    let ticket = harness
        .engine
        .recover_queue_engine_state()
        .await
        .expect("store")
        .expect("running queue resumes");
    ticket.wait().await;
    harness.settle().await;

    let item = harness.item(&ids[0]).await;
    assert_eq!(item.status, QueueItemStatus::OpeningTab);
    assert_eq!(item.attempts, 1);
    assert_eq!(harness.tabs.opened().len(), 1);
    let runtime = harness.runtime().await;
    assert_eq!(runtime.active_queue_item_id.as_deref(), Some(ids[0].as_str()));
    assert_eq!(runtime.active_tab_id, harness.tabs.last_opened_id());
    assert!(runtime.next_run_at.is_some());
    assert!(harness.engine.watchdog().is_armed());
}

#[tokio::test]
async fn recovery_of_idle_queue_does_nothing_and_drops_stale_watchdog() {
    let harness = Harness::new();
    harness.seed_pending(&["https://example.com/1"]).await;
    harness
        .store
        .save_watchdog(WatchdogRecord {
            deadline_at: now_millis() + 60_000,
            period_ms: 60_000,
        })
        .await
        .expect("store");

    let ticket = harness.engine.recover_queue_engine_state().await.expect("store");
    assert!(ticket.is_none());
    assert_eq!(harness.store.load_watchdog().await.expect("store"), None);
    assert!(harness.tabs.opened().is_empty());
}

#[tokio::test]
async fn restart_survives_through_persisted_state() {
    let harness = Harness::new();
    let ids = harness
        .seed_pending(&["https://example.com/1", "https://example.com/2"])
        .await;
    harness.tabs.set_initial_status(TabStatus::Loading);
    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;
    assert_eq!(harness.item(&ids[0]).await.status, QueueItemStatus::OpeningTab);
    let backend = harness.backend.clone();
    drop(harness);

    // The old browser is gone with the old process: its tab reads as missing.
    let restarted = Harness::with_backend(backend);
    restarted
        .engine
        .recover_queue_engine_state()
        .await
        .expect("store")
        .expect("running queue resumes");
    restarted.settle().await;

    let first = restarted.item(&ids[0]).await;
    assert_eq!(first.status, QueueItemStatus::Failed);
    assert_eq!(first.last_error.as_deref(), Some(TAB_CLOSED_MESSAGE));
    assert_eq!(restarted.item(&ids[1]).await.status, QueueItemStatus::Archived);
    assert_eq!(restarted.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn orphaned_active_item_is_failed_before_next_pick() {
    let harness = Harness::new();
    let ids = harness
        .seed_pending(&["https://example.com/1", "https://example.com/2"])
        .await;
    let mut items = harness.items().await;
    items[0].status = QueueItemStatus::SavingSnapshot;
    harness.store.save_items(items).await.expect("store");
    harness.set_runtime_status(RuntimeStatus::Running).await;

    harness.engine.run_queue_engine_soon(QueueTrigger::Recovery);
    harness.settle().await;

    let orphan = harness.item(&ids[0]).await;
    assert_eq!(orphan.status, QueueItemStatus::Failed);
    assert_eq!(orphan.last_error.as_deref(), Some(LOST_TAB_CONTEXT_MESSAGE));
    assert_eq!(harness.item(&ids[1]).await.status, QueueItemStatus::Archived);
    // Only the second item's tab was ever known to the engine
    assert_eq!(harness.tabs.closed(), harness.tabs.opened().iter().map(|(id, _)| *id).collect::<Vec<_>>());
}

#[tokio::test]
async fn vanished_active_item_releases_context_and_continues() {
    let harness = Harness::new();
    harness
        .seed_active("https://example.com/a", QueueItemStatus::OpeningTab, 51)
        .await;
    harness.tabs.set_status(51, TabStatus::Loading);
    harness.store.save_items(Vec::new()).await.expect("store");
    let ids = harness.seed_pending(&["https://example.com/next"]).await;

    harness.engine.run_queue_engine_soon(QueueTrigger::Alarm);
    harness.settle().await;

    assert!(harness.tabs.closed().contains(&51));
    assert_eq!(harness.item(&ids[0]).await.status, QueueItemStatus::Archived);
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn tab_open_failures_fail_the_item() {
    let harness = Harness::new();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness
        .tabs
        .set_open_behavior(OpenBehavior::Fail("browser crashed".into()));

    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;

    let item = harness.item(&ids[0]).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(
        item.last_error.as_deref(),
        Some("Failed to open tab: browser crashed")
    );
    assert_eq!(item.attempts, 1);
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn tab_without_id_fails_the_item() {
    let harness = Harness::new();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness.tabs.set_open_behavior(OpenBehavior::NoId);

    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;

    let item = harness.item(&ids[0]).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some(NO_TAB_ID_MESSAGE));
}

#[tokio::test]
async fn unavailable_provider_fails_item_and_records_diagnostics() {
    let harness = Harness::new();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness.provider.set_health(offline_report());

    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;

    let item = harness.item(&ids[0]).await;
    assert_eq!(item.status, QueueItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some("Zotero is not running."));
    assert!(harness.provider.requests().is_empty());

    let diagnostics = harness.store.load_diagnostics().await.expect("store");
    assert_eq!(diagnostics.connector_bridge.healthy, Some(false));
    assert_eq!(diagnostics.connector_bridge.zotero_online, Some(false));
    assert_eq!(diagnostics.last_error.as_deref(), Some("Zotero is not running."));
}

#[tokio::test]
async fn stop_during_save_discards_the_late_result() {
    let harness = Harness::new();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness.provider.save_gate.hold();

    harness.lifecycle.start_queue().await.expect("start");
    harness.provider.save_gate.started().await;
    let tab_id = harness.tabs.last_opened_id().expect("tab opened");

    let stopped = harness.lifecycle.stop_queue().await.expect("stop");
    assert_eq!(stopped.cancelled_item_id.as_deref(), Some(ids[0].as_str()));
    assert!(harness.tabs.closed().contains(&tab_id));

    harness.provider.save_gate.release();
    harness.settle().await;

    let item = harness.item(&ids[0]).await;
    assert_eq!(item.status, QueueItemStatus::Cancelled);
    assert_eq!(item.last_error.as_deref(), Some(STOPPED_BY_USER_MESSAGE));
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn stop_while_tab_is_opening_closes_the_late_tab() {
    let harness = Harness::new();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness.tabs.open_gate.hold();

    harness.lifecycle.start_queue().await.expect("start");
    harness.tabs.open_gate.started().await;
    let stopped = harness.lifecycle.stop_queue().await.expect("stop");
    assert_eq!(stopped.cancelled_item_id.as_deref(), Some(ids[0].as_str()));

    harness.tabs.open_gate.release();
    harness.settle().await;

    let late_tab = harness.tabs.last_opened_id().expect("tab opened late");
    assert!(harness.tabs.closed().contains(&late_tab));
    assert_eq!(harness.item(&ids[0]).await.status, QueueItemStatus::Cancelled);
    let runtime = harness.runtime().await;
    assert_eq!(runtime.status, RuntimeStatus::Idle);
    assert_eq!(runtime.active_tab_id, None);
    assert!(!harness.engine.watchdog().is_armed());
}

#[tokio::test]
async fn pause_holds_the_active_tab_and_resume_finishes_it() {
    let harness = Harness::new();
    let ids = harness
        .seed_pending(&["https://example.com/1", "https://example.com/2"])
        .await;
    harness.tabs.set_initial_status(TabStatus::Loading);
    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;
    let tab_id = harness.tabs.last_opened_id().expect("tab opened");

    harness.lifecycle.pause_queue().await.expect("pause");
    assert!(!harness.engine.watchdog().is_armed());
    harness.tabs.set_status(tab_id, TabStatus::Complete);
    let ignored = harness
        .engine
        .handle_queue_tab_updated(tab_id, true)
        .await
        .expect("store");
    assert!(ignored.is_none(), "paused queue ignores load events");
    assert_eq!(harness.item(&ids[0]).await.status, QueueItemStatus::OpeningTab);

    harness.tabs.set_initial_status(TabStatus::Complete);
    harness.lifecycle.resume_queue().await.expect("resume");
    harness.settle().await;

    assert_eq!(harness.item(&ids[0]).await.status, QueueItemStatus::Archived);
    assert_eq!(harness.item(&ids[1]).await.status, QueueItemStatus::Archived);
    assert_eq!(harness.runtime().await.status, RuntimeStatus::Idle);
}

#[tokio::test]
async fn event_pump_forwards_tab_events() {
    let harness = Harness::new();
    let pump = harness.engine.spawn_tab_event_pump();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness.tabs.set_initial_status(TabStatus::Loading);
    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;
    let tab_id = harness.tabs.last_opened_id().expect("tab opened");

    harness.tabs.set_status(tab_id, TabStatus::Complete);
    harness.tabs.emit(TabEvent::Updated {
        tab_id,
        load_complete: true,
    });

    let id = ids[0].clone();
    harness
        .eventually(|items, runtime| {
            runtime.status == RuntimeStatus::Idle
                && items.iter().any(|item| item.id == id && item.status == QueueItemStatus::Archived)
        })
        .await;
    pump.abort();
}

#[tokio::test]
async fn event_pump_fails_item_when_tab_is_removed() {
    let harness = Harness::new();
    let pump = harness.engine.spawn_tab_event_pump();
    let ids = harness.seed_pending(&["https://example.com/1"]).await;
    harness.tabs.set_initial_status(TabStatus::Loading);
    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;
    let tab_id = harness.tabs.last_opened_id().expect("tab opened");

    harness.tabs.remove_externally(tab_id);
    harness.tabs.emit(TabEvent::Removed { tab_id });

    let id = ids[0].clone();
    harness
        .eventually(|items, runtime| {
            runtime.status == RuntimeStatus::Idle
                && items.iter().any(|item| {
                    item.id == id
                        && item.status == QueueItemStatus::Failed
                        && item.last_error.as_deref() == Some(TAB_CLOSED_MESSAGE)
                })
        })
        .await;
    assert!(harness.tabs.closed().is_empty());
    pump.abort();
}

#[tokio::test]
async fn provider_receives_health_check_for_the_active_tab() {
    let harness = Harness::new();
    harness.seed_pending(&["https://example.com/1"]).await;

    harness.lifecycle.start_queue().await.expect("start");
    harness.settle().await;

    let tab_id = harness.tabs.last_opened_id();
    assert_eq!(harness.provider.health_checks(), vec![tab_id]);
}
