//! Durable watchdog alarm
//!
//! The deadline lives in the `queue_watchdog` record so it survives restarts;
//! the in-process timer is only a cache of that row. `restore` rebuilds the
//! timer on startup and fires at once when the deadline already passed.
//!
//! The timer never writes the store. It recurs in memory with the same
//! period until cleared; the engine re-arms (and so re-persists) whenever it
//! decides to keep waiting.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::{QueueStore, StoreError, WatchdogRecord};
use crate::utils::now_millis;

/// Shortest period the timer will recur with
const MIN_PERIOD_MS: i64 = 10;

type AlarmCallback = Arc<dyn Fn() + Send + Sync>;

pub struct QueueWatchdog {
    store: QueueStore,
    on_alarm: AlarmCallback,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl QueueWatchdog {
    /// `on_alarm` must not block; it is called from the timer task.
    pub fn new(store: QueueStore, on_alarm: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            store,
            on_alarm: Arc::new(on_alarm),
            timer: Mutex::new(None),
        }
    }

    /// Persist a deadline `period` from now and (re)start the timer.
    ///
    /// Returns the deadline in epoch ms.
    pub async fn arm(&self, period: Duration) -> Result<i64, StoreError> {
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
        let deadline_at = now_millis().saturating_add(period_ms);
        self.store
            .save_watchdog(WatchdogRecord {
                deadline_at,
                period_ms,
            })
            .await?;
        self.start_timer(deadline_at, period_ms);
        debug!(target: "archive_queue::engine", "Watchdog armed for {period_ms} ms");
        Ok(deadline_at)
    }

    /// Stop the timer and delete the persisted deadline.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.stop_timer();
        self.store.clear_watchdog().await
    }

    /// Rebuild the timer from the persisted deadline, if any.
    pub async fn restore(&self) -> Result<Option<WatchdogRecord>, StoreError> {
        let record = self.store.load_watchdog().await?;
        match record {
            Some(record) => {
                debug!(
                    target: "archive_queue::engine",
                    "Restoring watchdog (deadline {}, period {} ms)",
                    record.deadline_at,
                    record.period_ms
                );
                self.start_timer(record.deadline_at, record.period_ms);
            }
            None => self.stop_timer(),
        }
        Ok(record)
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn start_timer(&self, deadline_at: i64, period_ms: i64) {
        let on_alarm = Arc::clone(&self.on_alarm);
        let period_ms = period_ms.max(MIN_PERIOD_MS);
        let handle = tokio::spawn(async move {
            let mut deadline_at = deadline_at;
            loop {
                let wait_ms = u64::try_from(deadline_at.saturating_sub(now_millis())).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                on_alarm();
                deadline_at = now_millis().saturating_add(period_ms);
            }
        });
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_timer(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for QueueWatchdog {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
