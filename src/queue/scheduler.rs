//! Single-worker run queue for the engine
//!
//! Every trigger source (commands, tab events, the watchdog, the engine's own
//! follow-ups) appends to one unbounded channel. A single task drains it and
//! runs one engine body at a time, so run bodies never overlap. A run that
//! fails or panics is logged and the worker moves on to the next trigger.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::types::QueueTrigger;

struct ScheduledRun {
    trigger: QueueTrigger,
    done: oneshot::Sender<()>,
}

/// Completion handle for one scheduled run
#[derive(Debug)]
pub struct RunTicket {
    done: oneshot::Receiver<()>,
}

impl RunTicket {
    /// Resolve once this particular run finished (successfully or not).
    ///
    /// Must not be awaited from inside a run body: the worker would wait on
    /// itself.
    pub async fn wait(self) {
        let _ = self.done.await;
    }
}

pub struct EngineScheduler {
    tx: mpsc::UnboundedSender<ScheduledRun>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    worker: JoinHandle<()>,
}

impl EngineScheduler {
    /// Spawn the worker. `runner` is invoked once per trigger, never
    /// concurrently with itself.
    pub fn spawn<F, Fut>(runner: F) -> Self
    where
        F: Fn(QueueTrigger) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<ScheduledRun>();
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        let worker_pending = Arc::clone(&pending);
        let worker_idle = Arc::clone(&idle);
        let worker = tokio::spawn(async move {
            while let Some(run) = rx.recv().await {
                let label = run.trigger.as_str();
                debug!(target: "archive_queue::engine", "Running queue engine ({label})");
                match AssertUnwindSafe(runner(run.trigger)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(target: "archive_queue::engine", "Queue engine run ({label}) failed: {e:#}");
                    }
                    Err(_) => {
                        error!(target: "archive_queue::engine", "Queue engine run ({label}) panicked");
                    }
                }
                let _ = run.done.send(());
                if worker_pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    worker_idle.notify_waiters();
                }
            }
        });

        Self {
            tx,
            pending,
            idle,
            worker,
        }
    }

    /// Append a run to the tail of the queue.
    pub fn schedule(&self, trigger: QueueTrigger) -> RunTicket {
        let (done, rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(rejected) = self.tx.send(ScheduledRun { trigger, done }) {
            warn!(
                target: "archive_queue::engine",
                "Queue worker is gone, dropping trigger {}",
                rejected.0.trigger
            );
            if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.idle.notify_waiters();
            }
        }
        RunTicket { done: rx }
    }

    /// Runs queued or in progress
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once nothing is queued or running.
    ///
    /// Runs scheduled by other runs keep the scheduler busy, so this waits
    /// for the whole cascade to settle.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for EngineScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
