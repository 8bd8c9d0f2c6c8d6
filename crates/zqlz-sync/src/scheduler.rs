//! Background task that turns sync triggers into reconciliation cycles

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use zqlz_core::{Result, ZqlzError};

use crate::engine::{CycleOutcome, ReconciliationEngine};
use crate::events::SyncTrigger;

const TRIGGER_CAPACITY: usize = 16;

/// Runs one cycle per trigger, plus one per tick when an interval is set.
///
/// Cycles serialize on the engine, so triggers that arrive during a cycle
/// queue up behind it. Dropping the scheduler stops the task.
pub struct SyncScheduler {
    engine: Arc<ReconciliationEngine>,
    tx: mpsc::Sender<SyncTrigger>,
    task: JoinHandle<()>,
}

impl SyncScheduler {
    /// Spawn the scheduler task. Must be called from within a tokio runtime.
    pub fn start(engine: Arc<ReconciliationEngine>, interval: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
        let task = tokio::spawn(run(Arc::clone(&engine), rx, interval));
        tracing::debug!(?interval, "sync scheduler started");
        Self { engine, tx, task }
    }

    /// Queue a cycle
    pub async fn trigger(&self, trigger: SyncTrigger) -> Result<()> {
        self.tx
            .send(trigger)
            .await
            .map_err(|_| ZqlzError::Other("sync scheduler has stopped".to_string()))
    }

    /// Queue a cycle without waiting. Returns false if the queue is full or
    /// the scheduler has stopped.
    pub fn try_trigger(&self, trigger: SyncTrigger) -> bool {
        self.tx.try_send(trigger).is_ok()
    }

    pub fn is_syncing(&self) -> bool {
        self.engine.is_syncing()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    engine: Arc<ReconciliationEngine>,
    mut rx: mpsc::Receiver<SyncTrigger>,
    interval: Option<Duration>,
) {
    let mut ticker = interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        let trigger = match ticker.as_mut() {
            Some(ticker) => tokio::select! {
                received = rx.recv() => match received {
                    Some(trigger) => trigger,
                    None => break,
                },
                _ = ticker.tick() => SyncTrigger::Timer,
            },
            None => match rx.recv().await {
                Some(trigger) => trigger,
                None => break,
            },
        };

        match engine.run_cycle(trigger).await {
            Ok(CycleOutcome::Completed(summary)) => {
                tracing::debug!(%trigger, changes = summary.total(), "scheduled sync finished");
            }
            Ok(CycleOutcome::Skipped(reason)) => {
                tracing::debug!(%trigger, ?reason, "scheduled sync skipped");
            }
            Err(e) => {
                tracing::warn!(%trigger, error = %e, "scheduled sync failed");
            }
        }
    }

    tracing::debug!("sync scheduler stopped");
}
