//! Reconciliation engine
//!
//! One cycle pulls the remote diff for the local snapshot and applies it,
//! operation by operation, through the merge resolver. Cycles never overlap
//! and every cycle that starts resolves its readiness gate, whether it
//! succeeds, fails or is dropped halfway.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use zqlz_core::{RemoteChange, Result};
use zqlz_internal_storage::{RecordStore, StoreOp};

use crate::events::{CycleSummary, EventBus, SkipReason, SyncEvent, SyncTrigger};
use crate::gate::ReadinessGate;
use crate::merge::{self, MergeOutcome};
use crate::remote::{RemoteStore, SessionState};

/// Result of asking for a reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    Skipped(SkipReason),
}

pub struct ReconciliationEngine {
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionState>,
    gate: ReadinessGate,
    events: EventBus,
    cycle_lock: Mutex<()>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionState>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            remote,
            session,
            gate: ReadinessGate::new(),
            events,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Completes when the cycle in flight (or the next one, if none is
    /// running yet) has finished
    pub fn wait_for_current_cycle(&self) -> impl Future<Output = ()> + Send + 'static {
        self.gate.wait_for_current_cycle()
    }

    /// Whether a cycle is currently running
    pub fn is_syncing(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    fn skip_reason(&self) -> Option<SkipReason> {
        if self.session.bearer_token().is_none() {
            Some(SkipReason::NotAuthenticated)
        } else if !self.session.is_online() {
            Some(SkipReason::Offline)
        } else {
            None
        }
    }

    /// Run one reconciliation cycle.
    ///
    /// Without a session token or without network the cycle is skipped. A
    /// skip touches neither the store nor the gate, so waiters stay pending
    /// until a cycle actually runs.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> Result<CycleOutcome> {
        if let Some(reason) = self.skip_reason() {
            tracing::debug!(?reason, "skipping reconciliation");
            self.events.emit(SyncEvent::CycleSkipped(reason));
            return Ok(CycleOutcome::Skipped(reason));
        }

        let _cycle = self.cycle_lock.lock().await;
        let guard = self.gate.new_cycle();
        self.events.emit(SyncEvent::CycleStarted { trigger });

        let result = self.reconcile().await;
        guard.resolve();

        match result {
            Ok(summary) => {
                tracing::info!(
                    inserted = summary.inserted,
                    updated = summary.updated,
                    deleted = summary.deleted,
                    "reconciliation finished"
                );
                self.events.emit(SyncEvent::CycleCompleted(summary));
                Ok(CycleOutcome::Completed(summary))
            }
            Err(e) => {
                tracing::error!(error = %e, "reconciliation failed");
                self.events.emit(SyncEvent::CycleFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> Result<CycleSummary> {
        let snapshot = self.store.snapshot()?;
        tracing::debug!(count = snapshot.len(), "requesting remote diff");

        let changes = self.remote.diff(&snapshot).await?;
        tracing::debug!(count = changes.len(), "applying remote changes");

        let mut summary = CycleSummary::default();
        for change in changes {
            self.apply_change(change, &mut summary)?;
        }
        Ok(summary)
    }

    /// Merge and commit one remote change in a single store transaction
    fn apply_change(&self, change: RemoteChange, summary: &mut CycleSummary) -> Result<()> {
        let id = change.id();
        let kind = change.kind();
        let mut existed = false;
        let mut deleted = false;

        self.store
            .modify(
                id,
                Box::new(|local| {
                    existed = local.is_some();
                    match merge::resolve(local, change)? {
                        MergeOutcome::Upsert {
                            record,
                            password_present_locally,
                        } => {
                            tracing::trace!(record_id = %id, kind, password_present_locally, "upserting");
                            Ok(StoreOp::Upsert(record))
                        }
                        MergeOutcome::Delete { id } => {
                            tracing::trace!(record_id = %id, "deleting");
                            deleted = true;
                            Ok(StoreOp::Delete(id))
                        }
                    }
                }),
            )
            .inspect_err(|e| {
                tracing::warn!(record_id = %id, kind, error = %e, "cannot apply remote change");
            })?;

        if deleted {
            summary.deleted += 1;
        } else if existed {
            summary.updated += 1;
        } else {
            summary.inserted += 1;
        }
        Ok(())
    }
}
