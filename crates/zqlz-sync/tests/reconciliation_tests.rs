//! Reconciliation cycles against a fake remote

mod common;

use chrono::Duration as ChronoDuration;
use common::{FakeRemote, TestDevice, init_tracing, postgres_record};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;
use zqlz_core::{ConnectionRecord, RemoteChange, SyncMode, ZqlzError};
use zqlz_internal_storage::{RecordStore, SqliteRecordStore};
use zqlz_sync::{
    CycleOutcome, CycleSummary, EventBus, ReconciliationEngine, SkipReason, StaticSession,
    SyncEvent, SyncTrigger,
};

struct Harness {
    store: Arc<SqliteRecordStore>,
    remote: Arc<FakeRemote>,
    session: Arc<StaticSession>,
    events: EventBus,
    engine: Arc<ReconciliationEngine>,
}

fn harness() -> Harness {
    init_tracing();
    let store = Arc::new(SqliteRecordStore::in_memory().unwrap());
    let remote = FakeRemote::new();
    let session = Arc::new(StaticSession::authenticated("token"));
    let events = EventBus::new();
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        remote.clone(),
        session.clone(),
        events.clone(),
    ));
    Harness {
        store,
        remote,
        session,
        events,
        engine,
    }
}

/// The cloud copy of `local` with a different string and a newer timestamp
fn cloud_update(
    local: &ConnectionRecord,
    raw: &str,
    sync_mode: SyncMode,
) -> zqlz_core::ConnectionRecordForTransport {
    let mut cloud = local.for_transport().unwrap();
    cloud.connection_string = raw.to_string();
    cloud.sync_mode = Some(sync_mode);
    cloud.updated_at = local.updated_at + ChronoDuration::seconds(30);
    cloud
}

async fn run(h: &Harness) -> zqlz_core::Result<CycleOutcome> {
    h.engine.run_cycle(SyncTrigger::Manual).await
}

mod scenario_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_password_survives_password_less_update() {
        let h = harness();
        let local = postgres_record("A", "postgres://u:secret@h/db", SyncMode::CloudWithoutPassword);
        h.store.upsert(&local).unwrap();
        h.remote.put(cloud_update(
            &local,
            "postgres://u@h/db",
            SyncMode::CloudWithoutPassword,
        ));

        let outcome = run(&h).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Completed(CycleSummary {
                inserted: 0,
                updated: 1,
                deleted: 0
            })
        );
        let stored = h.store.get(local.id).unwrap().unwrap();
        assert_eq!(stored.connection_string, "postgres://u:secret@h/db");
        assert!(stored.password_present_locally());
    }

    #[tokio::test]
    async fn test_cloud_password_replaces_local() {
        let h = harness();
        let local = postgres_record("A", "postgres://u:secret@h/db", SyncMode::CloudWithoutPassword);
        h.store.upsert(&local).unwrap();
        h.remote
            .put(cloud_update(&local, "postgres://u:newpass@h/db", SyncMode::Cloud));

        run(&h).await.unwrap();

        let stored = h.store.get(local.id).unwrap().unwrap();
        assert_eq!(stored.connection_string, "postgres://u:newpass@h/db");
        assert_eq!(stored.sync_mode, SyncMode::Cloud);
    }

    #[tokio::test]
    async fn test_insert_of_known_record_keeps_local_password() {
        let h = harness();
        let local = postgres_record("A", "postgres://u:secret@h/db", SyncMode::CloudWithoutPassword);
        h.store.upsert(&local).unwrap();
        h.remote.script(vec![RemoteChange::Insert(cloud_update(
            &local,
            "postgres://u@h/db",
            SyncMode::CloudWithoutPassword,
        ))]);

        let outcome = run(&h).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Completed(CycleSummary {
                inserted: 0,
                updated: 1,
                deleted: 0
            })
        );
        let stored = h.store.get(local.id).unwrap().unwrap();
        assert_eq!(stored.connection_string, "postgres://u:secret@h/db");
    }

    #[tokio::test]
    async fn test_unknown_delete_aborts_batch_and_keeps_earlier_operations() {
        let h = harness();
        let a = postgres_record("A", "postgres://u@h/a", SyncMode::Cloud);
        let c = postgres_record("C", "postgres://u@h/c", SyncMode::Cloud);
        let missing = Uuid::new_v4();
        h.remote.script(vec![
            RemoteChange::Insert(a.for_transport().unwrap()),
            RemoteChange::Delete(missing),
            RemoteChange::Insert(c.for_transport().unwrap()),
        ]);
        let mut events = h.events.subscribe();

        let err = run(&h).await.unwrap_err();

        assert!(matches!(err, ZqlzError::RecordNotFound(id) if id == missing));
        assert!(h.store.get(a.id).unwrap().is_some());
        assert!(h.store.get(c.id).unwrap().is_none());
        assert!(h.engine.gate().is_resolved());

        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::CycleStarted {
                trigger: SyncTrigger::Manual
            }
        );
        assert!(matches!(events.recv().await.unwrap(), SyncEvent::CycleFailed(_)));
    }
}

mod property_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_second_cycle_changes_nothing() {
        let h = harness();
        let existing = postgres_record("A", "postgres://u:secret@h/a", SyncMode::CloudWithoutPassword);
        h.store.upsert(&existing).unwrap();
        h.remote.put(cloud_update(
            &existing,
            "postgres://u@h2/a",
            SyncMode::CloudWithoutPassword,
        ));
        h.remote.put(
            postgres_record("B", "postgres://u@h/b", SyncMode::Cloud)
                .for_transport()
                .unwrap(),
        );

        let first = run(&h).await.unwrap();
        assert_eq!(
            first,
            CycleOutcome::Completed(CycleSummary {
                inserted: 1,
                updated: 1,
                deleted: 0
            })
        );
        let after_first = h.store.list_all().unwrap();

        let second = run(&h).await.unwrap();
        assert_eq!(second, CycleOutcome::Completed(CycleSummary::default()));
        assert_eq!(h.store.list_all().unwrap(), after_first);
        assert_eq!(h.remote.diff_calls(), 2);
    }

    #[tokio::test]
    async fn test_remote_delete_removes_local_record() {
        let h = harness();
        let local = postgres_record("A", "postgres://u@h/a", SyncMode::Cloud);
        h.store.upsert(&local).unwrap();
        h.remote.put(local.for_transport().unwrap());
        h.remote.delete(local.id);

        let outcome = run(&h).await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Completed(CycleSummary {
                inserted: 0,
                updated: 0,
                deleted: 1
            })
        );
        assert!(h.store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_insert_without_password_needs_password() {
        let h = harness();
        let other_device = postgres_record(
            "shared",
            "postgres://u:secret@h/db",
            SyncMode::CloudWithoutPassword,
        );
        h.remote.put(other_device.for_transport().unwrap());

        run(&h).await.unwrap();

        let stored = h.store.get(other_device.id).unwrap().unwrap();
        assert_eq!(stored.connection_string, "postgres://u@h/db");
        assert!(stored.needs_password());
    }
}

mod precondition_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_skipped_without_token() {
        let h = harness();
        h.session.set_token(None);
        let mut events = h.events.subscribe();

        let outcome = run(&h).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NotAuthenticated));
        assert_eq!(h.remote.diff_calls(), 0);
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::CycleSkipped(SkipReason::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn test_skipped_when_offline() {
        let h = harness();
        h.session.set_online(false);

        let outcome = run(&h).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Offline));
        assert_eq!(h.remote.diff_calls(), 0);
    }

    #[tokio::test]
    async fn test_skip_leaves_waiters_pending() {
        let h = harness();
        h.session.set_online(false);
        let waiter = h.engine.wait_for_current_cycle();

        let outcome = run(&h).await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::Offline));
        assert!(!h.engine.gate().is_resolved());
        assert!(timeout(Duration::from_millis(50), waiter).await.is_err());
    }

    #[tokio::test]
    async fn test_waiter_pending_across_skip_is_released_by_next_cycle() {
        let h = harness();
        h.session.set_online(false);
        let waiter = tokio::spawn(h.engine.wait_for_current_cycle());

        run(&h).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        h.session.set_online(true);
        run(&h).await.unwrap();
        timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_store_untouched() {
        let h = harness();
        let local = postgres_record("A", "postgres://u:secret@h/a", SyncMode::CloudWithoutPassword);
        h.store.upsert(&local).unwrap();
        h.remote.put(cloud_update(&local, "postgres://u@other/a", SyncMode::Cloud));
        h.remote.fail_diff.store(true, Ordering::SeqCst);

        let waiter = h.engine.wait_for_current_cycle();
        let err = run(&h).await.unwrap_err();

        assert!(err.is_transport());
        assert_eq!(h.store.list_all().unwrap(), vec![local]);
        timeout(Duration::from_millis(100), waiter).await.unwrap();
    }
}

mod gate_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_waiters_released_by_the_cycle_in_flight() {
        let h = harness();
        h.remote.set_diff_delay(Duration::from_millis(200));

        let engine = h.engine.clone();
        let cycle = tokio::spawn(async move { engine.run_cycle(SyncTrigger::Manual).await });

        // Wait until the cycle has opened its gate.
        while h.remote.diff_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.engine.is_syncing());
        let waiter = tokio::spawn(h.engine.wait_for_current_cycle());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap();
        cycle.await.unwrap().unwrap();
        assert!(!h.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_dropped_cycle_still_resolves_gate() {
        let h = harness();
        h.remote.set_diff_delay(Duration::from_secs(60));

        let engine = h.engine.clone();
        let cycle = tokio::spawn(async move { engine.run_cycle(SyncTrigger::Manual).await });
        while h.remote.diff_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let waiter = h.engine.wait_for_current_cycle();

        cycle.abort();

        timeout(Duration::from_millis(500), waiter).await.unwrap();
    }

    #[tokio::test]
    async fn test_cycles_do_not_overlap() {
        let h = harness();
        h.remote.set_diff_delay(Duration::from_millis(50));

        let (first, second) = tokio::join!(run(&h), run(&h));

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(h.remote.diff_calls(), 2);
        assert_eq!(h.remote.max_diffs_in_flight(), 1);
    }
}

#[tokio::test]
async fn test_service_waits_for_sync() {
    let remote = FakeRemote::new();
    let device = TestDevice::new(remote.clone());
    remote.put(
        postgres_record("shared", "postgres://u@h/db", SyncMode::Cloud)
            .for_transport()
            .unwrap(),
    );

    let waiter = device.service.wait_for_sync();
    device.service.sync_now().await.unwrap();
    timeout(Duration::from_millis(100), waiter).await.unwrap();

    assert_eq!(device.service.list().unwrap().len(), 1);
}
