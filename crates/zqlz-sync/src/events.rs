//! Side channel for sync progress and failures

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// What caused a reconciliation cycle to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// The user asked for a sync
    Manual,
    /// A session token was obtained again
    Reauthenticated,
    /// The device came back online
    NetworkRestored,
    /// The service was started
    Startup,
    /// Periodic timer
    Timer,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Reauthenticated => "reauthenticated",
            Self::NetworkRestored => "network_restored",
            Self::Startup => "startup",
            Self::Timer => "timer",
        }
    }
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cycle did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotAuthenticated,
    Offline,
}

/// Counts of operations applied during one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CycleSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    CycleStarted { trigger: SyncTrigger },
    CycleCompleted(CycleSummary),
    CycleFailed(String),
    CycleSkipped(SkipReason),
    PushCompleted { pushed: usize },
    PushFailed(String),
}

/// Broadcasts [`SyncEvent`]s to any number of subscribers.
///
/// Sending never fails; events emitted while nobody listens are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: SyncEvent) {
        tracing::trace!(?event, "sync event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
