//! Readiness gate for reconciliation cycles
//!
//! Callers that need the result of "the sync that is happening now" await
//! [`ReadinessGate::wait_for_current_cycle`] instead of polling. Each cycle
//! gets a fresh gate; the previous gate is resolved together with the new
//! one, so a waiter registered just before a cycle starts is released when
//! that cycle finishes.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

type Slot = Arc<watch::Sender<bool>>;

fn unresolved() -> Slot {
    let (tx, _rx) = watch::channel(false);
    Arc::new(tx)
}

pub struct ReadinessGate {
    current: Mutex<Slot>,
}

impl ReadinessGate {
    /// The initial gate is unresolved until the first cycle finishes
    pub fn new() -> Self {
        Self {
            current: Mutex::new(unresolved()),
        }
    }

    /// Completes when the gate open at call time is resolved
    pub fn wait_for_current_cycle(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.current.lock().subscribe();
        async move {
            // A dropped sender counts as resolved.
            let _ = rx.wait_for(|resolved| *resolved).await;
        }
    }

    /// Install a fresh gate for a new cycle
    pub fn new_cycle(&self) -> CycleGuard {
        let next = unresolved();
        let previous = std::mem::replace(&mut *self.current.lock(), Arc::clone(&next));
        CycleGuard {
            previous,
            current: next,
            resolved: false,
        }
    }

    /// Release everyone waiting on the open gate
    pub fn resolve_current_cycle(&self) {
        self.current.lock().send_replace(true);
    }

    pub fn is_resolved(&self) -> bool {
        *self.current.lock().borrow()
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the previous and the current gate of a cycle, at the latest on drop
#[must_use = "dropping the guard resolves the cycle immediately"]
pub struct CycleGuard {
    previous: Slot,
    current: Slot,
    resolved: bool,
}

impl CycleGuard {
    pub fn resolve(mut self) {
        self.resolve_inner();
    }

    fn resolve_inner(&mut self) {
        if !self.resolved {
            self.previous.send_replace(true);
            self.current.send_replace(true);
            self.resolved = true;
        }
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.resolve_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_initial_gate_is_unresolved() {
        let gate = ReadinessGate::new();
        assert!(!gate.is_resolved());
        assert!(timeout(SHORT, gate.wait_for_current_cycle()).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_releases_waiters() {
        let gate = ReadinessGate::new();
        let waiters: Vec<_> = (0..3).map(|_| gate.wait_for_current_cycle()).collect();

        gate.resolve_current_cycle();

        for waiter in waiters {
            timeout(SHORT, waiter).await.unwrap();
        }
        assert!(gate.is_resolved());
    }

    #[tokio::test]
    async fn test_waiter_before_new_cycle_released_by_that_cycle() {
        let gate = ReadinessGate::new();
        let early = gate.wait_for_current_cycle();

        let guard = gate.new_cycle();
        let late = gate.wait_for_current_cycle();

        let early = tokio::spawn(early);
        let late = tokio::spawn(late);
        tokio::time::sleep(SHORT).await;
        assert!(!early.is_finished());
        assert!(!late.is_finished());

        guard.resolve();
        timeout(SHORT, early).await.unwrap().unwrap();
        timeout(SHORT, late).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_resolves() {
        let gate = ReadinessGate::new();
        let waiter = {
            let _guard = gate.new_cycle();
            gate.wait_for_current_cycle()
        };
        timeout(SHORT, waiter).await.unwrap();
    }

    #[tokio::test]
    async fn test_each_cycle_gets_a_fresh_gate() {
        let gate = ReadinessGate::new();
        gate.new_cycle().resolve();
        assert!(gate.is_resolved());

        let guard = gate.new_cycle();
        assert!(!gate.is_resolved());
        let waiter = tokio::spawn(gate.wait_for_current_cycle());
        tokio::time::sleep(SHORT).await;
        assert!(!waiter.is_finished());

        drop(guard);
        timeout(SHORT, waiter).await.unwrap().unwrap();
    }
}
