//! ZQLZ Sync - Local-first synchronization of saved connections
//!
//! Connections live in a local record store and are mirrored to a remote
//! store. This crate provides:
//!
//! - `ReconciliationEngine` - Pulls the remote diff and merges it locally
//! - `MutationOutbox` - Commits local edits and pushes them upstream
//! - `ReadinessGate` - Await the end of the current sync cycle
//! - `ConnectionSyncService` - The edit surface used by the app
//!
//! Passwords of connections in [`zqlz_core::SyncMode::CloudWithoutPassword`]
//! never leave the device, and a remote update without a password never
//! erases the one stored locally.

pub mod config;
pub mod engine;
pub mod events;
pub mod gate;
pub mod http;
pub mod merge;
pub mod outbox;
pub mod remote;
pub mod scheduler;
pub mod service;

pub use config::SyncConfig;
pub use engine::{CycleOutcome, ReconciliationEngine};
pub use events::{CycleSummary, EventBus, SkipReason, SyncEvent, SyncTrigger};
pub use gate::{CycleGuard, ReadinessGate};
pub use http::HttpRemoteStore;
pub use merge::{MergeOutcome, resolve};
pub use outbox::{
    CommitReceipt, LocalMutation, LocalTransaction, MutationEnvelope, MutationOutbox, PushHandle,
};
pub use remote::{OutboundBatch, OutboundUpdate, RemoteStore, SessionState, StaticSession};
pub use scheduler::SyncScheduler;
pub use service::ConnectionSyncService;
