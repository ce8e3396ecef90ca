//! ferry-core - Offline mutation queue for Ferry
//!
//! This crate contains the durable task queue, the drain orchestrator that
//! replays queued mutations once connectivity returns, and the field-level
//! conflict resolver used when a local draft and the server copy disagree.

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{FerryConfig, SyncSettings};
pub use conflict::{detect_conflicts, Choice, ConflictSession, Hydration, Resolution};
pub use error::{Error, Result};
pub use models::{
    Draft, Snapshot, SyncTask, TaskId, TaskKind, TaskStatus, UnrecognizedTask,
};
pub use queue::SyncQueue;
pub use services::OfflineStore;
pub use sync::{
    DispatchError, DrainOutcome, DrainReport, HttpDispatcher, NetworkMonitor, SyncOrchestrator,
    TaskDispatcher,
};
