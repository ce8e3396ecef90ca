//! Database layer for Ferry

mod connection;
mod draft_repository;
mod migrations;
mod queue_repository;

pub use connection::Database;
pub use draft_repository::{DraftRepository, LibSqlDraftRepository};
pub use queue_repository::{LibSqlSyncQueueRepository, SyncQueueRepository};
