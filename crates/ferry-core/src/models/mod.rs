//! Data models for Ferry

mod backup;
mod draft;
mod sync_task;

pub use backup::{Backup, BackupId};
pub use draft::Draft;
pub use sync_task::{
    SyncTask, TaskId, TaskKind, TaskStatus, UnknownTaskKind, UnrecognizedTask,
};

/// Plain key/value view of an entity, as buffered locally or fetched upstream
pub type Snapshot = serde_json::Map<String, serde_json::Value>;
