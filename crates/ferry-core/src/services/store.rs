//! Shared offline store handle used by the queue, the orchestrator and draft-saving callers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    Database, DraftRepository, LibSqlDraftRepository, LibSqlSyncQueueRepository,
    SyncQueueRepository,
};
use crate::models::{Backup, Draft, Snapshot, SyncTask, TaskId, TaskStatus, UnrecognizedTask};
use crate::Result;

/// Thread-safe handle to the durable local store.
///
/// A handle built with [`OfflineStore::unavailable`] has no backing database:
/// reads come back empty and writes are discarded, so callers running without
/// durable storage need no special casing.
#[derive(Clone)]
pub struct OfflineStore {
    db: Option<Arc<Mutex<Database>>>,
    db_path: Option<PathBuf>,
}

impl OfflineStore {
    /// Open a store backed by a database file at the given path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Some(Arc::new(Mutex::new(db))),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Some(Arc::new(Mutex::new(db))),
            db_path: None,
        })
    }

    /// A store for environments without durable local storage.
    pub const fn unavailable() -> Self {
        Self {
            db: None,
            db_path: None,
        }
    }

    /// Open the store at `db_path`, or fall back to [`OfflineStore::unavailable`].
    pub async fn open_or_unavailable(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        match Self::open_path(db_path.clone()).await {
            Ok(store) => store,
            Err(error) => {
                tracing::warn!(
                    "Offline store unavailable at {}: {error}. Continuing without persistence.",
                    db_path.display()
                );
                Self::unavailable()
            }
        }
    }

    /// Whether writes reach durable storage.
    pub const fn is_available(&self) -> bool {
        self.db.is_some()
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Create missing collections and indexes. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let db = db.lock().await;
        db.initialize().await
    }

    /// Insert or replace a task.
    pub async fn put_task(&self, task: &SyncTask) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let db = db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .put(task)
            .await
    }

    /// Fetch a task by id.
    pub async fn get_task(&self, id: &TaskId) -> Result<Option<SyncTask>> {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        let db = db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .get(id)
            .await
    }

    /// List tasks in any of the given statuses, oldest first.
    pub async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<SyncTask>> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let db = db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .list_by_status(statuses)
            .await
    }

    /// Delete a task, returning whether it existed.
    pub async fn delete_task(&self, id: &TaskId) -> Result<bool> {
        let Some(db) = &self.db else {
            return Ok(false);
        };
        let db = db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .delete(id)
            .await
    }

    /// Read, modify and write back one task while holding the store lock.
    ///
    /// Returns the updated task, or `None` when the id is unknown.
    pub async fn update_task<F>(&self, id: &TaskId, update: F) -> Result<Option<SyncTask>>
    where
        F: FnOnce(&mut SyncTask) + Send,
    {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        let db = db.lock().await;
        let repo = LibSqlSyncQueueRepository::new(db.connection());

        let Some(mut task) = repo.get(id).await? else {
            return Ok(None);
        };
        update(&mut task);
        repo.put(&task).await?;
        Ok(Some(task))
    }

    /// Task counts per status.
    pub async fn count_tasks(&self) -> Result<Vec<(TaskStatus, usize)>> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let db = db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .count_by_status()
            .await
    }

    /// Dead-letter drain-eligible tasks whose stored kind is not recognised.
    pub async fn dead_letter_unknown_kinds(&self, now: i64) -> Result<usize> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let db = db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .dead_letter_unknown_kinds(now)
            .await
    }

    /// Tasks whose stored kind is not recognised, in any status.
    pub async fn list_unrecognized_tasks(&self) -> Result<Vec<UnrecognizedTask>> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let db = db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .list_unrecognized()
            .await
    }

    /// Save the latest local snapshot of an entity, replacing any previous draft.
    pub async fn save_draft(&self, id: &str, data: Snapshot) -> Result<Draft> {
        let draft = Draft::new(id, data);
        let Some(db) = &self.db else {
            return Ok(draft);
        };
        let db = db.lock().await;
        LibSqlDraftRepository::new(db.connection())
            .put(&draft)
            .await?;
        Ok(draft)
    }

    /// Fetch the draft for an entity.
    pub async fn get_draft(&self, id: &str) -> Result<Option<Draft>> {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        let db = db.lock().await;
        LibSqlDraftRepository::new(db.connection()).get(id).await
    }

    /// Drop the draft for an entity once its content is confirmed upstream.
    pub async fn clear_draft(&self, id: &str) -> Result<bool> {
        let Some(db) = &self.db else {
            return Ok(false);
        };
        let db = db.lock().await;
        LibSqlDraftRepository::new(db.connection())
            .delete(id)
            .await
    }

    /// Append a safety backup of a form's data.
    pub async fn save_backup(&self, form_id: &str, data: Snapshot) -> Result<Backup> {
        let backup = Backup::new(form_id, data);
        let Some(db) = &self.db else {
            return Ok(backup);
        };
        let db = db.lock().await;
        LibSqlDraftRepository::new(db.connection())
            .put_backup(&backup)
            .await?;
        Ok(backup)
    }

    /// Backups for a form, newest first.
    pub async fn list_backups(&self, form_id: &str) -> Result<Vec<Backup>> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let db = db.lock().await;
        LibSqlDraftRepository::new(db.connection())
            .list_backups(form_id)
            .await
    }
}
