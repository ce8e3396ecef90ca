//! Typed task queue over the offline store.
//!
//! The queue owns every status transition a task goes through:
//!
//! ```text
//! pending -> syncing -> (deleted)
//!                    -> failed -> syncing -> ...
//!                    -> dead       (non-retryable, or attempts exhausted)
//!                    -> conflict   (server changed after the task was queued)
//! ```
//!
//! `failed` tasks are picked up again by the next drain. `dead` and
//! `conflict` tasks wait for [`SyncQueue::requeue`] or
//! [`SyncQueue::resolve_conflict`].

use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{SyncTask, TaskId, TaskKind, TaskStatus, UnrecognizedTask};
use crate::services::OfflineStore;
use crate::util::unix_millis_now;

/// Attempts after which a failing task is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

const DRAIN_ELIGIBLE: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::Failed];

/// Task queue API used by callers (enqueue) and the orchestrator (transitions).
#[derive(Clone)]
pub struct SyncQueue {
    store: OfflineStore,
    max_attempts: Option<u32>,
}

impl SyncQueue {
    /// Create a queue over the given store with the default attempt cap
    pub const fn new(store: OfflineStore) -> Self {
        Self {
            store,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }

    /// Set the attempt cap; `None` retries forever
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// The underlying store handle
    pub const fn store(&self) -> &OfflineStore {
        &self.store
    }

    /// Capture a mutation for later delivery.
    ///
    /// The payload is stored as-is and never inspected.
    pub async fn enqueue(&self, kind: TaskKind, payload: Value) -> Result<SyncTask> {
        let task = SyncTask::new(kind, payload);
        self.store.put_task(&task).await?;
        tracing::debug!("Enqueued {} task {}", task.kind, task.id);
        Ok(task)
    }

    /// Look up a task by id
    pub async fn get(&self, id: &TaskId) -> Result<Option<SyncTask>> {
        self.store.get_task(id).await
    }

    /// Tasks the next drain should attempt, oldest first.
    ///
    /// Includes `failed` tasks. Rows whose kind is not recognised are moved to
    /// `dead` instead of being returned.
    pub async fn list_pending(&self) -> Result<Vec<SyncTask>> {
        let quarantined = self
            .store
            .dead_letter_unknown_kinds(unix_millis_now())
            .await?;
        if quarantined > 0 {
            tracing::warn!("Dead-lettered {quarantined} task(s) with an unknown kind");
        }
        self.store.list_tasks_by_status(&DRAIN_ELIGIBLE).await
    }

    /// All tasks currently in `status`, oldest first
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<SyncTask>> {
        self.store.list_tasks_by_status(&[status]).await
    }

    /// Number of tasks waiting for a drain
    pub async fn depth(&self) -> Result<usize> {
        let counts = self.store.count_tasks().await?;
        Ok(counts
            .into_iter()
            .filter(|(status, _)| status.is_drain_eligible())
            .map(|(_, count)| count)
            .sum())
    }

    /// Task counts per status
    pub async fn counts(&self) -> Result<Vec<(TaskStatus, usize)>> {
        self.store.count_tasks().await
    }

    pub async fn mark_syncing(&self, id: &TaskId) -> Result<Option<SyncTask>> {
        self.store
            .update_task(id, |task| {
                task.status = TaskStatus::Syncing;
                task.error = None;
                task.updated_at = unix_millis_now();
            })
            .await
    }

    /// Record a successful dispatch by deleting the task
    pub async fn mark_succeeded(&self, id: &TaskId) -> Result<bool> {
        self.store.delete_task(id).await
    }

    /// Record a failed dispatch.
    ///
    /// Increments `attempts`. The task becomes `dead` when the failure is not
    /// retryable or the attempt cap is reached, `failed` otherwise.
    pub async fn mark_failed(
        &self,
        id: &TaskId,
        error: &str,
        retryable: bool,
    ) -> Result<Option<SyncTask>> {
        let message = error.to_string();
        let max_attempts = self.max_attempts;
        self.store
            .update_task(id, |task| {
                task.attempts = task.attempts.saturating_add(1);
                let exhausted = max_attempts.is_some_and(|max| task.attempts >= max);
                task.status = if !retryable || exhausted {
                    TaskStatus::Dead
                } else {
                    TaskStatus::Failed
                };
                task.error = Some(message);
                task.updated_at = unix_millis_now();
            })
            .await
    }

    /// Park a task until its conflict with the server copy is resolved
    pub async fn mark_conflict(&self, id: &TaskId, message: &str) -> Result<Option<SyncTask>> {
        let message = message.to_string();
        self.store
            .update_task(id, |task| {
                task.status = TaskStatus::Conflict;
                task.error = Some(message);
                task.updated_at = unix_millis_now();
            })
            .await
    }

    /// Delete a task regardless of status (success or operator cancellation)
    pub async fn remove(&self, id: &TaskId) -> Result<bool> {
        self.store.delete_task(id).await
    }

    /// Give a `dead`, `failed` or `conflict` task a fresh start
    pub async fn requeue(&self, id: &TaskId) -> Result<SyncTask> {
        let task = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        if matches!(task.status, TaskStatus::Pending | TaskStatus::Syncing) {
            return Err(Error::InvalidInput(format!(
                "task {id} is {} and cannot be requeued",
                task.status
            )));
        }

        self.store
            .update_task(id, |task| {
                task.status = TaskStatus::Pending;
                task.attempts = 0;
                task.error = None;
                task.updated_at = unix_millis_now();
            })
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))
    }

    /// Drop a `conflict` task once the caller has persisted the merged result
    pub async fn resolve_conflict(&self, id: &TaskId) -> Result<()> {
        let task = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        if task.status != TaskStatus::Conflict {
            return Err(Error::InvalidInput(format!(
                "task {id} is {}, not in conflict",
                task.status
            )));
        }
        self.store.delete_task(id).await?;
        Ok(())
    }

    /// Return tasks stranded in `syncing` to `pending`.
    ///
    /// Only tasks whose last update is at least `stale_after` old are touched,
    /// so a dispatch still in flight in another drainer sharing the store is
    /// left alone. `Duration::ZERO` recovers every `syncing` task.
    pub async fn recover_interrupted(&self, stale_after: Duration) -> Result<usize> {
        let stale_ms = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
        let cutoff = unix_millis_now().saturating_sub(stale_ms);

        let mut recovered = 0;
        for task in self.list_by_status(TaskStatus::Syncing).await? {
            if task.updated_at > cutoff {
                continue;
            }
            let mut reset = false;
            self.store
                .update_task(&task.id, |task| {
                    // Re-checked under the store lock; the drainer may have finished.
                    if task.status == TaskStatus::Syncing && task.updated_at <= cutoff {
                        task.status = TaskStatus::Pending;
                        task.error = None;
                        task.updated_at = unix_millis_now();
                        reset = true;
                    }
                })
                .await?;
            if reset {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!("Recovered {recovered} interrupted sync task(s)");
        }
        Ok(recovered)
    }

    /// Rows whose stored kind this build does not recognise, oldest first.
    ///
    /// They are dead-lettered by [`SyncQueue::list_pending`] and cannot be
    /// read as [`SyncTask`]s; they can still be removed by id.
    pub async fn list_unrecognized(&self) -> Result<Vec<UnrecognizedTask>> {
        self.store.list_unrecognized_tasks().await
    }
}
