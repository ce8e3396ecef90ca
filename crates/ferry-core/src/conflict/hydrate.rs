//! Glue between resolution sessions, stored drafts and parked queue tasks.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Draft, Snapshot, SyncTask, TaskId, TaskStatus};
use crate::queue::SyncQueue;
use crate::services::OfflineStore;

use super::ConflictSession;

/// What a screen should show after fetching the server copy of an entity
#[derive(Debug, Clone)]
pub enum Hydration {
    /// No newer local draft, or nothing differs: show the server snapshot
    UseServer(Snapshot),
    /// A newer draft disagrees with the server; ask the operator
    NeedsResolution(ConflictSession),
}

/// Compare the stored draft for `entity_id` with a freshly fetched snapshot.
pub async fn hydrate(
    store: &OfflineStore,
    entity_id: &str,
    server: Snapshot,
    server_updated_at: i64,
) -> Result<Hydration> {
    let Some(draft) = store.get_draft(entity_id).await? else {
        return Ok(Hydration::UseServer(server));
    };
    if !draft.is_newer_than(server_updated_at) {
        tracing::debug!("Draft for {entity_id} is older than the server copy");
        return Ok(Hydration::UseServer(server));
    }

    let session = ConflictSession::new(draft.data, server);
    if session.has_conflicts() {
        tracing::info!(
            "Draft for {entity_id} conflicts with the server on {} field(s)",
            session.conflict_count()
        );
        Ok(Hydration::NeedsResolution(session))
    } else {
        Ok(Hydration::UseServer(session.preview()))
    }
}

/// Store a merged snapshot as the entity's draft, replacing the stale one
pub async fn persist_resolution(
    store: &OfflineStore,
    entity_id: &str,
    merged: Snapshot,
) -> Result<Draft> {
    store.save_draft(entity_id, merged).await
}

/// The oldest task parked in `conflict` whose payload targets `entity_id`
pub async fn find_conflicted_task(queue: &SyncQueue, entity_id: &str) -> Result<Option<SyncTask>> {
    Ok(queue
        .list_by_status(TaskStatus::Conflict)
        .await?
        .into_iter()
        .find(|task| task.entity_id() == Some(entity_id)))
}

/// Outcome of [`settle_conflict`]
#[derive(Debug, Clone)]
pub struct Settlement {
    /// The merge, saved as the entity's draft
    pub draft: Draft,
    /// Fresh task carrying the merge upstream
    pub task: SyncTask,
}

/// Payload of the parked task with its `data` replaced by the merge
fn merged_payload(parked: &SyncTask, entity_id: &str, merged: &Snapshot) -> Value {
    let mut payload = match &parked.payload {
        Value::Object(fields) => fields.clone(),
        _ => {
            let mut fields = serde_json::Map::new();
            fields.insert("entityId".to_string(), Value::String(entity_id.to_string()));
            fields
        }
    };
    payload.insert("data".to_string(), Value::Object(merged.clone()));
    Value::Object(payload)
}

/// Replace the parked task for `entity_id` with one carrying the merge.
///
/// The new task is queued before the parked one is dropped, so the edit is
/// never left without a task to deliver it. The merge is also saved as the
/// entity's draft.
pub async fn settle_conflict(
    queue: &SyncQueue,
    task_id: &TaskId,
    entity_id: &str,
    merged: Snapshot,
) -> Result<Settlement> {
    let parked = queue
        .get(task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
    if parked.status != TaskStatus::Conflict {
        return Err(Error::InvalidInput(format!(
            "task {task_id} is {}, not in conflict",
            parked.status
        )));
    }

    let task = queue
        .enqueue(parked.kind, merged_payload(&parked, entity_id, &merged))
        .await?;
    queue.resolve_conflict(task_id).await?;
    let draft = persist_resolution(queue.store(), entity_id, merged).await?;
    tracing::info!("Settled conflict for {entity_id}; queued {} task {}", task.kind, task.id);
    Ok(Settlement { draft, task })
}
