//! Seam between the orchestrator and the domain operations being replayed.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::{SyncTask, TaskKind};

/// Outcome of a failed dispatch, classified for retry purposes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Network trouble or a temporary server error; retry on a later drain
    #[error("{0}")]
    Transient(String),
    /// The backend will never accept this payload; dead-letter it
    #[error("{0}")]
    Permanent(String),
}

impl DispatchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Domain collaborator: one operation per [`TaskKind`].
///
/// The orchestrator only calls, awaits, and classifies the result; it never
/// looks inside payloads.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn create_entity(&self, payload: &Value) -> Result<(), DispatchError>;

    async fn update_entity(&self, payload: &Value) -> Result<(), DispatchError>;

    async fn upsert_related_record(&self, payload: &Value) -> Result<(), DispatchError>;

    /// Last update time (Unix ms) of the entity a task targets, if known.
    ///
    /// Consulted before dispatching kinds that modify existing entities. A
    /// server copy updated after the task was queued parks the task as a
    /// conflict. The default reports nothing, which disables the check.
    async fn remote_updated_at(&self, _task: &SyncTask) -> Result<Option<i64>, DispatchError> {
        Ok(None)
    }
}

/// Route a task's payload to the operation matching its kind
pub async fn dispatch(
    dispatcher: &dyn TaskDispatcher,
    task: &SyncTask,
) -> Result<(), DispatchError> {
    match task.kind {
        TaskKind::CreateEntity => dispatcher.create_entity(&task.payload).await,
        TaskKind::UpdateEntity => dispatcher.update_entity(&task.payload).await,
        TaskKind::UpsertRelatedRecord => dispatcher.upsert_related_record(&task.payload).await,
    }
}
