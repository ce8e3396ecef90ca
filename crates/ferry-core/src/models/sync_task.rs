//! Sync task model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A unique identifier for a queued task, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Raised when a stored task carries a kind this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task kind: {0}")]
pub struct UnknownTaskKind(pub String);

/// Domain operation a task's payload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// Create a new entity upstream
    CreateEntity,
    /// Update fields of an existing entity
    UpdateEntity,
    /// Insert or replace a record attached to an entity
    UpsertRelatedRecord,
}

impl TaskKind {
    pub const ALL: [Self; 3] = [
        Self::CreateEntity,
        Self::UpdateEntity,
        Self::UpsertRelatedRecord,
    ];

    /// Stable name used in storage and on the wire
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateEntity => "create-entity",
            Self::UpdateEntity => "update-entity",
            Self::UpsertRelatedRecord => "upsert-related-record",
        }
    }

    /// Whether the task mutates an entity that may already exist upstream.
    ///
    /// Only these kinds can collide with a newer server copy.
    pub const fn targets_existing_entity(self) -> bool {
        matches!(self, Self::UpdateEntity | Self::UpsertRelatedRecord)
    }

    /// Span name used when processing a task of this kind
    pub const fn span_name(self) -> &'static str {
        match self {
            Self::CreateEntity => "sync_task_create_entity",
            Self::UpdateEntity => "sync_task_update_entity",
            Self::UpsertRelatedRecord => "sync_task_upsert_related_record",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownTaskKind(s.to_string()))
    }
}

/// Lifecycle state of a queued task.
///
/// Success has no state: a task that succeeds is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for the next drain cycle
    Pending,
    /// Currently being dispatched
    Syncing,
    /// Last attempt failed; eligible again on the next cycle
    Failed,
    /// Server copy changed after the task was queued; needs resolution
    Conflict,
    /// Will not be retried until an operator requeues it
    Dead,
}

impl TaskStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Syncing,
        Self::Failed,
        Self::Conflict,
        Self::Dead,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
            Self::Dead => "dead",
        }
    }

    /// Statuses picked up by a drain cycle
    pub const fn is_drain_eligible(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}

/// A pending mutation waiting to be replayed against the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    /// Unique identifier
    pub id: TaskId,
    /// Which domain operation the payload targets
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Opaque payload forwarded verbatim to the domain collaborator
    pub payload: Value,
    /// Current lifecycle state
    pub status: TaskStatus,
    /// Number of failed processing attempts
    pub attempts: u32,
    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last status transition timestamp (Unix ms)
    pub updated_at: i64,
}

/// Payload keys that may carry the id of the entity a task targets
const ENTITY_ID_KEYS: [&str; 3] = ["entityId", "entity_id", "id"];

impl SyncTask {
    /// Create a new pending task
    #[must_use]
    pub fn new(kind: TaskKind, payload: Value) -> Self {
        let now = crate::util::unix_millis_now();
        Self {
            id: TaskId::new(),
            kind,
            payload,
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Id of the entity the payload targets, from its `entityId`, `entity_id`
    /// or `id` key
    pub fn entity_id(&self) -> Option<&str> {
        ENTITY_ID_KEYS
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_str))
    }
}

/// A stored row whose kind this build cannot dispatch.
///
/// Kept as raw text so operators can still see and remove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrecognizedTask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
