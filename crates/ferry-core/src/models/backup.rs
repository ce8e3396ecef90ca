//! Backup model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Snapshot;

/// A unique identifier for a backup, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupId(Uuid);

impl BackupId {
    /// Create a new unique backup ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for BackupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BackupId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Append-only safety copy of a form's data, kept independently of drafts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// Unique backup identifier.
    pub id: BackupId,
    /// Form the snapshot was taken from.
    pub form_id: String,
    /// Snapshot contents.
    pub data: Snapshot,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
}

impl Backup {
    #[must_use]
    pub fn new(form_id: impl Into<String>, data: Snapshot) -> Self {
        Self {
            id: BackupId::new(),
            form_id: form_id.into(),
            data,
            created_at: crate::util::unix_millis_now(),
        }
    }
}
