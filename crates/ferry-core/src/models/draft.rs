//! Draft model

use serde::{Deserialize, Serialize};

use super::Snapshot;

/// Latest locally buffered, not-yet-confirmed snapshot of one entity.
///
/// One slot per entity: saving a draft replaces whatever was there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    /// The entity's own identifier
    pub id: String,
    /// Full or partial field snapshot
    pub data: Snapshot,
    /// Last local write timestamp (Unix ms)
    pub updated_at: i64,
}

impl Draft {
    /// Create a draft stamped with the current time
    #[must_use]
    pub fn new(id: impl Into<String>, data: Snapshot) -> Self {
        Self {
            id: id.into(),
            data,
            updated_at: crate::util::unix_millis_now(),
        }
    }

    /// Whether this draft was written after the given server update time
    pub const fn is_newer_than(&self, server_updated_at: i64) -> bool {
        self.updated_at > server_updated_at
    }
}
