//! Field-level reconciliation of a local draft against a server snapshot.
//!
//! Fields are compared on their serialized JSON form. Nested objects and
//! arrays are opaque: one differing sub-field makes the whole field conflict.

mod hydrate;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::Snapshot;

pub use hydrate::{
    find_conflicted_task, hydrate, persist_resolution, settle_conflict, Hydration, Settlement,
};

/// Which side wins for one conflicting field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Local,
    Server,
}

/// Outcome handed back to the caller of a resolution session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every conflict was decided; the merged snapshot
    Resolved(Snapshot),
    /// The operator walked away; nothing is merged
    Cancelled,
}

fn serialized(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Keys present on both sides whose serialized values differ, sorted.
///
/// Keys present on only one side never conflict.
pub fn detect_conflicts(local: &Snapshot, server: &Snapshot) -> Vec<String> {
    let mut conflicts = local
        .iter()
        .filter_map(|(key, local_value)| {
            let server_value = server.get(key)?;
            (serialized(local_value) != serialized(server_value)).then(|| key.clone())
        })
        .collect::<Vec<_>>();
    conflicts.sort();
    conflicts
}

/// One reconciliation between a local draft and the server copy.
#[derive(Debug, Clone)]
pub struct ConflictSession {
    local: Snapshot,
    server: Snapshot,
    choices: BTreeMap<String, Option<Choice>>,
}

impl ConflictSession {
    pub fn new(local: Snapshot, server: Snapshot) -> Self {
        let choices = detect_conflicts(&local, &server)
            .into_iter()
            .map(|key| (key, None))
            .collect();
        Self {
            local,
            server,
            choices,
        }
    }

    pub fn conflicting_keys(&self) -> impl Iterator<Item = &str> {
        self.choices.keys().map(String::as_str)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.choices.is_empty()
    }

    pub fn local(&self) -> &Snapshot {
        &self.local
    }

    pub fn server(&self) -> &Snapshot {
        &self.server
    }

    /// The choice recorded for `key`, if any
    pub fn choice(&self, key: &str) -> Option<Choice> {
        self.choices.get(key).copied().flatten()
    }

    /// Record a choice; choosing again overrides the previous one
    pub fn choose(&mut self, key: &str, choice: Choice) -> Result<()> {
        let slot = self
            .choices
            .get_mut(key)
            .ok_or_else(|| Error::InvalidInput(format!("field '{key}' is not in conflict")))?;
        *slot = Some(choice);
        Ok(())
    }

    /// Apply the same choice to every conflicting field
    pub fn choose_all(&mut self, choice: Choice) {
        for slot in self.choices.values_mut() {
            *slot = Some(choice);
        }
    }

    pub fn conflict_count(&self) -> usize {
        self.choices.len()
    }

    pub fn resolved_count(&self) -> usize {
        self.choices.values().filter(|choice| choice.is_some()).count()
    }

    pub fn can_commit(&self) -> bool {
        self.resolved_count() == self.conflict_count()
    }

    /// The merge as it stands: server baseline with `Local` choices applied
    pub fn preview(&self) -> Snapshot {
        let mut merged = self.server.clone();
        for (key, choice) in &self.choices {
            if *choice == Some(Choice::Local) {
                if let Some(value) = self.local.get(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }

    /// Finish the session. Rejected until every conflict has a choice.
    pub fn commit(self) -> Result<Resolution> {
        if !self.can_commit() {
            return Err(Error::UnresolvedConflicts {
                resolved: self.resolved_count(),
                total: self.conflict_count(),
            });
        }
        Ok(Resolution::Resolved(self.preview()))
    }

    /// Abandon the session without merging anything
    pub fn cancel(self) -> Resolution {
        Resolution::Cancelled
    }
}
