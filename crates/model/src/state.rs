//! Persisted model state (JSON)
//!
//! Captures list metadata, change assignments and ignored-file rules. Changes
//! come back as placeholders carrying only their paths; the next full scan
//! replaces them, and corresponding-list matching keeps each one in the list
//! it was saved in.

use crate::error::Result;
use crate::list::ChangeList;
use crate::worker::ChangeListWorker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use vcsync_core::{FilePath, IgnoreRule};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedChange {
    pub before: Option<FilePath>,
    pub after: Option<FilePath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedList {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub changes: Vec<PersistedChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub lists: Vec<PersistedList>,
    #[serde(default)]
    pub ignored: Vec<IgnoreRule>,
}

impl PersistedState {
    /// Capture the persistent part of `worker` together with `ignored`
    pub fn capture(worker: &ChangeListWorker, ignored: &[IgnoreRule]) -> Self {
        let lists = worker
            .lists()
            .iter()
            .map(|list| PersistedList {
                id: list.id(),
                name: list.name().to_string(),
                comment: list.comment().to_string(),
                default: list.is_default(),
                read_only: list.is_read_only(),
                changes: list
                    .changes()
                    .map(|change| PersistedChange {
                        before: change.before.as_ref().map(|r| r.file.clone()),
                        after: change.after.as_ref().map(|r| r.file.clone()),
                    })
                    .collect(),
            })
            .collect();

        Self {
            lists,
            ignored: ignored.to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Rebuild a model from this state
    ///
    /// Lists with a name already seen are skipped. Without any list a
    /// default list named `default_list_name` is created.
    pub fn restore(&self, default_list_name: &str) -> ChangeListWorker {
        let mut names = BTreeSet::new();
        let mut lists = Vec::new();
        let mut kept = Vec::new();
        for persisted in &self.lists {
            if !names.insert(persisted.name.as_str()) {
                continue;
            }
            let mut list = ChangeList::new(persisted.id, persisted.name.as_str());
            list.set_comment(persisted.comment.as_str());
            list.set_default(persisted.default);
            list.set_read_only(persisted.read_only);
            lists.push(list);
            kept.push(persisted);
        }

        if lists.is_empty() {
            return ChangeListWorker::new(default_list_name);
        }

        let mut worker = ChangeListWorker::from_lists(lists);
        for (position, persisted) in kept.into_iter().enumerate() {
            for change in &persisted.changes {
                worker.restore_change(position, change.before.clone(), change.after.clone());
            }
        }
        worker
    }
}
