//! User mutations of the change-list model, replayed onto in-flight clones
//!
//! While a reconciliation pass works on a clone, user mutations go to the
//! authoritative model immediately and are also recorded here. Before the
//! clone is swapped in, the recorded commands are replayed on it so the new
//! model never loses a mutation made during the scan.

use crate::error::Result;
use crate::events::ChangeListEvent;
use crate::worker::ChangeListWorker;
use tracing::debug;
use uuid::Uuid;
use vcsync_core::ChangeKey;

/// A recorded user mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListCommand {
    AddList {
        id: Uuid,
        name: String,
        comment: Option<String>,
    },
    RemoveList {
        name: String,
    },
    SetDefault {
        name: String,
    },
    EditName {
        from: String,
        to: String,
    },
    EditComment {
        name: String,
        comment: String,
    },
    SetReadOnly {
        name: String,
        read_only: bool,
    },
    MoveChanges {
        to: String,
        keys: Vec<ChangeKey>,
    },
}

impl ListCommand {
    /// Apply the command to `worker`
    pub fn apply(&self, worker: &mut ChangeListWorker) -> Result<Vec<ChangeListEvent>> {
        match self {
            ListCommand::AddList { id, name, comment } => {
                worker.add_change_list(*id, name, comment.as_deref())
            }
            ListCommand::RemoveList { name } => worker.remove_change_list(name),
            ListCommand::SetDefault { name } => worker.set_default(name),
            ListCommand::EditName { from, to } => worker.edit_name(from, to),
            ListCommand::EditComment { name, comment } => worker.edit_comment(name, comment),
            ListCommand::SetReadOnly { name, read_only } => worker.set_read_only(name, *read_only),
            ListCommand::MoveChanges { to, keys } => worker.move_changes_to(to, keys),
        }
    }
}

/// Applies user mutations and records them during an update
#[derive(Debug, Default)]
pub struct Modifier {
    in_update: bool,
    pending: Vec<ListCommand>,
}

impl Modifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `command` to the authoritative worker, recording it if an
    /// update is in progress
    ///
    /// Failed commands are not recorded.
    pub fn execute(
        &mut self,
        worker: &mut ChangeListWorker,
        command: ListCommand,
    ) -> Result<Vec<ChangeListEvent>> {
        let events = command.apply(worker)?;
        if self.in_update {
            self.pending.push(command);
        }
        Ok(events)
    }

    /// Start recording
    pub fn enter_update(&mut self) {
        self.in_update = true;
        self.pending.clear();
    }

    /// Stop recording and replay onto `clone`, if the pass produced one
    ///
    /// Returns the number of commands replayed successfully.
    pub fn finish_update(&mut self, clone: Option<&mut ChangeListWorker>) -> usize {
        self.in_update = false;
        let pending = std::mem::take(&mut self.pending);
        let Some(clone) = clone else {
            return 0;
        };

        let mut replayed = 0;
        for command in pending {
            match command.apply(clone) {
                Ok(_) => replayed += 1,
                Err(e) => debug!("Replaying {:?} on updated model failed: {}", command, e),
            }
        }
        replayed
    }

    pub fn is_in_update(&self) -> bool {
        self.in_update
    }

    pub fn pending(&self) -> &[ListCommand] {
        &self.pending
    }
}
