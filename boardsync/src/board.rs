//! Local board state fed by server snapshots.
//!
//! Task events always carry complete snapshots, so [`BoardState`] applies
//! them as replace-by-id. Applying the same event twice, or an older snapshot
//! after a newer one, leaves the state unchanged. A deleted id stays deleted:
//! a snapshot that arrives after the delete, such as a late mutation reply,
//! is ignored.

use std::collections::{BTreeMap, HashMap, HashSet};

use boardsync_proto::event::BoardEvent;
use boardsync_proto::task::{Task, TaskId, TaskStatus};

/// What applying an event did to the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A task the client did not know about was added.
    Inserted,
    /// A known task was replaced by a different snapshot.
    Replaced,
    /// The snapshot was identical to the local copy, or older than it.
    Unchanged,
    /// A known task was removed.
    Removed,
    /// The event does not touch task state (presence, a delete of an
    /// unknown task, or a snapshot of a deleted task).
    Ignored,
}

/// Tasks of every project the client has loaded, keyed by project and id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardState {
    projects: HashMap<String, BTreeMap<TaskId, Task>>,
    deleted: HashSet<TaskId>,
}

impl BoardState {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one room event.
    pub fn apply(&mut self, event: &BoardEvent) -> Applied {
        match event {
            BoardEvent::TaskCreated { task }
            | BoardEvent::TaskUpdated { task }
            | BoardEvent::TaskMoved { task } => self.upsert(task.clone()),
            BoardEvent::TaskDeleted {
                task_id,
                project_id,
            } => self.remove(project_id, task_id),
            BoardEvent::UserJoined { .. }
            | BoardEvent::UserLeft { .. }
            | BoardEvent::ActiveUsers { .. }
            | BoardEvent::UserTyping { .. }
            | BoardEvent::UserInactive { .. }
            | BoardEvent::InactivityWarning { .. } => Applied::Ignored,
        }
    }

    /// Inserts or replaces a task by id.
    ///
    /// A snapshot whose `updated_at` is older than the local copy is stale
    /// and left out, as is any snapshot of a deleted task.
    pub fn upsert(&mut self, task: Task) -> Applied {
        if self.deleted.contains(&task.id) {
            return Applied::Ignored;
        }
        let tasks = self.projects.entry(task.project_id.clone()).or_default();
        match tasks.get(&task.id) {
            None => {
                tasks.insert(task.id.clone(), task);
                Applied::Inserted
            }
            Some(local) if *local == task || local.updated_at > task.updated_at => {
                Applied::Unchanged
            }
            Some(_) => {
                tasks.insert(task.id.clone(), task);
                Applied::Replaced
            }
        }
    }

    /// Puts a snapshot back regardless of age. Used to undo optimistic edits.
    pub fn restore(&mut self, task: Task) {
        if self.deleted.contains(&task.id) {
            return;
        }
        self.projects
            .entry(task.project_id.clone())
            .or_default()
            .insert(task.id.clone(), task);
    }

    /// Removes a task and remembers its id as deleted.
    ///
    /// Removing an unknown task is [`Applied::Ignored`].
    pub fn remove(&mut self, project_id: &str, task_id: &TaskId) -> Applied {
        self.deleted.insert(task_id.clone());
        let removed = self
            .projects
            .get_mut(project_id)
            .and_then(|tasks| tasks.remove(task_id));
        if removed.is_some() {
            Applied::Removed
        } else {
            Applied::Ignored
        }
    }

    /// Replaces everything known about a project with a full reload.
    ///
    /// A reload read before a delete was applied may still list the task;
    /// deleted ids are left out.
    pub fn replace_all(&mut self, project_id: &str, tasks: Vec<Task>) {
        let tasks = tasks
            .into_iter()
            .filter(|t| t.project_id == project_id && !self.deleted.contains(&t.id))
            .map(|t| (t.id.clone(), t))
            .collect();
        self.projects.insert(project_id.to_string(), tasks);
    }

    /// Looks up one task.
    #[must_use]
    pub fn get(&self, project_id: &str, task_id: &TaskId) -> Option<&Task> {
        self.projects.get(project_id)?.get(task_id)
    }

    /// Every task of a project, oldest first.
    #[must_use]
    pub fn tasks(&self, project_id: &str) -> Vec<&Task> {
        self.projects
            .get(project_id)
            .map(|tasks| tasks.values().collect())
            .unwrap_or_default()
    }

    /// Tasks of one column, oldest first.
    #[must_use]
    pub fn column(&self, project_id: &str, status: TaskStatus) -> Vec<&Task> {
        self.projects
            .get(project_id)
            .map(|tasks| tasks.values().filter(|t| t.status == status).collect())
            .unwrap_or_default()
    }

    /// Number of tasks known for a project.
    #[must_use]
    pub fn len(&self, project_id: &str) -> usize {
        self.projects.get(project_id).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if no task is known for a project.
    #[must_use]
    pub fn is_empty(&self, project_id: &str) -> bool {
        self.len(project_id) == 0
    }
}
