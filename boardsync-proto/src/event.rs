//! Board events fanned out to every connection in a project room.
//!
//! Task events carry full snapshots. Consumers must apply them as
//! replace-by-id so that duplicated or re-ordered delivery converges.

use serde::{Deserialize, Serialize};

use crate::presence::PresenceEntry;
use crate::task::{Task, TaskId};

/// Every event a room member can receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardEvent {
    /// A task was created.
    TaskCreated {
        /// Canonical snapshot.
        task: Task,
    },
    /// Fields of a task changed.
    TaskUpdated {
        /// Canonical snapshot.
        task: Task,
    },
    /// A task changed column. Same payload and rules as `TaskUpdated`.
    TaskMoved {
        /// Canonical snapshot.
        task: Task,
    },
    /// A task was removed.
    TaskDeleted {
        /// The removed task.
        task_id: TaskId,
        /// Project the task belonged to.
        project_id: String,
    },
    /// A user entered the room.
    UserJoined {
        /// Room the user joined.
        project_id: String,
        /// The joining user.
        user_id: String,
        /// Display name of the joining user.
        display_name: String,
    },
    /// A user left the room.
    UserLeft {
        /// Room the user left.
        project_id: String,
        /// The departing user.
        user_id: String,
        /// Display name of the departing user.
        display_name: String,
    },
    /// Complete list of users currently in the room.
    ActiveUsers {
        /// Room the list describes.
        project_id: String,
        /// Present users, oldest join first.
        users: Vec<PresenceEntry>,
    },
    /// A user started or stopped typing.
    UserTyping {
        /// Room the user is typing in.
        project_id: String,
        /// The typing user.
        user_id: String,
        /// Display name of the typing user.
        display_name: String,
        /// `true` while typing, `false` once stopped.
        is_typing: bool,
    },
    /// A user has been idle past the inactivity threshold.
    ///
    /// This is a notification only; the user stays present.
    UserInactive {
        /// Room the user is idle in.
        project_id: String,
        /// The idle user.
        user_id: String,
        /// Display name of the idle user.
        display_name: String,
    },
    /// Sent only to the idle user's own connection shortly before the
    /// inactivity threshold is reached.
    InactivityWarning {
        /// Room the warning concerns.
        project_id: String,
        /// The user being warned.
        user_id: String,
        /// Milliseconds since the user's last activity.
        idle_ms: u64,
        /// The configured inactivity threshold in milliseconds.
        threshold_ms: u64,
    },
}

impl BoardEvent {
    /// Project room the event is scoped to.
    #[must_use]
    pub fn project_id(&self) -> &str {
        match self {
            Self::TaskCreated { task } | Self::TaskUpdated { task } | Self::TaskMoved { task } => {
                &task.project_id
            }
            Self::TaskDeleted { project_id, .. }
            | Self::UserJoined { project_id, .. }
            | Self::UserLeft { project_id, .. }
            | Self::ActiveUsers { project_id, .. }
            | Self::UserTyping { project_id, .. }
            | Self::UserInactive { project_id, .. }
            | Self::InactivityWarning { project_id, .. } => project_id,
        }
    }

    /// Task snapshot carried by created/updated/moved events.
    #[must_use]
    pub const fn task(&self) -> Option<&Task> {
        match self {
            Self::TaskCreated { task } | Self::TaskUpdated { task } | Self::TaskMoved { task } => {
                Some(task)
            }
            _ => None,
        }
    }

    /// Short name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskMoved { .. } => "task_moved",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::ActiveUsers { .. } => "active_users",
            Self::UserTyping { .. } => "user_typing",
            Self::UserInactive { .. } => "user_inactive",
            Self::InactivityWarning { .. } => "inactivity_warning",
        }
    }
}
