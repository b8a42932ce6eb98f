//! Mutation request and outcome types.
//!
//! Clients send raw, unvalidated [`TaskFields`]; the server's state machine
//! turns them into a canonical [`Task`](crate::task::Task) or a
//! [`MutationError`]. Both directions are serialisable so a rejection can be
//! returned verbatim to the requester.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Role of the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May apply any mutation to any task.
    Admin,
    /// Restricted to unassigned tasks and tasks assigned to themself.
    User,
}

impl Role {
    /// Returns `true` for the administrative role.
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Identity of whoever issues a mutation, supplied per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Acting user's identifier.
    pub actor_id: String,
    /// Acting user's display name.
    pub display_name: String,
    /// Acting user's role.
    pub role: Role,
}

impl ActorContext {
    /// Creates an actor context.
    pub fn new(actor_id: impl Into<String>, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            display_name: display_name.into(),
            role,
        }
    }
}

/// Kind of task mutation requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Create a new task.
    Create,
    /// Partially update fields of an existing task.
    Update,
    /// Change only the status (column) of an existing task.
    Move,
    /// Remove an existing task.
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Move => write!(f, "move"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Raw field values from a client.
///
/// `None` means "leave unchanged". For nullable attributes the inner option
/// distinguishes setting a value (`Some(Some(v))`) from clearing it
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    /// New title.
    pub title: Option<String>,
    /// New description, or clear.
    pub description: Option<Option<String>>,
    /// New assignee, or unassign.
    pub assignee_id: Option<Option<String>>,
    /// New weight, unchecked.
    pub weight: Option<i64>,
    /// New priority wire name, unchecked.
    pub priority: Option<String>,
    /// New status wire name, unchecked.
    pub status: Option<String>,
    /// New `#RRGGBB` color, or clear.
    pub color: Option<Option<String>>,
    /// New `YYYY-MM-DD` due date, or clear.
    pub due_date: Option<Option<String>>,
}

impl TaskFields {
    /// Fields with only a title set, the minimum for a create.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Fields with only a status set, the shape of a move.
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }
}

/// A task mutation as issued by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Project (room) the mutation targets.
    pub project_id: String,
    /// Target task; required for everything but [`Operation::Create`].
    pub task_id: Option<TaskId>,
    /// What to do.
    pub operation: Operation,
    /// Raw field input.
    pub fields: TaskFields,
}

impl MutationRequest {
    /// Builds a create request.
    pub fn create(project_id: impl Into<String>, fields: TaskFields) -> Self {
        Self {
            project_id: project_id.into(),
            task_id: None,
            operation: Operation::Create,
            fields,
        }
    }

    /// Builds an update request.
    pub fn update(project_id: impl Into<String>, task_id: TaskId, fields: TaskFields) -> Self {
        Self {
            project_id: project_id.into(),
            task_id: Some(task_id),
            operation: Operation::Update,
            fields,
        }
    }

    /// Builds a move request to the given status wire name.
    pub fn move_to(
        project_id: impl Into<String>,
        task_id: TaskId,
        status: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            task_id: Some(task_id),
            operation: Operation::Move,
            fields: TaskFields::status(status),
        }
    }

    /// Builds a delete request.
    pub fn delete(project_id: impl Into<String>, task_id: TaskId) -> Self {
        Self {
            project_id: project_id.into(),
            task_id: Some(task_id),
            operation: Operation::Delete,
            fields: TaskFields::default(),
        }
    }
}

/// Task attribute named in a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskField {
    /// Target task id.
    TaskId,
    /// Title.
    Title,
    /// Description.
    Description,
    /// Assignee.
    Assignee,
    /// Weight.
    Weight,
    /// Priority.
    Priority,
    /// Status.
    Status,
    /// Color.
    Color,
    /// Due date.
    DueDate,
}

impl fmt::Display for TaskField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TaskId => "task_id",
            Self::Title => "title",
            Self::Description => "description",
            Self::Assignee => "assignee",
            Self::Weight => "weight",
            Self::Priority => "priority",
            Self::Status => "status",
            Self::Color => "color",
            Self::DueDate => "due_date",
        };
        f.write_str(name)
    }
}

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The offending field.
    pub field: TaskField,
    /// Human-readable explanation.
    pub message: String,
}

impl FieldError {
    /// Creates a field error.
    pub fn new(field: TaskField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Why a mutation was rejected.
///
/// Rejections go to the requester only; they are never broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum MutationError {
    /// One or more fields failed validation.
    #[error("invalid task fields: {}", join_field_errors(.0))]
    Invalid(Vec<FieldError>),
    /// The actor may not perform this mutation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The referenced task or project does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The store call failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl MutationError {
    /// Single-field validation failure.
    pub fn invalid(field: TaskField, message: impl Into<String>) -> Self {
        Self::Invalid(vec![FieldError::new(field, message)])
    }

    /// Returns the field errors of an [`Invalid`](Self::Invalid) outcome.
    #[must_use]
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Invalid(errors) => errors,
            _ => &[],
        }
    }

    /// Returns `true` if some field error names `field`.
    #[must_use]
    pub fn has_field_error(&self, field: TaskField) -> bool {
        self.field_errors().iter().any(|e| e.field == field)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
