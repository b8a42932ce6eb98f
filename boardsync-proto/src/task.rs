//! Task model shared by the board server and its clients.
//!
//! A [`Task`] is the canonical snapshot of one card on a project board. The
//! store owns the authoritative copy; everything on the wire is a full
//! snapshot so consumers replace by id instead of applying deltas.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task title length in characters.
pub const MAX_TASK_TITLE_LENGTH: usize = 256;

/// Maximum allowed task description length in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;

/// Lowest accepted task weight.
pub const MIN_WEIGHT: u8 = 1;

/// Highest accepted task weight.
pub const MAX_WEIGHT: u8 = 10;

/// Unique identifier for a task, based on UUID v7 so ids sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
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
        Uuid::parse_str(s).map(Self)
    }
}

/// Error returned when a wire name does not match any enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Board column a task sits in.
///
/// The four statuses form a flat set: any status may move to any other in
/// one step. The ordering only decides column order on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Not started.
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Waiting for review.
    InReview,
    /// Finished.
    Done,
}

impl TaskStatus {
    /// Every status, in column order.
    pub const ALL: [Self; 4] = [Self::Todo, Self::InProgress, Self::InReview, Self::Done];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "status",
                value: s.to_string(),
            })
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Can wait.
    Low,
    /// Default priority.
    Medium,
    /// Needs attention first.
    High,
}

impl Priority {
    /// Every priority, lowest first.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Wire name of the priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|priority| priority.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "priority",
                value: s.to_string(),
            })
    }
}

/// Card color in `#rrggbb` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(String);

/// Error returned by [`Color::parse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("color must match #RRGGBB, got '{0}'")]
pub struct InvalidColor(pub String);

impl Color {
    /// Parses a `#RRGGBB` color, accepting either hex case.
    ///
    /// The stored form is lower case.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidColor`] if the input is not `#` followed by exactly
    /// six hex digits.
    pub fn parse(raw: &str) -> Result<Self, InvalidColor> {
        let valid = raw.len() == 7
            && raw.starts_with('#')
            && raw[1..].chars().all(|c| c.is_ascii_hexdigit());
        if valid {
            Ok(Self(raw.to_ascii_lowercase()))
        } else {
            Err(InvalidColor(raw.to_string()))
        }
    }

    /// Returns the normalised `#rrggbb` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical snapshot of a task as stored and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier (UUID v7, time-ordered).
    pub id: TaskId,
    /// Project (and therefore room) this task belongs to.
    pub project_id: String,
    /// User the task is assigned to, if any.
    pub assignee_id: Option<String>,
    /// Display name of the assignee, resolved by the server.
    pub assignee_name: Option<String>,
    /// Task title; never empty.
    pub title: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Effort weight in `MIN_WEIGHT..=MAX_WEIGHT`.
    pub weight: u8,
    /// Task priority.
    pub priority: Priority,
    /// Optional due date (calendar day, no time zone).
    pub due_date: Option<NaiveDate>,
    /// Optional card color.
    pub color: Option<Color>,
    /// Board column.
    pub status: TaskStatus,
    /// User that created the task.
    pub created_by: String,
    /// Creation time in milliseconds since epoch.
    pub created_at: u64,
    /// Last modification time in milliseconds since epoch.
    pub updated_at: u64,
}

impl Task {
    /// Returns `true` if the task has no assignee.
    #[must_use]
    pub const fn is_unassigned(&self) -> bool {
        self.assignee_id.is_none()
    }

    /// Returns `true` if the task is assigned to `user_id`.
    #[must_use]
    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.assignee_id.as_deref() == Some(user_id)
    }
}
