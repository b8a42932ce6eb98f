//! Task state machine: authorization and field validation for mutations.
//!
//! The four statuses form a flat set. Any status may move to any other in a
//! single step, so the only gating is who is asking:
//!
//! - an admin may apply any mutation to any task;
//! - anyone else may touch a task only while it is unassigned or assigned to
//!   them, and may only assign a task to themself or to nobody.
//!
//! Unassigned tasks are therefore open to every team member ("soft claim").
//!
//! Field validation is independent of authorization and collects every field
//! error of a request. Nothing here performs I/O: the caller resolves the
//! current snapshot and the assignee beforehand and persists the resulting
//! [`Plan`] afterwards.

use boardsync_proto::mutation::{
    ActorContext, FieldError, MutationError, Operation, TaskField, TaskFields,
};
use boardsync_proto::task::{
    Color, MAX_DESCRIPTION_LENGTH, MAX_TASK_TITLE_LENGTH, MAX_WEIGHT, MIN_WEIGHT, Priority, Task,
    TaskStatus,
};
use chrono::NaiveDate;

use crate::store::{Assignee, NewTask, TaskPatch};

/// Wire format of due dates.
pub const DUE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Outcome of looking up the requested assignee before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAssignee {
    /// The request does not touch the assignee.
    Unchanged,
    /// The request unassigns the task.
    Cleared,
    /// The request assigns a known user.
    Set(Assignee),
    /// The requested user id is not known.
    Unknown(String),
}

/// Everything the state machine needs to judge one mutation.
#[derive(Debug, Clone)]
pub struct Transition<'a> {
    /// Who is asking.
    pub actor: &'a ActorContext,
    /// Project the request targets.
    pub project_id: &'a str,
    /// Requested operation.
    pub operation: Operation,
    /// Current snapshot; `None` for creates.
    pub current: Option<&'a Task>,
    /// Raw client input.
    pub fields: &'a TaskFields,
    /// Pre-resolved assignee.
    pub assignee: ResolvedAssignee,
    /// Current time in milliseconds since epoch.
    pub now_ms: u64,
    /// Current calendar day, for the due-date rule.
    pub today: NaiveDate,
}

/// What to persist for an accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Insert a new task.
    Create(NewTask),
    /// Patch an existing task (update or move).
    Patch(TaskPatch),
    /// Remove an existing task.
    Delete,
}

/// Stateless validator for task mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Authorizes and validates a mutation in one step.
    ///
    /// # Errors
    ///
    /// [`MutationError::Forbidden`] if the actor may not perform it,
    /// [`MutationError::NotFound`] if a non-create has no current task, or
    /// [`MutationError::Invalid`] with every failing field.
    pub fn evaluate(transition: &Transition<'_>) -> Result<Plan, MutationError> {
        Self::authorize(
            transition.actor,
            transition.operation,
            transition.current,
            transition.fields,
        )?;
        Self::plan(transition)
    }

    /// Applies the assignment rules of the module docs.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::Forbidden`] on violation.
    pub fn authorize(
        actor: &ActorContext,
        operation: Operation,
        current: Option<&Task>,
        fields: &TaskFields,
    ) -> Result<(), MutationError> {
        if actor.role.is_admin() {
            return Ok(());
        }

        if let Some(task) = current
            && !task.is_unassigned()
            && !task.is_assigned_to(&actor.actor_id)
        {
            return Err(MutationError::Forbidden(format!(
                "task {} is assigned to another user",
                task.id
            )));
        }

        let touches_assignee = matches!(operation, Operation::Create | Operation::Update);
        if touches_assignee
            && let Some(Some(assignee)) = &fields.assignee_id
            && *assignee != actor.actor_id
        {
            return Err(MutationError::Forbidden(
                "tasks can only be assigned to yourself".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates fields and builds the persistence plan, without authorization.
    ///
    /// # Errors
    ///
    /// [`MutationError::NotFound`] if a non-create has no current task, or
    /// [`MutationError::Invalid`] with every failing field.
    pub fn plan(transition: &Transition<'_>) -> Result<Plan, MutationError> {
        match (transition.operation, transition.current) {
            (Operation::Create, _) => plan_create(transition).map(Plan::Create),
            (Operation::Update, Some(current)) => {
                plan_update(transition, current).map(Plan::Patch)
            }
            (Operation::Move, Some(_)) => plan_move(transition).map(Plan::Patch),
            (Operation::Delete, Some(_)) => Ok(Plan::Delete),
            (operation, None) => Err(MutationError::NotFound(format!(
                "{operation} requires an existing task"
            ))),
        }
    }
}

/// When the not-in-the-past rule applies to a due date.
#[derive(Debug, Clone, Copy)]
enum DueDateRule<'a> {
    /// Any supplied date must be today or later.
    Always,
    /// Only a date different from the current one is checked.
    IfChangedFrom(Option<&'a NaiveDate>),
}

/// Field values that passed validation.
#[derive(Debug, Default)]
struct Checked {
    title: Option<String>,
    description: Option<Option<String>>,
    weight: Option<u8>,
    priority: Option<Priority>,
    status: Option<TaskStatus>,
    color: Option<Option<Color>>,
    due_date: Option<Option<NaiveDate>>,
}

fn plan_create(transition: &Transition<'_>) -> Result<NewTask, MutationError> {
    let mut errors = Vec::new();
    if transition.fields.title.is_none() {
        errors.push(FieldError::new(TaskField::Title, "title is required"));
    }
    let checked = check_fields(
        transition.fields,
        DueDateRule::Always,
        transition.today,
        &mut errors,
    );
    let assignee = check_assignee(&transition.assignee, &mut errors).flatten();
    if !errors.is_empty() {
        return Err(MutationError::Invalid(errors));
    }

    Ok(NewTask {
        project_id: transition.project_id.to_string(),
        assignee,
        title: checked.title.unwrap_or_default(),
        description: checked.description.flatten(),
        weight: checked.weight.unwrap_or(MIN_WEIGHT),
        priority: checked.priority.unwrap_or(Priority::Medium),
        due_date: checked.due_date.flatten(),
        color: checked.color.flatten(),
        status: checked.status.unwrap_or(TaskStatus::Todo),
        created_by: transition.actor.actor_id.clone(),
        created_at: transition.now_ms,
    })
}

fn plan_update(transition: &Transition<'_>, current: &Task) -> Result<TaskPatch, MutationError> {
    let mut errors = Vec::new();
    let checked = check_fields(
        transition.fields,
        DueDateRule::IfChangedFrom(current.due_date.as_ref()),
        transition.today,
        &mut errors,
    );
    let assignee = check_assignee(&transition.assignee, &mut errors);
    if !errors.is_empty() {
        return Err(MutationError::Invalid(errors));
    }

    Ok(TaskPatch {
        title: checked.title,
        description: checked.description,
        assignee,
        weight: checked.weight,
        priority: checked.priority,
        due_date: checked.due_date,
        color: checked.color,
        status: checked.status,
        updated_at: transition.now_ms,
    })
}

fn plan_move(transition: &Transition<'_>) -> Result<TaskPatch, MutationError> {
    let Some(raw) = &transition.fields.status else {
        return Err(MutationError::invalid(
            TaskField::Status,
            "status is required to move a task",
        ));
    };
    let status = parse_status(raw).map_err(|e| MutationError::Invalid(vec![e]))?;
    Ok(TaskPatch {
        status: Some(status),
        updated_at: transition.now_ms,
        ..TaskPatch::default()
    })
}

/// Converts the resolved assignee into a patch value, recording unknown users.
///
/// The outer `None` means "unchanged".
fn check_assignee(
    resolved: &ResolvedAssignee,
    errors: &mut Vec<FieldError>,
) -> Option<Option<Assignee>> {
    match resolved {
        ResolvedAssignee::Unchanged => None,
        ResolvedAssignee::Cleared => Some(None),
        ResolvedAssignee::Set(assignee) => Some(Some(assignee.clone())),
        ResolvedAssignee::Unknown(id) => {
            errors.push(FieldError::new(
                TaskField::Assignee,
                format!("unknown user '{id}'"),
            ));
            None
        }
    }
}

fn check_fields(
    fields: &TaskFields,
    due_rule: DueDateRule<'_>,
    today: NaiveDate,
    errors: &mut Vec<FieldError>,
) -> Checked {
    let mut checked = Checked::default();

    if let Some(raw) = &fields.title {
        let title = raw.trim();
        if title.is_empty() {
            errors.push(FieldError::new(TaskField::Title, "title is required"));
        } else if title.chars().count() > MAX_TASK_TITLE_LENGTH {
            errors.push(FieldError::new(
                TaskField::Title,
                format!("title must be at most {MAX_TASK_TITLE_LENGTH} characters"),
            ));
        } else {
            checked.title = Some(title.to_string());
        }
    }

    if let Some(description) = &fields.description {
        let description = description.as_deref().map(str::trim).filter(|d| !d.is_empty());
        match description {
            Some(d) if d.chars().count() > MAX_DESCRIPTION_LENGTH => errors.push(FieldError::new(
                TaskField::Description,
                format!("description must be at most {MAX_DESCRIPTION_LENGTH} characters"),
            )),
            other => checked.description = Some(other.map(str::to_string)),
        }
    }

    if let Some(raw) = fields.weight {
        match u8::try_from(raw) {
            Ok(weight) if (MIN_WEIGHT..=MAX_WEIGHT).contains(&weight) => {
                checked.weight = Some(weight);
            }
            _ => errors.push(FieldError::new(
                TaskField::Weight,
                format!("weight must be between {MIN_WEIGHT} and {MAX_WEIGHT}, got {raw}"),
            )),
        }
    }

    if let Some(raw) = &fields.priority {
        match raw.parse::<Priority>() {
            Ok(priority) => checked.priority = Some(priority),
            Err(e) => errors.push(FieldError::new(
                TaskField::Priority,
                format!("{e}; expected one of low, medium, high"),
            )),
        }
    }

    if let Some(raw) = &fields.status {
        match parse_status(raw) {
            Ok(status) => checked.status = Some(status),
            Err(e) => errors.push(e),
        }
    }

    if let Some(color) = &fields.color {
        match color.as_deref().map(Color::parse).transpose() {
            Ok(color) => checked.color = Some(color),
            Err(e) => errors.push(FieldError::new(TaskField::Color, e.to_string())),
        }
    }

    if let Some(due) = &fields.due_date {
        match due.as_deref().map(parse_due_date).transpose() {
            Ok(Some(date)) => {
                let must_check = match due_rule {
                    DueDateRule::Always => true,
                    DueDateRule::IfChangedFrom(current) => current != Some(&date),
                };
                if must_check && date < today {
                    errors.push(FieldError::new(
                        TaskField::DueDate,
                        format!("due date {date} is in the past"),
                    ));
                } else {
                    checked.due_date = Some(Some(date));
                }
            }
            Ok(None) => checked.due_date = Some(None),
            Err(e) => errors.push(e),
        }
    }

    checked
}

fn parse_status(raw: &str) -> Result<TaskStatus, FieldError> {
    raw.parse::<TaskStatus>().map_err(|e| {
        FieldError::new(
            TaskField::Status,
            format!("{e}; expected one of todo, in_progress, in_review, done"),
        )
    })
}

fn parse_due_date(raw: &str) -> Result<NaiveDate, FieldError> {
    NaiveDate::parse_from_str(raw.trim(), DUE_DATE_FORMAT).map_err(|_| {
        FieldError::new(
            TaskField::DueDate,
            format!("due date must be a YYYY-MM-DD date, got '{raw}'"),
        )
    })
}
