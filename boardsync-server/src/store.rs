//! Persistence collaborator for board tasks.
//!
//! The board core never owns authoritative task state. It validates a
//! mutation, then hands a [`NewTask`] or [`TaskPatch`] to a [`TaskStore`]
//! and broadcasts whatever snapshot the store returns. Implementations must
//! make each single-task write atomic; nothing spans several tasks.
//!
//! [`InMemoryTaskStore`] is the default store for the server binary and for
//! tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use boardsync_proto::mutation::MutationError;
use boardsync_proto::task::{Color, Priority, Task, TaskId, TaskStatus};
use chrono::NaiveDate;
use tokio::sync::RwLock;

/// Errors reported by a [`TaskStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The store could not serve the request (I/O, connectivity, ...).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for MutationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Unavailable(_) => Self::PersistenceFailure(err.to_string()),
        }
    }
}

/// A resolved assignee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignee {
    /// User id.
    pub id: String,
    /// Display name at the time of assignment.
    pub name: String,
}

/// A validated task ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Owning project.
    pub project_id: String,
    /// Initial assignee, if any.
    pub assignee: Option<Assignee>,
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Weight in range.
    pub weight: u8,
    /// Priority.
    pub priority: Priority,
    /// Due date.
    pub due_date: Option<NaiveDate>,
    /// Card color.
    pub color: Option<Color>,
    /// Initial column.
    pub status: TaskStatus,
    /// Creating user.
    pub created_by: String,
    /// Creation time in milliseconds since epoch.
    pub created_at: u64,
}

impl NewTask {
    /// Materialises the snapshot under a freshly allocated id.
    #[must_use]
    pub fn into_task(self, id: TaskId) -> Task {
        let (assignee_id, assignee_name) = split_assignee(self.assignee);
        Task {
            id,
            project_id: self.project_id,
            assignee_id,
            assignee_name,
            title: self.title,
            description: self.description,
            weight: self.weight,
            priority: self.priority,
            due_date: self.due_date,
            color: self.color,
            status: self.status,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// A validated partial update. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description, or clear.
    pub description: Option<Option<String>>,
    /// New assignee, or unassign.
    pub assignee: Option<Option<Assignee>>,
    /// New weight.
    pub weight: Option<u8>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New due date, or clear.
    pub due_date: Option<Option<NaiveDate>>,
    /// New color, or clear.
    pub color: Option<Option<Color>>,
    /// New column.
    pub status: Option<TaskStatus>,
    /// Modification time in milliseconds since epoch.
    pub updated_at: u64,
}

impl TaskPatch {
    /// Applies the patch to a snapshot in place.
    pub fn apply_to(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(assignee) = self.assignee {
            (task.assignee_id, task.assignee_name) = split_assignee(assignee);
        }
        if let Some(weight) = self.weight {
            task.weight = weight;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(color) = self.color {
            task.color = color;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        task.updated_at = self.updated_at;
    }
}

fn split_assignee(assignee: Option<Assignee>) -> (Option<String>, Option<String>) {
    assignee.map_or((None, None), |a| (Some(a.id), Some(a.name)))
}

/// External transactional store for tasks, projects and user names.
pub trait TaskStore: Send + Sync + 'static {
    /// Fetches a task by id; `Ok(None)` if it does not exist.
    fn get_task(
        &self,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<Option<Task>, StoreError>> + Send;

    /// Inserts a new task and returns its stored snapshot.
    fn create_task(
        &self,
        task: NewTask,
    ) -> impl std::future::Future<Output = Result<Task, StoreError>> + Send;

    /// Atomically applies a patch to one task and returns the new snapshot.
    fn update_task(
        &self,
        id: &TaskId,
        patch: TaskPatch,
    ) -> impl std::future::Future<Output = Result<Task, StoreError>> + Send;

    /// Removes a task.
    fn delete_task(
        &self,
        id: &TaskId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// All tasks of a project, oldest first.
    fn list_tasks_by_project(
        &self,
        project_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Task>, StoreError>> + Send;

    /// Returns `true` if the project exists.
    fn project_exists(
        &self,
        project_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Display name of a user, if the directory knows them.
    fn user_name(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, StoreError>> + Send;
}

/// In-memory [`TaskStore`].
///
/// Projects are open by default (any project id exists); use
/// [`with_projects`](Self::with_projects) to restrict them. Writes can be
/// made to fail with [`set_fail_writes`](Self::set_fail_writes).
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    users: RwLock<HashMap<String, String>>,
    projects: Option<HashSet<String>>,
    fail_writes: AtomicBool,
}

impl InMemoryTaskStore {
    /// Creates an empty store that accepts any project id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that only knows the given projects.
    #[must_use]
    pub fn with_projects<I, P>(projects: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            projects: Some(projects.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Adds or renames a user in the directory.
    pub async fn register_user(&self, user_id: &str, display_name: &str) {
        self.users
            .write()
            .await
            .insert(user_id.to_string(), display_name.to_string());
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Returns `true` if no task is stored.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("write rejected by store".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn create_task(&self, task: NewTask) -> Result<Task, StoreError> {
        self.check_writable()?;
        let task = task.into_task(TaskId::new());
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, StoreError> {
        self.check_writable()?;
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))?;
        patch.apply_to(task);
        let snapshot = task.clone();
        drop(tasks);
        Ok(snapshot)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tasks
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("task {id}")))
    }

    async fn list_tasks_by_project(&self, project_id: &str) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    async fn project_exists(&self, project_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .projects
            .as_ref()
            .is_none_or(|projects| projects.contains(project_id)))
    }

    async fn user_name(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}
