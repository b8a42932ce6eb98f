//! The board core: the service object the transport talks to.
//!
//! [`BoardCore`] ties together the [`RoomBroker`], the [`PresenceTracker`],
//! the [`TaskStateMachine`] and a [`TaskStore`]. The transport hands every
//! decoded [`ClientMessage`] to [`BoardCore::handle`] and writes back the
//! direct reply, if any. Room events travel through the broker.
//!
//! Mutations of one project are serialized: a per-project async mutex is held
//! from validation through persistence to broadcast, so every member of a
//! room observes accepted mutations in the order they were applied.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use boardsync_proto::event::BoardEvent;
use boardsync_proto::mutation::{
    ActorContext, MutationError, MutationRequest, Operation, TaskField, TaskFields,
};
use boardsync_proto::task::{Task, TaskId};
use boardsync_proto::wire::{ClientMessage, ServerMessage};
use tokio::sync::Mutex as AsyncMutex;

use crate::broker::{Outbound, RoomBroker};
use crate::clock::Clock;
use crate::machine::{Plan, ResolvedAssignee, TaskStateMachine, Transition};
use crate::presence::{PresenceSettings, PresenceTracker};
use crate::store::TaskStore;

/// Server-assigned identifier of one client connection.
pub type ConnectionId = String;

/// Where the direct answer to a mutation goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTo<'a> {
    /// Connection that sent the mutation. It is left out of the broadcast.
    pub connection_id: &'a str,
    /// Request id echoed in the reply.
    pub request_id: u64,
}

/// Real-time board synchronization service.
pub struct BoardCore<S> {
    store: Arc<S>,
    broker: Arc<RoomBroker>,
    presence: PresenceTracker,
    clock: Arc<dyn Clock>,
    /// One lock per project ever mutated. Entries are never pruned; an idle
    /// project keeps an unlocked mutex.
    project_locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    next_connection: AtomicU64,
}

impl<S: TaskStore> BoardCore<S> {
    /// Creates a core over `store`, reading time from `clock`.
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, settings: PresenceSettings) -> Self {
        let broker = Arc::new(RoomBroker::new());
        let presence = PresenceTracker::new(Arc::clone(&broker), Arc::clone(&clock), settings);
        Self {
            store,
            broker,
            presence,
            clock,
            project_locks: parking_lot::Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The room broker.
    #[must_use]
    pub const fn broker(&self) -> &Arc<RoomBroker> {
        &self.broker
    }

    /// The presence tracker.
    #[must_use]
    pub const fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Registers a new connection and returns its id.
    pub fn connect(&self, sender: Outbound) -> ConnectionId {
        let n = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let connection_id = format!("conn-{n}");
        self.broker.attach(&connection_id, sender);
        tracing::debug!(connection_id = %connection_id, "connection attached");
        connection_id
    }

    /// Puts `user_id` into the project room from `connection_id`.
    pub fn request_join(
        &self,
        project_id: &str,
        user_id: &str,
        display_name: &str,
        connection_id: &str,
    ) {
        self.presence
            .join(project_id, user_id, display_name, connection_id);
        self.presence.record_activity(user_id);
    }

    /// Takes `user_id` out of the project room.
    ///
    /// If the user's presence is held by a newer connection, only
    /// `connection_id` leaves the room and the presence entry stays. Returns
    /// `true` if a presence entry was removed.
    pub fn request_leave(&self, project_id: &str, user_id: &str, connection_id: &str) -> bool {
        let left = self
            .presence
            .leave_held_by(project_id, user_id, connection_id);
        if !left {
            self.broker.leave(connection_id, project_id);
        }
        self.presence.record_activity(user_id);
        left
    }

    /// Relays a typing indicator to the room.
    pub fn request_typing(
        &self,
        project_id: &str,
        user_id: &str,
        display_name: &str,
        is_typing: bool,
    ) -> bool {
        let relayed = self
            .presence
            .set_typing(project_id, user_id, display_name, is_typing);
        self.presence.record_activity(user_id);
        relayed
    }

    /// Counts as activity for `user_id` in every room they occupy.
    pub fn record_activity(&self, user_id: &str) -> usize {
        self.presence.record_activity(user_id)
    }

    /// Cleans up after a dropped connection.
    pub fn on_disconnect(&self, connection_id: &str) {
        let cleared = self.presence.disconnect(connection_id);
        let rooms = self.broker.detach(connection_id);
        tracing::info!(
            connection_id,
            presence_cleared = cleared.len(),
            rooms = rooms.len(),
            "connection closed"
        );
    }

    /// Runs one inactivity sweep. Returns the number of `UserInactive` events.
    pub fn sweep_inactive(&self) -> usize {
        self.presence.sweep_inactive()
    }

    /// Full task list of a project, oldest first.
    ///
    /// # Errors
    ///
    /// [`MutationError::NotFound`] for an unknown project, or
    /// [`MutationError::PersistenceFailure`] if the store fails.
    pub async fn load_board(&self, project_id: &str) -> Result<Vec<Task>, MutationError> {
        if !self.store.project_exists(project_id).await? {
            return Err(MutationError::NotFound(format!("project {project_id}")));
        }
        Ok(self.store.list_tasks_by_project(project_id).await?)
    }

    /// Authorizes, validates, persists and broadcasts one task mutation.
    ///
    /// On success the canonical snapshot is returned and the matching event
    /// goes to every connection in the project room except the one in
    /// `reply_to` (for a delete, the snapshot is the task as it was before
    /// removal). On failure nothing is persisted or broadcast.
    ///
    /// With `reply_to`, `MutationAccepted` or `MutationRejected` is queued for
    /// that connection before the project lock is released, so the requester
    /// sees its reply ahead of any later event for the same project.
    ///
    /// # Errors
    ///
    /// Whatever stage rejected the mutation first: authorization, field
    /// validation or persistence.
    pub async fn request_mutation(
        &self,
        actor: &ActorContext,
        reply_to: Option<ReplyTo<'_>>,
        request: MutationRequest,
    ) -> Result<Task, MutationError> {
        self.presence.record_activity(&actor.actor_id);

        let lock = self.project_lock(&request.project_id);
        let _serialized = lock.lock().await;

        let result = self.apply(actor, &request).await;
        match &result {
            Ok((task, event)) => {
                let delivered = match reply_to {
                    Some(to) => {
                        self.broker
                            .broadcast_except(&request.project_id, to.connection_id, event)
                    }
                    None => self.broker.broadcast(&request.project_id, event),
                };
                tracing::info!(
                    project_id = %request.project_id,
                    user_id = %actor.actor_id,
                    task_id = %task.id,
                    operation = %request.operation,
                    delivered,
                    "mutation applied"
                );
            }
            Err(e) => {
                tracing::warn!(
                    project_id = %request.project_id,
                    user_id = %actor.actor_id,
                    operation = %request.operation,
                    error = %e,
                    "mutation rejected"
                );
            }
        }

        if let Some(to) = reply_to {
            let reply = match &result {
                Ok((task, _)) => ServerMessage::MutationAccepted {
                    request_id: to.request_id,
                    task: task.clone(),
                },
                Err(error) => ServerMessage::MutationRejected {
                    request_id: to.request_id,
                    error: error.clone(),
                },
            };
            self.broker.send_to(to.connection_id, reply);
        }
        result.map(|(task, _)| task)
    }

    /// Dispatches one message from an identified connection.
    ///
    /// Returns the direct reply for that connection, if the message has one.
    /// Mutation replies are queued on the connection's channel instead; see
    /// [`request_mutation`](Self::request_mutation).
    pub async fn handle(
        &self,
        connection_id: &str,
        actor: &ActorContext,
        msg: ClientMessage,
    ) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Identify { user_id, .. } => {
                tracing::warn!(
                    connection_id,
                    user_id = %actor.actor_id,
                    attempted = %user_id,
                    "duplicate Identify ignored"
                );
                None
            }
            ClientMessage::JoinProject { project_id } => {
                self.request_join(
                    &project_id,
                    &actor.actor_id,
                    &actor.display_name,
                    connection_id,
                );
                None
            }
            ClientMessage::LeaveProject { project_id } => {
                self.request_leave(&project_id, &actor.actor_id, connection_id);
                None
            }
            ClientMessage::Typing {
                project_id,
                is_typing,
            } => {
                self.request_typing(&project_id, &actor.actor_id, &actor.display_name, is_typing);
                None
            }
            ClientMessage::Activity => {
                self.record_activity(&actor.actor_id);
                None
            }
            ClientMessage::LoadBoard { project_id } => {
                self.record_activity(&actor.actor_id);
                Some(match self.load_board(&project_id).await {
                    Ok(tasks) => ServerMessage::Board { project_id, tasks },
                    Err(e) => ServerMessage::Error {
                        reason: e.to_string(),
                    },
                })
            }
            ClientMessage::Mutate {
                request_id,
                request,
            } => {
                let reply_to = ReplyTo {
                    connection_id,
                    request_id,
                };
                // the outcome already went to `connection_id`
                let _ = self.request_mutation(actor, Some(reply_to), request).await;
                None
            }
        }
    }

    async fn apply(
        &self,
        actor: &ActorContext,
        request: &MutationRequest,
    ) -> Result<(Task, BoardEvent), MutationError> {
        let current = self.current_task(request).await?;
        TaskStateMachine::authorize(
            actor,
            request.operation,
            current.as_ref(),
            &request.fields,
        )?;

        let assignee = match request.operation {
            Operation::Create | Operation::Update => {
                self.resolve_assignee(actor, &request.fields).await?
            }
            Operation::Move | Operation::Delete => ResolvedAssignee::Unchanged,
        };
        let plan = TaskStateMachine::plan(&Transition {
            actor,
            project_id: &request.project_id,
            operation: request.operation,
            current: current.as_ref(),
            fields: &request.fields,
            assignee,
            now_ms: self.clock.now_ms(),
            today: self.clock.today(),
        })?;

        match (plan, current) {
            (Plan::Create(new_task), _) => {
                let task = self.store.create_task(new_task).await?;
                let event = BoardEvent::TaskCreated { task: task.clone() };
                Ok((task, event))
            }
            (Plan::Patch(patch), Some(current)) => {
                let task = self.store.update_task(&current.id, patch).await?;
                let event = if request.operation == Operation::Move {
                    BoardEvent::TaskMoved { task: task.clone() }
                } else {
                    BoardEvent::TaskUpdated { task: task.clone() }
                };
                Ok((task, event))
            }
            (Plan::Delete, Some(current)) => {
                self.store.delete_task(&current.id).await?;
                let event = BoardEvent::TaskDeleted {
                    task_id: current.id.clone(),
                    project_id: current.project_id.clone(),
                };
                Ok((current, event))
            }
            (Plan::Patch(_) | Plan::Delete, None) => Err(MutationError::NotFound(format!(
                "{} requires an existing task",
                request.operation
            ))),
        }
    }

    /// Loads the target of a non-create mutation, scoped to its project.
    async fn current_task(&self, request: &MutationRequest) -> Result<Option<Task>, MutationError> {
        if request.operation == Operation::Create {
            if !self.store.project_exists(&request.project_id).await? {
                return Err(MutationError::NotFound(format!(
                    "project {}",
                    request.project_id
                )));
            }
            return Ok(None);
        }

        let Some(task_id) = &request.task_id else {
            return Err(MutationError::invalid(
                TaskField::TaskId,
                format!("task id is required to {}", request.operation),
            ));
        };
        match self.store.get_task(task_id).await? {
            Some(task) if task.project_id == request.project_id => Ok(Some(task)),
            _ => Err(not_found(task_id, &request.project_id)),
        }
    }

    async fn resolve_assignee(
        &self,
        actor: &ActorContext,
        fields: &TaskFields,
    ) -> Result<ResolvedAssignee, MutationError> {
        let id = match &fields.assignee_id {
            None => return Ok(ResolvedAssignee::Unchanged),
            Some(None) => return Ok(ResolvedAssignee::Cleared),
            Some(Some(id)) => id,
        };
        let resolved = match self.store.user_name(id).await? {
            Some(name) => ResolvedAssignee::Set(crate::store::Assignee {
                id: id.clone(),
                name,
            }),
            None if *id == actor.actor_id => ResolvedAssignee::Set(crate::store::Assignee {
                id: id.clone(),
                name: actor.display_name.clone(),
            }),
            None => ResolvedAssignee::Unknown(id.clone()),
        };
        Ok(resolved)
    }

    pub(crate) fn project_lock(&self, project_id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.project_locks
                .lock()
                .entry(project_id.to_string())
                .or_default(),
        )
    }
}

fn not_found(task_id: &TaskId, project_id: &str) -> MutationError {
    MutationError::NotFound(format!("task {task_id} in project {project_id}"))
}
