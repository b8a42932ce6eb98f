//! Optimistic column moves with confirm/rollback.
//!
//! When a user drags a card, [`OptimisticBoard::begin_move`] moves it locally
//! right away and freezes the snapshot it had before. The server's answer then
//! either replaces the local copy with the canonical snapshot
//! ([`confirm`](OptimisticBoard::confirm)) or puts the frozen snapshot back
//! ([`rollback`](OptimisticBoard::rollback)). A move is never left
//! half-applied: losing the connection rolls back everything still pending.

use std::collections::HashMap;

use boardsync_proto::event::BoardEvent;
use boardsync_proto::mutation::MutationRequest;
use boardsync_proto::task::{Task, TaskId, TaskStatus};
use boardsync_proto::wire::{ClientMessage, ServerMessage};

use crate::board::{Applied, BoardState};

/// Errors from starting an optimistic move.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// The task is not on the local board.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    /// The task already has a move in flight.
    #[error("task {0} already has a pending move")]
    MovePending(TaskId),
}

/// A locally applied move awaiting the server's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    /// Request id to send with the mutation.
    pub request_id: u64,
    /// Project of the task.
    pub project_id: String,
    /// Moved task.
    pub task_id: TaskId,
    /// Column before the move.
    pub from: TaskStatus,
    /// Column after the move.
    pub to: TaskStatus,
}

impl PendingMove {
    /// The mutation message to send for this move.
    #[must_use]
    pub fn to_message(&self) -> ClientMessage {
        ClientMessage::Mutate {
            request_id: self.request_id,
            request: MutationRequest::move_to(
                self.project_id.clone(),
                self.task_id.clone(),
                self.to.as_str(),
            ),
        }
    }
}

/// An undone optimistic move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollback {
    /// The task that was put back.
    pub task_id: TaskId,
    /// Snapshot restored on the board.
    pub restored: Task,
    /// Why the move failed, to show to the user.
    pub reason: String,
}

/// What a server message did to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// A room event was applied.
    Event(Applied),
    /// A pending move was confirmed with the canonical snapshot.
    Confirmed(Applied),
    /// A pending move was undone.
    RolledBack(Rollback),
    /// A full project reload replaced local state.
    Reloaded {
        /// Number of tasks loaded.
        tasks: usize,
    },
    /// Nothing on the board changed.
    Nothing,
}

#[derive(Debug, Clone)]
struct Pending {
    task_id: TaskId,
    baseline: Task,
}

/// A [`BoardState`] with optimistic moves layered on top.
#[derive(Debug, Default)]
pub struct OptimisticBoard {
    state: BoardState,
    pending: HashMap<u64, Pending>,
    next_request_id: u64,
}

impl OptimisticBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current local view, including unconfirmed moves.
    #[must_use]
    pub const fn state(&self) -> &BoardState {
        &self.state
    }

    /// Number of moves awaiting the server.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Moves a task locally and records how to undo it.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::UnknownTask`] if the task is not on the board, or
    /// [`ReconcileError::MovePending`] if it already has a move in flight.
    pub fn begin_move(
        &mut self,
        project_id: &str,
        task_id: &TaskId,
        to: TaskStatus,
    ) -> Result<PendingMove, ReconcileError> {
        if self.pending.values().any(|p| p.task_id == *task_id) {
            return Err(ReconcileError::MovePending(task_id.clone()));
        }
        let baseline = self
            .state
            .get(project_id, task_id)
            .cloned()
            .ok_or_else(|| ReconcileError::UnknownTask(task_id.clone()))?;

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let from = baseline.status;

        let mut moved = baseline.clone();
        moved.status = to;
        self.state.restore(moved);
        self.pending.insert(
            request_id,
            Pending {
                task_id: task_id.clone(),
                baseline,
            },
        );
        tracing::debug!(request_id, task_id = %task_id, %from, %to, "optimistic move applied");

        Ok(PendingMove {
            request_id,
            project_id: project_id.to_string(),
            task_id: task_id.clone(),
            from,
            to,
        })
    }

    /// Replaces the local copy with the server's canonical snapshot.
    ///
    /// An unknown request id only applies the snapshot. A reply for a task
    /// deleted in the meantime changes nothing.
    pub fn confirm(&mut self, request_id: u64, canonical: Task) -> Applied {
        self.pending.remove(&request_id);
        self.state.upsert(canonical)
    }

    /// Restores the snapshot frozen by [`begin_move`](Self::begin_move).
    ///
    /// Returns `None` for an unknown request id, including a move whose task
    /// was deleted in the meantime.
    pub fn rollback(&mut self, request_id: u64, reason: impl Into<String>) -> Option<Rollback> {
        let pending = self.pending.remove(&request_id)?;
        let reason = reason.into();
        tracing::debug!(request_id, task_id = %pending.task_id, reason = %reason, "move rolled back");
        self.state.restore(pending.baseline.clone());
        Some(Rollback {
            task_id: pending.task_id,
            restored: pending.baseline,
            reason,
        })
    }

    /// Rolls back every pending move, e.g. after the connection dropped.
    pub fn rollback_all(&mut self, reason: &str) -> Vec<Rollback> {
        let mut ids: Vec<u64> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.rollback(id, reason))
            .collect()
    }

    /// Applies a room event.
    ///
    /// A snapshot for a task with a pending move becomes that move's new
    /// rollback baseline; a delete drops the pending move.
    pub fn apply(&mut self, event: &BoardEvent) -> Applied {
        match event {
            BoardEvent::TaskDeleted { task_id, .. } => {
                self.pending.retain(|_, p| p.task_id != *task_id);
            }
            _ => {
                if let Some(task) = event.task() {
                    for pending in self.pending.values_mut() {
                        if pending.task_id == task.id {
                            pending.baseline = task.clone();
                        }
                    }
                }
            }
        }
        self.state.apply(event)
    }

    /// Routes one server message to the matching operation.
    pub fn on_server_message(&mut self, msg: &ServerMessage) -> Reconciled {
        match msg {
            ServerMessage::Event(event) => Reconciled::Event(self.apply(event)),
            ServerMessage::MutationAccepted { request_id, task } => {
                Reconciled::Confirmed(self.confirm(*request_id, task.clone()))
            }
            ServerMessage::MutationRejected { request_id, error } => self
                .rollback(*request_id, error.to_string())
                .map_or(Reconciled::Nothing, Reconciled::RolledBack),
            ServerMessage::Board { project_id, tasks } => {
                self.state.replace_all(project_id, tasks.clone());
                let reloaded = self.state.len(project_id);
                // moves still in flight now roll back to the reloaded snapshot
                for pending in self.pending.values_mut() {
                    if let Some(fresh) = self.state.get(project_id, &pending.task_id) {
                        pending.baseline = fresh.clone();
                    }
                }
                Reconciled::Reloaded { tasks: reloaded }
            }
            ServerMessage::Identified { .. } | ServerMessage::Error { .. } => Reconciled::Nothing,
        }
    }
}
