//! Connection-level protocol between board clients and the board server.
//!
//! A connection starts with [`ClientMessage::Identify`]; the server answers
//! [`ServerMessage::Identified`] with the connection id it assigned. After
//! that the client may join project rooms, issue mutations and receive
//! [`BoardEvent`]s. Messages are postcard-encoded into binary WebSocket
//! frames by [`crate::codec`].

use serde::{Deserialize, Serialize};

use crate::event::BoardEvent;
use crate::mutation::{MutationError, MutationRequest, Role};
use crate::task::Task;

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Declares who is on this connection. Must be the first message.
    Identify {
        /// User identifier.
        user_id: String,
        /// Name shown to collaborators.
        display_name: String,
        /// Role applied to every mutation on this connection.
        role: Role,
    },
    /// Enter a project room.
    JoinProject {
        /// Room to join.
        project_id: String,
    },
    /// Leave a project room.
    LeaveProject {
        /// Room to leave.
        project_id: String,
    },
    /// Typing indicator; relayed to the room, never stored.
    Typing {
        /// Room the user is typing in.
        project_id: String,
        /// `true` while typing.
        is_typing: bool,
    },
    /// Explicit activity ping to stay active.
    Activity,
    /// Request the full task list of a project (reload after reconnect).
    LoadBoard {
        /// Project to load.
        project_id: String,
    },
    /// Request a task mutation.
    Mutate {
        /// Client-chosen id echoed in the reply.
        request_id: u64,
        /// The mutation.
        request: MutationRequest,
    },
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake accepted.
    Identified {
        /// Server-assigned connection id.
        connection_id: String,
    },
    /// A room event.
    Event(BoardEvent),
    /// A mutation succeeded; carries the canonical snapshot.
    MutationAccepted {
        /// Echo of the client's request id.
        request_id: u64,
        /// Canonical snapshot (for a delete, the last snapshot before removal).
        task: Task,
    },
    /// A mutation was rejected; nothing was applied or broadcast.
    MutationRejected {
        /// Echo of the client's request id.
        request_id: u64,
        /// Why it was rejected.
        error: MutationError,
    },
    /// Full task list of a project.
    Board {
        /// Project the tasks belong to.
        project_id: String,
        /// Every task in the project, oldest first.
        tasks: Vec<Task>,
    },
    /// Protocol-level error (malformed frame, missing handshake, ...).
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

impl ServerMessage {
    /// Returns the wrapped event, if this is an [`Event`](Self::Event).
    #[must_use]
    pub const fn as_event(&self) -> Option<&BoardEvent> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}
