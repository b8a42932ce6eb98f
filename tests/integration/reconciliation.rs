// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for client-side reconciliation against a live server.
//!
//! Verifies:
//! 1. An optimistic move the server accepts is confirmed with the canonical
//!    snapshot.
//! 2. An optimistic move the server rejects rolls back to the prior column
//!    and surfaces the server's reason.
//! 3. A peer's optimistic view converges on the same snapshots through
//!    broadcasts, and duplicated events change nothing.
//! 4. A move racing a peer's delete leaves the task deleted, whichever the
//!    server applied first.
//! 5. After a dropped connection, pending moves roll back and a reload
//!    brings the board in line with the server.

use std::sync::Arc;
use std::time::Duration;

use boardsync::board::Applied;
use boardsync::connection::BoardConnection;
use boardsync::reconcile::{OptimisticBoard, Reconciled};
use boardsync_proto::event::BoardEvent;
use boardsync_proto::mutation::{ActorContext, MutationRequest, Role, TaskFields};
use boardsync_proto::task::{Task, TaskStatus};
use boardsync_proto::wire::{ClientMessage, ServerMessage};
use boardsync_server::board::BoardCore;
use boardsync_server::clock::SystemClock;
use boardsync_server::presence::PresenceSettings;
use boardsync_server::server::{ServerState, start_server};
use boardsync_server::store::InMemoryTaskStore;

const PROJECT: &str = "proj-1";
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    url: String,
    core: Arc<BoardCore<InMemoryTaskStore>>,
}

async fn start() -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    store.register_user("u1", "User One").await;
    let core = Arc::new(BoardCore::new(
        store,
        Arc::new(SystemClock),
        PresenceSettings::default(),
    ));
    let state = Arc::new(ServerState::new(Arc::clone(&core)));
    let (addr, _handle) = start_server("127.0.0.1:0", state).await.unwrap();
    Harness {
        url: format!("ws://{addr}/ws"),
        core,
    }
}

async fn seed(harness: &Harness, fields: TaskFields) -> Task {
    let admin = ActorContext::new("admin", "Admin", Role::Admin);
    harness
        .core
        .request_mutation(&admin, None, MutationRequest::create(PROJECT, fields))
        .await
        .unwrap()
}

/// A connected client with its optimistic board loaded from the server.
struct Client {
    conn: BoardConnection,
    board: OptimisticBoard,
}

impl Client {
    async fn open(harness: &Harness, user_id: &str, role: Role) -> Self {
        let conn = BoardConnection::connect(&harness.url, user_id, user_id, role)
            .await
            .unwrap();
        let mut client = Self {
            conn,
            board: OptimisticBoard::new(),
        };
        client.reload().await;
        client
    }

    async fn reload(&mut self) -> Reconciled {
        self.conn
            .send(&ClientMessage::LoadBoard {
                project_id: PROJECT.into(),
            })
            .await
            .unwrap();
        self.until(|msg| matches!(msg, ServerMessage::Board { .. }))
            .await
    }

    async fn join(&mut self) {
        self.conn.join(PROJECT).await.unwrap();
        self.until(|msg| matches!(msg, ServerMessage::Event(_))).await;
    }

    /// Feeds every message into the board until one matches `done`, and
    /// returns what that message did.
    async fn until(&mut self, done: impl Fn(&ServerMessage) -> bool) -> Reconciled {
        loop {
            let msg = self.conn.recv_timeout(WAIT).await.unwrap();
            let outcome = self.board.on_server_message(&msg);
            if done(&msg) {
                return outcome;
            }
        }
    }

    async fn reply(&mut self) -> Reconciled {
        self.until(|msg| {
            matches!(
                msg,
                ServerMessage::MutationAccepted { .. } | ServerMessage::MutationRejected { .. }
            )
        })
        .await
    }

    async fn next_task_event(&mut self) -> Reconciled {
        self.until(|msg| msg.as_event().and_then(|e| e.task()).is_some())
            .await
    }

    fn status_of(&self, task: &Task) -> Option<TaskStatus> {
        self.board.state().get(PROJECT, &task.id).map(|t| t.status)
    }
}

#[tokio::test]
async fn accepted_move_is_confirmed() {
    let harness = start().await;
    let task = seed(&harness, TaskFields::titled("card")).await;
    let mut client = Client::open(&harness, "u1", Role::User).await;

    let pending = client
        .board
        .begin_move(PROJECT, &task.id, TaskStatus::InProgress)
        .unwrap();
    assert_eq!(pending.from, TaskStatus::Todo);
    assert_eq!(client.status_of(&task), Some(TaskStatus::InProgress));

    client.conn.send(&pending.to_message()).await.unwrap();
    let outcome = client.reply().await;

    assert!(matches!(outcome, Reconciled::Confirmed(_)), "got {outcome:?}");
    assert_eq!(client.board.pending_count(), 0);
    let canonical = client.board.state().get(PROJECT, &task.id).unwrap();
    assert_eq!(canonical.status, TaskStatus::InProgress);
    assert!(canonical.updated_at >= task.updated_at);
}

#[tokio::test]
async fn rejected_move_rolls_back_with_reason() {
    let harness = start().await;
    let task = seed(
        &harness,
        TaskFields {
            assignee_id: Some(Some("u1".into())),
            ..TaskFields::titled("u1's card")
        },
    )
    .await;
    let mut client = Client::open(&harness, "u2", Role::User).await;

    let pending = client
        .board
        .begin_move(PROJECT, &task.id, TaskStatus::Done)
        .unwrap();
    assert_eq!(client.status_of(&task), Some(TaskStatus::Done));

    client.conn.send(&pending.to_message()).await.unwrap();
    let Reconciled::RolledBack(rollback) = client.reply().await else {
        panic!("expected a rollback");
    };

    assert_eq!(rollback.task_id, task.id);
    assert_eq!(rollback.restored, task);
    assert!(rollback.reason.contains("forbidden"), "got: {}", rollback.reason);
    assert_eq!(client.status_of(&task), Some(TaskStatus::Todo));
    assert_eq!(client.board.pending_count(), 0);
}

#[tokio::test]
async fn peer_converges_through_broadcasts() {
    let harness = start().await;
    let task = seed(&harness, TaskFields::titled("shared")).await;
    let mut mover = Client::open(&harness, "u1", Role::User).await;
    let mut watcher = Client::open(&harness, "u2", Role::User).await;
    mover.join().await;
    watcher.join().await;

    let pending = mover
        .board
        .begin_move(PROJECT, &task.id, TaskStatus::InReview)
        .unwrap();
    mover.conn.send(&pending.to_message()).await.unwrap();
    mover.reply().await;

    let outcome = watcher.next_task_event().await;
    assert_eq!(outcome, Reconciled::Event(Applied::Replaced));
    assert_eq!(watcher.board.state(), mover.board.state());

    // a duplicated delivery is harmless
    let moved = watcher.board.state().get(PROJECT, &task.id).unwrap().clone();
    let again = ServerMessage::Event(BoardEvent::TaskMoved { task: moved });
    assert_eq!(
        watcher.board.on_server_message(&again),
        Reconciled::Event(Applied::Unchanged)
    );
    assert_eq!(watcher.board.state(), mover.board.state());
}

#[tokio::test]
async fn move_racing_a_delete_ends_deleted() {
    let harness = start().await;
    let task = seed(&harness, TaskFields::titled("contested")).await;
    let mut mover = Client::open(&harness, "u1", Role::User).await;
    mover.join().await;

    let pending = mover
        .board
        .begin_move(PROJECT, &task.id, TaskStatus::Done)
        .unwrap();
    mover.conn.send(&pending.to_message()).await.unwrap();
    let admin = ActorContext::new("admin", "Admin", Role::Admin);
    harness
        .core
        .request_mutation(&admin, None, MutationRequest::delete(PROJECT, task.id.clone()))
        .await
        .unwrap();

    let mut replied = false;
    let mut deleted = false;
    while !(replied && deleted) {
        let msg = mover.conn.recv_timeout(WAIT).await.unwrap();
        mover.board.on_server_message(&msg);
        replied |= matches!(
            msg,
            ServerMessage::MutationAccepted { .. } | ServerMessage::MutationRejected { .. }
        );
        deleted |= matches!(msg, ServerMessage::Event(BoardEvent::TaskDeleted { .. }));
    }

    assert!(mover.board.state().get(PROJECT, &task.id).is_none());
    assert_eq!(mover.board.pending_count(), 0);
}

#[tokio::test]
async fn reconnect_rolls_back_then_reloads() {
    let harness = start().await;
    let task = seed(&harness, TaskFields::titled("card")).await;
    let mut client = Client::open(&harness, "u1", Role::User).await;

    client
        .board
        .begin_move(PROJECT, &task.id, TaskStatus::Done)
        .unwrap();
    // the connection drops before the move is sent
    let Client { conn, mut board } = client;
    conn.close().await.unwrap();

    let rolled = board.rollback_all("connection lost");
    assert_eq!(rolled.len(), 1);
    assert_eq!(rolled[0].restored.status, TaskStatus::Todo);

    // meanwhile someone else created a task
    let other = seed(&harness, TaskFields::titled("created while away")).await;

    let conn = BoardConnection::connect(&harness.url, "u1", "u1", Role::User)
        .await
        .unwrap();
    let mut client = Client { conn, board };
    assert_eq!(client.reload().await, Reconciled::Reloaded { tasks: 2 });
    assert_eq!(client.status_of(&task), Some(TaskStatus::Todo));
    assert_eq!(client.status_of(&other), Some(TaskStatus::Todo));
}
