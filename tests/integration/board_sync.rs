// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::manual_let_else,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for task mutations over a live board server.
//!
//! Every test starts a real axum server on an ephemeral port and talks to it
//! through `BoardConnection`. Verifies:
//! 1. An admin move is applied, answered directly and fanned out to peers.
//! 2. A forbidden reassignment is rejected without broadcast or persistence.
//! 3. An out-of-range weight is rejected field by field and creates nothing.
//! 4. The creator of a task gets exactly one reply and no echo; peers get
//!    exactly one `TaskCreated`.
//! 5. Every session of a user in the room receives task events, including
//!    the creator's other sessions.
//! 6. Concurrent mutations reach every member in the same order.
//! 7. `LoadBoard` returns the full project for a reload.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use boardsync::board::{Applied, BoardState};
use boardsync::connection::BoardConnection;
use boardsync_proto::event::BoardEvent;
use boardsync_proto::mutation::{
    ActorContext, MutationError, MutationRequest, Role, TaskField, TaskFields,
};
use boardsync_proto::task::{Task, TaskStatus};
use boardsync_proto::wire::ServerMessage;
use boardsync_server::board::BoardCore;
use boardsync_server::clock::SystemClock;
use boardsync_server::presence::PresenceSettings;
use boardsync_server::server::{ServerState, start_server};
use boardsync_server::store::{InMemoryTaskStore, TaskStore};

const PROJECT: &str = "proj-1";
const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    addr: SocketAddr,
    core: Arc<BoardCore<InMemoryTaskStore>>,
}

async fn start() -> Harness {
    let store = Arc::new(InMemoryTaskStore::with_projects([PROJECT, "proj-2"]));
    store.register_user("u1", "User One").await;
    store.register_user("u2", "User Two").await;
    let core = Arc::new(BoardCore::new(
        store,
        Arc::new(SystemClock),
        PresenceSettings::default(),
    ));
    let state = Arc::new(ServerState::new(Arc::clone(&core)));
    let (addr, _handle) = start_server("127.0.0.1:0", state).await.unwrap();
    Harness { addr, core }
}

fn admin() -> ActorContext {
    ActorContext::new("admin", "Admin", Role::Admin)
}

/// Creates a task directly through the core, before any client joins.
async fn seed(harness: &Harness, fields: TaskFields) -> Task {
    harness
        .core
        .request_mutation(&admin(), None, MutationRequest::create(PROJECT, fields))
        .await
        .unwrap()
}

async fn connect(harness: &Harness, user_id: &str, role: Role) -> BoardConnection {
    BoardConnection::connect(
        &format!("ws://{}/ws", harness.addr),
        user_id,
        &user_id.to_uppercase(),
        role,
    )
    .await
    .unwrap()
}

/// Joins the project and waits for the room's `ActiveUsers` listing this
/// connection's user, so joins from several clients happen in a known order.
async fn join(conn: &mut BoardConnection) {
    conn.join(PROJECT).await.unwrap();
    loop {
        if let ServerMessage::Event(BoardEvent::ActiveUsers { users, .. }) =
            conn.recv_timeout(WAIT).await.unwrap()
            && users.iter().any(|u| u.user_id == conn.user_id())
        {
            return;
        }
    }
}

const fn is_task_event(event: &BoardEvent) -> bool {
    matches!(
        event,
        BoardEvent::TaskCreated { .. }
            | BoardEvent::TaskUpdated { .. }
            | BoardEvent::TaskMoved { .. }
            | BoardEvent::TaskDeleted { .. }
    )
}

/// Reads until a direct reply arrives. Returns it together with any task
/// events that came before it.
async fn await_reply(conn: &mut BoardConnection) -> (ServerMessage, Vec<BoardEvent>) {
    let mut events = Vec::new();
    loop {
        match conn.recv_timeout(WAIT).await.unwrap() {
            ServerMessage::Event(event) => {
                if is_task_event(&event) {
                    events.push(event);
                }
            }
            reply => return (reply, events),
        }
    }
}

/// Next task event, skipping presence traffic.
async fn next_task_event(conn: &mut BoardConnection) -> BoardEvent {
    loop {
        if let ServerMessage::Event(event) = conn.recv_timeout(WAIT).await.unwrap()
            && is_task_event(&event)
        {
            return event;
        }
    }
}

/// Task events arriving until the connection stays quiet.
async fn quiet_task_events(conn: &mut BoardConnection) -> Vec<BoardEvent> {
    let mut events = Vec::new();
    while let Some(msg) = conn.try_recv_within(QUIET).await.unwrap() {
        if let ServerMessage::Event(event) = msg
            && is_task_event(&event)
        {
            events.push(event);
        }
    }
    events
}

// ---------------------------------------------------------------------------
// Mutation outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_moves_todo_task_straight_to_done() {
    let harness = start().await;
    let t1 = seed(&harness, TaskFields::titled("T1")).await;
    assert_eq!(t1.status, TaskStatus::Todo);

    let mut admin_conn = connect(&harness, "admin", Role::Admin).await;
    let mut member = connect(&harness, "u2", Role::User).await;
    join(&mut admin_conn).await;
    join(&mut member).await;

    admin_conn
        .mutate(1, MutationRequest::move_to(PROJECT, t1.id.clone(), "done"))
        .await
        .unwrap();

    let (reply, echoed) = await_reply(&mut admin_conn).await;
    let ServerMessage::MutationAccepted { request_id, task } = reply else {
        panic!("expected MutationAccepted, got {reply:?}");
    };
    assert_eq!(request_id, 1);
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.title, "T1");
    assert!(echoed.is_empty());

    assert_eq!(
        next_task_event(&mut member).await,
        BoardEvent::TaskMoved { task: task.clone() }
    );
    assert!(quiet_task_events(&mut member).await.is_empty());
    assert!(quiet_task_events(&mut admin_conn).await.is_empty());
}

#[tokio::test]
async fn non_admin_cannot_take_over_assigned_task() {
    let harness = start().await;
    let owned = seed(
        &harness,
        TaskFields {
            assignee_id: Some(Some("u1".into())),
            ..TaskFields::titled("owned by u1")
        },
    )
    .await;
    assert_eq!(owned.assignee_name.as_deref(), Some("User One"));

    let mut u1 = connect(&harness, "u1", Role::User).await;
    let mut u2 = connect(&harness, "u2", Role::User).await;
    join(&mut u1).await;
    join(&mut u2).await;

    let takeover = TaskFields {
        assignee_id: Some(Some("u2".into())),
        ..TaskFields::default()
    };
    u2.mutate(
        9,
        MutationRequest::update(PROJECT, owned.id.clone(), takeover),
    )
    .await
    .unwrap();

    let (reply, _) = await_reply(&mut u2).await;
    let ServerMessage::MutationRejected { request_id, error } = reply else {
        panic!("expected MutationRejected, got {reply:?}");
    };
    assert_eq!(request_id, 9);
    assert!(matches!(error, MutationError::Forbidden(_)), "got {error:?}");

    assert!(quiet_task_events(&mut u1).await.is_empty());
    let stored = harness.core.store().get_task(&owned.id).await.unwrap();
    assert_eq!(stored, Some(owned));
}

#[tokio::test]
async fn moving_someone_elses_task_is_forbidden() {
    let harness = start().await;
    let owned = seed(
        &harness,
        TaskFields {
            assignee_id: Some(Some("u1".into())),
            ..TaskFields::titled("owned by u1")
        },
    )
    .await;

    let mut u2 = connect(&harness, "u2", Role::User).await;
    join(&mut u2).await;
    u2.mutate(1, MutationRequest::move_to(PROJECT, owned.id.clone(), "done"))
        .await
        .unwrap();

    let (reply, _) = await_reply(&mut u2).await;
    assert!(matches!(
        reply,
        ServerMessage::MutationRejected {
            error: MutationError::Forbidden(_),
            ..
        }
    ));
    let stored = harness.core.store().get_task(&owned.id).await.unwrap();
    assert_eq!(stored.map(|t| t.status), Some(TaskStatus::Todo));
}

#[tokio::test]
async fn weight_out_of_range_creates_nothing() {
    let harness = start().await;
    let mut u1 = connect(&harness, "u1", Role::User).await;
    let mut u2 = connect(&harness, "u2", Role::User).await;
    join(&mut u1).await;
    join(&mut u2).await;

    let fields = TaskFields {
        weight: Some(11),
        ..TaskFields::titled("too heavy")
    };
    u1.mutate(3, MutationRequest::create(PROJECT, fields))
        .await
        .unwrap();

    let (reply, _) = await_reply(&mut u1).await;
    let ServerMessage::MutationRejected { error, .. } = reply else {
        panic!("expected MutationRejected, got {reply:?}");
    };
    assert!(error.has_field_error(TaskField::Weight), "got {error:?}");
    assert_eq!(error.field_errors().len(), 1);

    assert!(quiet_task_events(&mut u2).await.is_empty());
    assert!(harness.core.store().is_empty().await);
}

#[tokio::test]
async fn every_invalid_field_is_reported() {
    let harness = start().await;
    let mut u1 = connect(&harness, "u1", Role::User).await;
    join(&mut u1).await;

    let fields = TaskFields {
        weight: Some(0),
        priority: Some("urgent".into()),
        color: Some(Some("red".into())),
        due_date: Some(Some("2000-01-01".into())),
        ..TaskFields::titled("   ")
    };
    u1.mutate(4, MutationRequest::create(PROJECT, fields))
        .await
        .unwrap();

    let (reply, _) = await_reply(&mut u1).await;
    let ServerMessage::MutationRejected { error, .. } = reply else {
        panic!("expected MutationRejected, got {reply:?}");
    };
    for field in [
        TaskField::Title,
        TaskField::Weight,
        TaskField::Priority,
        TaskField::Color,
        TaskField::DueDate,
    ] {
        assert!(error.has_field_error(field), "missing {field} in {error:?}");
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn creator_gets_reply_peer_gets_one_event() {
    let harness = start().await;
    let mut a = connect(&harness, "u1", Role::User).await;
    let mut b = connect(&harness, "u2", Role::User).await;
    join(&mut a).await;
    join(&mut b).await;

    a.mutate(1, MutationRequest::create(PROJECT, TaskFields::titled("T2")))
        .await
        .unwrap();

    let (reply, echoed) = await_reply(&mut a).await;
    let ServerMessage::MutationAccepted { task, .. } = reply else {
        panic!("expected MutationAccepted, got {reply:?}");
    };
    assert_eq!(task.created_by, "u1");
    assert!(echoed.is_empty());

    let mut seen = vec![next_task_event(&mut b).await];
    seen.extend(quiet_task_events(&mut b).await);
    assert_eq!(seen, vec![BoardEvent::TaskCreated { task }]);
    assert!(quiet_task_events(&mut a).await.is_empty());
}

#[tokio::test]
async fn every_session_of_a_user_receives_task_events() {
    let harness = start().await;
    let mut tab1 = connect(&harness, "u1", Role::User).await;
    let mut tab2 = connect(&harness, "u1", Role::User).await;
    let mut other = connect(&harness, "u2", Role::User).await;
    join(&mut tab1).await;
    join(&mut tab2).await;
    join(&mut other).await;

    other
        .mutate(1, MutationRequest::create(PROJECT, TaskFields::titled("from u2")))
        .await
        .unwrap();
    let (reply, _) = await_reply(&mut other).await;
    let ServerMessage::MutationAccepted { task, .. } = reply else {
        panic!("expected MutationAccepted, got {reply:?}");
    };
    let created = BoardEvent::TaskCreated { task };
    assert_eq!(next_task_event(&mut tab1).await, created);
    assert_eq!(next_task_event(&mut tab2).await, created);

    tab2.mutate(2, MutationRequest::create(PROJECT, TaskFields::titled("from tab 2")))
        .await
        .unwrap();
    let (reply, echoed) = await_reply(&mut tab2).await;
    let ServerMessage::MutationAccepted { task, .. } = reply else {
        panic!("expected MutationAccepted, got {reply:?}");
    };
    assert!(echoed.is_empty());
    assert_eq!(
        next_task_event(&mut tab1).await,
        BoardEvent::TaskCreated { task: task.clone() }
    );
    assert_eq!(
        next_task_event(&mut other).await,
        BoardEvent::TaskCreated { task }
    );
    assert!(quiet_task_events(&mut tab2).await.is_empty());
}

#[tokio::test]
async fn members_of_other_projects_see_nothing() {
    let harness = start().await;
    let mut a = connect(&harness, "u1", Role::User).await;
    let mut outsider = connect(&harness, "u2", Role::User).await;
    join(&mut a).await;
    outsider.join("proj-2").await.unwrap();

    a.mutate(1, MutationRequest::create(PROJECT, TaskFields::titled("T")))
        .await
        .unwrap();
    let (reply, _) = await_reply(&mut a).await;
    assert!(matches!(reply, ServerMessage::MutationAccepted { .. }));

    assert!(quiet_task_events(&mut outsider).await.is_empty());
}

#[tokio::test]
async fn concurrent_creates_arrive_in_one_order() {
    const PER_CLIENT: u64 = 5;

    let harness = start().await;
    let mut a = connect(&harness, "u1", Role::User).await;
    let mut b = connect(&harness, "u2", Role::User).await;
    let mut observer = connect(&harness, "admin", Role::Admin).await;
    join(&mut observer).await;
    join(&mut a).await;
    join(&mut b).await;

    let send = |mut conn: BoardConnection, prefix: &'static str| async move {
        for i in 0..PER_CLIENT {
            let request = MutationRequest::create(PROJECT, TaskFields::titled(format!("{prefix}{i}")));
            conn.mutate(i, request).await.unwrap();
        }
        let mut accepted = 0;
        while accepted < PER_CLIENT {
            if let (ServerMessage::MutationAccepted { .. }, _) = await_reply(&mut conn).await {
                accepted += 1;
            }
        }
        conn
    };
    let (_a, _b) = tokio::join!(send(a, "a"), send(b, "b"));

    let mut observed = Vec::new();
    for _ in 0..2 * PER_CLIENT {
        match next_task_event(&mut observer).await {
            BoardEvent::TaskCreated { task } => observed.push(task),
            other => panic!("unexpected {other:?}"),
        }
    }

    let stored = harness.core.store().list_tasks_by_project(PROJECT).await.unwrap();
    assert_eq!(observed, stored);
}

#[tokio::test]
async fn delete_is_broadcast_and_tolerated_twice() {
    let harness = start().await;
    let task = seed(&harness, TaskFields::titled("doomed")).await;

    let mut a = connect(&harness, "u1", Role::User).await;
    let mut b = connect(&harness, "u2", Role::User).await;
    join(&mut a).await;
    join(&mut b).await;

    let mut board = BoardState::new();
    board.upsert(task.clone());

    a.mutate(2, MutationRequest::delete(PROJECT, task.id.clone()))
        .await
        .unwrap();
    let (reply, _) = await_reply(&mut a).await;
    assert!(matches!(reply, ServerMessage::MutationAccepted { .. }));

    let event = next_task_event(&mut b).await;
    assert_eq!(
        event,
        BoardEvent::TaskDeleted {
            task_id: task.id.clone(),
            project_id: PROJECT.into(),
        }
    );
    assert_eq!(board.apply(&event), Applied::Removed);
    assert_eq!(board.apply(&event), Applied::Ignored);

    // a second delete of the same task is NotFound
    a.mutate(3, MutationRequest::delete(PROJECT, task.id.clone()))
        .await
        .unwrap();
    let (reply, _) = await_reply(&mut a).await;
    assert!(matches!(
        reply,
        ServerMessage::MutationRejected {
            error: MutationError::NotFound(_),
            ..
        }
    ));
}

// ---------------------------------------------------------------------------
// Reload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_board_returns_project_in_creation_order() {
    let harness = start().await;
    let first = seed(&harness, TaskFields::titled("first")).await;
    let second = seed(&harness, TaskFields::titled("second")).await;

    let mut conn = connect(&harness, "u1", Role::User).await;
    conn.send(&boardsync_proto::wire::ClientMessage::LoadBoard {
        project_id: PROJECT.into(),
    })
    .await
    .unwrap();

    let (reply, _) = await_reply(&mut conn).await;
    let ServerMessage::Board { project_id, tasks } = reply else {
        panic!("expected Board, got {reply:?}");
    };
    assert_eq!(project_id, PROJECT);
    assert_eq!(tasks, vec![first, second]);

    let mut board = BoardState::new();
    board.replace_all(&project_id, tasks);
    assert_eq!(board.column(PROJECT, TaskStatus::Todo).len(), 2);
}

#[tokio::test]
async fn load_unknown_project_is_an_error() {
    let harness = start().await;
    let mut conn = connect(&harness, "u1", Role::User).await;
    conn.send(&boardsync_proto::wire::ClientMessage::LoadBoard {
        project_id: "nope".into(),
    })
    .await
    .unwrap();

    let (reply, _) = await_reply(&mut conn).await;
    let ServerMessage::Error { reason } = reply else {
        panic!("expected Error, got {reply:?}");
    };
    assert!(reason.contains("not found"), "got: {reason}");
}
