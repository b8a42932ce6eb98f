//! WebSocket transport for the board core.
//!
//! Each connection must open with `Identify`. After the server answers
//! `Identified`, every binary frame is decoded into a [`ClientMessage`] and
//! dispatched through [`BoardCore::handle`]. Replies and room events share
//! one outbound channel per connection, drained by a dedicated writer task.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use boardsync_proto::codec;
use boardsync_proto::mutation::ActorContext;
use boardsync_proto::wire::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Notify, mpsc};

use crate::board::BoardCore;
use crate::store::TaskStore;

/// Default maximum inbound frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// State shared by every connection handler.
pub struct ServerState<S> {
    core: Arc<BoardCore<S>>,
    max_frame_size: usize,
}

impl<S: TaskStore> ServerState<S> {
    /// Wraps a core with the default frame size limit.
    #[must_use]
    pub const fn new(core: Arc<BoardCore<S>>) -> Self {
        Self::with_max_frame_size(core, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wraps a core with a custom frame size limit.
    #[must_use]
    pub const fn with_max_frame_size(core: Arc<BoardCore<S>>, max_frame_size: usize) -> Self {
        Self {
            core,
            max_frame_size,
        }
    }

    /// The wrapped core.
    #[must_use]
    pub const fn core(&self) -> &Arc<BoardCore<S>> {
        &self.core
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for `Identify`.
/// 2. Attach the connection to the core and send `Identified`.
/// 3. Dispatch inbound frames until either side closes.
/// 4. Run disconnect cleanup so no presence entry outlives the socket.
pub async fn handle_socket<S: TaskStore>(socket: WebSocket, state: Arc<ServerState<S>>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(actor) = wait_for_identify(&mut ws_receiver, state.max_frame_size).await else {
        tracing::warn!("connection failed identification");
        let _ = send_direct(
            &mut ws_sender,
            &ServerMessage::Error {
                reason: "expected Identify as first message".to_string(),
            },
        )
        .await;
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = state.core.connect(tx);
    tracing::info!(
        connection_id = %connection_id,
        user_id = %actor.actor_id,
        role = %actor.role,
        "connection identified"
    );
    state.core.broker().send_to(
        &connection_id,
        ServerMessage::Identified {
            connection_id: connection_id.clone(),
        },
    );

    let writer_connection_id = connection_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = send_direct(&mut ws_sender, &msg).await {
                tracing::warn!(
                    connection_id = %writer_connection_id,
                    error = %e,
                    "WebSocket write failed"
                );
                break;
            }
        }
    });

    let shutdown = Arc::new(Notify::new());
    let mut read_task = tokio::spawn(read_frames(
        Arc::clone(&state),
        connection_id.clone(),
        actor,
        ws_receiver,
        Arc::clone(&shutdown),
    ));

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            // let a frame already being handled finish before cleanup
            shutdown.notify_one();
            let _ = read_task.await;
        }
    }

    state.core.on_disconnect(&connection_id);
}

/// Dispatches inbound frames until the peer closes or `shutdown` fires.
///
/// `shutdown` is only observed between frames: a mutation that has started
/// always runs through persistence and broadcast.
async fn read_frames<S: TaskStore>(
    state: Arc<ServerState<S>>,
    connection_id: String,
    actor: ActorContext,
    mut receiver: impl StreamExt<Item = Result<Message, axum::Error>> + Unpin,
    shutdown: Arc<Notify>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = shutdown.notified() => break,
            frame = receiver.next() => frame,
        };
        let Some(Ok(msg)) = frame else {
            break;
        };
        match msg {
            Message::Binary(data) => {
                handle_frame(&state, &connection_id, &actor, &data).await;
            }
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "received close frame");
                break;
            }
            _ => {
                // Ignore text, ping, pong frames.
            }
        }
    }
}

/// Waits for the first binary frame and expects it to be `Identify`.
async fn wait_for_identify(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    max_frame_size: usize,
) -> Option<ActorContext> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match codec::decode_bounded::<ClientMessage>(&data, max_frame_size) {
                    Ok(ClientMessage::Identify {
                        user_id,
                        display_name,
                        role,
                    }) => {
                        if user_id.is_empty() {
                            tracing::warn!("received Identify with empty user_id");
                            return None;
                        }
                        Some(ActorContext::new(user_id, display_name, role))
                    }
                    Ok(other) => {
                        tracing::warn!(msg = ?other, "expected Identify, got different message");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode identification message");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {
                // Skip non-binary frames during identification.
            }
        }
    }
    None
}

/// Decodes one inbound frame, dispatches it and queues the reply.
async fn handle_frame<S: TaskStore>(
    state: &ServerState<S>,
    connection_id: &str,
    actor: &ActorContext,
    data: &[u8],
) {
    let msg = match codec::decode_bounded::<ClientMessage>(data, state.max_frame_size) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(connection_id, error = %e, "rejecting inbound frame");
            state.core.broker().send_to(
                connection_id,
                ServerMessage::Error {
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    tracing::debug!(connection_id, user_id = %actor.actor_id, msg = ?msg, "inbound message");
    if let Some(reply) = state.core.handle(connection_id, actor, msg).await {
        state.core.broker().send_to(connection_id, reply);
    }
}

/// Encodes and sends a server message directly on a WebSocket sender.
async fn send_direct(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &ServerMessage,
) -> Result<(), String> {
    let bytes = codec::encode(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the board server on `addr` and returns the bound address and a
/// join handle.
///
/// This is the entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server<S: TaskStore>(
    addr: &str,
    state: Arc<ServerState<S>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<S>))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "board server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler<S: TaskStore>(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState<S>>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
