//! WebSocket connection to a board server.
//!
//! [`BoardConnection::connect`] opens the socket, performs the `Identify`
//! handshake and hands back a connection that sends [`ClientMessage`]s and
//! receives [`ServerMessage`]s as postcard-encoded binary frames.

use std::time::Duration;

use boardsync_proto::codec::{self, CodecError};
use boardsync_proto::mutation::{MutationRequest, Role};
use boardsync_proto::wire::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Default timeout for opening the WebSocket.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the `Identified` acknowledgment.
pub const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Errors from a [`BoardConnection`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The server URL is not a `ws://` or `wss://` URL.
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl {
        /// The URL as given.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
    /// The operation did not finish in time.
    #[error("connection timed out")]
    Timeout,
    /// The server closed the connection.
    #[error("connection closed")]
    Closed,
    /// The server answered the handshake with something unexpected.
    #[error("handshake rejected: {0}")]
    Handshake(String),
    /// WebSocket-level failure.
    #[error("websocket error: {0}")]
    WebSocket(String),
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// An identified connection to a board server.
pub struct BoardConnection {
    ws: WsStream,
    connection_id: String,
    user_id: String,
}

impl BoardConnection {
    /// Connects to `server_url` and identifies as `user_id`.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::InvalidUrl`] for a malformed URL,
    /// [`ConnectionError::Timeout`] if connecting or the handshake takes too
    /// long, or [`ConnectionError::Handshake`] if the server refuses.
    pub async fn connect(
        server_url: &str,
        user_id: &str,
        display_name: &str,
        role: Role,
    ) -> Result<Self, ConnectionError> {
        let url = url::Url::parse(server_url).map_err(|e| ConnectionError::InvalidUrl {
            url: server_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConnectionError::InvalidUrl {
                url: server_url.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                tracing::warn!(url = server_url, "board server connect timed out");
                ConnectionError::Timeout
            })??;

        let mut conn = Self {
            ws,
            connection_id: String::new(),
            user_id: user_id.to_string(),
        };
        conn.send(&ClientMessage::Identify {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            role,
        })
        .await?;

        match conn.recv_timeout(IDENTIFY_TIMEOUT).await? {
            ServerMessage::Identified { connection_id } => {
                tracing::info!(
                    connection_id = %connection_id,
                    user_id,
                    url = server_url,
                    "identified with board server"
                );
                conn.connection_id = connection_id;
                Ok(conn)
            }
            ServerMessage::Error { reason } => Err(ConnectionError::Handshake(reason)),
            other => Err(ConnectionError::Handshake(format!(
                "expected Identified, got {other:?}"
            ))),
        }
    }

    /// Server-assigned connection id.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// User this connection identified as.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Sends one message.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if encoding or the socket write fails.
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), ConnectionError> {
        let bytes = codec::encode(msg)?;
        self.ws.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    /// Enters a project room.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn join(&mut self, project_id: &str) -> Result<(), ConnectionError> {
        self.send(&ClientMessage::JoinProject {
            project_id: project_id.to_string(),
        })
        .await
    }

    /// Sends a mutation under `request_id`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn mutate(
        &mut self,
        request_id: u64,
        request: MutationRequest,
    ) -> Result<(), ConnectionError> {
        self.send(&ClientMessage::Mutate {
            request_id,
            request,
        })
        .await
    }

    /// Receives the next message, skipping non-binary frames.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Closed`] once the server hangs up, or a decode or
    /// socket error.
    pub async fn recv(&mut self) -> Result<ServerMessage, ConnectionError> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Binary(data) => return Ok(codec::decode(&data)?),
                Message::Close(_) => return Err(ConnectionError::Closed),
                _ => {
                    // Ignore ping/pong/text frames.
                }
            }
        }
        Err(ConnectionError::Closed)
    }

    /// Like [`recv`](Self::recv) with a deadline.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Timeout`] if nothing arrives in time.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<ServerMessage, ConnectionError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| ConnectionError::Timeout)?
    }

    /// Waits up to `window` for a message; `Ok(None)` if none arrived.
    ///
    /// # Errors
    ///
    /// See [`recv`](Self::recv).
    pub async fn try_recv_within(
        &mut self,
        window: Duration,
    ) -> Result<Option<ServerMessage>, ConnectionError> {
        match tokio::time::timeout(window, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::WebSocket`] if the close frame cannot be
    /// sent.
    pub async fn close(mut self) -> Result<(), ConnectionError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
