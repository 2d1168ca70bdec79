//! Connection handler for individual WebSocket clients.
//!
//! Each accepted TCP stream gets its own `ConnectionHandler` that:
//! - Completes the WebSocket upgrade with the configured size limits
//! - Registers a session with the registry
//! - Forwards inbound text frames to the registry for dispatch
//! - Runs a writer task draining the session's outbound queue
//! - Ends the connection once the registry drops the session
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport errors end the connection; they never reach other sessions

use std::net::IpAddr;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, info, warn};

use cloudvar_protocol::CloseCode;

use crate::dispatch::Outcome;
use crate::registry::{
    Outbound, OutboundReceiver, RegistryError, RegistryHandle, Session, SessionId,
};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Longest a single socket write may block before the client is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handler for a single client connection.
pub struct ConnectionHandler {
    session_id: SessionId,
    address: IpAddr,
    registry: RegistryHandle,
    max_message_bytes: usize,
}

impl ConnectionHandler {
    /// Creates a handler for a connection from `address`.
    ///
    /// `address` is the transport peer address; it is the only address
    /// handlers ever see for this client.
    pub fn new(
        session_id: SessionId,
        address: IpAddr,
        registry: RegistryHandle,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            session_id,
            address,
            registry,
            max_message_bytes,
        }
    }

    /// Returns the session id assigned to this connection.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Transport configuration enforcing the inbound size limit.
    fn ws_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_bytes))
            .max_frame_size(Some(self.max_message_bytes))
    }

    /// Runs the connection until either side closes it.
    ///
    /// The caller is responsible for disconnecting the session from the
    /// registry once this returns, whatever the result.
    pub async fn run(self, stream: TcpStream) -> Result<(), ConnectionError> {
        let ws = accept_async_with_config(stream, Some(self.ws_config()))
            .await
            .map_err(|e| ConnectionError::Upgrade(e.to_string()))?;
        let (sink, mut frames) = ws.split();

        let (session, outbound) = Session::new(self.session_id, self.address);
        self.registry.connect(session.clone()).await?;
        tokio::spawn(write_outbound(sink, outbound, self.session_id));

        loop {
            let frame = tokio::select! {
                frame = frames.next() => frame,
                () = session.closed() => {
                    debug!(session = %self.session_id, "Writer stopped");
                    return Ok(());
                }
                () = session.removed() => {
                    debug!(session = %self.session_id, "Session removed by registry");
                    return Ok(());
                }
            };
            let Some(frame) = frame else {
                break;
            };
            let text = match frame {
                Ok(Message::Text(text)) => text.as_str().to_owned(),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        info!(session = %self.session_id, len = data.len(), "Non-UTF8 binary frame");
                        session.send(Outbound::Close(CloseCode::ProtocolError));
                        return Ok(());
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!(session = %self.session_id, "Client sent close frame");
                    return Ok(());
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Err(ConnectionError::Transport(e.to_string())),
            };

            let outcome = self
                .registry
                .dispatch(self.session_id, self.address, text)
                .await?;
            debug!(session = %self.session_id, outcome = outcome.label(), "Frame handled");

            if let Outcome::Failure(code) = outcome {
                info!(session = %self.session_id, addr = %self.address, code = %code, "Closing connection");
                return Ok(());
            }
        }

        debug!(session = %self.session_id, "Client stream ended");
        Ok(())
    }
}

/// Drains a session's outbound queue into the socket.
///
/// Stops after a close frame, when the queue is dropped, when the socket
/// fails or when a write blocks longer than [`WRITE_TIMEOUT`]. Dropping
/// the receiver on exit ends the connection's read loop.
async fn write_outbound(mut sink: WsSink, mut outbound: OutboundReceiver, session_id: SessionId) {
    while let Some(frame) = outbound.recv().await {
        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text), false),
            Outbound::Close(code) => (close_message(code), true),
        };

        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(session = %session_id, error = %e, "Write failed");
                return;
            }
            Err(_) => {
                info!(session = %session_id, "Write timed out, dropping client");
                return;
            }
        }
        if last {
            break;
        }
    }

    match tokio::time::timeout(WRITE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session = %session_id, error = %e, "Socket close"),
        Err(_) => debug!(session = %session_id, "Socket close timed out"),
    }
}

/// Builds the close frame for a status code.
pub fn close_message(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code: code.code().into(),
        reason: Utf8Bytes::from_static(code.reason()),
    }))
}

/// Errors that end a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ConnectionError {
    /// Logs the error at a level matching its cause.
    pub fn log(&self, session_id: SessionId) {
        match self {
            Self::Upgrade(_) => debug!(session = %session_id, error = %self, "Connection rejected"),
            Self::Transport(_) => debug!(session = %session_id, error = %self, "Connection closed"),
            Self::Registry(_) => warn!(session = %session_id, error = %self, "Registry unavailable"),
        }
    }
}
