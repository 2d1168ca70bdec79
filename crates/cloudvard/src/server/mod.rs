//! WebSocket server for the cloud variable daemon.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Deregisters every session when its connection task ends
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   CloudServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//!         ▲                       │
//!         │ outbound queue        │ replies, broadcasts, close
//!         └───────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop keeps going

mod connection;

pub use connection::{close_message, ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::{RegistryHandle, SessionId};

/// WebSocket server bound to a TCP address.
pub struct CloudServer {
    listener: TcpListener,

    /// Handle to the registry actor
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for session ids
    connection_counter: AtomicU64,

    /// Inbound message size limit passed to every connection
    max_message_bytes: usize,
}

impl CloudServer {
    /// Binds the listener.
    ///
    /// Use port 0 to let the OS pick one; see [`CloudServer::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
        max_message_bytes: usize,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            max_message_bytes,
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Accepts connections until the cancellation token fires.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Cloud variable server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Spawns the handler task for one accepted stream.
    ///
    /// The session is disconnected from the registry on every exit path
    /// of the handler.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let session_id = SessionId::new(self.connection_counter.fetch_add(1, Ordering::Relaxed));
        let address = peer.ip().to_canonical();
        let registry = self.registry.clone();
        let handler =
            ConnectionHandler::new(session_id, address, registry.clone(), self.max_message_bytes);

        debug!(session = %session_id, peer = %peer, "Accepted connection");

        tokio::spawn(async move {
            if let Err(e) = handler.run(stream).await {
                e.log(session_id);
            }
            registry.disconnect(session_id).await;
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),
}
