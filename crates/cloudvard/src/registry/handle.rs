//! Client interface for interacting with the RegistryActor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::net::IpAddr;

use tokio::sync::{mpsc, oneshot};

use cloudvar_core::Variable;

use super::commands::{RegistryCommand, RegistryError, RegistryStats};
use super::sessions::{Session, SessionId};
use crate::dispatch::Outcome;

// ============================================================================
// Registry Handle
// ============================================================================

/// Cheap-to-clone handle to the registry actor.
///
/// ```ignore
/// let (session, outbound) = Session::new(id, peer.ip());
/// handle.connect(session).await?;
/// let outcome = handle.dispatch(id, peer.ip(), text).await?;
/// handle.disconnect(id).await;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Create a new registry handle over the actor's command channel.
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Adds a session to the broadcast set.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn connect(&self, session: Session) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::Connect { session })
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Removes a session from the broadcast set.
    ///
    /// Fire-and-forget: the actor may already be gone during shutdown.
    pub async fn disconnect(&self, session_id: SessionId) {
        let _ = self
            .sender
            .send(RegistryCommand::Disconnect { session_id })
            .await;
    }

    /// Runs one frame from `session_id` and waits for its outcome.
    ///
    /// Replies and close frames have already been queued on the session
    /// when this returns.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn dispatch(
        &self,
        session_id: SessionId,
        address: IpAddr,
        frame: String,
    ) -> Result<Outcome, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Dispatch {
                session_id,
                address,
                frame,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Returns current counts, or defaults if the actor is gone.
    pub async fn stats(&self) -> RegistryStats {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Stats { respond_to: tx })
            .await
            .is_err()
        {
            return RegistryStats::default();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns every variable in name order.
    ///
    /// Returns an empty vector if the actor is gone.
    pub async fn variables(&self) -> Vec<Variable> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Variables { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns `true` while the actor's command channel is open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
