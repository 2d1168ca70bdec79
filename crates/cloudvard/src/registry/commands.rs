//! Registry actor commands and errors.
//!
//! - `RegistryCommand`: messages sent to the `RegistryActor`
//! - `RegistryError`: failures talking to the actor
//! - `RegistryStats`: a point-in-time summary of actor state

use std::net::IpAddr;

use thiserror::Error;
use tokio::sync::oneshot;

use cloudvar_core::Variable;

use super::sessions::{Session, SessionId};
use crate::dispatch::Outcome;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Queries carry a oneshot channel for the reply. Connect and Disconnect
/// are fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a live session to the broadcast set.
    Connect {
        /// The session, holding the sender half of its outbound queue
        session: Session,
    },

    /// Remove a session. A no-op if it is already gone.
    Disconnect {
        /// ID of the session to remove
        session_id: SessionId,
    },

    /// Run one text frame received from a session.
    ///
    /// The actor queues any reply or close frame on the session itself;
    /// the outcome is returned so the reader knows whether to stop.
    Dispatch {
        /// Session that sent the frame
        session_id: SessionId,
        /// Transport-level source address of the session
        address: IpAddr,
        /// Raw frame text
        frame: String,
        /// Channel to send the outcome
        respond_to: oneshot::Sender<Outcome>,
    },

    /// Report counts for the live state.
    Stats {
        /// Channel to send the result
        respond_to: oneshot::Sender<RegistryStats>,
    },

    /// Return every variable in name order.
    Variables {
        /// Channel to send the result
        respond_to: oneshot::Sender<Vec<Variable>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur when talking to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The actor has stopped.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Stats
// ============================================================================

/// Counts reported by [`RegistryCommand::Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live sessions
    pub sessions: usize,
    /// Stored variables
    pub variables: usize,
    /// Distinct granted handshakes
    pub granted: usize,
}
