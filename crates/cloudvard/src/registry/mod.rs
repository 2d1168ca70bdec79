//! Server state registry using the Actor pattern.
//!
//! The registry owns the variable store, the authorization guard and the
//! set of live sessions. Connection tasks talk to it through a
//! [`RegistryHandle`]; every command is processed on the actor's task, one
//! at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ ConnectionHandler│────▶│  RegistryActor  │────▶│ Session outbound │
//! └──────────────────┘     └─────────────────┘     │ queues (mpsc)    │
//!         │                       │                └──────────────────┘
//!         │   RegistryCommand     │   Dispatcher            │
//!         │   (mpsc channel)      │   + fanout              ▼
//!         ▼                       ▼                  writer task per
//!   Connect/Dispatch/        CloudState              connection
//!   Disconnect
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
pub mod fanout;
mod handle;
mod sessions;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryStats};
pub use fanout::{broadcast, encode, FanoutReport};
pub use handle::RegistryHandle;
pub use sessions::{
    Outbound, OutboundReceiver, OutboundSender, Session, SessionId, SessionRegistry,
    OUTBOUND_BUFFER,
};

use crate::state::CloudState;

/// Command channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Spawn the registry actor over `state` and return a handle to it.
///
/// # Example
///
/// ```no_run
/// use cloudvard::registry::spawn_registry;
/// use cloudvard::state::CloudState;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(CloudState::default());
///     let stats = handle.stats().await;
///     assert_eq!(stats.sessions, 0);
/// }
/// ```
pub fn spawn_registry(state: CloudState) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, state);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
