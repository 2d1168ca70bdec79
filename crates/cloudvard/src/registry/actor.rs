//! Registry actor - owns all server state and processes commands.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures are ignored; the caller may have gone away
//! - Queue send failures remove the session instead of propagating

use tokio::sync::mpsc;
use tracing::{debug, info};

use cloudvar_core::Variable;

use super::commands::{RegistryCommand, RegistryStats};
use super::sessions::{Session, SessionId};
use crate::dispatch::Dispatcher;
use crate::state::CloudState;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - single owner of [`CloudState`].
///
/// Commands are processed one at a time. A dispatched frame runs to
/// completion, including queuing its broadcast on every session, before
/// the next command is looked at. That gives every session the same
/// order of `set` broadcasts.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    state: CloudState,
    dispatcher: Dispatcher,
}

impl RegistryActor {
    /// Creates a new registry actor over `state`.
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, state: CloudState) -> Self {
        Self {
            receiver,
            state,
            dispatcher: Dispatcher::new(),
        }
    }

    /// Runs the actor event loop until every handle is dropped.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            sessions = self.state.sessions.len(),
            variables = self.state.store.len(),
            "Registry actor stopped"
        );
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Connect { session } => self.handle_connect(session),
            RegistryCommand::Disconnect { session_id } => self.handle_disconnect(session_id),
            RegistryCommand::Dispatch {
                session_id,
                address,
                frame,
                respond_to,
            } => {
                let outcome = self.dispatcher.dispatch(&mut self.state, address, &frame);
                Dispatcher::respond(&mut self.state, session_id, &outcome);
                let _ = respond_to.send(outcome);
            }
            RegistryCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
            RegistryCommand::Variables { respond_to } => {
                let _ = respond_to.send(self.variables());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_connect(&mut self, session: Session) {
        info!(session = %session.id, addr = %session.address, "Client connected");
        self.state.sessions.add(session);
    }

    fn handle_disconnect(&mut self, session_id: SessionId) {
        if self.state.sessions.remove(session_id).is_some() {
            info!(session = %session_id, "Client disconnected");
        } else {
            debug!(session = %session_id, "Disconnect for session already removed");
        }
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            sessions: self.state.sessions.len(),
            variables: self.state.store.len(),
            granted: self.state.guard.granted_count(),
        }
    }

    fn variables(&self) -> Vec<Variable> {
        self.state.store.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Outcome;
    use crate::registry::Outbound;
    use cloudvar_protocol::CloseCode;
    use tokio::sync::oneshot;

    fn actor() -> (mpsc::Sender<RegistryCommand>, RegistryActor) {
        let (tx, rx) = mpsc::channel(8);
        (tx, RegistryActor::new(rx, CloudState::default()))
    }

    fn dispatch(actor: &mut RegistryActor, id: u64, frame: &str) -> Outcome {
        let (tx, mut rx) = oneshot::channel();
        actor.handle_command(RegistryCommand::Dispatch {
            session_id: SessionId::new(id),
            address: "127.0.0.1".parse().unwrap(),
            frame: frame.to_string(),
            respond_to: tx,
        });
        rx.try_recv().unwrap()
    }

    #[test]
    fn test_connect_disconnect() {
        let (_tx, mut actor) = actor();
        let (session, _rx) = Session::new(SessionId::new(1), "127.0.0.1".parse().unwrap());

        actor.handle_command(RegistryCommand::Connect { session });
        assert_eq!(actor.stats().sessions, 1);

        actor.handle_command(RegistryCommand::Disconnect {
            session_id: SessionId::new(1),
        });
        actor.handle_command(RegistryCommand::Disconnect {
            session_id: SessionId::new(1),
        });
        assert_eq!(actor.stats().sessions, 0);
    }

    #[test]
    fn test_failure_closes_and_removes_session() {
        let (_tx, mut actor) = actor();
        let (session, mut rx) = Session::new(SessionId::new(1), "127.0.0.1".parse().unwrap());
        actor.handle_command(RegistryCommand::Connect { session });

        let outcome = dispatch(&mut actor, 1, "{}");
        assert_eq!(outcome, Outcome::Failure(CloseCode::ProtocolError));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close(CloseCode::ProtocolError));
        assert_eq!(actor.stats().sessions, 0);
    }

    #[test]
    fn test_set_updates_stats_and_variables() {
        let (_tx, mut actor) = actor();
        let (session, mut rx) = Session::new(SessionId::new(1), "127.0.0.1".parse().unwrap());
        actor.handle_command(RegistryCommand::Connect { session });

        dispatch(&mut actor, 1, r#"{"method":"handshake","project_id":"1","user":"u"}"#);
        dispatch(
            &mut actor,
            1,
            r#"{"method":"set","project_id":"1","user":"u","name":"☁ x","value":"9"}"#,
        );

        assert_eq!(
            actor.stats(),
            RegistryStats {
                sessions: 1,
                variables: 1,
                granted: 1
            }
        );
        let variables = actor.variables();
        assert_eq!(variables[0].name.as_str(), "☁ x");
        assert_eq!(variables[0].value, "9");
        assert!(matches!(rx.try_recv(), Ok(Outbound::Text(_))));
    }

    #[tokio::test]
    async fn test_run_stops_when_handles_dropped() {
        let (tx, actor) = actor();
        let task = tokio::spawn(actor.run());
        drop(tx);
        task.await.unwrap();
    }
}
