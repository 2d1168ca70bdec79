//! Command dispatch: method name → handler.
//!
//! The dispatcher decodes a text frame, looks the method up in a table
//! built once at startup, runs the handler against the shared state with
//! the sender's address supplied by the server, and turns the result into
//! an [`Outcome`]. [`Dispatcher::respond`] then queues the reply (or the
//! close frame) for the sender.

use std::collections::HashMap;
use std::net::IpAddr;

use thiserror::Error;
use tracing::{debug, info, warn};

use cloudvar_core::{Handshake, StoreError};
use cloudvar_protocol::{
    CloseCode, CreateArgs, DeleteArgs, HandshakeArgs, Method, ProtocolError, RawRequest,
    RenameArgs, ServerMessage, SetArgs,
};

use crate::audit;
use crate::registry::{fanout, Outbound, SessionId};
use crate::state::CloudState;

// ============================================================================
// Outcome
// ============================================================================

/// What the server does with the sender after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send each message to the sender (nothing if empty).
    Success(Vec<ServerMessage>),

    /// Close the sender's connection with this code.
    Failure(CloseCode),

    /// Do nothing; the connection stays open.
    Silent,
}

impl Outcome {
    /// Returns true if the connection is being closed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure(_) => "failure",
            Self::Silent => "silent",
        }
    }
}

// ============================================================================
// Command Errors
// ============================================================================

/// Errors a command handler can return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Handshake triple rejected by the access policy.
    #[error("Handshake denied for {0}")]
    AuthorizationDenied(Handshake),

    /// Mutating command from a triple that never completed a handshake.
    #[error("Unauthorized {method} from {handshake}")]
    UnauthorizedMutation { method: Method, handshake: Handshake },

    /// Variable store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Frame did not form a valid request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl CommandError {
    /// Maps the error to what the sender experiences.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::UnauthorizedMutation { .. } => Outcome::Silent,
            Self::AuthorizationDenied(_) => Outcome::Failure(CloseCode::Forbidden),
            Self::Store(StoreError::UnknownVariable { .. }) => {
                Outcome::Failure(CloseCode::Forbidden)
            }
            Self::Store(StoreError::ValueTooLarge { .. }) => {
                Outcome::Failure(CloseCode::ValueTooLarge)
            }
            Self::Protocol(_) => Outcome::Failure(CloseCode::ProtocolError),
        }
    }

    fn log(&self, origin: IpAddr) {
        match self {
            Self::AuthorizationDenied(_) => info!(addr = %origin, error = %self, "Handshake denied"),
            Self::UnauthorizedMutation { .. } => {
                debug!(addr = %origin, error = %self, "Dropping unauthorized mutation")
            }
            Self::Store(_) => info!(addr = %origin, error = %self, "Command rejected"),
            Self::Protocol(_) => warn!(addr = %origin, error = %self, "Protocol error"),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Handler signature: shared state, the sender's address, the request.
///
/// `Ok` carries the messages to send back to the sender.
pub type Handler =
    fn(&mut CloudState, IpAddr, &RawRequest) -> Result<Vec<ServerMessage>, CommandError>;

/// Routes requests to handlers by method name.
pub struct Dispatcher {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Builds the handler table for every [`Method`].
    pub fn new() -> Self {
        let handlers = Method::ALL
            .into_iter()
            .map(|method| (method.as_str(), handler_for(method)))
            .collect();
        Self { handlers }
    }

    /// Method names this dispatcher accepts.
    pub fn methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Decodes and runs one text frame from `origin`.
    pub fn dispatch(&self, state: &mut CloudState, origin: IpAddr, frame: &str) -> Outcome {
        let result = RawRequest::parse(frame)
            .map_err(CommandError::from)
            .and_then(|request| self.invoke(state, origin, &request));

        match result {
            Ok(payload) => Outcome::Success(payload),
            Err(e) => {
                e.log(origin);
                e.outcome()
            }
        }
    }

    fn invoke(
        &self,
        state: &mut CloudState,
        origin: IpAddr,
        request: &RawRequest,
    ) -> Result<Vec<ServerMessage>, CommandError> {
        let handler = self
            .handlers
            .get(request.method.as_str())
            .ok_or_else(|| ProtocolError::UnknownMethod(request.method.clone()))?;
        handler(state, origin, request)
    }

    /// Queues the outcome for the sender.
    ///
    /// On failure the close frame is queued and the session leaves the
    /// registry, so it receives no further broadcasts.
    pub fn respond(state: &mut CloudState, session_id: SessionId, outcome: &Outcome) {
        match outcome {
            Outcome::Success(payload) => {
                let Some(session) = state.sessions.get(session_id) else {
                    return;
                };
                let delivered = payload
                    .iter()
                    .filter_map(fanout::encode)
                    .all(|frame| session.send(Outbound::Text(frame)));
                if !delivered {
                    state.sessions.remove(session_id);
                }
            }
            Outcome::Failure(code) => {
                if let Some(session) = state.sessions.remove(session_id) {
                    session.send(Outbound::Close(*code));
                }
            }
            Outcome::Silent => {}
        }
    }
}

fn handler_for(method: Method) -> Handler {
    match method {
        Method::Handshake => handle_handshake,
        Method::Create => handle_create,
        Method::Delete => handle_delete,
        Method::Rename => handle_rename,
        Method::Set => handle_set,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Checks the triple was granted before a mutating command.
fn require_grant(
    state: &CloudState,
    method: Method,
    origin: IpAddr,
    user: &str,
    project_id: &str,
) -> Result<(), CommandError> {
    let handshake = Handshake::new(user, origin, project_id);
    if state.guard.is_granted(&handshake) {
        Ok(())
    } else {
        Err(CommandError::UnauthorizedMutation { method, handshake })
    }
}

fn handle_handshake(
    state: &mut CloudState,
    origin: IpAddr,
    request: &RawRequest,
) -> Result<Vec<ServerMessage>, CommandError> {
    let args: HandshakeArgs = request.args()?;
    let handshake = Handshake::new(args.user, origin, args.project_id);

    if !state
        .guard
        .authorize(&handshake.username, &handshake.address, &handshake.project_id)
    {
        return Err(CommandError::AuthorizationDenied(handshake));
    }

    if let Some(gateway) = &state.audit {
        audit::record_handshake(gateway, &handshake);
    }
    info!(handshake = %handshake, "Handshake granted");
    state.guard.grant(handshake);

    Ok(state.store.iter().map(ServerMessage::set).collect())
}

fn handle_create(
    state: &mut CloudState,
    origin: IpAddr,
    request: &RawRequest,
) -> Result<Vec<ServerMessage>, CommandError> {
    let args: CreateArgs = request.args()?;
    require_grant(state, Method::Create, origin, &args.user, &args.project_id)?;

    let variable = state.store.create(&args.name, args.value)?;
    debug!(name = %variable.name, "Variable created");
    Ok(Vec::new())
}

fn handle_delete(
    state: &mut CloudState,
    origin: IpAddr,
    request: &RawRequest,
) -> Result<Vec<ServerMessage>, CommandError> {
    let args: DeleteArgs = request.args()?;
    require_grant(state, Method::Delete, origin, &args.user, &args.project_id)?;

    let variable = state.store.delete(&args.name)?;
    debug!(name = %variable.name, "Variable deleted");
    Ok(Vec::new())
}

fn handle_rename(
    state: &mut CloudState,
    origin: IpAddr,
    request: &RawRequest,
) -> Result<Vec<ServerMessage>, CommandError> {
    let args: RenameArgs = request.args()?;
    require_grant(state, Method::Rename, origin, &args.user, &args.project_id)?;

    let variable = state.store.rename(&args.name, &args.new_name)?;
    debug!(name = %variable.name, "Variable renamed");
    Ok(Vec::new())
}

fn handle_set(
    state: &mut CloudState,
    origin: IpAddr,
    request: &RawRequest,
) -> Result<Vec<ServerMessage>, CommandError> {
    let args: SetArgs = request.args()?;
    // Server-originated echo; re-applying it would loop.
    if args.is_server_echo() {
        return Ok(Vec::new());
    }
    require_grant(state, Method::Set, origin, &args.user, &args.project_id)?;

    let message = ServerMessage::set(state.store.set(&args.name, args.value)?);
    fanout::broadcast(&mut state.sessions, &message);
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{OutboundReceiver, Session};
    use cloudvar_core::{AccessPolicy, ProjectPolicy, VariableName};
    use serde_json::json;

    const ALICE: &str = "2.2.2.2";

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn frame(value: serde_json::Value) -> String {
        value.to_string()
    }

    fn whitelist_state() -> CloudState {
        let policy = AccessPolicy::new(
            vec!["bad".to_string()],
            Vec::<IpAddr>::new(),
            ProjectPolicy::Whitelist(["123".to_string()].into_iter().collect()),
        );
        CloudState::new(policy, 256)
    }

    fn connect(state: &mut CloudState, id: u64) -> OutboundReceiver {
        let (session, rx) = Session::new(SessionId::new(id), ip(ALICE));
        state.sessions.add(session);
        rx
    }

    fn handshake(d: &Dispatcher, state: &mut CloudState, user: &str, project: &str) -> Outcome {
        d.dispatch(
            state,
            ip(ALICE),
            &frame(json!({"method": "handshake", "project_id": project, "user": user})),
        )
    }

    fn set(d: &Dispatcher, state: &mut CloudState, name: &str, value: &str) -> Outcome {
        d.dispatch(
            state,
            ip(ALICE),
            &frame(json!({
                "method": "set", "project_id": "123", "user": "alice",
                "name": name, "value": value
            })),
        )
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Outbound> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn set_values(frames: &[Outbound]) -> Vec<(String, String)> {
        frames
            .iter()
            .filter_map(|f| match f {
                Outbound::Text(text) => {
                    let v: serde_json::Value = serde_json::from_str(text.as_str()).ok()?;
                    Some((v["name"].as_str()?.to_string(), v["value"].as_str()?.to_string()))
                }
                Outbound::Close(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_table_covers_every_method() {
        let d = Dispatcher::new();
        let mut methods: Vec<_> = d.methods().collect();
        methods.sort_unstable();
        assert_eq!(methods, vec!["create", "delete", "handshake", "rename", "set"]);
    }

    #[test]
    fn test_missing_or_unknown_method_is_protocol_error() {
        let d = Dispatcher::new();
        let mut state = CloudState::default();

        for text in [r#"{"user":"a"}"#, r#"{"method":"list"}"#, "not json", "[]"] {
            assert_eq!(
                d.dispatch(&mut state, ip(ALICE), text),
                Outcome::Failure(CloseCode::ProtocolError),
                "frame: {text}"
            );
        }
    }

    #[test]
    fn test_missing_arguments_is_protocol_error() {
        let d = Dispatcher::new();
        let mut state = CloudState::default();
        let outcome = d.dispatch(&mut state, ip(ALICE), r#"{"method":"handshake","user":"a"}"#);
        assert_eq!(outcome, Outcome::Failure(CloseCode::ProtocolError));
    }

    #[test]
    fn test_banned_user_denied_despite_whitelist() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();

        let outcome = d.dispatch(
            &mut state,
            ip("1.1.1.1"),
            &frame(json!({"method": "handshake", "project_id": "123", "user": "bad"})),
        );
        assert_eq!(outcome, Outcome::Failure(CloseCode::Forbidden));
        assert_eq!(state.guard.granted_count(), 0);
    }

    #[test]
    fn test_project_not_whitelisted_denied() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();

        assert_eq!(
            handshake(&d, &mut state, "alice", "999"),
            Outcome::Failure(CloseCode::Forbidden)
        );
    }

    #[test]
    fn test_handshake_then_set_broadcasts_to_all() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        let mut sender_rx = connect(&mut state, 1);
        let mut other_rx = connect(&mut state, 2);

        assert_eq!(
            handshake(&d, &mut state, "alice", "123"),
            Outcome::Success(Vec::new())
        );
        assert!(state
            .guard
            .is_granted(&Handshake::new("alice", ip(ALICE), "123")));

        assert_eq!(set(&d, &mut state, "foo", "5"), Outcome::Success(Vec::new()));
        assert_eq!(state.store.get("foo").unwrap().value, "5");

        let expected = vec![("☁ foo".to_string(), "5".to_string())];
        assert_eq!(set_values(&drain(&mut sender_rx)), expected);
        assert_eq!(set_values(&drain(&mut other_rx)), expected);
    }

    #[test]
    fn test_handshake_replies_with_snapshot() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        state.store.set("b", "2".into()).unwrap();
        state.store.set("a", "1".into()).unwrap();

        let outcome = handshake(&d, &mut state, "alice", "123");
        assert_eq!(
            outcome,
            Outcome::Success(vec![
                ServerMessage::Set {
                    name: VariableName::canonical("a"),
                    value: "1".into()
                },
                ServerMessage::Set {
                    name: VariableName::canonical("b"),
                    value: "2".into()
                },
            ])
        );
    }

    #[test]
    fn test_set_without_handshake_has_no_effect() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        let mut rx = connect(&mut state, 1);

        assert_eq!(set(&d, &mut state, "foo", "5"), Outcome::Silent);
        assert!(state.store.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_grant_is_bound_to_origin_address() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        handshake(&d, &mut state, "alice", "123");

        let outcome = d.dispatch(
            &mut state,
            ip("3.3.3.3"),
            &frame(json!({
                "method": "set", "project_id": "123", "user": "alice",
                "name": "foo", "value": "5", "ip": ALICE
            })),
        );
        assert_eq!(outcome, Outcome::Silent);
        assert!(state.store.is_empty());
    }

    #[test]
    fn test_set_twice_broadcasts_in_order() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        let mut rx = connect(&mut state, 1);
        handshake(&d, &mut state, "alice", "123");

        set(&d, &mut state, "foo", "v1");
        set(&d, &mut state, "foo", "v2");

        assert_eq!(state.store.len(), 1);
        assert_eq!(state.store.get("foo").unwrap().value, "v2");
        assert_eq!(
            set_values(&drain(&mut rx)),
            vec![
                ("☁ foo".to_string(), "v1".to_string()),
                ("☁ foo".to_string(), "v2".to_string()),
            ]
        );
    }

    #[test]
    fn test_server_echo_is_ignored() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        let mut rx = connect(&mut state, 1);
        handshake(&d, &mut state, "alice", "123");

        let outcome = d.dispatch(
            &mut state,
            ip(ALICE),
            &frame(json!({
                "method": "set", "project_id": "123", "user": "alice",
                "name": "foo", "value": "5", "server": true
            })),
        );
        assert_eq!(outcome, Outcome::Success(Vec::new()));
        assert!(state.store.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_delete_unknown_closes_with_forbidden() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        handshake(&d, &mut state, "alice", "123");
        set(&d, &mut state, "keep", "1");

        let outcome = d.dispatch(
            &mut state,
            ip(ALICE),
            &frame(json!({"method": "delete", "project_id": "123", "user": "alice", "name": "nope"})),
        );
        assert_eq!(outcome, Outcome::Failure(CloseCode::Forbidden));
        assert_eq!(state.store.len(), 1);
    }

    #[test]
    fn test_create_rename_delete() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        let mut rx = connect(&mut state, 1);
        handshake(&d, &mut state, "alice", "123");

        let create = json!({"method": "create", "project_id": "123", "user": "alice", "name": "☁ old", "value": 7});
        assert_eq!(
            d.dispatch(&mut state, ip(ALICE), &frame(create)),
            Outcome::Success(Vec::new())
        );

        let rename = json!({"method": "rename", "project_id": "123", "user": "alice", "name": "☁ old", "new_name": "☁ new"});
        assert_eq!(
            d.dispatch(&mut state, ip(ALICE), &frame(rename)),
            Outcome::Success(Vec::new())
        );
        assert!(state.store.get("old").is_none());
        assert_eq!(state.store.get("new").unwrap().value, "7");
        assert_eq!(state.store.len(), 1);

        let delete = json!({"method": "delete", "project_id": "123", "user": "alice", "name": "new"});
        assert_eq!(
            d.dispatch(&mut state, ip(ALICE), &frame(delete)),
            Outcome::Success(Vec::new())
        );
        assert!(state.store.is_empty());

        // create/rename/delete never broadcast
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_rename_unknown_closes_with_forbidden() {
        let d = Dispatcher::new();
        let mut state = whitelist_state();
        handshake(&d, &mut state, "alice", "123");

        let rename = json!({"method": "rename", "project_id": "123", "user": "alice", "name": "x", "new_name": "y"});
        assert_eq!(
            d.dispatch(&mut state, ip(ALICE), &frame(rename)),
            Outcome::Failure(CloseCode::Forbidden)
        );
    }

    #[test]
    fn test_value_too_large() {
        let d = Dispatcher::new();
        let mut state = CloudState::new(AccessPolicy::default(), 4);
        let mut rx = connect(&mut state, 1);
        handshake(&d, &mut state, "alice", "123");

        assert_eq!(
            set(&d, &mut state, "foo", "12345"),
            Outcome::Failure(CloseCode::ValueTooLarge)
        );
        assert!(state.store.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_respond_failure_closes_and_deregisters() {
        let mut state = CloudState::default();
        let mut rx = connect(&mut state, 1);

        Dispatcher::respond(
            &mut state,
            SessionId::new(1),
            &Outcome::Failure(CloseCode::Forbidden),
        );

        assert!(state.sessions.is_empty());
        assert_eq!(drain(&mut rx), vec![Outbound::Close(CloseCode::Forbidden)]);
    }

    #[test]
    fn test_respond_success_sends_payload_to_sender_only() {
        let mut state = CloudState::default();
        let mut sender = connect(&mut state, 1);
        let mut other = connect(&mut state, 2);
        state.store.set("a", "1".into()).unwrap();
        let payload = state.store.iter().map(ServerMessage::set).collect();

        Dispatcher::respond(&mut state, SessionId::new(1), &Outcome::Success(payload));

        assert_eq!(
            set_values(&drain(&mut sender)),
            vec![("☁ a".to_string(), "1".to_string())]
        );
        assert!(drain(&mut other).is_empty());
    }

    #[test]
    fn test_respond_removes_sender_whose_queue_overflows() {
        let mut state = CloudState::default();
        let (session, mut rx) = Session::with_capacity(SessionId::new(1), ip(ALICE), 2);
        state.sessions.add(session);
        for name in ["a", "b", "c"] {
            state.store.set(name, "1".into()).unwrap();
        }
        let payload = state.store.iter().map(ServerMessage::set).collect();

        Dispatcher::respond(&mut state, SessionId::new(1), &Outcome::Success(payload));

        assert!(state.sessions.is_empty());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_respond_silent_and_empty_send_nothing() {
        let mut state = CloudState::default();
        let mut rx = connect(&mut state, 1);

        Dispatcher::respond(&mut state, SessionId::new(1), &Outcome::Silent);
        Dispatcher::respond(&mut state, SessionId::new(1), &Outcome::Success(Vec::new()));

        assert!(drain(&mut rx).is_empty());
        assert_eq!(state.sessions.len(), 1);
    }
}
