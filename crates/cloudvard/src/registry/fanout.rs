//! Broadcast fan-out to every live session.

use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::{debug, error};

use cloudvar_protocol::ServerMessage;

use super::sessions::{Outbound, SessionId, SessionRegistry};

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Sessions the frame was queued for
    pub delivered: usize,
    /// Sessions removed because their queue was closed or full
    pub removed: Vec<SessionId>,
}

/// Serializes a server message into a text frame payload.
pub fn encode(message: &ServerMessage) -> Option<Utf8Bytes> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Utf8Bytes::from(json)),
        Err(e) => {
            error!(error = %e, "Failed to serialize server message");
            None
        }
    }
}

/// Queues `message` for every session in the registry.
///
/// The message is serialized once. A session whose queue is closed or
/// full is removed from the registry; delivery to the others continues.
pub fn broadcast(sessions: &mut SessionRegistry, message: &ServerMessage) -> FanoutReport {
    let Some(frame) = encode(message) else {
        return FanoutReport::default();
    };

    let mut report = FanoutReport::default();
    for session in sessions.snapshot() {
        if session.send(Outbound::Text(frame.clone())) {
            report.delivered += 1;
        } else {
            debug!(session = %session.id, "Broadcast delivery failed");
            report.removed.push(session.id);
        }
    }

    for id in &report.removed {
        sessions.remove(*id);
    }

    debug!(
        delivered = report.delivered,
        removed = report.removed.len(),
        "Broadcast complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::sessions::{Session, OUTBOUND_BUFFER};
    use cloudvar_core::{Variable, VariableName};

    fn message(value: &str) -> ServerMessage {
        ServerMessage::set(&Variable::new(VariableName::canonical("foo"), value))
    }

    #[test]
    fn test_broadcast_reaches_every_session() {
        let mut registry = SessionRegistry::new();
        let mut receivers = Vec::new();
        for id in 0..3 {
            let (session, rx) = Session::new(SessionId::new(id), "127.0.0.1".parse().unwrap());
            registry.add(session);
            receivers.push(rx);
        }

        let report = broadcast(&mut registry, &message("5"));
        assert_eq!(report.delivered, 3);
        assert!(report.removed.is_empty());

        for rx in &mut receivers {
            let Ok(Outbound::Text(text)) = rx.try_recv() else {
                panic!("expected a text frame");
            };
            let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(json["method"], "set");
            assert_eq!(json["name"], "☁ foo");
            assert_eq!(json["value"], "5");
        }
    }

    #[test]
    fn test_dead_session_removed_others_served() {
        let mut registry = SessionRegistry::new();
        let (alive, mut alive_rx) = Session::new(SessionId::new(1), "127.0.0.1".parse().unwrap());
        let (dead, dead_rx) = Session::new(SessionId::new(2), "127.0.0.1".parse().unwrap());
        registry.add(alive);
        registry.add(dead);
        drop(dead_rx);

        let report = broadcast(&mut registry, &message("1"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.removed, vec![SessionId::new(2)]);
        assert_eq!(registry.len(), 1);
        assert!(alive_rx.try_recv().is_ok());
    }

    #[test]
    fn test_stalled_session_removed_when_queue_full() {
        let mut registry = SessionRegistry::new();
        let (healthy, mut healthy_rx) =
            Session::new(SessionId::new(1), "127.0.0.1".parse().unwrap());
        // Receiver stays alive but is never read, like a client that
        // stopped reading its socket.
        let (stalled, mut stalled_rx) =
            Session::with_capacity(SessionId::new(2), "127.0.0.1".parse().unwrap(), 4);
        let held = stalled.clone();
        registry.add(healthy);
        registry.add(stalled);

        let mut removed = Vec::new();
        for i in 0..5 {
            let report = broadcast(&mut registry, &message(&i.to_string()));
            removed.extend(report.removed);
        }

        assert_eq!(removed, vec![SessionId::new(2)]);
        assert!(held.is_removed());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(SessionId::new(1)).is_some());
        assert_eq!(std::iter::from_fn(|| healthy_rx.try_recv().ok()).count(), 5);
        assert_eq!(std::iter::from_fn(|| stalled_rx.try_recv().ok()).count(), 4);

        // Later broadcasts no longer queue anything for it.
        let report = broadcast(&mut registry, &message("after"));
        assert_eq!(report.delivered, 1);
        assert!(stalled_rx.try_recv().is_err());
    }

    #[test]
    fn test_stalled_session_memory_is_bounded() {
        let mut registry = SessionRegistry::new();
        let (session, mut rx) = Session::new(SessionId::new(1), "127.0.0.1".parse().unwrap());
        registry.add(session);

        let value = "x".repeat(256);
        for _ in 0..OUTBOUND_BUFFER * 2 {
            broadcast(&mut registry, &message(&value));
        }

        assert!(registry.is_empty());
        assert_eq!(std::iter::from_fn(|| rx.try_recv().ok()).count(), OUTBOUND_BUFFER);
    }

    #[test]
    fn test_per_session_order_preserved() {
        let mut registry = SessionRegistry::new();
        let (session, mut rx) = Session::new(SessionId::new(1), "127.0.0.1".parse().unwrap());
        registry.add(session);

        broadcast(&mut registry, &message("v1"));
        broadcast(&mut registry, &message("v2"));

        let values: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|frame| match frame {
                Outbound::Text(text) => serde_json::from_str::<serde_json::Value>(text.as_str())
                    .ok()
                    .and_then(|v| v["value"].as_str().map(str::to_string)),
                Outbound::Close(_) => None,
            })
            .collect();
        assert_eq!(values, vec!["v1", "v2"]);
    }

    #[test]
    fn test_broadcast_to_empty_registry() {
        let mut registry = SessionRegistry::new();
        let report = broadcast(&mut registry, &message("x"));
        assert_eq!(report, FanoutReport::default());
    }
}
