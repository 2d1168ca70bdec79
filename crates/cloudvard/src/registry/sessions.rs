//! Live session tracking for broadcast fan-out.
//!
//! A session is a connected WebSocket client: its id, its origin address
//! and the sending half of its outbound queue. The registry owns sessions
//! exclusively; authorization records never point at them.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::debug;

use cloudvar_protocol::CloseCode;

/// Identifier assigned to a connection when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Frame queued for a session's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(Utf8Bytes),

    /// Close the connection with this code; nothing is sent after it.
    Close(CloseCode),
}

/// Frames a session may have queued before it counts as stalled.
pub const OUTBOUND_BUFFER: usize = 1024;

/// Sending half of a session's outbound queue.
pub type OutboundSender = mpsc::Sender<Outbound>;

/// Receiving half of a session's outbound queue.
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// A live connection as seen by the fan-out.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub address: IpAddr,
    outbound: OutboundSender,
    removed: CancellationToken,
}

impl Session {
    /// Creates a session and the receiving end of its outbound queue.
    pub fn new(id: SessionId, address: IpAddr) -> (Self, OutboundReceiver) {
        Self::with_capacity(id, address, OUTBOUND_BUFFER)
    }

    /// Like [`Session::new`] with an explicit queue capacity.
    pub fn with_capacity(
        id: SessionId,
        address: IpAddr,
        capacity: usize,
    ) -> (Self, OutboundReceiver) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                address,
                outbound,
                removed: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Queues a frame without waiting.
    ///
    /// Returns `false` if the writer task is gone or has fallen a full
    /// queue behind. Either way the session should be dropped.
    pub fn send(&self, frame: Outbound) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(session = %self.id, "Outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Resolves once the writer task has dropped its receiver.
    pub async fn closed(&self) {
        self.outbound.closed().await;
    }

    /// Resolves once the registry has removed this session.
    pub async fn removed(&self) {
        self.removed.cancelled().await;
    }

    pub fn is_removed(&self) -> bool {
        self.removed.is_cancelled()
    }

    /// Returns true once the writer task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// The set of currently connected sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session, replacing any previous one with the same id.
    pub fn add(&mut self, session: Session) {
        debug!(session = %session.id, addr = %session.address, "Session added");
        self.sessions.insert(session.id, session);
    }

    /// Removes a session; returns it if it was present.
    ///
    /// Every clone of the session observes the removal through
    /// [`Session::removed`].
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let removed = self.sessions.remove(&id);
        if let Some(session) = &removed {
            session.removed.cancel();
            debug!(session = %id, "Session removed");
        }
        removed
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Copy of the current sessions for iteration.
    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_add_remove() {
        let mut registry = SessionRegistry::new();
        let (session, _rx) = Session::new(SessionId::new(1), addr());
        registry.add(session);
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(SessionId::new(1)).unwrap();
        assert!(removed.is_removed());
        assert!(registry.remove(SessionId::new(1)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut registry = SessionRegistry::new();
        let (s1, _rx1) = Session::new(SessionId::new(1), addr());
        let (s2, _rx2) = Session::new(SessionId::new(2), addr());
        registry.add(s1);
        registry.add(s2);

        let snapshot = registry.snapshot();
        registry.remove(SessionId::new(1));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (session, rx) = Session::new(SessionId::new(1), addr());
        assert!(session.send(Outbound::Close(CloseCode::Forbidden)));

        drop(rx);
        assert!(session.is_closed());
        assert!(!session.send(Outbound::Close(CloseCode::Forbidden)));
    }

    #[test]
    fn test_send_to_full_queue_fails() {
        let (session, mut rx) = Session::with_capacity(SessionId::new(1), addr(), 2);
        let text = || Outbound::Text(Utf8Bytes::from_static("{}"));

        assert!(session.send(text()));
        assert!(session.send(text()));
        assert!(!session.send(text()));
        assert!(!session.is_closed());

        // Draining makes room again.
        assert!(rx.try_recv().is_ok());
        assert!(session.send(text()));
    }

    #[tokio::test]
    async fn test_closed_resolves_when_receiver_dropped() {
        let (session, rx) = Session::new(SessionId::new(1), addr());
        drop(rx);
        tokio::time::timeout(std::time::Duration::from_secs(1), session.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clone_observes_removal() {
        let mut registry = SessionRegistry::new();
        let (session, _rx) = Session::new(SessionId::new(1), addr());
        let held = session.clone();
        registry.add(session);
        assert!(!held.is_removed());

        registry.remove(SessionId::new(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), held.removed())
            .await
            .unwrap();
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId::new(7).to_string(), "conn-7");
    }
}
