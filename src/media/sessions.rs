//! Streaming session tracking for the media server
//!
//! Every accepted GET registers a session; byte counts and timestamps are
//! updated as the response body flows out and the session is closed with its
//! final state when the connection ends.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Delivery state of one streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request accepted, no payload bytes sent yet
    Opening,
    /// Payload bytes are flowing
    Serving,
    /// Connection ended after full delivery
    Closed,
    /// Connection ended early or a read failed mid-stream
    Errored,
}

/// One live (or finished) HTTP delivery of a published video.
#[derive(Debug, Clone)]
pub struct StreamingSession {
    /// Registry-assigned session id
    pub id: u64,
    /// Publication token the request resolved to
    pub token: String,
    /// Video the bytes belong to
    pub video_id: String,
    /// Peer address, when the listener provided one
    pub client: Option<SocketAddr>,
    /// Delivery state
    pub state: SessionState,
    /// Payload bytes sent so far
    pub bytes_served: u64,
    /// Payload bytes the response promised
    pub expected_bytes: u64,
    /// When the request was accepted
    pub opened_at: SystemTime,
    /// When the first payload byte went out
    pub first_byte_at: Option<SystemTime>,
    /// When the most recent payload byte went out
    pub last_byte_at: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct SessionTable {
    next_id: u64,
    sessions: HashMap<u64, StreamingSession>,
}

/// Shared registry of streaming sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<SessionTable>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session in the `Opening` state and returns its id.
    pub fn open(
        &self,
        token: &str,
        video_id: &str,
        client: Option<SocketAddr>,
        expected_bytes: u64,
    ) -> u64 {
        let mut table = self.inner.lock().expect("session lock poisoned");
        table.next_id += 1;
        let id = table.next_id;
        table.sessions.insert(
            id,
            StreamingSession {
                id,
                token: token.to_string(),
                video_id: video_id.to_string(),
                client,
                state: SessionState::Opening,
                bytes_served: 0,
                expected_bytes,
                opened_at: SystemTime::now(),
                first_byte_at: None,
                last_byte_at: None,
            },
        );
        id
    }

    /// Accounts payload bytes to a session.
    pub fn record_bytes(&self, id: u64, count: u64) {
        let mut table = self.inner.lock().expect("session lock poisoned");
        if let Some(session) = table.sessions.get_mut(&id) {
            let now = SystemTime::now();
            session.bytes_served += count;
            session.first_byte_at.get_or_insert(now);
            session.last_byte_at = Some(now);
            if session.state == SessionState::Opening {
                session.state = SessionState::Serving;
            }
        }
    }

    /// Closes a session with its final state. Closing twice is a no-op.
    pub fn close(&self, id: u64, state: SessionState) {
        let mut table = self.inner.lock().expect("session lock poisoned");
        if let Some(session) = table.sessions.get_mut(&id) {
            if matches!(session.state, SessionState::Opening | SessionState::Serving) {
                session.state = state;
            }
        }
    }

    /// Marks every still-open session as errored; used when shutdown severs
    /// connections after the drain timeout.
    pub fn sever_open(&self) {
        let mut table = self.inner.lock().expect("session lock poisoned");
        for session in table.sessions.values_mut() {
            if matches!(session.state, SessionState::Opening | SessionState::Serving) {
                session.state = SessionState::Errored;
            }
        }
    }

    /// Snapshot of all sessions.
    pub fn snapshot(&self) -> Vec<StreamingSession> {
        let table = self.inner.lock().expect("session lock poisoned");
        let mut sessions: Vec<StreamingSession> = table.sessions.values().cloned().collect();
        sessions.sort_by_key(|session| session.id);
        sessions
    }

    /// Number of sessions currently open.
    pub fn open_count(&self) -> usize {
        let table = self.inner.lock().expect("session lock poisoned");
        table
            .sessions
            .values()
            .filter(|session| {
                matches!(session.state, SessionState::Opening | SessionState::Serving)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lifecycle() {
        let registry = SessionRegistry::new();
        let id = registry.open("tok", "v1", None, 100);

        registry.record_bytes(id, 40);
        registry.record_bytes(id, 60);
        registry.close(id, SessionState::Closed);

        let sessions = registry.snapshot();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].bytes_served, 100);
        assert_eq!(sessions[0].state, SessionState::Closed);
        assert!(sessions[0].first_byte_at.is_some());
    }

    #[test]
    fn test_close_is_terminal() {
        let registry = SessionRegistry::new();
        let id = registry.open("tok", "v1", None, 10);
        registry.close(id, SessionState::Errored);
        registry.close(id, SessionState::Closed);

        assert_eq!(registry.snapshot()[0].state, SessionState::Errored);
    }

    #[test]
    fn test_sever_open_only_touches_live_sessions() {
        let registry = SessionRegistry::new();
        let done = registry.open("tok", "v1", None, 10);
        registry.close(done, SessionState::Closed);
        let live = registry.open("tok", "v1", None, 10);
        registry.record_bytes(live, 5);

        registry.sever_open();

        let sessions = registry.snapshot();
        assert_eq!(sessions[0].state, SessionState::Closed);
        assert_eq!(sessions[1].state, SessionState::Errored);
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn test_distinct_ids_per_request() {
        let registry = SessionRegistry::new();
        let a = registry.open("tok", "v1", None, 10);
        let b = registry.open("tok", "v1", None, 10);
        assert_ne!(a, b);
        assert_eq!(registry.snapshot().len(), 2);
    }
}
