//! Session store for authenticated connections
//!
//! A session binds a validated username and a role to one connection id for
//! the connection's lifetime. The table is owned by the event loop task and
//! mutated only there, so it needs no interior locking.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;

/// Connection identifier, assigned monotonically at accept.
pub type ConnId = u64;

/// Coarse permission tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Read,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Read => "read",
        }
    }
}

/// Authenticated identity bound to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub authenticated_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(username: String, role: Role) -> Self {
        let now = Utc::now();
        Self {
            username,
            role,
            authenticated_at: now,
            last_activity: now,
        }
    }

    /// Record session activity.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// True once the session has seen no accepted command for longer than
    /// `timeout_secs`.
    pub fn is_stale(&self, timeout_secs: u64) -> bool {
        (Utc::now() - self.last_activity).num_seconds() > timeout_secs as i64
    }

    /// Whole seconds since authentication.
    pub fn duration_secs(&self) -> i64 {
        (Utc::now() - self.authenticated_at).num_seconds()
    }
}

/// Aggregate session counts for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounts {
    pub total: usize,
    pub admins: usize,
    pub read_only: usize,
}

/// Sessions keyed by connection id. A connection has at most one session.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<ConnId, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a session to a connection. The auth policy rejects
    /// re-authentication before this point, so an existing entry is a bug.
    pub fn insert(&mut self, conn_id: ConnId, session: Session) {
        debug_assert!(!self.sessions.contains_key(&conn_id));
        self.sessions.insert(conn_id, session);
    }

    pub fn contains(&self, conn_id: ConnId) -> bool {
        self.sessions.contains_key(&conn_id)
    }

    pub fn get(&self, conn_id: ConnId) -> Option<&Session> {
        self.sessions.get(&conn_id)
    }

    /// Update session activity, if the connection is authenticated.
    pub fn touch(&mut self, conn_id: ConnId) {
        if let Some(session) = self.sessions.get_mut(&conn_id) {
            session.touch();
        }
    }

    /// Remove a session. Idempotent: removing a non-existent session is a
    /// no-op that returns None.
    pub fn remove(&mut self, conn_id: ConnId) -> Option<Session> {
        self.sessions.remove(&conn_id)
    }

    pub fn counts(&self) -> SessionCounts {
        let admins = self
            .sessions
            .values()
            .filter(|s| s.role == Role::Admin)
            .count();
        SessionCounts {
            total: self.sessions.len(),
            admins,
            read_only: self.sessions.len() - admins,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnId, &Session)> {
        self.sessions.iter().map(|(id, s)| (*id, s))
    }

    /// Remove every session whose last activity is older than the timeout.
    /// Returns the number of sessions removed.
    pub fn cleanup_inactive(&mut self, timeout_secs: u64) -> usize {
        let stale: Vec<ConnId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_stale(timeout_secs))
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(session) = self.sessions.remove(id) {
                info!(
                    conn_id = id,
                    user = %session.username,
                    "removed inactive session"
                );
            }
        }

        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with(conn_id: ConnId, username: &str, role: Role, age_secs: i64) -> SessionStore {
        let mut store = SessionStore::new();
        let mut session = Session::new(username.to_string(), role);
        session.last_activity = Utc::now() - Duration::seconds(age_secs);
        store.insert(conn_id, session);
        store
    }

    #[test]
    fn test_session_inside_window_is_retained() {
        let mut store = store_with(1, "alice", Role::Read, 7199);
        assert_eq!(store.cleanup_inactive(7200), 0);
        assert!(store.contains(1));
    }

    #[test]
    fn test_session_past_window_is_removed() {
        let mut store = store_with(1, "alice", Role::Read, 7201);
        assert_eq!(store.cleanup_inactive(7200), 1);
        assert!(!store.contains(1));
    }

    #[test]
    fn test_touch_resets_the_idle_clock() {
        let mut store = store_with(1, "alice", Role::Read, 7201);
        store.touch(1);
        assert_eq!(store.cleanup_inactive(7200), 0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = store_with(1, "alice", Role::Read, 0);
        assert!(store.remove(1).is_some());
        assert!(store.remove(1).is_none());
        assert!(store.remove(42).is_none());
    }

    #[test]
    fn test_counts_split_by_role() {
        let mut store = SessionStore::new();
        store.insert(1, Session::new("alice".into(), Role::Read));
        store.insert(2, Session::new("bob".into(), Role::Admin));
        store.insert(3, Session::new("carol".into(), Role::Read));

        let counts = store.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.admins, 1);
        assert_eq!(counts.read_only, 2);
    }
}
