//! Registry of live sessions: creation, reconnect lookup, TTL eviction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use rtc_domain::config::SessionConfig;
use rtc_domain::error::Error;

use crate::session::Session;

/// Outcome of a reconnect attempt.
pub enum Reconnect {
    /// The session survived; history and playbook state are intact.
    Recovered(Arc<Session>),
    /// Unknown or expired id; a fresh session replaces it and `error`
    /// says which case applied.
    Replaced { session: Arc<Session>, error: Error },
}

/// Owns all live sessions, keyed by opaque id. The lock is held only for
/// insert/lookup/erase; session internals have their own synchronization.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    ttl: Duration,
    history_limit: usize,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(config.ttl_secs as i64),
            history_limit: config.history_limit,
        }
    }

    /// Mint a session with a fresh 128-bit random id.
    pub fn create(&self) -> Arc<Session> {
        self.create_at(Utc::now())
    }

    pub fn create_at(&self, now: DateTime<Utc>) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Arc::new(Session::new(id.clone(), self.history_limit, now));
        self.sessions.write().insert(id, session.clone());
        tracing::debug!(session_id = %session.id(), "session created");
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn touch(&self, id: &str) {
        if let Some(s) = self.get(id) {
            s.touch(Utc::now());
        }
    }

    /// Rebind an existing session to a fresh channel, or mint a
    /// replacement when the id is unknown or past TTL.
    pub fn reconnect(&self, id: &str) -> Reconnect {
        self.reconnect_at(id, Utc::now())
    }

    pub fn reconnect_at(&self, id: &str, now: DateTime<Utc>) -> Reconnect {
        match self.get(id) {
            Some(session) if session.idle_since(now) < self.ttl => {
                session.touch(now);
                tracing::info!(session_id = %id, "session recovered on reconnect");
                Reconnect::Recovered(session)
            }
            Some(_) => {
                self.sessions.write().remove(id);
                tracing::info!(session_id = %id, "reconnect hit an expired session");
                Reconnect::Replaced {
                    session: self.create_at(now),
                    error: Error::SessionExpired(id.to_string()),
                }
            }
            None => Reconnect::Replaced {
                session: self.create_at(now),
                error: Error::SessionNotFound(id.to_string()),
            },
        }
    }

    /// Remove a session outright (explicit close).
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.write().remove(id)
    }

    /// Periodic sweep; returns the evicted ids so the caller can tear
    /// down their runtimes. A session is evictable iff it has idled past
    /// the TTL *and* no turn is currently running (`is_turn_active`).
    pub fn evict_expired(&self, is_turn_active: impl Fn(&str) -> bool) -> Vec<String> {
        self.evict_expired_at(Utc::now(), is_turn_active)
    }

    pub fn evict_expired_at(
        &self,
        now: DateTime<Utc>,
        is_turn_active: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.idle_since(now) >= self.ttl && !is_turn_active(s.id()))
            .map(|s| s.id().to_string())
            .collect();

        if !expired.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &expired {
                sessions.remove(id);
            }
            tracing::info!(evicted = expired.len(), "expired sessions evicted");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_domain::message::Message;

    fn registry(ttl_secs: u64) -> SessionRegistry {
        SessionRegistry::new(&SessionConfig {
            ttl_secs,
            history_limit: 50,
            evict_interval_secs: 60,
        })
    }

    #[test]
    fn ids_are_unique_and_opaque() {
        let reg = registry(900);
        let a = reg.create();
        let b = reg.create();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().len(), 32); // 128 bits, hex-encoded
        assert!(reg.get(a.id()).is_some());
    }

    #[test]
    fn reconnect_within_ttl_preserves_history() {
        let reg = registry(900);
        let now = Utc::now();
        let session = reg.create_at(now);
        session.with_history(|h| {
            for i in 0..6 {
                h.push(Message::user(format!("m{i}")));
            }
        });
        let id = session.id().to_string();

        let later = now + Duration::seconds(300);
        match reg.reconnect_at(&id, later) {
            Reconnect::Recovered(s) => {
                assert_eq!(s.id(), id);
                assert_eq!(s.with_history(|h| h.len()), 6);
            }
            Reconnect::Replaced { .. } => panic!("session should have been recovered"),
        }
    }

    #[test]
    fn reconnect_past_ttl_mints_replacement() {
        let reg = registry(900);
        let now = Utc::now();
        let session = reg.create_at(now);
        let id = session.id().to_string();

        let later = now + Duration::seconds(901);
        match reg.reconnect_at(&id, later) {
            Reconnect::Replaced { session, error } => {
                assert_ne!(session.id(), id);
                assert!(matches!(error, Error::SessionExpired(_)));
            }
            Reconnect::Recovered(_) => panic!("session should have expired"),
        }
        // The expired entry is gone.
        assert!(reg.get(&id).is_none());
    }

    #[test]
    fn reconnect_unknown_id_mints_replacement() {
        let reg = registry(900);
        match reg.reconnect_at("nope", Utc::now()) {
            Reconnect::Replaced { error, .. } => {
                assert!(matches!(error, Error::SessionNotFound(_)))
            }
            Reconnect::Recovered(_) => panic!("unknown id cannot recover"),
        }
    }

    #[test]
    fn eviction_honors_ttl_and_active_turns() {
        let reg = registry(60);
        let now = Utc::now();
        let idle = reg.create_at(now);
        let busy = reg.create_at(now);
        let fresh = reg.create_at(now + Duration::seconds(50));

        let later = now + Duration::seconds(61);
        let busy_id = busy.id().to_string();
        let removed = reg.evict_expired_at(later, |id| id == busy_id);

        assert_eq!(removed, vec![idle.id().to_string()]);
        assert!(reg.get(idle.id()).is_none());
        assert!(reg.get(busy.id()).is_some(), "running turn blocks eviction");
        assert!(reg.get(fresh.id()).is_some());
    }

    #[test]
    fn touch_extends_the_lease() {
        let reg = registry(60);
        let now = Utc::now();
        let s = reg.create_at(now);
        s.touch(now + Duration::seconds(55));
        let removed = reg.evict_expired_at(now + Duration::seconds(61), |_| false);
        assert!(removed.is_empty());
    }
}
