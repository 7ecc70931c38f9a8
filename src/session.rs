//! Per-conversation session store.
//!
//! Every front-end conversation gets its own [`ChatHistory`], seeded with
//! the system prompt, so concurrent users never see each other's turns.
//! Exchanges on one session are serialised by the session's history lock.
//!
//! Sessions that see no traffic for the idle timeout are dropped by
//! [`SessionStore::evict_idle`]; a session with an exchange in flight is
//! never dropped.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use uuid::Uuid;

use crate::history::ChatHistory;

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub history: AsyncMutex<ChatHistory>,
    last_active: Mutex<DateTime<Utc>>,
}

impl Session {
    pub fn last_active(&self) -> DateTime<Utc> {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn touch(&self, now: DateTime<Utc>) {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

pub struct SessionStore {
    system_prompt: String,
    idle_timeout: Option<Duration>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            idle_timeout: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Drop sessions idle for longer than `timeout` on each
    /// [`evict_idle`](Self::evict_idle) sweep.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_session(&self, id: String) -> Arc<Session> {
        info!(session = %id, "session created");
        let now = Utc::now();
        Arc::new(Session {
            id,
            created_at: now,
            history: AsyncMutex::new(ChatHistory::with_system_prompt(&self.system_prompt)),
            last_active: Mutex::new(now),
        })
    }

    /// Start a new session with a fresh id.
    pub fn create(&self) -> Arc<Session> {
        let session = self.new_session(Uuid::new_v4().to_string());
        self.lock().insert(session.id.clone(), session.clone());
        session
    }

    /// Look up `id`, marking the session as active.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.lock().get(id).cloned()?;
        session.touch(Utc::now());
        Some(session)
    }

    /// Look up `id`, creating the session under that id if it is new.
    /// `None` starts a session with a generated id.
    pub fn get_or_create(&self, id: Option<&str>) -> Arc<Session> {
        match id {
            Some(id) => {
                let mut sessions = self.lock();
                if let Some(existing) = sessions.get(id) {
                    existing.touch(Utc::now());
                    return existing.clone();
                }
                let session = self.new_session(id.to_string());
                sessions.insert(id.to_string(), session.clone());
                session
            }
            None => self.create(),
        }
    }

    /// Drop a session. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Drop every session idle for longer than the timeout as of `now`.
    /// Returns how many were dropped. Does nothing without a timeout.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|id, session| {
            // A held history lock means an exchange is running.
            let busy = session.history.try_lock().is_err();
            let keep = busy || now - session.last_active() <= timeout;
            if !keep {
                info!(session = %id, "session expired");
            }
            keep
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new("sys");
        let a = store.create();
        let b = store.create();
        assert_ne!(a.id, b.id);

        a.history.lock().await.add_user_message("only in a");
        assert_eq!(a.history.lock().await.len(), 2);
        assert_eq!(b.history.lock().await.len(), 1);
    }

    #[test]
    fn test_get_or_create_reuses_ids() {
        let store = SessionStore::new("sys");
        let first = store.get_or_create(Some("abc"));
        let again = store.get_or_create(Some("abc"));
        assert!(Arc::ptr_eq(&first, &again));

        let fresh = store.get_or_create(None);
        assert_ne!(fresh.id, "abc");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remove() {
        let store = SessionStore::new("sys");
        let s = store.create();
        assert!(store.get(&s.id).is_some());
        assert!(store.remove(&s.id));
        assert!(!store.remove(&s.id));
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_idle_drops_only_stale_sessions() {
        let store = SessionStore::new("sys").with_idle_timeout(Duration::minutes(30));
        let stale = store.create();
        let fresh = store.create();
        let later = Utc::now() + Duration::minutes(45);
        fresh.touch(later - Duration::minutes(5));

        assert_eq!(store.evict_idle(later), 1);
        assert!(store.get(&stale.id).is_none());
        assert!(store.get(&fresh.id).is_some());
    }

    #[test]
    fn test_lookup_refreshes_activity() {
        let store = SessionStore::new("sys").with_idle_timeout(Duration::minutes(30));
        let s = store.get_or_create(Some("guest"));
        let created = s.last_active();
        s.touch(created - Duration::hours(2));

        store.get_or_create(Some("guest"));
        assert!(s.last_active() >= created);
        assert_eq!(store.evict_idle(Utc::now()), 0);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_busy_sessions() {
        let store = SessionStore::new("sys").with_idle_timeout(Duration::minutes(1));
        let s = store.create();
        let later = Utc::now() + Duration::hours(1);

        let guard = s.history.lock().await;
        assert_eq!(store.evict_idle(later), 0);
        drop(guard);
        assert_eq!(store.evict_idle(later), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_no_timeout_never_evicts() {
        let store = SessionStore::new("sys");
        store.create();
        assert_eq!(store.evict_idle(Utc::now() + Duration::days(30)), 0);
        assert_eq!(store.len(), 1);
    }
}
