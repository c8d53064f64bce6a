use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use medidesk_core::domain::conversation::{SessionId, UserId};
use medidesk_core::domain::session::SessionContext;

pub type SessionHandle = Arc<Mutex<SessionContext>>;

const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(1800);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {session_id} belongs to another user")]
    OwnerMismatch { session_id: SessionId },
}

struct SessionEntry {
    owner: UserId,
    context: SessionHandle,
    last_active: Instant,
}

/// Live conversations. Each session sits behind its own mutex so one
/// session's utterances are handled in order while others run freely.
/// Sessions untouched for longer than the idle window are dropped.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    idle_ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), idle_ttl }
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Returns the session for `session_id`, creating it on first use. A
    /// missing or expired id starts a fresh session.
    pub async fn open(
        &self,
        session_id: Option<SessionId>,
        user_id: &UserId,
    ) -> Result<(SessionId, SessionHandle), SessionError> {
        let session_id = session_id.unwrap_or_else(SessionId::generate);
        let now = Instant::now();

        let mut sessions = self.sessions.write().await;
        let expired = sessions
            .get(&session_id)
            .is_some_and(|entry| now.duration_since(entry.last_active) > self.idle_ttl);
        if expired {
            if let Some(entry) = sessions.remove(&session_id) {
                Self::log_expired(&session_id, &entry);
            }
        }

        let entry = sessions.entry(session_id.clone()).or_insert_with(|| {
            tracing::info!(
                event_name = "session.opened",
                session_id = %session_id,
                user_id = %user_id,
                "session opened"
            );
            SessionEntry {
                owner: user_id.clone(),
                context: Arc::new(Mutex::new(SessionContext::new(
                    session_id.clone(),
                    user_id.clone(),
                ))),
                last_active: now,
            }
        });
        let opened = Self::owned_by(&session_id, entry, user_id)?;
        entry.last_active = now;
        Ok(opened)
    }

    /// Drops the session and abandons any booking in flight. Returns whether
    /// the session existed.
    pub async fn logout(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(entry) => {
                entry.context.lock().await.reset();
                tracing::info!(
                    event_name = "session.closed",
                    session_id = %session_id,
                    user_id = %entry.owner,
                    "session closed"
                );
                true
            }
            None => false,
        }
    }

    /// Removes every session idle for longer than the idle window and
    /// returns how many were dropped.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|session_id, entry| {
            let keep = now.duration_since(entry.last_active) <= self.idle_ttl;
            if !keep {
                Self::log_expired(session_id, entry);
            }
            keep
        });
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn log_expired(session_id: &SessionId, entry: &SessionEntry) {
        tracing::info!(
            event_name = "session.expired",
            session_id = %session_id,
            user_id = %entry.owner,
            "idle session expired"
        );
    }

    fn owned_by(
        session_id: &SessionId,
        entry: &SessionEntry,
        user_id: &UserId,
    ) -> Result<(SessionId, SessionHandle), SessionError> {
        if &entry.owner != user_id {
            return Err(SessionError::OwnerMismatch { session_id: session_id.clone() });
        }
        Ok((session_id.clone(), Arc::clone(&entry.context)))
    }
}
