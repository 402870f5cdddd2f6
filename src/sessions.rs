//! Keyed session store: one recognition session per client.
//! Bounded by LRU capacity and an idle TTL; idle entries are dropped by a
//! periodic sweep and whenever they are touched after expiring.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{RecognizerConfig, SessionConfig};
use crate::expiring::{Expiry, ExpiringLru, Miss};
use crate::recognizer::Session;

/// Session used by callers that do not name one.
pub const DEFAULT_SESSION_ID: &str = "default";
pub const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("session id is empty")]
    Empty,
    #[error("session id is {0} characters, at most {MAX_SESSION_ID_LEN} allowed")]
    TooLong(usize),
    #[error("session id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Validated client session identifier: 1–128 chars of `[A-Za-z0-9_.-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, SessionIdError> {
        if raw.is_empty() {
            return Err(SessionIdError::Empty);
        }
        let len = raw.chars().count();
        if len > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong(len));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(SessionIdError::InvalidChar(c));
        }
        Ok(Self(raw.to_string()))
    }

    /// The id, or [`DEFAULT_SESSION_ID`] when absent.
    pub fn from_optional(raw: Option<&str>) -> Result<Self, SessionIdError> {
        Self::parse(raw.unwrap_or(DEFAULT_SESSION_ID))
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

pub struct SessionStore {
    sessions: Mutex<ExpiringLru<SessionId, SharedSession>>,
    recognizer: RecognizerConfig,
}

impl SessionStore {
    pub fn new(config: &SessionConfig, recognizer: RecognizerConfig) -> Self {
        Self {
            sessions: Mutex::new(ExpiringLru::new(
                config.capacity,
                config.idle_ttl(),
                Expiry::SinceLastAccess,
            )),
            recognizer,
        }
    }

    /// The live session for `id`, creating it (or replacing an expired one).
    pub fn get_or_create(&self, id: &SessionId) -> SharedSession {
        let mut sessions = self.sessions.lock();
        match sessions.get(id) {
            Ok(session) => return Arc::clone(session),
            Err(Miss::Expired) => info!(session = %id, "session_expired"),
            Err(Miss::Absent) => {}
        }
        self.insert_locked(&mut sessions, id.clone())
    }

    /// Register a fresh session under a generated id.
    pub fn create(&self) -> SessionId {
        let id = SessionId::generate();
        self.insert_locked(&mut self.sessions.lock(), id.clone());
        id
    }

    fn insert_locked(
        &self,
        sessions: &mut ExpiringLru<SessionId, SharedSession>,
        id: SessionId,
    ) -> SharedSession {
        let session = Arc::new(Mutex::new(Session::new(&self.recognizer)));
        debug!(session = %id, "session_created");
        if let Some((evicted, _)) = sessions.push(id.clone(), Arc::clone(&session)) {
            if evicted != id {
                info!(session = %evicted, "session_evicted_lru");
            }
        }
        session
    }

    /// Drop a session. Returns whether it existed.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.lock().pop(id).is_some();
        if removed {
            info!(session = %id, "session_removed");
        }
        removed
    }

    /// Remove every session idle for at least the TTL and return their ids.
    pub fn evict_idle(&self) -> Vec<SessionId> {
        let mut sessions = self.sessions.lock();
        let expired = sessions.remove_expired();
        if !expired.is_empty() {
            info!(count = expired.len(), remaining = sessions.len(), "idle_sessions_evicted");
        }
        expired
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
