//! Session authority: resolves opaque session tokens
//!
//! The broker never interprets a token; it forwards it to a
//! `SessionAuthority` and trusts the answer. Caching, if any, belongs to the
//! authority.

use crate::error::{BackboneError, Result};
use crate::types::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

/// A live session as reported by the authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session uuid
    pub uuid: String,

    /// Default activity type for work done under this session
    pub default_event_type: String,

    /// When the session stops being valid (None = no expiry)
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session without expiry
    pub fn new(uuid: impl Into<String>, default_event_type: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            default_event_type: default_event_type.into(),
            expires_at: None,
        }
    }

    /// Set an expiry time
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the session has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Identity a unit of work under this session runs as
    pub fn identity(&self) -> Identity {
        Identity::new(self.uuid.clone(), self.default_event_type.clone())
    }
}

/// External session authority
///
/// `find` returns `Ok(None)` for unknown, expired and revoked sessions and
/// `Err` for transient lookup failures.
#[async_trait]
pub trait SessionAuthority: Send + Sync {
    /// Look up the session a token belongs to
    async fn find(&self, token: &str) -> Result<Option<Session>>;
}

/// In-memory session authority for tests and single-process hosts
#[derive(Default)]
pub struct MemorySessionAuthority {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionAuthority {
    /// Create an empty authority
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under a token
    pub fn insert(&self, token: impl Into<String>, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|e| {
            BackboneError::Store(format!("Session table lock poisoned: {}", e))
        })?;
        sessions.insert(token.into(), session);
        Ok(())
    }

    /// Revoke a token, returning whether it was known
    pub fn revoke(&self, token: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(|e| {
            BackboneError::Store(format!("Session table lock poisoned: {}", e))
        })?;
        Ok(sessions.remove(token).is_some())
    }

    /// Number of registered tokens, expired ones included
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether no tokens are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionAuthority for MemorySessionAuthority {
    async fn find(&self, token: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.read().map_err(|e| {
            BackboneError::Store(format!("Session table lock poisoned: {}", e))
        })?;
        let now = Utc::now();
        Ok(sessions
            .get(token)
            .filter(|s| !s.is_expired(now))
            .cloned())
    }
}
