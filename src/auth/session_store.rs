//! Browser sessions.
//!
//! A session holds the sticky environment and the authenticated identities of
//! one browser. Besides the primary identity it keeps a "login as" stack: a
//! root user may act as another user, and logging out returns to the previous
//! identity.
//!
//! Handlers never read session state from ambient storage. The middleware loads
//! the session once and passes a [`SessionContext`] down explicitly.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Identity;
use crate::models::Kid;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Login as feature cannot be used by unauthenticated users")]
    NotAuthenticated,

    #[error("Trying to log in as the same user as the current one")]
    SameUser,

    #[error("Cannot log in as more than {max} users")]
    LoginAsLimit { max: usize },

    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

/// Result of [`Session::logout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutOutcome {
    /// The latest "login as" identity was dropped; the previous one is current again.
    LoginAsEnded,
    /// The primary identity was cleared.
    LoggedOut,
    /// Nobody was logged in.
    NotLoggedIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,

    /// Sticky environment of this browser session.
    #[serde(default)]
    pub env_id: Option<Kid>,

    /// Identity established by the login form.
    #[serde(default)]
    pub primary: Option<Identity>,

    /// "Login as" identities, most recent last.
    #[serde(default)]
    pub login_as: Vec<Identity>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: Uuid::new_v4(),
            env_id: None,
            primary: None,
            login_as: Vec::new(),
            created_at: now,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// The identity requests act as: the latest "login as" identity if any,
    /// otherwise the primary one.
    pub fn identity(&self) -> Option<&Identity> {
        self.login_as.last().or(self.primary.as_ref())
    }

    /// Bind a freshly authenticated identity, discarding any "login as" state.
    pub fn login(&mut self, identity: Identity) {
        self.env_id = Some(identity.env_id.clone());
        self.primary = Some(identity);
        self.login_as.clear();
    }

    /// Start acting as another user.
    ///
    /// If the user is already somewhere on the stack, that entry moves to the top.
    pub fn push_login_as(&mut self, identity: Identity, max: usize) -> SessionResult<()> {
        if self.login_as.len() >= max {
            return Err(SessionError::LoginAsLimit { max });
        }
        let current = self.identity().ok_or(SessionError::NotAuthenticated)?;
        if current.user_id == identity.user_id {
            return Err(SessionError::SameUser);
        }
        self.login_as.retain(|i| i.user_id != identity.user_id);
        self.login_as.push(identity);
        Ok(())
    }

    pub fn logout(&mut self) -> LogoutOutcome {
        if self.login_as.pop().is_some() {
            LogoutOutcome::LoginAsEnded
        } else if self.primary.take().is_some() {
            LogoutOutcome::LoggedOut
        } else {
            LogoutOutcome::NotLoggedIn
        }
    }
}

/// Per-request view of the caller's session, passed explicitly to the resolver.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    session: Option<Session>,
}

impl SessionContext {
    /// A request without a session.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().and_then(Session::identity)
    }

    /// Sticky environment of the session.
    pub fn env_id(&self) -> Option<&Kid> {
        self.session.as_ref().and_then(|s| s.env_id.as_ref())
    }
}

impl From<Option<Session>> for SessionContext {
    fn from(session: Option<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> SessionResult<Uuid>;

    /// Fetch a session. Expired sessions are reported as absent.
    async fn get(&self, id: Uuid) -> SessionResult<Option<Session>>;

    async fn update(&self, session: Session) -> SessionResult<()>;

    async fn delete(&self, id: Uuid) -> SessionResult<()>;

    /// Drop expired sessions. Returns how many were removed.
    async fn cleanup(&self) -> SessionResult<usize>;
}

/// In-memory session store.
///
/// Suitable for development and single-node deployments. Sessions are lost on
/// restart and not shared across nodes.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: Session) -> SessionResult<Uuid> {
        let id = session.id;
        self.sessions.write().await.insert(id, session);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> SessionResult<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).filter(|s| !s.is_expired()).cloned())
    }

    async fn update(&self, session: Session) -> SessionResult<()> {
        self.sessions.write().await.insert(session.id, session);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> SessionResult<()> {
        self.sessions.write().await.remove(&id);
        Ok(())
    }

    async fn cleanup(&self) -> SessionResult<usize> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;

    fn identity(user_seq: u64, profile: &str) -> Identity {
        Identity::new(
            Kid::from_sequence(Kid::USER_PREFIX, user_seq).unwrap(),
            format!("user{user_seq}"),
            Kid::parse("0010000000001").unwrap(),
            Profile::new(Kid::parse("0060000000001").unwrap(), profile),
        )
    }

    fn session() -> Session {
        Session::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_memory_session_store() {
        let store = MemorySessionStore::new();
        let mut s = session();
        s.login(identity(1, "Root"));
        let id = store.create(s).await.unwrap();

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.identity().unwrap().user_name, "user1");
        assert_eq!(loaded.env_id.as_ref().unwrap().as_str(), "0010000000001");

        store.delete(id).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_absent() {
        let store = MemorySessionStore::new();
        let mut s = session();
        s.expires_at = Utc::now() - chrono::Duration::seconds(1);
        let id = store.create(s).await.unwrap();

        assert!(store.get(id).await.unwrap().is_none());
        assert_eq!(store.cleanup().await.unwrap(), 1);
    }

    #[test]
    fn test_login_as_requires_authentication() {
        let mut s = session();
        let err = s.push_login_as(identity(2, "Sales"), 5).unwrap_err();
        assert_eq!(err, SessionError::NotAuthenticated);
    }

    #[test]
    fn test_login_as_rejects_same_user() {
        let mut s = session();
        s.login(identity(1, "Root"));
        let err = s.push_login_as(identity(1, "Root"), 5).unwrap_err();
        assert_eq!(err, SessionError::SameUser);
    }

    #[test]
    fn test_login_as_limit() {
        let mut s = session();
        s.login(identity(1, "Root"));
        s.push_login_as(identity(2, "Sales"), 2).unwrap();
        s.push_login_as(identity(3, "Sales"), 2).unwrap();
        let err = s.push_login_as(identity(4, "Sales"), 2).unwrap_err();
        assert_eq!(err, SessionError::LoginAsLimit { max: 2 });
    }

    #[test]
    fn test_login_as_moves_existing_entry_to_top() {
        let mut s = session();
        s.login(identity(1, "Root"));
        s.push_login_as(identity(2, "Sales"), 5).unwrap();
        s.push_login_as(identity(3, "Sales"), 5).unwrap();
        s.push_login_as(identity(2, "Sales"), 5).unwrap();

        assert_eq!(s.login_as.len(), 2);
        assert_eq!(s.identity().unwrap().user_name, "user2");
    }

    #[test]
    fn test_logout_unwinds_login_as_then_primary() {
        let mut s = session();
        s.login(identity(1, "Root"));
        s.push_login_as(identity(2, "Sales"), 5).unwrap();
        assert_eq!(s.identity().unwrap().user_name, "user2");

        assert_eq!(s.logout(), LogoutOutcome::LoginAsEnded);
        assert_eq!(s.identity().unwrap().user_name, "user1");

        assert_eq!(s.logout(), LogoutOutcome::LoggedOut);
        assert!(s.identity().is_none());

        assert_eq!(s.logout(), LogoutOutcome::NotLoggedIn);
        // Sticky environment survives logout.
        assert!(s.env_id.is_some());
    }

    #[test]
    fn test_session_context() {
        let anon = SessionContext::anonymous();
        assert!(anon.identity().is_none());
        assert!(anon.env_id().is_none());

        let mut s = session();
        s.login(identity(1, "Root"));
        let ctx = SessionContext::new(s);
        assert_eq!(ctx.identity().unwrap().user_name, "user1");
        assert_eq!(ctx.env_id().unwrap().as_str(), "0010000000001");
    }
}
