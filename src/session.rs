//! Conversation sessions keyed by application, user, and conversation id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::content::Content;
use crate::error::AgentError;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub app_name: String,
    pub user_id: String,
    pub id: String,
    pub history: Vec<Content>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionService: Send + Sync {
    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, AgentError>;

    /// Create a session. If one already exists for the key it is returned
    /// unchanged, so racing creators converge on the same session.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Session, AgentError>;

    async fn append_content(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        content: Content,
    ) -> Result<(), AgentError>;
}

type SessionKey = (String, String, String);

fn key(app_name: &str, user_id: &str, session_id: &str) -> SessionKey {
    (
        app_name.to_string(),
        user_id.to_string(),
        session_id.to_string(),
    )
}

#[derive(Debug, Default)]
pub struct InMemorySessionService {
    sessions: DashMap<SessionKey, Session>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, AgentError> {
        Ok(self
            .sessions
            .get(&key(app_name, user_id, session_id))
            .map(|s| s.clone()))
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<Session, AgentError> {
        let entry = self
            .sessions
            .entry(key(app_name, user_id, session_id))
            .or_insert_with(|| {
                tracing::debug!(app_name, user_id, session_id, "Creating session");
                Session {
                    app_name: app_name.to_string(),
                    user_id: user_id.to_string(),
                    id: session_id.to_string(),
                    history: Vec::new(),
                    created_at: Utc::now(),
                }
            });
        Ok(entry.value().clone())
    }

    async fn append_content(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        content: Content,
    ) -> Result<(), AgentError> {
        let mut session = self
            .sessions
            .get_mut(&key(app_name, user_id, session_id))
            .ok_or_else(|| AgentError::Other(format!("session {} does not exist", session_id)))?;
        session.history.push(content);
        Ok(())
    }
}
