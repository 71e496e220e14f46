use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

use crate::message::Message;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Session already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid session service URI: {0}")]
    InvalidUri(String),
    #[error("Session storage error: {0}")]
    Storage(String),
    #[error("Failed to (de)serialize session data: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identifies one conversation: sessions are scoped per app and per user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new<A: Into<String>, U: Into<String>, S: Into<String>>(
        app_name: A,
        user_id: U,
        session_id: S,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    /// Free-form key/value state shared with the instruction template
    #[schema(value_type = Object)]
    pub state: Map<String, Value>,
    /// Conversation history in the order it happened
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<Message>,
    /// AG-UI message ids already folded into `messages`
    #[schema(value_type = Vec<String>)]
    pub processed_message_ids: BTreeSet<String>,
    /// Creation time, unix milliseconds
    pub created_at: i64,
    /// Last activity, unix milliseconds
    pub updated_at: i64,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.app_name, &self.user_id, &self.id)
    }

    /// Whether the session has been idle for longer than `timeout_ms`.
    pub fn is_expired(&self, now_ms: i64, timeout_ms: i64) -> bool {
        now_ms - self.updated_at > timeout_ms
    }
}

/// Listing entry: a session without its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub message_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Storage for conversations.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a session. A missing `session_id` is generated.
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        state: Map<String, Value>,
    ) -> Result<Session, SessionError>;

    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, SessionError>;

    /// Sessions of one user, most recently active first.
    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, SessionError>;

    /// Returns whether a session was removed.
    async fn delete_session(&self, key: &SessionKey) -> Result<bool, SessionError>;

    /// Append history and mark AG-UI message ids as processed.
    async fn append_messages(
        &self,
        key: &SessionKey,
        messages: &[Message],
        processed_ids: &[String],
    ) -> Result<(), SessionError>;

    /// Shallow-merge `delta` into the session state and return the result.
    async fn update_state(
        &self,
        key: &SessionKey,
        delta: Map<String, Value>,
    ) -> Result<Map<String, Value>, SessionError>;

    /// Delete every session whose last activity is older than `cutoff_ms`.
    async fn prune_expired(&self, cutoff_ms: i64) -> Result<usize, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_is_strictly_after_timeout() {
        let session = Session {
            id: "s".into(),
            app_name: "agent".into(),
            user_id: "u".into(),
            state: Map::new(),
            messages: Vec::new(),
            processed_message_ids: BTreeSet::new(),
            created_at: 0,
            updated_at: 1_000,
        };
        assert!(!session.is_expired(3_601_000, 3_600_000));
        assert!(session.is_expired(3_601_001, 3_600_000));
        assert_eq!(session.key().to_string(), "agent/u/s");
    }
}
