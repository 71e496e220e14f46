//! SQLite-backed session storage.
//!
//! The service URI selects the driver the same way SQLAlchemy URLs do:
//! `sqlite:///./sessions.db` runs statements inline on the calling task,
//! `sqlite+aiosqlite:///./sessions.db` moves them onto tokio's blocking pool.
//! Both drivers share one connection guarded by a mutex.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use super::service::{
    generate_session_id, now_millis, Session, SessionError, SessionKey, SessionService,
    SessionSummary,
};
use crate::message::Message;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    app_name   TEXT    NOT NULL,
    user_id    TEXT    NOT NULL,
    id         TEXT    NOT NULL,
    state      TEXT    NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (app_name, user_id, id)
);
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    app_name   TEXT    NOT NULL,
    user_id    TEXT    NOT NULL,
    session_id TEXT    NOT NULL,
    payload    TEXT    NOT NULL,
    created    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_by_session ON messages (app_name, user_id, session_id);
CREATE TABLE IF NOT EXISTS processed_messages (
    app_name   TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    session_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    PRIMARY KEY (app_name, user_id, session_id, message_id)
);
"#;

impl From<rusqlite::Error> for SessionError {
    fn from(err: rusqlite::Error) -> Self {
        SessionError::Storage(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqliteDriver {
    /// Statements run on the task that issued them.
    Sync,
    /// Statements run on the blocking thread pool.
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionServiceUri {
    pub driver: SqliteDriver,
    /// `None` for an in-memory database.
    pub path: Option<PathBuf>,
}

impl FromStr for SessionServiceUri {
    type Err = SessionError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| SessionError::InvalidUri(uri.to_string()))?;

        let driver = match scheme {
            "sqlite" => SqliteDriver::Sync,
            "sqlite+aiosqlite" => SqliteDriver::Async,
            _ => return Err(SessionError::InvalidUri(uri.to_string())),
        };

        // `sqlite://` and `sqlite:///:memory:` are in-memory; otherwise the
        // third slash separates the (possibly relative) file path.
        let path = match rest.strip_prefix('/') {
            None if rest.is_empty() => None,
            None => return Err(SessionError::InvalidUri(uri.to_string())),
            Some("") | Some(":memory:") => None,
            Some(path) => Some(PathBuf::from(path)),
        };

        Ok(Self { driver, path })
    }
}

pub struct SqliteSessionService {
    conn: Arc<Mutex<Connection>>,
    driver: SqliteDriver,
}

impl SqliteSessionService {
    pub fn from_uri(uri: &str) -> Result<Self, SessionError> {
        let parsed: SessionServiceUri = uri.parse()?;
        let conn = match &parsed.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| SessionError::Storage(e.to_string()))?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        Self::with_connection(conn, parsed.driver)
    }

    pub fn in_memory(driver: SqliteDriver) -> Result<Self, SessionError> {
        Self::with_connection(Connection::open_in_memory()?, driver)
    }

    fn with_connection(conn: Connection, driver: SqliteDriver) -> Result<Self, SessionError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(?driver, "session database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            driver,
        })
    }

    pub fn driver(&self) -> SqliteDriver {
        self.driver
    }

    async fn run<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut Connection) -> Result<T, SessionError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let job = move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SessionError::Storage("connection lock poisoned".to_string()))?;
            f(&mut guard)
        };
        match self.driver {
            SqliteDriver::Sync => job(),
            SqliteDriver::Async => tokio::task::spawn_blocking(job)
                .await
                .map_err(|e| SessionError::Storage(format!("storage task failed: {e}")))?,
        }
    }
}

fn load_session(conn: &Connection, key: &SessionKey) -> Result<Option<Session>, SessionError> {
    let row = conn
        .query_row(
            "SELECT state, created_at, updated_at FROM sessions
             WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
            params![key.app_name, key.user_id, key.session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((state, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT payload FROM messages
         WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3 ORDER BY seq",
    )?;
    let payloads = stmt
        .query_map(
            params![key.app_name, key.user_id, key.session_id],
            |row| row.get::<_, String>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let messages = payloads
        .iter()
        .map(|payload| serde_json::from_str::<Message>(payload))
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT message_id FROM processed_messages
         WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
    )?;
    let processed_message_ids = stmt
        .query_map(
            params![key.app_name, key.user_id, key.session_id],
            |row| row.get::<_, String>(0),
        )?
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(Some(Session {
        id: key.session_id.clone(),
        app_name: key.app_name.clone(),
        user_id: key.user_id.clone(),
        state: serde_json::from_str(&state)?,
        messages,
        processed_message_ids,
        created_at,
        updated_at,
    }))
}

fn delete_rows(conn: &Connection, key: &SessionKey) -> Result<usize, SessionError> {
    conn.execute(
        "DELETE FROM messages WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
        params![key.app_name, key.user_id, key.session_id],
    )?;
    conn.execute(
        "DELETE FROM processed_messages WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3",
        params![key.app_name, key.user_id, key.session_id],
    )?;
    Ok(conn.execute(
        "DELETE FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
        params![key.app_name, key.user_id, key.session_id],
    )?)
}

#[async_trait]
impl SessionService for SqliteSessionService {
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
        state: Map<String, Value>,
    ) -> Result<Session, SessionError> {
        let key = SessionKey::new(
            app_name,
            user_id,
            session_id.unwrap_or_else(generate_session_id),
        );
        let encoded_state = serde_json::to_string(&state)?;
        let now = now_millis();

        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (app_name, user_id, id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![key.app_name, key.user_id, key.session_id, encoded_state, now],
            )?;
            if inserted == 0 {
                return Err(SessionError::AlreadyExists(key.to_string()));
            }
            tracing::info!(session = %key, "created session");
            Ok(Session {
                id: key.session_id,
                app_name: key.app_name,
                user_id: key.user_id,
                state,
                messages: Vec::new(),
                processed_message_ids: BTreeSet::new(),
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn get_session(&self, key: &SessionKey) -> Result<Option<Session>, SessionError> {
        let key = key.clone();
        self.run(move |conn| load_session(conn, &key)).await
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> Result<Vec<SessionSummary>, SessionError> {
        let app_name = app_name.to_string();
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.created_at, s.updated_at,
                        (SELECT COUNT(*) FROM messages m
                         WHERE m.app_name = s.app_name AND m.user_id = s.user_id
                           AND m.session_id = s.id)
                 FROM sessions s
                 WHERE s.app_name = ?1 AND s.user_id = ?2
                 ORDER BY s.updated_at DESC, s.id",
            )?;
            let summaries = stmt
                .query_map(params![app_name, user_id], |row| {
                    Ok(SessionSummary {
                        id: row.get(0)?,
                        app_name: app_name.clone(),
                        user_id: user_id.clone(),
                        created_at: row.get(1)?,
                        updated_at: row.get(2)?,
                        message_count: row.get::<_, i64>(3)? as usize,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(summaries)
        })
        .await
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<bool, SessionError> {
        let key = key.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let removed = delete_rows(&tx, &key)?;
            tx.commit()?;
            if removed > 0 {
                tracing::info!(session = %key, "deleted session");
            }
            Ok(removed > 0)
        })
        .await
    }

    async fn append_messages(
        &self,
        key: &SessionKey,
        messages: &[Message],
        processed_ids: &[String],
    ) -> Result<(), SessionError> {
        let key = key.clone();
        let payloads = messages
            .iter()
            .map(|message| Ok((serde_json::to_string(message)?, message.created)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;
        let processed_ids = processed_ids.to_vec();
        let now = now_millis();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            let touched = tx.execute(
                "UPDATE sessions SET updated_at = ?4
                 WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                params![key.app_name, key.user_id, key.session_id, now],
            )?;
            if touched == 0 {
                return Err(SessionError::NotFound(key.to_string()));
            }
            for (payload, created) in &payloads {
                tx.execute(
                    "INSERT INTO messages (app_name, user_id, session_id, payload, created)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![key.app_name, key.user_id, key.session_id, payload, created],
                )?;
            }
            for id in &processed_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO processed_messages
                     (app_name, user_id, session_id, message_id) VALUES (?1, ?2, ?3, ?4)",
                    params![key.app_name, key.user_id, key.session_id, id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn update_state(
        &self,
        key: &SessionKey,
        delta: Map<String, Value>,
    ) -> Result<Map<String, Value>, SessionError> {
        let key = key.clone();
        let now = now_millis();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT state FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                    params![key.app_name, key.user_id, key.session_id],
                    |row| row.get(0),
                )
                .optional()?;
            let current = current.ok_or_else(|| SessionError::NotFound(key.to_string()))?;

            let mut state: Map<String, Value> = serde_json::from_str(&current)?;
            state.extend(delta);
            tx.execute(
                "UPDATE sessions SET state = ?4, updated_at = ?5
                 WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                params![
                    key.app_name,
                    key.user_id,
                    key.session_id,
                    serde_json::to_string(&state)?,
                    now
                ],
            )?;
            tx.commit()?;
            Ok(state)
        })
        .await
    }

    async fn prune_expired(&self, cutoff_ms: i64) -> Result<usize, SessionError> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let expired = {
                let mut stmt = tx.prepare(
                    "SELECT app_name, user_id, id FROM sessions WHERE updated_at < ?1",
                )?;
                let rows = stmt
                    .query_map(params![cutoff_ms], |row| {
                        Ok(SessionKey::new(
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            for key in &expired {
                delete_rows(&tx, key)?;
            }
            tx.commit()?;
            Ok(expired.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn state(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_parse_uris() {
        let sync: SessionServiceUri = "sqlite:///./sessions.db".parse().unwrap();
        assert_eq!(sync.driver, SqliteDriver::Sync);
        assert_eq!(sync.path, Some(PathBuf::from("./sessions.db")));

        let asynchronous: SessionServiceUri = "sqlite+aiosqlite:///./sessions.db".parse().unwrap();
        assert_eq!(asynchronous.driver, SqliteDriver::Async);
        assert_eq!(asynchronous.path, Some(PathBuf::from("./sessions.db")));

        let absolute: SessionServiceUri = "sqlite:////var/lib/agent.db".parse().unwrap();
        assert_eq!(absolute.path, Some(PathBuf::from("/var/lib/agent.db")));

        let memory: SessionServiceUri = "sqlite:///:memory:".parse().unwrap();
        assert_eq!(memory.path, None);

        for bad in ["postgres://localhost/db", "sessions.db", "sqlite://host/db"] {
            assert!(matches!(
                bad.parse::<SessionServiceUri>(),
                Err(SessionError::InvalidUri(_))
            ));
        }
    }

    async fn exercise(service: &SqliteSessionService) {
        let session = service
            .create_session("agent", "u42", Some("thread-1".into()), state(json!({"user_name": "Joe"})))
            .await
            .unwrap();
        assert_eq!(session.id, "thread-1");

        let duplicate = service
            .create_session("agent", "u42", Some("thread-1".into()), Map::new())
            .await;
        assert!(matches!(duplicate, Err(SessionError::AlreadyExists(_))));

        let key = session.key();
        service
            .append_messages(
                &key,
                &[
                    Message::user().with_text("show me the items"),
                    Message::assistant().with_text("sure"),
                ],
                &["msg-1".to_string()],
            )
            .await
            .unwrap();

        let merged = service
            .update_state(&key, state(json!({"user_id": "u42"})))
            .await
            .unwrap();
        assert_eq!(merged.get("user_name"), Some(&json!("Joe")));
        assert_eq!(merged.get("user_id"), Some(&json!("u42")));

        let loaded = service.get_session(&key).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].as_concat_text(), "show me the items");
        assert!(loaded.processed_message_ids.contains("msg-1"));
        assert_eq!(loaded.state, merged);

        let listed = service.list_sessions("agent", "u42").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].message_count, 2);
        assert!(service.list_sessions("agent", "other").await.unwrap().is_empty());

        assert!(service.delete_session(&key).await.unwrap());
        assert!(!service.delete_session(&key).await.unwrap());
        assert!(service.get_session(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_driver_round_trip() {
        let service = SqliteSessionService::in_memory(SqliteDriver::Sync).unwrap();
        exercise(&service).await;
    }

    #[tokio::test]
    async fn test_async_driver_round_trip() {
        let service = SqliteSessionService::in_memory(SqliteDriver::Async).unwrap();
        exercise(&service).await;
    }

    #[tokio::test]
    async fn test_file_database_persists_across_handles() {
        let dir = TempDir::new().unwrap();
        let uri = format!("sqlite:///{}", dir.path().join("nested/sessions.db").display());

        let key = {
            let service = SqliteSessionService::from_uri(&uri).unwrap();
            let session = service
                .create_session("agent", "anonymous", None, Map::new())
                .await
                .unwrap();
            service
                .append_messages(&session.key(), &[Message::user().with_text("hi")], &[])
                .await
                .unwrap();
            session.key()
        };

        let reopened = SqliteSessionService::from_uri(&uri).unwrap();
        let session = reopened.get_session(&key).await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_session_errors() {
        let service = SqliteSessionService::in_memory(SqliteDriver::Sync).unwrap();
        let key = SessionKey::new("agent", "nobody", "missing");
        assert!(matches!(
            service.append_messages(&key, &[], &[]).await,
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            service.update_state(&key, Map::new()).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_expired_removes_idle_sessions() {
        let service = SqliteSessionService::in_memory(SqliteDriver::Async).unwrap();
        let stale = service
            .create_session("agent", "u1", Some("old".into()), Map::new())
            .await
            .unwrap();

        assert_eq!(service.prune_expired(stale.updated_at).await.unwrap(), 0);
        assert_eq!(service.prune_expired(stale.updated_at + 1).await.unwrap(), 1);
        assert!(service.get_session(&stale.key()).await.unwrap().is_none());
    }
}
