mod service;
pub mod sqlite;

pub use service::{
    generate_session_id, now_millis, Session, SessionError, SessionKey, SessionService,
    SessionSummary,
};
pub use sqlite::{SessionServiceUri, SqliteDriver, SqliteSessionService};
