use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use generic_agent::session::{Session, SessionError, SessionKey, SessionSummary};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info};
use utoipa::ToSchema;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Id to create the session under; generated when absent
    #[serde(default)]
    pub session_id: Option<String>,
    /// Initial session state
    #[serde(default)]
    #[schema(value_type = Object)]
    pub state: Map<String, Value>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    /// Sessions of the user, most recently active first
    sessions: Vec<SessionSummary>,
}

fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        SessionError::AlreadyExists(_) => StatusCode::CONFLICT,
        SessionError::InvalidUri(_) | SessionError::Storage(_) | SessionError::Serialization(_) => {
            error!("Session storage failure: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn ensure_app(state: &AppState, app_name: &str) -> Result<(), StatusCode> {
    if state.hosts_app(app_name) {
        Ok(())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

#[utoipa::path(
    get,
    path = "/list-apps",
    responses(
        (status = 200, description = "Names of the hosted apps", body = Vec<String>)
    ),
    tag = "Session Management"
)]
pub async fn list_apps(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.app_names())
}

#[utoipa::path(
    get,
    path = "/apps/{app_name}/users/{user_id}/sessions",
    params(
        ("app_name" = String, Path, description = "Name of the hosted app"),
        ("user_id" = String, Path, description = "Owner of the sessions")
    ),
    responses(
        (status = 200, description = "Sessions listed successfully", body = SessionListResponse),
        (status = 404, description = "Unknown app"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Session Management"
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Path((app_name, user_id)): Path<(String, String)>,
) -> Result<Json<SessionListResponse>, StatusCode> {
    ensure_app(&state, &app_name)?;
    let sessions = state
        .sessions()
        .list_sessions(&app_name, &user_id)
        .await
        .map_err(|e| status_for(&e))?;
    Ok(Json(SessionListResponse { sessions }))
}

#[utoipa::path(
    post,
    path = "/apps/{app_name}/users/{user_id}/sessions",
    params(
        ("app_name" = String, Path, description = "Name of the hosted app"),
        ("user_id" = String, Path, description = "Owner of the new session")
    ),
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = Session),
        (status = 400, description = "Malformed request body"),
        (status = 404, description = "Unknown app"),
        (status = 409, description = "A session with this id already exists"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Session Management"
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Path((app_name, user_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Session>, StatusCode> {
    ensure_app(&state, &app_name)?;
    // The body is optional; an empty POST creates a blank session.
    let request: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?
    };

    let session = state
        .sessions()
        .create_session(&app_name, &user_id, request.session_id, request.state)
        .await
        .map_err(|e| status_for(&e))?;
    Ok(Json(session))
}

#[utoipa::path(
    get,
    path = "/apps/{app_name}/users/{user_id}/sessions/{session_id}",
    params(
        ("app_name" = String, Path, description = "Name of the hosted app"),
        ("user_id" = String, Path, description = "Owner of the session"),
        ("session_id" = String, Path, description = "Unique identifier for the session")
    ),
    responses(
        (status = 200, description = "Session retrieved successfully", body = Session),
        (status = 404, description = "Unknown app or session"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Session Management"
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path((app_name, user_id, session_id)): Path<(String, String, String)>,
) -> Result<Json<Session>, StatusCode> {
    ensure_app(&state, &app_name)?;
    let key = SessionKey::new(app_name, user_id, session_id);
    state
        .sessions()
        .get_session(&key)
        .await
        .map_err(|e| status_for(&e))?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[utoipa::path(
    delete,
    path = "/apps/{app_name}/users/{user_id}/sessions/{session_id}",
    params(
        ("app_name" = String, Path, description = "Name of the hosted app"),
        ("user_id" = String, Path, description = "Owner of the session"),
        ("session_id" = String, Path, description = "Unique identifier for the session")
    ),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 404, description = "Unknown app or session"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Session Management"
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path((app_name, user_id, session_id)): Path<(String, String, String)>,
) -> Result<StatusCode, StatusCode> {
    ensure_app(&state, &app_name)?;
    let key = SessionKey::new(app_name, user_id, session_id);
    let removed = state
        .sessions()
        .delete_session(&key)
        .await
        .map_err(|e| status_for(&e))?;
    if removed {
        info!("Deleted session {}", key);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/list-apps", get(list_apps))
        .route(
            "/apps/{app_name}/users/{user_id}/sessions",
            get(list_sessions).post(create_session),
        )
        .route(
            "/apps/{app_name}/users/{user_id}/sessions/{session_id}",
            get(get_session).delete(delete_session),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::agent::build_state;
    use crate::configuration::Settings;
    use axum::{body::Body, http::Request};
    use generic_agent::providers::base::Provider;
    use generic_agent::providers::mock::ScriptedProvider;
    use serde_json::json;
    use tower::ServiceExt;

    fn app() -> Router {
        let settings = Settings {
            session_uri: Some("sqlite+aiosqlite:///:memory:".to_string()),
            ..Settings::default()
        };
        let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::default());
        routes(build_state(&settings, move |_| Ok(provider)).unwrap())
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_apps() {
        let response = app()
            .oneshot(request("GET", "/list-apps", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!(["agent"]));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let app = app();
        let base = "/apps/agent/users/user-123/sessions";

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                base,
                Some(json!({"sessionId": "s1", "state": {"user_name": "Joe Doe"}})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = json_body(response).await;
        assert_eq!(created["id"], "s1");
        assert_eq!(created["state"]["user_name"], "Joe Doe");

        let response = app
            .clone()
            .oneshot(request("POST", base, Some(json!({"sessionId": "s1"}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.clone().oneshot(request("POST", base, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request("GET", base, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["sessions"].as_array().unwrap().len(), 2);

        let one = format!("{base}/s1");
        let response = app.clone().oneshot(request("GET", &one, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["userId"], "user-123");

        let response = app.clone().oneshot(request("DELETE", &one, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.clone().oneshot(request("GET", &one, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(request("DELETE", &one, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_app_is_not_found() {
        let response = app()
            .oneshot(request("GET", "/apps/other/users/u/sessions", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_create_body_is_bad_request() {
        let response = app()
            .oneshot(request(
                "POST",
                "/apps/agent/users/u/sessions",
                Some(json!({"state": "not-an-object"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
