use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use generic_agent::ag_ui::{Event, RequestError, RunAgentInput};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub const AG_UI_PATH: &str = "/ag-ui";

pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

async fn stream_event(
    event: &Event,
    tx: &mpsc::Sender<String>,
) -> Result<(), mpsc::error::SendError<String>> {
    let json = serde_json::to_string(event).unwrap_or_else(|e| {
        format!(
            r#"{{"type":"RUN_ERROR","message":"Failed to serialize event: {}"}}"#,
            e
        )
    });
    tx.send(format!("data: {}\n\n", json)).await
}

async fn run_agent(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RunAgentInput>,
) -> Result<SseResponse, (StatusCode, Json<RequestError>)> {
    let cancel_token = CancellationToken::new();
    let events = state
        .adapter()
        .run(input, cancel_token.clone())
        .map_err(|e| {
            tracing::warn!("Rejected AG-UI request: {}", e);
            (StatusCode::BAD_REQUEST, Json(e))
        })?;

    let (tx, rx) = mpsc::channel(100);
    std::mem::drop(tokio::spawn(async move {
        let mut events = Box::pin(events);
        let mut disconnected = false;
        loop {
            tokio::select! {
                _ = tx.closed(), if !disconnected => {
                    tracing::info!("AG-UI client disconnected, cancelling run");
                    disconnected = true;
                    cancel_token.cancel();
                }
                next = events.next() => {
                    match next {
                        Some(event) => {
                            if !disconnected && stream_event(&event, &tx).await.is_err() {
                                disconnected = true;
                                cancel_token.cancel();
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }));

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(AG_UI_PATH, post(run_agent))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::agent::build_state;
    use crate::configuration::Settings;
    use axum::{body::Body, http::Request};
    use generic_agent::message::{Message, ToolCall};
    use generic_agent::providers::base::Provider;
    use generic_agent::providers::mock::ScriptedProvider;
    use generic_agent::session::SessionKey;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn settings() -> Settings {
        Settings {
            session_uri: Some("sqlite:///:memory:".to_string()),
            ..Settings::default()
        }
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .uri("/ag-ui")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn event_types(body: &str) -> Vec<String> {
        body.split("\n\n")
            .filter_map(|frame| frame.strip_prefix("data: "))
            .map(|data| {
                let value: Value = serde_json::from_str(data).unwrap();
                value["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ag_ui_streams_run_and_persists_under_user() {
        let provider = ScriptedProvider::new([
            Message::assistant().with_tool_request("c1", ToolCall::new("get_items", json!({}))),
            Message::assistant().with_text("Here are your items."),
        ]);
        let provider: Arc<dyn Provider> = Arc::new(provider);
        let state = build_state(&settings(), move |_| Ok(provider)).unwrap();
        let app = routes(state.clone());

        let response = app
            .oneshot(post_json(json!({
                "threadId": "thread-9",
                "runId": "run-1",
                "state": {"user_id": "user-123", "user_name": "Joe Doe"},
                "messages": [{"id": "m1", "role": "user", "content": "Show me the items"}],
                "tools": [],
                "context": [],
                "forwardedProps": {}
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let types = event_types(std::str::from_utf8(&body).unwrap());
        assert_eq!(types.first().map(String::as_str), Some("RUN_STARTED"));
        assert_eq!(types.last().map(String::as_str), Some("RUN_FINISHED"));
        assert!(types.iter().any(|t| t == "TOOL_CALL_RESULT"));

        let session = state
            .sessions()
            .get_session(&SessionKey::new("agent", "user-123", "thread-9"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_ag_ui_rejects_empty_thread_id() {
        let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::default());
        let state = build_state(&settings(), move |_| Ok(provider)).unwrap();
        let response = routes(state)
            .oneshot(post_json(json!({"threadId": "", "runId": "r"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
