use axum::{routing::get, Router};

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is running", body = String)
    ),
    tag = "Health"
)]
pub async fn health() -> &'static str {
    "ok"
}

pub fn routes() -> Router {
    Router::new().route("/health", get(health))
}
