pub mod ag_ui;
pub mod health;
pub mod session;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Session management routes plus the AG-UI endpoint.
pub fn configure(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(session::routes(state.clone()))
        .merge(ag_ui::routes(state))
}
