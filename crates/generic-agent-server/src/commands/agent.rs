use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use axum::Router;
use generic_agent::ag_ui::AgUiAdapter;
use generic_agent::agents::{build_generic_agent, Agent};
use generic_agent::model::ModelConfig;
use generic_agent::providers::base::Provider;
use generic_agent::providers::google::{GoogleProvider, GOOGLE_API_KEY_VAR};
use generic_agent::session::{SessionService, SqliteSessionService};
use tokio::task::JoinHandle;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tracing::{error, info, warn};

use crate::configuration::Settings;
use crate::state::{self, AppState};

/// Everything the routes need, assembled from settings: session store,
/// agent descriptor, provider and the AG-UI adapter tying them together.
///
/// The provider is built for the model the agent descriptor names.
pub fn build_state<F>(settings: &Settings, provider_for: F) -> Result<Arc<AppState>>
where
    F: FnOnce(&ModelConfig) -> Result<Arc<dyn Provider>>,
{
    let uri = settings.session_uri();
    let sessions: Arc<dyn SessionService> = Arc::new(
        SqliteSessionService::from_uri(&uri)
            .with_context(|| format!("Failed to open session store at {}", uri))?,
    );

    let descriptor = build_generic_agent(settings.profile.item_format());
    let provider = provider_for(&descriptor.model)?;
    info!(agent = %descriptor.name, model = %descriptor.model.model_name, "agent ready");
    let agent = Agent::new(descriptor, provider);
    let adapter = AgUiAdapter::new(agent, &settings.app_name, sessions)
        .with_session_timeout(settings.session_timeout());

    Ok(state::AppState::new(adapter))
}

pub fn google_provider(model: &ModelConfig) -> Result<Arc<dyn Provider>> {
    let provider = GoogleProvider::from_env(model.clone())?;
    Ok(Arc::new(provider))
}

/// One allowed origin with credentials; methods and headers are mirrored
/// from the preflight since wildcards cannot be combined with credentials.
pub fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin)
        .with_context(|| format!("Invalid CORS origin: {}", origin))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

pub fn build_router(state: Arc<AppState>, settings: &Settings) -> Result<Router> {
    let app = crate::routes::configure(state);
    match settings.cors_origin() {
        Some(origin) => {
            info!("CORS enabled for {}", origin);
            Ok(app.layer(cors_layer(&origin)?))
        }
        None => Ok(app),
    }
}

/// Periodically deletes sessions idle for longer than the session timeout.
pub fn spawn_session_sweeper(adapter: AgUiAdapter, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            match adapter.prune_expired_sessions().await {
                Ok(0) => {}
                Ok(pruned) => info!("Pruned {} expired sessions", pruned),
                Err(e) => error!("Failed to prune expired sessions: {}", e),
            }
        }
    })
}

fn warn_if_api_key_missing() {
    if std::env::var(GOOGLE_API_KEY_VAR).map_or(true, |key| key.trim().is_empty()) {
        warn!("⚠️  Warning: GOOGLE_API_KEY environment variable not set!");
        warn!("   Set it with: export GOOGLE_API_KEY='your-key-here'");
        warn!("   Get a key from: https://makersuite.google.com/app/apikey");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    crate::logging::setup_logging(Some("agentd"))?;

    let settings = Settings::load(config_path)?;
    warn_if_api_key_missing();

    let app_state = build_state(&settings, google_provider)?;
    let sweeper = spawn_session_sweeper(app_state.adapter().clone(), settings.cleanup_interval());

    let app = build_router(app_state, &settings)?;

    let listener = tokio::net::TcpListener::bind(settings.socket_addr()).await?;
    info!(
        profile = ?settings.profile,
        session_uri = %settings.session_uri(),
        "listening on {}",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    Ok(())
}
