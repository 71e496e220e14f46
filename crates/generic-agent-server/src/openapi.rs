use generic_agent::session::{Session, SessionSummary};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        super::routes::health::health,
        super::routes::session::list_apps,
        super::routes::session::list_sessions,
        super::routes::session::create_session,
        super::routes::session::get_session,
        super::routes::session::delete_session,
    ),
    components(schemas(
        super::routes::session::CreateSessionRequest,
        super::routes::session::SessionListResponse,
        Session,
        SessionSummary,
    ))
)]
pub struct ApiDoc;

pub fn generate_schema() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ApiDoc::openapi())
}
