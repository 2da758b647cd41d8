pub mod analytics;
pub mod auth;
pub mod chat;
pub mod entitlement;
pub mod error;
pub mod middleware;
pub mod orchestrator;
pub mod personas;
pub mod prompts;
pub mod reports;
pub mod settings;

use axum::{
    Json, Router, middleware as axum_middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// All routes. Transport layers (CORS, tracing) are added by the server.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/personas", get(personas::list_personas))
        .route("/personas/dependents", post(personas::create_dependent))
        .route("/personas/session", post(personas::open_session))
        .route("/personas/pin", put(personas::set_pin))
        .route("/chat", post(chat::send_message))
        .route("/conversations/{conversation_id}", delete(chat::delete_conversation))
        .route(
            "/dependents/{dependent_id}/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .route(
            "/dependents/{dependent_id}/blacklist",
            get(settings::list_blacklist).post(settings::add_blacklist_word),
        )
        .route(
            "/dependents/{dependent_id}/blacklist/{entry_id}",
            delete(settings::remove_blacklist_word),
        )
        .route("/dependents/{dependent_id}/validate", post(settings::validate_message))
        .route("/dependents/{dependent_id}/flags", get(reports::list_flags))
        .route("/dependents/{dependent_id}/report", get(reports::usage_report))
        .route("/dependents/{dependent_id}/conversations", get(reports::list_conversations))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
