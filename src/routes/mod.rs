//! Route definitions for the ProjHub API.

pub mod health;
pub mod projects;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Build the full router with tracing and CORS layers.
pub fn router(state: AppState) -> Router {
    let cors = match state.config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        Err(e) => {
            tracing::warn!(error = %e, "Invalid FRONTEND_URL, CORS disabled");
            CorsLayer::new()
        }
    };

    let api = Router::new()
        .route("/projects", get(projects::list).post(projects::create))
        .route("/projects/open-source", get(projects::list_open_source))
        .route("/projects/hierarchy", get(projects::hierarchy))
        .route(
            "/projects/{name}",
            get(projects::get)
                .put(projects::update)
                .delete(projects::delete),
        )
        .route("/projects/{name}/settings", put(projects::update_settings))
        .route("/projects/{name}/onboarding", put(projects::update_onboarding))
        .route(
            "/projects/{name}/service-order",
            put(projects::update_service_order),
        )
        .route(
            "/projects/{name}/match-rules",
            get(projects::get_match_rules).put(projects::update_match_rules),
        )
        .route("/cleanup-jobs/{id}", get(projects::cleanup_job));

    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
