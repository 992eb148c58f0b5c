pub mod clients;
pub mod config;
pub mod context;
pub mod db;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod parsers;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use context::ProjectContext;

/// Shared application state passed to all Axum handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub ctx: Arc<ProjectContext>,
    pub config: config::AppConfig,
}
