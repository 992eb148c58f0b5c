//! Liveness and readiness probes.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::config::StoreBackend;
use crate::errors::ApiResponse;
use crate::AppState;

/// Readiness probe detail.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub backend: &'static str,
    pub storage: String,
}

/// Always OK while the process runs.
pub async fn live() -> &'static str {
    "OK"
}

/// Reports `degraded` when the project store cannot be reached.
pub async fn ready(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    let backend = match state.config.store_backend {
        StoreBackend::Postgres => "postgres",
        StoreBackend::Memory => "memory",
    };

    let (status, storage) = match state.ctx.products.ping().await {
        Ok(()) => ("ok", "connected".to_string()),
        Err(e) => {
            tracing::warn!(backend, error = %e, "Storage health check failed");
            ("degraded", format!("error: {e}"))
        }
    };

    ApiResponse::success(HealthStatus {
        status,
        backend,
        storage,
    })
}
