//! Project template routes: listing, CRUD, settings, and match rules.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::{RequireProjectOwner, RequireSuperUser};
use crate::models::job::CleanupJob;
use crate::models::product::{
    MatchRule, ProductTemplate, ProjectListing, ProjectNode, UpdateMatchRules, UpdateServiceOrder,
};
use crate::services::product as product_service;
use crate::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Acknowledgement for mutations that return no resource.
#[derive(Debug, Serialize)]
pub struct Updated {
    pub product_name: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteAccepted {
    pub product_name: String,
    pub cleanup_job_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct OnboardingQuery {
    pub status: String,
}

/// GET /api/v1/projects: every project with the caller's role and permissions.
pub async fn list(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<ProjectListing>>>, AppError> {
    let listings =
        product_service::list_product_templates(&state.ctx, user.id, user.super_user).await?;
    Ok(ApiResponse::success(listings))
}

/// POST /api/v1/projects: create a project (superuser).
pub async fn create(
    State(state): State<AppState>,
    RequireSuperUser(user): RequireSuperUser,
    Json(mut body): Json<ProductTemplate>,
) -> Result<Json<ApiResponse<ProductTemplate>>, AppError> {
    body.update_by = user.username;
    body.revision = 0;
    let created = product_service::create_product_template(&state.ctx, body).await?;
    Ok(ApiResponse::success(created))
}

/// GET /api/v1/projects/open-source
pub async fn list_open_source(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<ProductTemplate>>>, AppError> {
    let templates = product_service::list_open_source(&state.ctx).await?;
    Ok(ApiResponse::success(templates))
}

/// GET /api/v1/projects/hierarchy: project, service and container tree.
pub async fn hierarchy(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ApiResponse<Vec<ProjectNode>>>, AppError> {
    let nodes = product_service::list_templates_hierarchy(
        &state.ctx,
        &user.username,
        user.id,
        user.super_user,
    )
    .await?;
    Ok(ApiResponse::success(nodes))
}

/// GET /api/v1/projects/{name}
pub async fn get(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ProductTemplate>>, AppError> {
    let template = product_service::get_product_template_services(&state.ctx, &name).await?;
    Ok(ApiResponse::success(template))
}

/// PUT /api/v1/projects/{name}: replace the template (owner).
pub async fn update(
    State(state): State<AppState>,
    RequireProjectOwner(user): RequireProjectOwner,
    Path(name): Path<String>,
    Json(mut body): Json<ProductTemplate>,
) -> Result<Json<ApiResponse<Updated>>, AppError> {
    body.update_by = user.username;
    product_service::update_product_template(&state.ctx, &name, body).await?;
    Ok(ApiResponse::success(Updated { product_name: name }))
}

/// DELETE /api/v1/projects/{name}: delete and queue cleanup (superuser).
pub async fn delete(
    State(state): State<AppState>,
    RequireSuperUser(user): RequireSuperUser,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<DeleteAccepted>>, AppError> {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let job_id =
        product_service::delete_product_template(&state.ctx, &user.username, &name, &request_id)
            .await?;
    Ok(ApiResponse::success(DeleteAccepted {
        product_name: name,
        cleanup_job_id: job_id,
    }))
}

/// PUT /api/v1/projects/{name}/settings: naming rules and team (owner).
pub async fn update_settings(
    State(state): State<AppState>,
    RequireProjectOwner(user): RequireProjectOwner,
    Path(name): Path<String>,
    Json(mut body): Json<ProductTemplate>,
) -> Result<Json<ApiResponse<Updated>>, AppError> {
    body.update_by = user.username;
    product_service::update_project(&state.ctx, &name, body).await?;
    Ok(ApiResponse::success(Updated { product_name: name }))
}

/// PUT /api/v1/projects/{name}/onboarding?status=N
pub async fn update_onboarding(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
    Query(query): Query<OnboardingQuery>,
) -> Result<Json<ApiResponse<Updated>>, AppError> {
    product_service::update_onboarding_status(&state.ctx, &name, &query.status).await?;
    Ok(ApiResponse::success(Updated { product_name: name }))
}

/// PUT /api/v1/projects/{name}/service-order (owner)
pub async fn update_service_order(
    State(state): State<AppState>,
    RequireProjectOwner(user): RequireProjectOwner,
    Path(name): Path<String>,
    Json(body): Json<UpdateServiceOrder>,
) -> Result<Json<ApiResponse<Updated>>, AppError> {
    product_service::update_service_order(&state.ctx, &user.username, &name, &body.services)
        .await?;
    Ok(ApiResponse::success(Updated { product_name: name }))
}

/// GET /api/v1/projects/{name}/match-rules
pub async fn get_match_rules(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Vec<MatchRule>>>, AppError> {
    let rules = product_service::get_custom_match_rules(&state.ctx, &name).await?;
    Ok(ApiResponse::success(rules))
}

/// PUT /api/v1/projects/{name}/match-rules: reparse services and save rules (owner).
pub async fn update_match_rules(
    State(state): State<AppState>,
    RequireProjectOwner(user): RequireProjectOwner,
    Path(name): Path<String>,
    Json(body): Json<UpdateMatchRules>,
) -> Result<Json<ApiResponse<Vec<MatchRule>>>, AppError> {
    let saved =
        product_service::update_custom_match_rules(&state.ctx, &name, &user.username, body.rules)
            .await?;
    Ok(ApiResponse::success(saved))
}

/// GET /api/v1/cleanup-jobs/{id}
pub async fn cleanup_job(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CleanupJob>>, AppError> {
    let job = state
        .ctx
        .cleanup
        .status(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("cleanup job {id}")))?;
    Ok(ApiResponse::success(job))
}
