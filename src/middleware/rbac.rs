//! Role guards layered on top of [`CurrentUser`].

use axum::{
    extract::{FromRequestParts, Path},
    http::request::Parts,
};

use crate::errors::AppError;
use crate::middleware::auth::CurrentUser;
use crate::services::product as product_service;
use crate::AppState;

/// Extractor that requires a superuser token.
#[derive(Debug, Clone)]
pub struct RequireSuperUser(pub CurrentUser);

impl FromRequestParts<AppState> for RequireSuperUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.super_user {
            return Err(AppError::Forbidden("Superuser access required".to_string()));
        }
        Ok(RequireSuperUser(user))
    }
}

/// Extractor for `/projects/{name}/…` routes that requires an owner of
/// `{name}` or a superuser.
#[derive(Debug, Clone)]
pub struct RequireProjectOwner(pub CurrentUser);

impl FromRequestParts<AppState> for RequireProjectOwner {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        let Path(product_name) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::Validation(format!("invalid project path: {e}")))?;

        product_service::ensure_project_owner(&state.ctx, user.id, user.super_user, &product_name)
            .await?;
        Ok(RequireProjectOwner(user))
    }
}
