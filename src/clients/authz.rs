//! Authorization service client: project roles, permissions and teams.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::clients::{check, http_client, is_not_found};
use crate::errors::AppError;
use crate::models::role::Role;

const SERVICE: &str = "authorization service";
const ROOT_KEY_HEADER: &str = "X-Root-Api-Key";

/// Calls made against the authorization service. Every failure is
/// [`AppError::ServiceUnavailable`].
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// Projects the user is explicitly assigned to, with their role ids.
    async fn get_user_projects(&self, user_id: i64) -> Result<HashMap<String, Vec<i64>>, AppError>;

    /// Permission uuids granted by a role within a project.
    async fn resolve_permissions(
        &self,
        role_id: i64,
        project_name: &str,
    ) -> Result<Vec<String>, AppError>;

    /// The project's "all users" role, if it has one.
    async fn list_roles_for_project(&self, project_name: &str) -> Result<Option<Role>, AppError>;

    async fn add_product_team(
        &self,
        project_name: &str,
        team_id: Option<i64>,
        user_ids: &[i64],
    ) -> Result<(), AppError>;

    async fn delete_product_team(&self, project_name: &str) -> Result<(), AppError>;
}

#[derive(Debug, Serialize)]
struct TeamBody<'a> {
    team_id: Option<i64>,
    user_ids: &'a [i64],
}

/// HTTP implementation authenticated with the root API key.
#[derive(Debug, Clone)]
pub struct HttpAuthorizationClient {
    http: Client,
    base_url: String,
    root_key: String,
}

impl HttpAuthorizationClient {
    pub fn new(base_url: &str, root_key: &str, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            root_key: root_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AppError> {
        let sent = self
            .http
            .get(self.url(path))
            .header(ROOT_KEY_HEADER, &self.root_key)
            .query(query)
            .send()
            .await;
        let response = check(SERVICE, path, sent).await?;
        response.json().await.map_err(|e| {
            AppError::ServiceUnavailable(format!("{SERVICE}: invalid response from {path}: {e}"))
        })
    }
}

#[async_trait]
impl AuthorizationClient for HttpAuthorizationClient {
    async fn get_user_projects(&self, user_id: i64) -> Result<HashMap<String, Vec<i64>>, AppError> {
        self.get_json(&format!("/api/v1/users/{user_id}/projects"), &[])
            .await
    }

    async fn resolve_permissions(
        &self,
        role_id: i64,
        project_name: &str,
    ) -> Result<Vec<String>, AppError> {
        self.get_json(
            &format!("/api/v1/roles/{role_id}/permissions"),
            &[("projectName", project_name)],
        )
        .await
    }

    async fn list_roles_for_project(&self, project_name: &str) -> Result<Option<Role>, AppError> {
        let path = format!("/api/v1/projects/{project_name}/roles/all-users");
        let sent = self
            .http
            .get(self.url(&path))
            .header(ROOT_KEY_HEADER, &self.root_key)
            .send()
            .await;
        if is_not_found(&sent) {
            return Ok(None);
        }
        let response = check(SERVICE, &path, sent).await?;
        let role = response.json::<Role>().await.map_err(|e| {
            AppError::ServiceUnavailable(format!("{SERVICE}: invalid role for {project_name}: {e}"))
        })?;
        Ok(Some(role))
    }

    async fn add_product_team(
        &self,
        project_name: &str,
        team_id: Option<i64>,
        user_ids: &[i64],
    ) -> Result<(), AppError> {
        let path = format!("/api/v1/projects/{project_name}/team");
        let sent = self
            .http
            .post(self.url(&path))
            .header(ROOT_KEY_HEADER, &self.root_key)
            .json(&TeamBody { team_id, user_ids })
            .send()
            .await;
        check(SERVICE, &path, sent).await?;
        Ok(())
    }

    async fn delete_product_team(&self, project_name: &str) -> Result<(), AppError> {
        let path = format!("/api/v1/projects/{project_name}/team");
        let sent = self
            .http
            .delete(self.url(&path))
            .header(ROOT_KEY_HEADER, &self.root_key)
            .send()
            .await;
        if is_not_found(&sent) {
            return Ok(());
        }
        check(SERVICE, &path, sent).await?;
        Ok(())
    }
}
