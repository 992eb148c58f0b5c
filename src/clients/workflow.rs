//! Workflow service client, used when a project is deleted.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::clients::{check, http_client};
use crate::errors::AppError;

const SERVICE: &str = "workflow service";
const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Removal of a project's build and delivery artifacts.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    async fn delete_test_modules(&self, product_name: &str, request_id: &str)
        -> Result<(), AppError>;

    async fn delete_workflows(&self, product_name: &str, request_id: &str) -> Result<(), AppError>;

    async fn delete_pipelines(&self, product_name: &str, request_id: &str) -> Result<(), AppError>;

    async fn delete_freestyle_pipelines(&self, product_name: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
pub struct HttpWorkflowClient {
    http: Client,
    base_url: String,
}

impl HttpWorkflowClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn delete(&self, path: &str, request_id: Option<&str>) -> Result<(), AppError> {
        let mut request = self.http.delete(format!("{}{}", self.base_url, path));
        if let Some(id) = request_id {
            request = request.header(REQUEST_ID_HEADER, id);
        }
        check(SERVICE, path, request.send().await).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowClient for HttpWorkflowClient {
    async fn delete_test_modules(
        &self,
        product_name: &str,
        request_id: &str,
    ) -> Result<(), AppError> {
        self.delete(&format!("/api/v1/projects/{product_name}/tests"), Some(request_id))
            .await
    }

    async fn delete_workflows(&self, product_name: &str, request_id: &str) -> Result<(), AppError> {
        self.delete(
            &format!("/api/v1/projects/{product_name}/workflows"),
            Some(request_id),
        )
        .await
    }

    async fn delete_pipelines(&self, product_name: &str, request_id: &str) -> Result<(), AppError> {
        self.delete(
            &format!("/api/v1/projects/{product_name}/pipelines"),
            Some(request_id),
        )
        .await
    }

    async fn delete_freestyle_pipelines(&self, product_name: &str) -> Result<(), AppError> {
        self.delete(&format!("/api/v1/projects/{product_name}/freestyle"), None)
            .await
    }
}
