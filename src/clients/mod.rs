//! Clients for the remote services a project depends on.

pub mod authz;
pub mod workflow;

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::errors::AppError;

/// Build the shared HTTP client with a request timeout.
pub fn http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))
}

/// Turn a transport failure or a non-2xx answer into `ServiceUnavailable`.
pub(crate) async fn check(
    service: &str,
    what: &str,
    sent: Result<Response, reqwest::Error>,
) -> Result<Response, AppError> {
    let response = sent
        .map_err(|e| AppError::ServiceUnavailable(format!("{service}: {what} failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AppError::ServiceUnavailable(format!(
        "{service}: {what} returned {status}: {}",
        body.chars().take(200).collect::<String>()
    )))
}

pub(crate) fn is_not_found(sent: &Result<Response, reqwest::Error>) -> bool {
    matches!(sent, Ok(response) if response.status() == StatusCode::NOT_FOUND)
}
