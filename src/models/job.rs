//! Cleanup job bookkeeping for asynchronous project deletion.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// What a cleanup job has to purge.
#[derive(Debug, Clone)]
pub struct CleanupRequest {
    pub product_name: String,
    pub user_name: String,
    pub request_id: String,
}

/// Observable state of a submitted cleanup job.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupJob {
    pub id: Uuid,
    pub product_name: String,
    pub requested_by: String,
    pub request_id: String,
    pub status: JobStatus,
    pub errors: Vec<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CleanupJob {
    pub fn queued(id: Uuid, request: &CleanupRequest) -> Self {
        Self {
            id,
            product_name: request.product_name.clone(),
            requested_by: request.user_name.clone(),
            request_id: request.request_id.clone(),
            status: JobStatus::Queued,
            errors: Vec::new(),
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_finished_states_are_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
