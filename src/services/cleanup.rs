//! Background purge of a deleted project's remaining data.
//!
//! Jobs are submitted to a queue drained by a single worker task, in
//! submission order. Each job's status is kept in a shared map and published
//! on a watch channel so callers can poll it or await completion. Finished
//! jobs are dropped from the map once they are older than the retention
//! window; the sweep runs each time the worker picks up a new job.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::errors::{AggregateError, AppError};
use crate::models::job::{CleanupJob, CleanupRequest, JobStatus};
use crate::store::{EnvironmentStore, ServiceStore, WorkloadStore};

/// How long a finished job stays observable.
pub const JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Work performed for one cleanup job.
#[async_trait]
pub trait CleanupExecutor: Send + Sync {
    async fn run(&self, request: &CleanupRequest) -> Result<(), AggregateError>;
}

/// Purges services, environments and workload references of a project.
pub struct ProjectCleanup {
    pub services: Arc<dyn ServiceStore>,
    pub environments: Arc<dyn EnvironmentStore>,
    pub workloads: Arc<dyn WorkloadStore>,
}

#[async_trait]
impl CleanupExecutor for ProjectCleanup {
    async fn run(&self, request: &CleanupRequest) -> Result<(), AggregateError> {
        let product = request.product_name.as_str();
        let mut errors = AggregateError::default();

        if let Err(e) = self.services.delete_all_for_product(product).await {
            errors.push(e);
        }

        match self.environments.list_by_product(product).await {
            Ok(envs) => {
                for env in envs {
                    if let Err(e) = self.environments.delete(&env.env_name, product).await {
                        tracing::error!(
                            product = %product,
                            env = %env.env_name,
                            error = %e,
                            "Failed to delete environment"
                        );
                        errors.push(e);
                    }
                }
            }
            Err(e) => errors.push(e),
        }

        if let Err(e) = self.workloads.remove_product(product).await {
            errors.push(e);
        }
        if let Err(e) = self.environments.purge_external_services(product).await {
            errors.push(e);
        }

        errors.into_result()
    }
}

struct JobEntry {
    job: CleanupJob,
    status: watch::Sender<JobStatus>,
}

type JobMap = Arc<RwLock<HashMap<Uuid, JobEntry>>>;

/// Handle to the cleanup queue. Cheap to clone.
#[derive(Clone)]
pub struct CleanupQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    jobs: JobMap,
}

impl std::fmt::Debug for CleanupQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupQueue").finish_non_exhaustive()
    }
}

impl CleanupQueue {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(executor: Arc<dyn CleanupExecutor>) -> Self {
        Self::spawn_with_retention(executor, JOB_RETENTION)
    }

    pub fn spawn_with_retention(executor: Arc<dyn CleanupExecutor>, retention: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let jobs: JobMap = Arc::new(RwLock::new(HashMap::new()));
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        tokio::spawn(worker(rx, Arc::clone(&jobs), executor, retention));
        Self { tx, jobs }
    }

    /// Queue a cleanup and return its job id.
    pub async fn submit(&self, request: CleanupRequest) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        let (status, _) = watch::channel(JobStatus::Queued);
        self.jobs.write().await.insert(
            id,
            JobEntry {
                job: CleanupJob::queued(id, &request),
                status,
            },
        );

        if self.tx.send(id).is_err() {
            self.jobs.write().await.remove(&id);
            return Err(AppError::Internal("cleanup worker is not running".to_string()));
        }
        tracing::info!(job_id = %id, product = %request.product_name, "Cleanup job queued");
        Ok(id)
    }

    pub async fn status(&self, id: Uuid) -> Option<CleanupJob> {
        self.jobs.read().await.get(&id).map(|entry| entry.job.clone())
    }

    /// Wait until the job has finished and return its final state.
    pub async fn wait(&self, id: Uuid) -> Option<CleanupJob> {
        let mut rx = self.jobs.read().await.get(&id)?.status.subscribe();
        // Errs only when the entry was swept, then status is None as well.
        let _ = rx.wait_for(JobStatus::is_terminal).await;
        self.status(id).await
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<Uuid>,
    jobs: JobMap,
    executor: Arc<dyn CleanupExecutor>,
    retention: TimeDelta,
) {
    while let Some(id) = rx.recv().await {
        sweep(&jobs, retention).await;
        let Some(request) = start(&jobs, id).await else {
            continue;
        };

        let outcome = executor.run(&request).await;

        let mut map = jobs.write().await;
        let Some(entry) = map.get_mut(&id) else {
            continue;
        };
        entry.job.finished_at = Some(Utc::now());
        match outcome {
            Ok(()) => {
                entry.job.status = JobStatus::Succeeded;
                tracing::info!(job_id = %id, product = %request.product_name, "Cleanup job finished");
            }
            Err(errors) => {
                entry.job.status = JobStatus::Failed;
                entry.job.errors = errors.errors().iter().map(ToString::to_string).collect();
                tracing::error!(
                    job_id = %id,
                    product = %request.product_name,
                    error = %errors,
                    "Cleanup job failed"
                );
            }
        }
        entry.status.send_replace(entry.job.status);
    }
    tracing::debug!("Cleanup worker stopped");
}

/// Drop finished jobs older than `retention`.
async fn sweep(jobs: &JobMap, retention: TimeDelta) {
    let now = Utc::now();
    let mut map = jobs.write().await;
    let before = map.len();
    map.retain(|_, entry| match entry.job.finished_at {
        Some(finished) if entry.job.status.is_terminal() => now - finished < retention,
        _ => true,
    });
    let swept = before - map.len();
    if swept > 0 {
        tracing::debug!(swept, "Dropped expired cleanup jobs");
    }
}

async fn start(jobs: &JobMap, id: Uuid) -> Option<CleanupRequest> {
    let mut map = jobs.write().await;
    let entry = map.get_mut(&id)?;
    entry.job.status = JobStatus::Running;
    entry.job.started_at = Some(Utc::now());
    entry.status.send_replace(JobStatus::Running);
    Some(CleanupRequest {
        product_name: entry.job.product_name.clone(),
        user_name: entry.job.requested_by.clone(),
        request_id: entry.job.request_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::environment::{Environment, ExternalService, WorkloadRef};
    use crate::models::service::{DeployType, ServiceRecord, Visibility};
    use crate::store::memory::MemoryStore;
    use std::sync::Mutex;

    fn request(product: &str) -> CleanupRequest {
        CleanupRequest {
            product_name: product.to_string(),
            user_name: "alice".to_string(),
            request_id: "req-1".to_string(),
        }
    }

    fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for product in ["shop", "blog"] {
            store.insert_service(ServiceRecord {
                service_name: "api".to_string(),
                product_name: product.to_string(),
                deploy_type: DeployType::K8s,
                revision: 1,
                visibility: Visibility::Private,
                status: None,
                helm_chart: None,
                containers: Vec::new(),
                create_by: "seed".to_string(),
                create_time: Utc::now(),
            });
            store.insert_environment(Environment {
                product_name: product.to_string(),
                env_name: "dev".to_string(),
                status: String::new(),
            });
            store.insert_workload(WorkloadRef {
                env_name: "dev".to_string(),
                product_name: product.to_string(),
                workload_name: "api".to_string(),
            });
            store.insert_external_service(ExternalService {
                product_name: product.to_string(),
                env_name: "ext".to_string(),
                service_name: "legacy".to_string(),
            });
        }
        store
    }

    fn project_cleanup(store: &Arc<MemoryStore>) -> Arc<ProjectCleanup> {
        Arc::new(ProjectCleanup {
            services: store.clone(),
            environments: store.clone(),
            workloads: store.clone(),
        })
    }

    #[tokio::test]
    async fn job_purges_only_the_requested_project() {
        let store = seeded();
        let queue = CleanupQueue::spawn(project_cleanup(&store));

        let id = queue.submit(request("shop")).await.unwrap();
        let job = queue.wait(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.started_at.is_some() && job.finished_at.is_some());
        let remaining: Vec<String> = store
            .all_services()
            .into_iter()
            .map(|s| s.product_name)
            .collect();
        assert_eq!(remaining, vec!["blog".to_string()]);
        assert_eq!(EnvironmentStore::count(store.as_ref(), "shop").await.unwrap(), 0);
        assert_eq!(EnvironmentStore::count(store.as_ref(), "blog").await.unwrap(), 1);
        assert!(store.workloads().iter().all(|w| w.product_name == "blog"));
        assert!(store.external_services().iter().all(|s| s.product_name == "blog"));
    }

    struct Recording {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CleanupExecutor for Recording {
        async fn run(&self, request: &CleanupRequest) -> Result<(), AggregateError> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.seen.lock().unwrap().push(request.product_name.clone());
            if self.fail {
                let mut errors = AggregateError::default();
                errors.push(AppError::NotFound("env dev".to_string()));
                errors.push(AppError::Internal("workloads offline".to_string()));
                return Err(errors);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let executor = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let queue = CleanupQueue::spawn(executor.clone());

        let mut ids = Vec::new();
        for product in ["a", "b", "c"] {
            ids.push(queue.submit(request(product)).await.unwrap());
        }
        for id in ids {
            queue.wait(id).await.unwrap();
        }
        assert_eq!(*executor.seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failed_job_keeps_every_error() {
        let queue = CleanupQueue::spawn(Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: true,
        }));
        let id = queue.submit(request("shop")).await.unwrap();
        let job = queue.wait(id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.errors.len(), 2);
        assert!(job.errors[1].contains("workloads offline"));
    }

    #[tokio::test]
    async fn expired_jobs_are_dropped_when_the_next_job_starts() {
        let queue = CleanupQueue::spawn_with_retention(
            Arc::new(Recording {
                seen: Mutex::new(Vec::new()),
                fail: false,
            }),
            Duration::ZERO,
        );

        let first = queue.submit(request("a")).await.unwrap();
        assert_eq!(queue.wait(first).await.unwrap().status, JobStatus::Succeeded);

        let second = queue.submit(request("b")).await.unwrap();
        assert_eq!(queue.wait(second).await.unwrap().status, JobStatus::Succeeded);
        assert!(queue.status(first).await.is_none());
        assert_eq!(queue.jobs.read().await.len(), 1);
    }

    #[tokio::test]
    async fn finished_jobs_within_retention_are_kept() {
        let queue = CleanupQueue::spawn(Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: false,
        }));
        let first = queue.submit(request("a")).await.unwrap();
        queue.wait(first).await.unwrap();
        let second = queue.submit(request("b")).await.unwrap();
        queue.wait(second).await.unwrap();
        assert!(queue.status(first).await.is_some());
    }

    #[tokio::test]
    async fn unknown_job_has_no_status() {
        let queue = CleanupQueue::spawn(Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: false,
        }));
        assert!(queue.status(Uuid::new_v4()).await.is_none());
        assert!(queue.wait(Uuid::new_v4()).await.is_none());
    }
}
