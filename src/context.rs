//! Handles shared by every project operation, built once at startup.

use std::fmt;
use std::sync::Arc;

use crate::clients::authz::AuthorizationClient;
use crate::clients::workflow::WorkflowClient;
use crate::parsers::helm_values::HelmValuesParser;
use crate::parsers::PayloadParser;
use crate::services::cleanup::{CleanupQueue, ProjectCleanup};
use crate::services::fanout::MAX_CONCURRENT_LOOKUPS;
use crate::store::{
    CounterStore, EnvironmentStore, ProductStore, RenderSetStore, ServiceStore, WorkloadStore,
};

#[derive(Debug, Clone)]
pub struct ProjectSettings {
    pub max_concurrent_lookups: usize,
    pub freestyle_pipelines_enabled: bool,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: MAX_CONCURRENT_LOOKUPS,
            freestyle_pipelines_enabled: false,
        }
    }
}

/// A backend implementing every storage contract.
pub trait Backend:
    ProductStore + ServiceStore + CounterStore + EnvironmentStore + RenderSetStore + WorkloadStore
{
}

impl<T> Backend for T where
    T: ProductStore
        + ServiceStore
        + CounterStore
        + EnvironmentStore
        + RenderSetStore
        + WorkloadStore
{
}

pub struct ProjectContext {
    pub products: Arc<dyn ProductStore>,
    pub services: Arc<dyn ServiceStore>,
    pub counters: Arc<dyn CounterStore>,
    pub environments: Arc<dyn EnvironmentStore>,
    pub render_sets: Arc<dyn RenderSetStore>,
    pub workloads: Arc<dyn WorkloadStore>,
    pub authz: Arc<dyn AuthorizationClient>,
    pub workflows: Arc<dyn WorkflowClient>,
    pub payload_parser: Arc<dyn PayloadParser>,
    pub cleanup: CleanupQueue,
    pub settings: ProjectSettings,
}

impl ProjectContext {
    /// Wire every store to `backend` and start the cleanup worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<B>(
        backend: Arc<B>,
        authz: Arc<dyn AuthorizationClient>,
        workflows: Arc<dyn WorkflowClient>,
        settings: ProjectSettings,
    ) -> Self
    where
        B: Backend + 'static,
    {
        let cleanup = CleanupQueue::spawn(Arc::new(ProjectCleanup {
            services: backend.clone(),
            environments: backend.clone(),
            workloads: backend.clone(),
        }));

        Self {
            products: backend.clone(),
            services: backend.clone(),
            counters: backend.clone(),
            environments: backend.clone(),
            render_sets: backend.clone(),
            workloads: backend,
            authz,
            workflows,
            payload_parser: Arc::new(HelmValuesParser),
            cleanup,
            settings,
        }
    }
}

impl fmt::Debug for ProjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectContext")
            .field("payload_format", &self.payload_parser.format())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
