//! Storage contracts consumed by the project services.
//!
//! Services only talk to persistence through these traits, so the same code
//! runs against PostgreSQL ([`crate::db::PgStore`]) or the in-memory backend
//! ([`memory::MemoryStore`]).

pub mod memory;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::environment::{Environment, RenderSet};
use crate::models::product::{ProductTemplate, ServiceInfo};
use crate::models::service::{DeployType, ServiceRecord, ServiceStatus};

/// Named monotonic sequences (`product:<name>`, `service:<name>:<product>`).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Next value of the sequence, starting at 1. Fails with [`AppError::Sequence`].
    async fn next_seq(&self, key: &str) -> Result<i64, AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

/// Versioned service template records.
///
/// The current revision of a `(service_name, product_name, deploy_type)` key
/// is its highest revision not marked `deleting`.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Current revision of every service owned by the product, ordered by name.
    async fn list_current_by_product(
        &self,
        product_name: &str,
    ) -> Result<Vec<ServiceRecord>, AppError>;

    /// Current revisions of the given `(name, owner)` services.
    async fn list_current_for(&self, infos: &[ServiceInfo])
        -> Result<Vec<ServiceRecord>, AppError>;

    /// Current revisions of the product's public (shareable) services.
    async fn list_public_by_product(
        &self,
        product_name: &str,
    ) -> Result<Vec<ServiceRecord>, AppError>;

    /// Number of services with a current revision in the product.
    async fn count(&self, product_name: &str) -> Result<i64, AppError>;

    /// Insert a new revision. Fails with [`AppError::Persistence`].
    async fn create(&self, record: &ServiceRecord) -> Result<(), AppError>;

    /// Remove one revision; with `status` set, only if it carries that status.
    async fn delete(
        &self,
        service_name: &str,
        deploy_type: DeployType,
        product_name: &str,
        status: Option<ServiceStatus>,
        revision: i64,
    ) -> Result<(), AppError>;

    /// Remove every revision of every service of the product.
    async fn delete_all_for_product(&self, product_name: &str) -> Result<(), AppError>;
}

/// Project templates.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Fails with [`AppError::NotFound`] when the template does not exist.
    async fn find(&self, product_name: &str) -> Result<ProductTemplate, AppError>;

    async fn list(&self) -> Result<Vec<ProductTemplate>, AppError>;

    async fn list_open_source(&self) -> Result<Vec<ProductTemplate>, AppError>;

    /// Fails with [`AppError::Conflict`] when the name is taken.
    async fn create(&self, template: &ProductTemplate) -> Result<(), AppError>;

    async fn update(&self, product_name: &str, template: &ProductTemplate)
        -> Result<(), AppError>;

    async fn update_onboarding_status(
        &self,
        product_name: &str,
        status: i32,
    ) -> Result<(), AppError>;

    async fn update_service_order(
        &self,
        product_name: &str,
        services: &[Vec<String>],
        update_by: &str,
    ) -> Result<(), AppError>;

    async fn delete(&self, product_name: &str) -> Result<(), AppError>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), AppError>;
}

/// Environments instantiated from projects.
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn list_by_product(&self, product_name: &str) -> Result<Vec<Environment>, AppError>;

    async fn update_status(
        &self,
        env_name: &str,
        product_name: &str,
        status: &str,
    ) -> Result<(), AppError>;

    async fn count(&self, product_name: &str) -> Result<i64, AppError>;

    async fn delete(&self, env_name: &str, product_name: &str) -> Result<(), AppError>;

    /// Drop services registered from externally managed environments.
    async fn purge_external_services(&self, product_name: &str) -> Result<(), AppError>;
}

/// Render variable sets, one default per project plus one per environment.
#[async_trait]
pub trait RenderSetStore: Send + Sync {
    /// Insert or replace the set identified by `(product_tmpl, env_name)`.
    async fn upsert(&self, set: &RenderSet) -> Result<(), AppError>;

    async fn find_default(&self, product_name: &str) -> Result<Option<RenderSet>, AppError>;

    async fn list_by_product(&self, product_name: &str) -> Result<Vec<RenderSet>, AppError>;

    async fn delete_by_product(&self, product_name: &str) -> Result<(), AppError>;
}

/// Workload statistics referencing projects.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Remove every workload entry that belongs to the product.
    async fn remove_product(&self, product_name: &str) -> Result<(), AppError>;
}
