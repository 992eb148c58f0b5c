//! In-memory storage backend.
//!
//! Selected with `STORE_BACKEND=memory`. Also the backend of every unit and
//! integration test. Each collection sits behind its own mutex; no lock is
//! held across an await point.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::environment::{Environment, ExternalService, RenderSet, WorkloadRef};
use crate::models::product::{ProductTemplate, ServiceInfo};
use crate::models::service::{DeployType, ServiceRecord, ServiceStatus, Visibility};
use crate::store::{
    CounterStore, EnvironmentStore, ProductStore, RenderSetStore, ServiceStore, WorkloadStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: Mutex<HashMap<String, i64>>,
    services: Mutex<Vec<ServiceRecord>>,
    products: Mutex<BTreeMap<String, ProductTemplate>>,
    environments: Mutex<Vec<Environment>>,
    render_sets: Mutex<Vec<RenderSet>>,
    workloads: Mutex<Vec<WorkloadRef>>,
    external_services: Mutex<Vec<ExternalService>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a service revision as-is, bypassing revision allocation.
    pub fn insert_service(&self, record: ServiceRecord) {
        lock(&self.services).push(record);
    }

    /// Every stored revision, including `deleting` ones.
    pub fn all_services(&self) -> Vec<ServiceRecord> {
        lock(&self.services).clone()
    }

    pub fn insert_product(&self, template: ProductTemplate) {
        lock(&self.products).insert(template.product_name.clone(), template);
    }

    pub fn insert_environment(&self, env: Environment) {
        lock(&self.environments).push(env);
    }

    pub fn insert_workload(&self, workload: WorkloadRef) {
        lock(&self.workloads).push(workload);
    }

    pub fn insert_external_service(&self, service: ExternalService) {
        lock(&self.external_services).push(service);
    }

    pub fn workloads(&self) -> Vec<WorkloadRef> {
        lock(&self.workloads).clone()
    }

    pub fn external_services(&self) -> Vec<ExternalService> {
        lock(&self.external_services).clone()
    }

    /// Current value of a counter without advancing it.
    pub fn counter_value(&self, key: &str) -> Option<i64> {
        lock(&self.counters).get(key).copied()
    }

    pub fn set_counter(&self, key: &str, value: i64) {
        lock(&self.counters).insert(key.to_string(), value);
    }
}

/// Highest non-deleting revision per `(service_name, product_name, deploy_type)`.
fn current_revisions<'a, I>(records: I) -> Vec<ServiceRecord>
where
    I: IntoIterator<Item = &'a ServiceRecord>,
{
    let mut latest: BTreeMap<(String, String, &'static str), &ServiceRecord> = BTreeMap::new();
    for record in records {
        if record.status == Some(ServiceStatus::Deleting) {
            continue;
        }
        let key = (
            record.service_name.clone(),
            record.product_name.clone(),
            record.deploy_type.as_str(),
        );
        match latest.get(&key) {
            Some(existing) if existing.revision >= record.revision => {}
            _ => {
                latest.insert(key, record);
            }
        }
    }
    latest.into_values().cloned().collect()
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn next_seq(&self, key: &str) -> Result<i64, AppError> {
        let mut counters = lock(&self.counters);
        let seq = counters.entry(key.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        lock(&self.counters).remove(key);
        Ok(())
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn list_current_by_product(
        &self,
        product_name: &str,
    ) -> Result<Vec<ServiceRecord>, AppError> {
        let services = lock(&self.services);
        Ok(current_revisions(
            services.iter().filter(|s| s.product_name == product_name),
        ))
    }

    async fn list_current_for(
        &self,
        infos: &[ServiceInfo],
    ) -> Result<Vec<ServiceRecord>, AppError> {
        let services = lock(&self.services);
        let current = current_revisions(services.iter().filter(|s| {
            infos
                .iter()
                .any(|info| info.name == s.service_name && info.owner == s.product_name)
        }));
        Ok(current)
    }

    async fn list_public_by_product(
        &self,
        product_name: &str,
    ) -> Result<Vec<ServiceRecord>, AppError> {
        let services = lock(&self.services);
        Ok(current_revisions(services.iter().filter(|s| {
            s.product_name == product_name && s.visibility == Visibility::Public
        })))
    }

    async fn count(&self, product_name: &str) -> Result<i64, AppError> {
        let services = lock(&self.services);
        let current = current_revisions(services.iter().filter(|s| s.product_name == product_name));
        Ok(current.len() as i64)
    }

    async fn create(&self, record: &ServiceRecord) -> Result<(), AppError> {
        let mut services = lock(&self.services);
        let taken = services.iter().any(|s| {
            s.service_name == record.service_name
                && s.product_name == record.product_name
                && s.deploy_type == record.deploy_type
                && s.revision == record.revision
        });
        if taken {
            return Err(AppError::Persistence(format!(
                "service {} revision {} already exists in project {}",
                record.service_name, record.revision, record.product_name
            )));
        }
        services.push(record.clone());
        Ok(())
    }

    async fn delete(
        &self,
        service_name: &str,
        deploy_type: DeployType,
        product_name: &str,
        status: Option<ServiceStatus>,
        revision: i64,
    ) -> Result<(), AppError> {
        lock(&self.services).retain(|s| {
            let hit = s.service_name == service_name
                && s.deploy_type == deploy_type
                && s.product_name == product_name
                && s.revision == revision
                && status.map_or(true, |wanted| s.status == Some(wanted));
            !hit
        });
        Ok(())
    }

    async fn delete_all_for_product(&self, product_name: &str) -> Result<(), AppError> {
        lock(&self.services).retain(|s| s.product_name != product_name);
        Ok(())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn find(&self, product_name: &str) -> Result<ProductTemplate, AppError> {
        lock(&self.products)
            .get(product_name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("project {product_name}")))
    }

    async fn list(&self) -> Result<Vec<ProductTemplate>, AppError> {
        Ok(lock(&self.products).values().cloned().collect())
    }

    async fn list_open_source(&self) -> Result<Vec<ProductTemplate>, AppError> {
        Ok(lock(&self.products)
            .values()
            .filter(|t| t.is_opensource)
            .cloned()
            .collect())
    }

    async fn create(&self, template: &ProductTemplate) -> Result<(), AppError> {
        let mut products = lock(&self.products);
        if products.contains_key(&template.product_name) {
            return Err(AppError::Conflict(format!(
                "project {} already exists",
                template.product_name
            )));
        }
        products.insert(template.product_name.clone(), template.clone());
        Ok(())
    }

    async fn update(
        &self,
        product_name: &str,
        template: &ProductTemplate,
    ) -> Result<(), AppError> {
        let mut products = lock(&self.products);
        let slot = products
            .get_mut(product_name)
            .ok_or_else(|| AppError::NotFound(format!("project {product_name}")))?;
        *slot = template.clone();
        Ok(())
    }

    async fn update_onboarding_status(
        &self,
        product_name: &str,
        status: i32,
    ) -> Result<(), AppError> {
        let mut products = lock(&self.products);
        let template = products
            .get_mut(product_name)
            .ok_or_else(|| AppError::NotFound(format!("project {product_name}")))?;
        template.onboarding_status = status;
        Ok(())
    }

    async fn update_service_order(
        &self,
        product_name: &str,
        services: &[Vec<String>],
        update_by: &str,
    ) -> Result<(), AppError> {
        let mut products = lock(&self.products);
        let template = products
            .get_mut(product_name)
            .ok_or_else(|| AppError::NotFound(format!("project {product_name}")))?;
        template.services = services.to_vec();
        template.update_by = update_by.to_string();
        template.update_time = Some(chrono::Utc::now());
        Ok(())
    }

    async fn delete(&self, product_name: &str) -> Result<(), AppError> {
        lock(&self.products).remove(product_name);
        Ok(())
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl EnvironmentStore for MemoryStore {
    async fn list_by_product(&self, product_name: &str) -> Result<Vec<Environment>, AppError> {
        Ok(lock(&self.environments)
            .iter()
            .filter(|e| e.product_name == product_name)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        env_name: &str,
        product_name: &str,
        status: &str,
    ) -> Result<(), AppError> {
        let mut envs = lock(&self.environments);
        let env = envs
            .iter_mut()
            .find(|e| e.env_name == env_name && e.product_name == product_name)
            .ok_or_else(|| {
                AppError::NotFound(format!("environment {env_name} of project {product_name}"))
            })?;
        env.status = status.to_string();
        Ok(())
    }

    async fn count(&self, product_name: &str) -> Result<i64, AppError> {
        Ok(lock(&self.environments)
            .iter()
            .filter(|e| e.product_name == product_name)
            .count() as i64)
    }

    async fn delete(&self, env_name: &str, product_name: &str) -> Result<(), AppError> {
        lock(&self.environments)
            .retain(|e| !(e.env_name == env_name && e.product_name == product_name));
        Ok(())
    }

    async fn purge_external_services(&self, product_name: &str) -> Result<(), AppError> {
        lock(&self.external_services).retain(|s| s.product_name != product_name);
        Ok(())
    }
}

#[async_trait]
impl RenderSetStore for MemoryStore {
    async fn upsert(&self, set: &RenderSet) -> Result<(), AppError> {
        let mut sets = lock(&self.render_sets);
        match sets
            .iter_mut()
            .find(|s| s.product_tmpl == set.product_tmpl && s.env_name == set.env_name)
        {
            Some(existing) => *existing = set.clone(),
            None => sets.push(set.clone()),
        }
        Ok(())
    }

    async fn find_default(&self, product_name: &str) -> Result<Option<RenderSet>, AppError> {
        Ok(lock(&self.render_sets)
            .iter()
            .find(|s| s.product_tmpl == product_name && s.is_default)
            .cloned())
    }

    async fn list_by_product(&self, product_name: &str) -> Result<Vec<RenderSet>, AppError> {
        Ok(lock(&self.render_sets)
            .iter()
            .filter(|s| s.product_tmpl == product_name)
            .cloned()
            .collect())
    }

    async fn delete_by_product(&self, product_name: &str) -> Result<(), AppError> {
        lock(&self.render_sets).retain(|s| s.product_tmpl != product_name);
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for MemoryStore {
    async fn remove_product(&self, product_name: &str) -> Result<(), AppError> {
        lock(&self.workloads).retain(|w| w.product_name != product_name);
        Ok(())
    }
}
