//! Project template service: CRUD, permission-enriched listing, the project
//! hierarchy, and image match rules.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::context::ProjectContext;
use crate::errors::AppError;
use crate::models::environment::{RenderSet, ENV_STATUS_DELETING};
use crate::models::job::CleanupRequest;
use crate::models::product::{
    ContainerNode, MatchRule, ProductTemplate, ProjectListing, ProjectNode, RenderKv, ServiceInfo,
    ServiceNode,
};
use crate::models::role::{ProjectRole, ROLE_OWNER_ID, ROLE_USER_ID};
use crate::models::service::Visibility;
use crate::services::fanout::fan_out;
use crate::services::image_rules::{check_rules, preset_rules};
use crate::services::reparse::{reparse_services, ReparseStores};
use crate::services::rule_validation::validate_rules;

const PRODUCT_NAME_PATTERN: &str = r"^[a-z0-9-]+$";

pub fn product_counter_key(product_name: &str) -> String {
    format!("product:{product_name}")
}

/// Fetch a template with its default render variables filled in.
pub async fn get_product_template_services(
    ctx: &ProjectContext,
    product_name: &str,
) -> Result<ProductTemplate, AppError> {
    let mut template = ctx.products.find(product_name).await?;
    fill_product_template_vars(ctx, std::slice::from_mut(&mut template)).await?;
    Ok(template)
}

/// Copy each project's default render set into its `vars`.
pub async fn fill_product_template_vars(
    ctx: &ProjectContext,
    templates: &mut [ProductTemplate],
) -> Result<(), AppError> {
    for template in templates.iter_mut() {
        template.vars = ctx
            .render_sets
            .find_default(&template.product_name)
            .await?
            .map(|set| set.kvs)
            .unwrap_or_default();
    }
    Ok(())
}

/// List every project with the caller's role and permissions.
///
/// Superusers see everything as admin without consulting the authorization
/// service. Everyone else gets three passes: projects they are assigned to,
/// then projects with an "all users" role, then the rest under the base user
/// role (hidden). A last pass fills service and environment counts. Each pass
/// fails as a whole with every lookup error it collected.
pub async fn list_product_templates(
    ctx: &ProjectContext,
    user_id: i64,
    super_user: bool,
) -> Result<Vec<ProjectListing>, AppError> {
    let templates = ctx.products.list().await?;
    let limit = ctx.settings.max_concurrent_lookups;

    let mut listings = if super_user {
        templates
            .into_iter()
            .map(|t| ProjectListing::new(t, ProjectRole::Admin, Vec::new(), true))
            .collect()
    } else {
        enrich_for_user(ctx, user_id, templates, limit).await?
    };

    let mut bare: Vec<ProductTemplate> = listings.iter().map(|l| l.template.clone()).collect();
    fill_product_template_vars(ctx, &mut bare).await?;
    for (listing, filled) in listings.iter_mut().zip(bare) {
        listing.template.vars = filled.vars;
    }

    let services = Arc::clone(&ctx.services);
    let environments = Arc::clone(&ctx.environments);
    let mut counted = fan_out(listings, limit, move |mut listing: ProjectListing| {
        let services = Arc::clone(&services);
        let environments = Arc::clone(&environments);
        async move {
            listing.total_service_num = services.count(listing.product_name()).await?;
            listing.total_env_num = environments.count(listing.product_name()).await?;
            Ok(Some(listing))
        }
    })
    .await?;

    counted.sort_by(|a, b| a.product_name().cmp(b.product_name()));
    Ok(counted)
}

async fn enrich_for_user(
    ctx: &ProjectContext,
    user_id: i64,
    templates: Vec<ProductTemplate>,
    limit: usize,
) -> Result<Vec<ProjectListing>, AppError> {
    let mut remaining: BTreeMap<String, ProductTemplate> = templates
        .into_iter()
        .map(|t| (t.product_name.clone(), t))
        .collect();
    let assignments = ctx.authz.get_user_projects(user_id).await?;

    // Explicit assignments.
    let assigned: Vec<(String, Vec<i64>, Option<ProductTemplate>)> = assignments
        .into_iter()
        .map(|(name, role_ids)| {
            let template = remaining.remove(&name);
            (name, role_ids, template)
        })
        .collect();
    let authz = Arc::clone(&ctx.authz);
    let mut listings = fan_out(
        assigned,
        limit,
        move |(name, role_ids, template): (String, Vec<i64>, Option<ProductTemplate>)| {
            let authz = Arc::clone(&authz);
            async move {
                let template =
                    template.ok_or_else(|| AppError::NotFound(format!("project {name}")))?;
                let role_id = role_ids.first().copied().unwrap_or(ROLE_USER_ID);
                let uuids = authz.resolve_permissions(role_id, &name).await?;
                let role = ProjectRole::for_role_id(role_id);
                let uuids = if role == ProjectRole::Owner { Vec::new() } else { uuids };
                Ok(Some(ProjectListing::new(template, role, uuids, true)))
            }
        },
    )
    .await?;

    // Projects open to all users.
    let candidates: Vec<ProductTemplate> = remaining.values().cloned().collect();
    let authz = Arc::clone(&ctx.authz);
    let open = fan_out(candidates, limit, move |template: ProductTemplate| {
        let authz = Arc::clone(&authz);
        async move {
            let role = match authz.list_roles_for_project(&template.product_name).await {
                Ok(Some(role)) => role,
                Ok(None) => return Ok(None),
                Err(e) => {
                    tracing::warn!(
                        product = %template.product_name,
                        error = %e,
                        "Failed to look up all-users role"
                    );
                    return Ok(None);
                }
            };
            let uuids = authz
                .resolve_permissions(role.id, &template.product_name)
                .await?;
            Ok(Some(ProjectListing::new(template, ProjectRole::User, uuids, true)))
        }
    })
    .await?;
    for listing in &open {
        remaining.remove(listing.product_name());
    }
    listings.extend(open);

    // Everything else, under the base role.
    let rest: Vec<ProductTemplate> = remaining.into_values().collect();
    let authz = Arc::clone(&ctx.authz);
    let defaulted = fan_out(rest, limit, move |template: ProductTemplate| {
        let authz = Arc::clone(&authz);
        async move {
            let uuids = authz.resolve_permissions(ROLE_USER_ID, "").await?;
            Ok(Some(ProjectListing::new(template, ProjectRole::User, uuids, false)))
        }
    })
    .await?;
    listings.extend(defaulted);

    Ok(listings)
}

pub async fn list_open_source(ctx: &ProjectContext) -> Result<Vec<ProductTemplate>, AppError> {
    ctx.products.list_open_source().await
}

/// Render variables must have unique non-empty keys and only name services
/// the project knows about.
pub fn validate_kvs(kvs: &[RenderKv], services: &[ServiceInfo]) -> Result<(), AppError> {
    let known: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
    let mut keys = HashSet::new();
    for kv in kvs {
        if kv.key.trim().is_empty() {
            return Err(AppError::Validation("render key can not be empty".to_string()));
        }
        if !keys.insert(kv.key.as_str()) {
            return Err(AppError::Validation(format!("duplicated render key: {}", kv.key)));
        }
        if let Some(unknown) = kv.services.iter().find(|s| !known.contains(s.as_str())) {
            return Err(AppError::Validation(format!(
                "render key {} references unknown service {unknown}",
                kv.key
            )));
        }
    }
    Ok(())
}

/// Superusers and owners of `product_name` may change its template.
pub async fn ensure_project_owner(
    ctx: &ProjectContext,
    user_id: i64,
    super_user: bool,
    product_name: &str,
) -> Result<(), AppError> {
    if super_user {
        return Ok(());
    }
    let assignments = ctx.authz.get_user_projects(user_id).await?;
    let owner = assignments
        .get(product_name)
        .is_some_and(|roles| roles.contains(&ROLE_OWNER_ID));
    if owner {
        Ok(())
    } else {
        tracing::warn!(user_id, product = %product_name, "Rejected change by non-owner");
        Err(AppError::Forbidden(format!(
            "only owners of project {product_name} may change it"
        )))
    }
}

/// Check a template before it is written and assign its next revision.
pub async fn ensure_product_tmpl(
    ctx: &ProjectContext,
    args: &mut ProductTemplate,
) -> Result<(), AppError> {
    if args.product_name.is_empty() {
        return Err(AppError::Validation("empty product name".to_string()));
    }
    let name_pattern = Regex::new(PRODUCT_NAME_PATTERN)
        .map_err(|e| AppError::Internal(format!("Invalid builtin regex: {e}")))?;
    if !name_pattern.is_match(&args.product_name) {
        return Err(AppError::Validation(format!(
            "product name must match {PRODUCT_NAME_PATTERN}"
        )));
    }

    let mut seen = HashSet::new();
    for name in args.services.iter().flatten() {
        if !seen.insert(name.as_str()) {
            return Err(AppError::Validation(format!("duplicated service found: {name}")));
        }
    }

    // Revision 0 means a new project; only edits can add shared services.
    if args.revision != 0 {
        let current = ctx.products.find(&args.product_name).await?;
        let already: HashSet<&str> = current
            .shared_services
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        let added: Vec<ServiceInfo> = args
            .shared_services
            .iter()
            .filter(|s| !already.contains(s.name.as_str()))
            .cloned()
            .collect();

        if !added.is_empty() {
            let public = ctx
                .services
                .list_current_for(&added)
                .await?
                .into_iter()
                .filter(|s| s.visibility == Visibility::Public)
                .count();
            if public != added.len() {
                return Err(AppError::Validation(
                    "newly added shared services do not exist or are no longer public".to_string(),
                ));
            }
        }
    }

    args.revision = ctx
        .counters
        .next_seq(&product_counter_key(&args.product_name))
        .await
        .map_err(|e| {
            AppError::Sequence(format!("get next product template revision error: {e}"))
        })?;
    Ok(())
}

pub async fn create_product_template(
    ctx: &ProjectContext,
    mut args: ProductTemplate,
) -> Result<ProductTemplate, AppError> {
    let kvs = std::mem::take(&mut args.vars);
    validate_kvs(&kvs, &args.all_service_infos())?;
    ensure_product_tmpl(ctx, &mut args).await?;
    args.update_time = Some(Utc::now());

    ctx.products.create(&args).await?;

    ctx.render_sets
        .upsert(&RenderSet {
            name: args.product_name.clone(),
            product_tmpl: args.product_name.clone(),
            env_name: None,
            update_by: args.update_by.clone(),
            is_default: true,
            kvs: kvs.clone(),
        })
        .await?;

    tracing::info!(product = %args.product_name, revision = args.revision, "Project created");
    args.vars = kvs;
    Ok(args)
}

/// Replace a template. Render set failures after the write are logged only.
pub async fn update_product_template(
    ctx: &ProjectContext,
    product_name: &str,
    mut args: ProductTemplate,
) -> Result<(), AppError> {
    align_name(product_name, &mut args)?;
    let kvs = std::mem::take(&mut args.vars);
    if let Err(e) = validate_kvs(&kvs, &args.all_service_infos()) {
        tracing::warn!(product = %product_name, error = %e, "Render variables failed validation");
    }

    ensure_product_tmpl(ctx, &mut args).await?;
    args.update_time = Some(Utc::now());
    ctx.products.update(product_name, &args).await?;
    tracing::info!(product = %product_name, revision = args.revision, "Project updated");

    if args.is_helm() {
        return Ok(());
    }

    let default_set = RenderSet {
        name: args.product_name.clone(),
        product_tmpl: args.product_name.clone(),
        env_name: None,
        update_by: args.update_by.clone(),
        is_default: true,
        kvs: kvs.clone(),
    };
    if let Err(e) = ctx.render_sets.upsert(&default_set).await {
        tracing::warn!(product = %product_name, error = %e, "Failed to save default render set");
    }

    for env in &args.env_vars {
        let env_set = RenderSet {
            env_name: Some(env.env_name.clone()),
            is_default: false,
            kvs: env.vars.clone(),
            ..default_set.clone()
        };
        if let Err(e) = ctx.render_sets.upsert(&env_set).await {
            tracing::warn!(
                product = %product_name,
                env = %env.env_name,
                error = %e,
                "Failed to save environment render set"
            );
        }
    }

    if let Err(e) = update_sub_render_sets(ctx, product_name, &kvs).await {
        tracing::warn!(product = %product_name, error = %e, "Failed to update sub render sets");
    }
    Ok(())
}

/// Reconcile environment render sets with the default keys: keys keep the
/// environment's value when it has one, new keys take the default, and keys
/// gone from the default are dropped.
pub async fn update_sub_render_sets(
    ctx: &ProjectContext,
    product_name: &str,
    defaults: &[RenderKv],
) -> Result<(), AppError> {
    for mut set in ctx.render_sets.list_by_product(product_name).await? {
        if set.is_default {
            continue;
        }
        let current: HashMap<&str, &RenderKv> =
            set.kvs.iter().map(|kv| (kv.key.as_str(), kv)).collect();
        let merged: Vec<RenderKv> = defaults
            .iter()
            .map(|kv| RenderKv {
                value: current
                    .get(kv.key.as_str())
                    .map_or_else(|| kv.value.clone(), |own| own.value.clone()),
                ..kv.clone()
            })
            .collect();
        set.kvs = merged;
        ctx.render_sets.upsert(&set).await?;
    }
    Ok(())
}

pub async fn update_onboarding_status(
    ctx: &ProjectContext,
    product_name: &str,
    status: &str,
) -> Result<(), AppError> {
    let status: i32 = status
        .trim()
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid onboarding status '{status}'")))?;
    ctx.products
        .update_onboarding_status(product_name, status)
        .await
}

pub async fn update_service_order(
    ctx: &ProjectContext,
    user_name: &str,
    product_name: &str,
    services: &[Vec<String>],
) -> Result<(), AppError> {
    ctx.products
        .update_service_order(product_name, services, user_name)
        .await
        .map_err(|e| {
            tracing::error!(product = %product_name, error = %e, "Failed to update service order");
            e
        })
}

/// Update project settings: naming rules, team membership, template fields.
pub async fn update_project(
    ctx: &ProjectContext,
    product_name: &str,
    mut args: ProductTemplate,
) -> Result<(), AppError> {
    validate_rules(args.custom_image_rule.as_ref(), args.custom_tar_rule.as_ref())?;
    align_name(product_name, &mut args)?;

    ctx.authz
        .add_product_team(&args.product_name, args.team_id, &args.user_ids)
        .await?;

    args.vars.clear();
    args.update_time = Some(Utc::now());
    ctx.products.update(product_name, &args).await?;
    tracing::info!(product = %product_name, "Project settings updated");
    Ok(())
}

fn align_name(product_name: &str, args: &mut ProductTemplate) -> Result<(), AppError> {
    if args.product_name.is_empty() {
        args.product_name = product_name.to_string();
    } else if args.product_name != product_name {
        return Err(AppError::Validation(format!(
            "project name {} does not match {product_name}",
            args.product_name
        )));
    }
    Ok(())
}

/// Project → service → container tree visible to the user.
pub async fn list_templates_hierarchy(
    ctx: &ProjectContext,
    user_name: &str,
    user_id: i64,
    super_user: bool,
) -> Result<Vec<ProjectNode>, AppError> {
    let templates = if super_user {
        ctx.products.list().await?
    } else {
        let mut names: Vec<String> = ctx
            .authz
            .get_user_projects(user_id)
            .await?
            .into_keys()
            .collect();
        names.sort();
        let mut templates = Vec::with_capacity(names.len());
        for name in names {
            templates.push(ctx.products.find(&name).await?);
        }
        templates
    };

    let mut nodes = Vec::with_capacity(templates.len());
    for template in templates {
        let services = ctx
            .services
            .list_current_for(&template.all_service_infos())
            .await
            .map_err(|e| {
                tracing::error!(
                    user = %user_name,
                    product = %template.product_name,
                    error = %e,
                    "Failed to list project services"
                );
                e
            })?;

        nodes.push(ProjectNode {
            value: template.product_name.clone(),
            label: template.product_name,
            services: services
                .into_iter()
                .map(|svc| ServiceNode {
                    containers: svc
                        .containers
                        .iter()
                        .map(|c| ContainerNode::named(&c.name))
                        .collect(),
                    value: svc.service_name.clone(),
                    label: svc.service_name,
                })
                .collect(),
        });
    }
    Ok(nodes)
}

/// Saved match rules of a project, or the preset rules when it has none.
pub async fn get_custom_match_rules(
    ctx: &ProjectContext,
    product_name: &str,
) -> Result<Vec<MatchRule>, AppError> {
    let template = ctx.products.find(product_name).await?;
    if template.image_searching_rules.is_empty() {
        return Ok(preset_rules());
    }
    Ok(template.image_searching_rules)
}

/// Replace a project's match rules, reparsing its Helm services first.
///
/// Services are only advanced when every one of them reparses; otherwise all
/// new revisions are rolled back and the rules are left as they were. Saving
/// the rule set afterwards can still fail, reported as `RuleSetNotSaved`.
pub async fn update_custom_match_rules(
    ctx: &ProjectContext,
    product_name: &str,
    user_name: &str,
    rules: Vec<MatchRule>,
) -> Result<Vec<MatchRule>, AppError> {
    // Blank rules are never stored, so they can't satisfy the checks below.
    let to_save: Vec<MatchRule> = rules.into_iter().filter(|r| !r.is_blank()).collect();
    if to_save.is_empty() {
        return Err(AppError::Validation("match rules can't be empty".to_string()));
    }
    if !to_save.iter().any(|r| r.in_use) {
        return Err(AppError::Validation("no rule is selected to be used".to_string()));
    }
    check_rules(&to_save)?;

    let mut template = ctx.products.find(product_name).await?;

    let records = ctx.services.list_current_by_product(product_name).await?;
    let stores = ReparseStores {
        counters: ctx.counters.as_ref(),
        services: ctx.services.as_ref(),
    };
    reparse_services(
        &stores,
        ctx.payload_parser.as_ref(),
        user_name,
        records,
        &to_save,
    )
    .await?;

    template.image_searching_rules = to_save.clone();
    template.update_by = user_name.to_string();
    template.update_time = Some(Utc::now());
    ctx.products
        .update(product_name, &template)
        .await
        .map_err(|e| {
            tracing::error!(product = %product_name, error = %e, "Failed to store match rules");
            AppError::RuleSetNotSaved(format!("failed to store match rules: {e}"))
        })?;

    tracing::info!(product = %product_name, rules = to_save.len(), "Match rules updated");
    Ok(to_save)
}

/// Delete a project and queue the purge of its remaining data.
///
/// Refused while another project still shares one of its public services.
pub async fn delete_product_template(
    ctx: &ProjectContext,
    user_name: &str,
    product_name: &str,
    request_id: &str,
) -> Result<Uuid, AppError> {
    ctx.products.find(product_name).await?;

    let public: HashSet<String> = ctx
        .services
        .list_public_by_product(product_name)
        .await?
        .into_iter()
        .map(|s| s.service_name)
        .collect();
    if !public.is_empty() {
        let others = ctx.products.list().await?;
        let mut involved: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for other in others.iter().filter(|p| p.product_name != product_name) {
            for shared in &other.shared_services {
                if shared.owner == product_name && public.contains(&shared.name) {
                    involved
                        .entry(shared.name.as_str())
                        .or_default()
                        .push(other.product_name.clone());
                }
            }
        }
        let first = involved.into_iter().next();
        if let Some((service, projects)) = first {
            return Err(AppError::Conflict(format!(
                "shared service {service} is referenced by projects {projects:?}, remove the references first"
            )));
        }
    }

    ctx.authz.delete_product_team(product_name).await?;

    for env in ctx.environments.list_by_product(product_name).await? {
        ctx.environments
            .update_status(&env.env_name, product_name, ENV_STATUS_DELETING)
            .await?;
    }

    ctx.render_sets.delete_by_product(product_name).await?;
    ctx.workflows
        .delete_test_modules(product_name, request_id)
        .await?;
    ctx.workflows
        .delete_workflows(product_name, request_id)
        .await?;
    ctx.workflows
        .delete_pipelines(product_name, request_id)
        .await?;

    if ctx.settings.freestyle_pipelines_enabled {
        if let Err(e) = ctx.workflows.delete_freestyle_pipelines(product_name).await {
            tracing::warn!(product = %product_name, error = %e, "Failed to delete freestyle pipelines");
        }
    }

    ctx.products.delete(product_name).await?;
    ctx.counters
        .delete(&product_counter_key(product_name))
        .await?;

    let job_id = ctx
        .cleanup
        .submit(CleanupRequest {
            product_name: product_name.to_string(),
            user_name: user_name.to_string(),
            request_id: request_id.to_string(),
        })
        .await?;

    tracing::info!(product = %product_name, user = %user_name, job_id = %job_id, "Project deleted");
    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::clients::authz::AuthorizationClient;
    use crate::clients::workflow::WorkflowClient;
    use crate::context::ProjectSettings;
    use crate::models::environment::Environment;
    use crate::models::job::JobStatus;
    use crate::models::role::Role;
    use crate::models::service::{DeployType, HelmChart, ServiceRecord};
    use crate::store::memory::MemoryStore;
    use crate::store::{EnvironmentStore, ProductStore, RenderSetStore, ServiceStore};

    #[derive(Default)]
    struct FakeAuthz {
        assignments: HashMap<String, Vec<i64>>,
        all_users: HashMap<String, Role>,
        fail_permissions_for: Option<String>,
        calls: AtomicUsize,
        teams: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuthorizationClient for FakeAuthz {
        async fn get_user_projects(
            &self,
            _user_id: i64,
        ) -> Result<HashMap<String, Vec<i64>>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.assignments.clone())
        }

        async fn resolve_permissions(
            &self,
            role_id: i64,
            project_name: &str,
        ) -> Result<Vec<String>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_permissions_for.as_deref() == Some(project_name) {
                return Err(AppError::ServiceUnavailable(format!(
                    "permissions for {project_name}"
                )));
            }
            Ok(vec![format!("perm-{role_id}")])
        }

        async fn list_roles_for_project(
            &self,
            project_name: &str,
        ) -> Result<Option<Role>, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.all_users.get(project_name).cloned())
        }

        async fn add_product_team(
            &self,
            project_name: &str,
            _team_id: Option<i64>,
            _user_ids: &[i64],
        ) -> Result<(), AppError> {
            self.teams.lock().unwrap().push(format!("add:{project_name}"));
            Ok(())
        }

        async fn delete_product_team(&self, project_name: &str) -> Result<(), AppError> {
            self.teams.lock().unwrap().push(format!("delete:{project_name}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeWorkflows {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WorkflowClient for FakeWorkflows {
        async fn delete_test_modules(&self, product: &str, _: &str) -> Result<(), AppError> {
            self.deleted.lock().unwrap().push(format!("tests:{product}"));
            Ok(())
        }

        async fn delete_workflows(&self, product: &str, _: &str) -> Result<(), AppError> {
            self.deleted.lock().unwrap().push(format!("workflows:{product}"));
            Ok(())
        }

        async fn delete_pipelines(&self, product: &str, _: &str) -> Result<(), AppError> {
            self.deleted.lock().unwrap().push(format!("pipelines:{product}"));
            Ok(())
        }

        async fn delete_freestyle_pipelines(&self, product: &str) -> Result<(), AppError> {
            self.deleted.lock().unwrap().push(format!("freestyle:{product}"));
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        authz: Arc<FakeAuthz>,
        workflows: Arc<FakeWorkflows>,
        ctx: ProjectContext,
    }

    fn harness(authz: FakeAuthz) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let authz = Arc::new(authz);
        let workflows = Arc::new(FakeWorkflows::default());
        let ctx = ProjectContext::new(
            store.clone(),
            authz.clone(),
            workflows.clone(),
            ProjectSettings::default(),
        );
        Harness {
            store,
            authz,
            workflows,
            ctx,
        }
    }

    fn project(name: &str) -> ProductTemplate {
        ProductTemplate {
            product_name: name.to_string(),
            project_name: name.to_uppercase(),
            services: vec![vec!["api".to_string()]],
            ..Default::default()
        }
    }

    fn helm_service(product: &str, name: &str, revision: i64, values: &str) -> ServiceRecord {
        ServiceRecord {
            service_name: name.to_string(),
            product_name: product.to_string(),
            deploy_type: DeployType::Helm,
            revision,
            visibility: Visibility::Private,
            status: None,
            helm_chart: Some(HelmChart {
                name: name.to_string(),
                values_yaml: values.to_string(),
                ..Default::default()
            }),
            containers: Vec::new(),
            create_by: "seed".to_string(),
            create_time: Utc::now(),
        }
    }

    fn seed_projects(store: &MemoryStore, names: &[&str]) {
        for name in names {
            store.insert_product(project(name));
        }
    }

    #[tokio::test]
    async fn superuser_sees_every_project_as_admin_without_authz_calls() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["beta", "alpha", "gamma"]);

        let listings = list_product_templates(&h.ctx, 1, true).await.unwrap();

        assert_eq!(h.authz.calls.load(Ordering::SeqCst), 0);
        let names: Vec<&str> = listings.iter().map(|l| l.product_name()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert!(listings.iter().all(|l| l.role == ProjectRole::Admin
            && l.show_project
            && l.permission_uuids.is_empty()));
    }

    #[tokio::test]
    async fn user_without_associations_sees_hidden_base_role_projects() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["alpha", "beta"]);

        let listings = list_product_templates(&h.ctx, 9, false).await.unwrap();

        assert_eq!(listings.len(), 2);
        for listing in &listings {
            assert_eq!(listing.role, ProjectRole::User);
            assert!(!listing.show_project);
            assert_eq!(listing.permission_uuids, vec![format!("perm-{ROLE_USER_ID}")]);
        }
    }

    #[tokio::test]
    async fn three_passes_partition_the_projects() {
        let mut authz = FakeAuthz::default();
        authz.assignments.insert("owned".to_string(), vec![ROLE_OWNER_ID]);
        authz.assignments.insert("member".to_string(), vec![7]);
        authz.all_users.insert(
            "open".to_string(),
            Role {
                id: 11,
                name: "all-users".to_string(),
                project_name: "open".to_string(),
            },
        );
        let h = harness(authz);
        seed_projects(&h.store, &["owned", "member", "open", "closed"]);

        let listings = list_product_templates(&h.ctx, 9, false).await.unwrap();
        let by_name: HashMap<&str, &ProjectListing> =
            listings.iter().map(|l| (l.product_name(), l)).collect();

        assert_eq!(listings.len(), 4);
        assert_eq!(by_name["owned"].role, ProjectRole::Owner);
        assert!(by_name["owned"].permission_uuids.is_empty());
        assert_eq!(by_name["member"].role, ProjectRole::User);
        assert_eq!(by_name["member"].permission_uuids, vec!["perm-7"]);
        assert!(by_name["member"].show_project);
        assert_eq!(by_name["open"].permission_uuids, vec!["perm-11"]);
        assert!(by_name["open"].show_project);
        assert!(!by_name["closed"].show_project);
    }

    #[tokio::test]
    async fn pass_failure_discards_the_listing() {
        let mut authz = FakeAuthz::default();
        authz.assignments.insert("alpha".to_string(), vec![7]);
        authz.assignments.insert("beta".to_string(), vec![7]);
        authz.fail_permissions_for = Some("beta".to_string());
        let h = harness(authz);
        seed_projects(&h.store, &["alpha", "beta"]);

        let err = list_product_templates(&h.ctx, 9, false).await.unwrap_err();
        match err {
            AppError::Aggregate(agg) => {
                assert_eq!(agg.len(), 1);
                assert!(agg.to_string().contains("permissions for beta"));
            }
            other => panic!("expected aggregate error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn listing_counts_services_and_environments() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["alpha"]);
        h.store.insert_service(helm_service("alpha", "api", 1, ""));
        h.store.insert_service(helm_service("alpha", "web", 1, ""));
        h.store.insert_environment(Environment {
            product_name: "alpha".to_string(),
            env_name: "dev".to_string(),
            status: String::new(),
        });

        let listings = list_product_templates(&h.ctx, 1, true).await.unwrap();
        assert_eq!(listings[0].total_service_num, 2);
        assert_eq!(listings[0].total_env_num, 1);
    }

    #[tokio::test]
    async fn create_assigns_revision_and_keeps_vars_in_render_set() {
        let h = harness(FakeAuthz::default());
        let mut args = project("shop");
        args.vars = vec![RenderKv {
            key: "replicas".to_string(),
            value: "2".to_string(),
            services: vec!["api".to_string()],
        }];

        let created = create_product_template(&h.ctx, args).await.unwrap();
        assert_eq!(created.revision, 1);

        let stored = h.store.find("shop").await.unwrap();
        assert!(stored.vars.is_empty());
        let set = h.store.find_default("shop").await.unwrap().unwrap();
        assert_eq!(set.kvs[0].key, "replicas");

        let fetched = get_product_template_services(&h.ctx, "shop").await.unwrap();
        assert_eq!(fetched.vars.len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_bad_names_and_duplicate_services() {
        let h = harness(FakeAuthz::default());

        let err = create_product_template(&h.ctx, project("Shop_1")).await.unwrap_err();
        assert!(err.is_validation());

        let mut dup = project("shop");
        dup.services = vec![vec!["api".to_string()], vec!["api".to_string()]];
        let err = create_product_template(&h.ctx, dup).await.unwrap_err();
        assert!(err.to_string().contains("duplicated service found: api"));

        let mut bad_kv = project("shop");
        bad_kv.vars = vec![RenderKv {
            key: "x".to_string(),
            value: String::new(),
            services: vec!["ghost".to_string()],
        }];
        assert!(create_product_template(&h.ctx, bad_kv).await.unwrap_err().is_validation());
        assert!(h.store.find("shop").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn update_rejects_shared_services_that_are_not_public() {
        let h = harness(FakeAuthz::default());
        create_product_template(&h.ctx, project("shop")).await.unwrap();

        let mut args = project("shop");
        args.revision = 1;
        args.shared_services = vec![ServiceInfo {
            name: "mysql".to_string(),
            owner: "platform".to_string(),
        }];
        let err = update_product_template(&h.ctx, "shop", args.clone())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let mut shared = helm_service("platform", "mysql", 1, "");
        shared.visibility = Visibility::Public;
        h.store.insert_service(shared);
        update_product_template(&h.ctx, "shop", args).await.unwrap();
        assert_eq!(h.store.find("shop").await.unwrap().revision, 2);
    }

    #[tokio::test]
    async fn update_propagates_default_keys_to_environment_sets() {
        let h = harness(FakeAuthz::default());
        create_product_template(&h.ctx, project("shop")).await.unwrap();
        h.store
            .upsert(&RenderSet {
                name: "shop".to_string(),
                product_tmpl: "shop".to_string(),
                env_name: Some("dev".to_string()),
                kvs: vec![
                    RenderKv {
                        key: "replicas".to_string(),
                        value: "5".to_string(),
                        services: vec![],
                    },
                    RenderKv {
                        key: "stale".to_string(),
                        value: "x".to_string(),
                        services: vec![],
                    },
                ],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut args = project("shop");
        args.revision = 1;
        args.vars = vec![
            RenderKv {
                key: "replicas".to_string(),
                value: "1".to_string(),
                services: vec![],
            },
            RenderKv {
                key: "debug".to_string(),
                value: "false".to_string(),
                services: vec![],
            },
        ];
        update_product_template(&h.ctx, "shop", args).await.unwrap();

        let sets = RenderSetStore::list_by_product(h.store.as_ref(), "shop").await.unwrap();
        let dev = sets
            .iter()
            .find(|s| s.env_name.as_deref() == Some("dev"))
            .unwrap();
        let kvs: Vec<(&str, &str)> = dev
            .kvs
            .iter()
            .map(|kv| (kv.key.as_str(), kv.value.as_str()))
            .collect();
        assert_eq!(kvs, vec![("replicas", "5"), ("debug", "false")]);
    }

    #[tokio::test]
    async fn onboarding_status_must_be_numeric() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["shop"]);

        assert!(update_onboarding_status(&h.ctx, "shop", "two")
            .await
            .unwrap_err()
            .is_validation());
        update_onboarding_status(&h.ctx, "shop", "2").await.unwrap();
        assert_eq!(h.store.find("shop").await.unwrap().onboarding_status, 2);
    }

    #[tokio::test]
    async fn update_project_validates_rules_before_touching_the_team() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["shop"]);

        let mut args = project("shop");
        args.custom_image_rule = Some(crate::models::product::CustomRule {
            pr_rule: "myrepo-app".to_string(),
            branch_rule: "app:v1".to_string(),
            tag_rule: "app:v1".to_string(),
            jenkins_rule: "app:v1".to_string(),
        });
        assert!(update_project(&h.ctx, "shop", args.clone()).await.unwrap_err().is_validation());
        assert!(h.authz.teams.lock().unwrap().is_empty());

        args.custom_image_rule.as_mut().unwrap().pr_rule = "myrepo-app:1.0".to_string();
        args.description = "storefront".to_string();
        update_project(&h.ctx, "shop", args).await.unwrap();
        assert_eq!(*h.authz.teams.lock().unwrap(), vec!["add:shop".to_string()]);
        assert_eq!(h.store.find("shop").await.unwrap().description, "storefront");
    }

    #[tokio::test]
    async fn match_rules_default_to_presets() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["shop"]);
        assert_eq!(get_custom_match_rules(&h.ctx, "shop").await.unwrap(), preset_rules());
        assert!(get_custom_match_rules(&h.ctx, "ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn match_rule_preconditions_have_no_side_effects() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["shop"]);
        h.store.insert_service(helm_service("shop", "api", 1, "image: shop/api:1\n"));

        let err = update_custom_match_rules(&h.ctx, "shop", "bob", vec![]).await.unwrap_err();
        assert!(err.is_validation());

        let mut idle = preset_rules();
        idle.iter_mut().for_each(|r| r.in_use = false);
        let err = update_custom_match_rules(&h.ctx, "shop", "bob", idle).await.unwrap_err();
        assert!(err.is_validation());

        // Preconditions come before the project lookup.
        let err = update_custom_match_rules(&h.ctx, "ghost", "bob", vec![]).await.unwrap_err();
        assert!(err.is_validation());

        assert_eq!(h.store.all_services().len(), 1);
        assert!(h.store.find("shop").await.unwrap().image_searching_rules.is_empty());
    }

    #[tokio::test]
    async fn only_owners_and_superusers_may_change_a_project() {
        let mut authz = FakeAuthz::default();
        authz.assignments.insert("shop".to_string(), vec![ROLE_OWNER_ID]);
        authz.assignments.insert("blog".to_string(), vec![7]);
        let h = harness(authz);

        assert!(ensure_project_owner(&h.ctx, 9, false, "shop").await.is_ok());
        let err = ensure_project_owner(&h.ctx, 9, false, "blog").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        let err = ensure_project_owner(&h.ctx, 9, false, "other").await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let calls = h.authz.calls.load(Ordering::SeqCst);
        assert!(ensure_project_owner(&h.ctx, 1, true, "other").await.is_ok());
        assert_eq!(h.authz.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn blank_active_rule_does_not_count_as_selected() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["shop"]);
        h.store.insert_service(helm_service("shop", "api", 1, "image: shop/api:1\n"));
        h.store.set_counter("service:api:shop", 1);

        let saved = update_custom_match_rules(&h.ctx, "shop", "bob", preset_rules())
            .await
            .unwrap();
        assert_eq!(saved, preset_rules());

        let mut rules = preset_rules();
        rules.iter_mut().for_each(|r| r.in_use = false);
        rules.push(MatchRule {
            in_use: true,
            ..Default::default()
        });
        let err = update_custom_match_rules(&h.ctx, "shop", "bob", rules).await.unwrap_err();
        assert!(err.is_validation());

        let current = ServiceStore::list_current_by_product(h.store.as_ref(), "shop")
            .await
            .unwrap();
        assert_eq!(current[0].revision, 2);
        assert_eq!(current[0].containers[0].image, "shop/api:1");
        assert_eq!(h.store.find("shop").await.unwrap().image_searching_rules, preset_rules());
    }

    #[tokio::test]
    async fn match_rule_update_reparses_and_saves() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["shop"]);
        h.store.insert_service(helm_service(
            "shop",
            "api",
            1,
            "deploy:\n  img: shop/api\n  version: v9\n",
        ));
        h.store.set_counter("service:api:shop", 1);

        let mut rules = vec![MatchRule {
            image: "$*.img".to_string(),
            tag: "$*.version".to_string(),
            in_use: true,
            ..Default::default()
        }];
        rules.push(MatchRule::default());

        let saved = update_custom_match_rules(&h.ctx, "shop", "bob", rules).await.unwrap();
        assert_eq!(saved.len(), 1);

        let current = ServiceStore::list_current_by_product(h.store.as_ref(), "shop")
            .await
            .unwrap();
        assert_eq!(current[0].revision, 2);
        assert_eq!(current[0].containers[0].image, "shop/api:v9");
        assert_eq!(current[0].create_by, "bob");

        let stored = h.store.find("shop").await.unwrap();
        assert_eq!(stored.image_searching_rules, saved);
        assert_eq!(stored.update_by, "bob");
    }

    #[tokio::test]
    async fn failed_reparse_leaves_rules_and_revisions_untouched() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["shop"]);
        for (name, values) in [
            ("a-api", "image: shop/api:1\n"),
            ("b-broken", "image: [unterminated\n"),
            ("c-web", "image: shop/web:1\n"),
        ] {
            h.store.insert_service(helm_service("shop", name, 1, values));
            h.store.set_counter(&format!("service:{name}:shop"), 1);
        }

        let err = update_custom_match_rules(&h.ctx, "shop", "bob", preset_rules())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(_)));

        let current = ServiceStore::list_current_by_product(h.store.as_ref(), "shop")
            .await
            .unwrap();
        assert!(current.iter().all(|s| s.revision == 1));
        assert_eq!(h.store.all_services().len(), 3);
        assert!(h.store.find("shop").await.unwrap().image_searching_rules.is_empty());
    }

    #[tokio::test]
    async fn hierarchy_lists_containers_of_current_revisions() {
        let mut authz = FakeAuthz::default();
        authz.assignments.insert("shop".to_string(), vec![7]);
        let h = harness(authz);
        seed_projects(&h.store, &["shop", "other"]);
        let mut api = helm_service("shop", "api", 1, "");
        api.containers = vec![crate::models::service::Container {
            name: "api".to_string(),
            image: "shop/api:1".to_string(),
            image_path: Default::default(),
        }];
        h.store.insert_service(api);

        let nodes = list_templates_hierarchy(&h.ctx, "bob", 9, false).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].value, "shop");
        assert_eq!(nodes[0].services[0].containers, vec![ContainerNode::named("api")]);

        let all = list_templates_hierarchy(&h.ctx, "root", 1, true).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_refused_while_a_shared_service_is_referenced() {
        let h = harness(FakeAuthz::default());
        seed_projects(&h.store, &["platform"]);
        let mut consumer = project("shop");
        consumer.shared_services = vec![ServiceInfo {
            name: "mysql".to_string(),
            owner: "platform".to_string(),
        }];
        h.store.insert_product(consumer);
        let mut mysql = helm_service("platform", "mysql", 1, "");
        mysql.visibility = Visibility::Public;
        h.store.insert_service(mysql);

        let err = delete_product_template(&h.ctx, "bob", "platform", "req-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(h.store.find("platform").await.is_ok());
        assert!(h.authz.teams.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_and_queues_cleanup() {
        let h = harness(FakeAuthz::default());
        create_product_template(&h.ctx, project("shop")).await.unwrap();
        h.store.insert_service(helm_service("shop", "api", 1, ""));
        h.store.insert_environment(Environment {
            product_name: "shop".to_string(),
            env_name: "dev".to_string(),
            status: String::new(),
        });

        let job_id = delete_product_template(&h.ctx, "bob", "shop", "req-1").await.unwrap();

        assert!(h.store.find("shop").await.unwrap_err().is_not_found());
        assert_eq!(h.store.counter_value("product:shop"), None);
        assert!(h.store.find_default("shop").await.unwrap().is_none());
        assert_eq!(
            *h.workflows.deleted.lock().unwrap(),
            vec!["tests:shop", "workflows:shop", "pipelines:shop"]
        );
        assert_eq!(*h.authz.teams.lock().unwrap(), vec!["delete:shop".to_string()]);

        let job = h.ctx.cleanup.wait(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(h.store.all_services().is_empty());
        assert_eq!(EnvironmentStore::count(h.store.as_ref(), "shop").await.unwrap(), 0);
    }
}
