//! Project template model, its match rules, and the derived listing views.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::role::ProjectRole;
use crate::models::service::DeployType;

/// A service referenced by a project, owned by `owner` (the defining project).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ServiceInfo {
    pub name: String,
    pub owner: String,
}

/// A render variable and the services it applies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderKv {
    pub key: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub services: Vec<String>,
}

/// Render variables scoped to one environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnvRenderKvs {
    pub env_name: String,
    #[serde(default)]
    pub vars: Vec<RenderKv>,
}

/// Naming rules used when building images or tarballs for a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomRule {
    #[serde(default)]
    pub pr_rule: String,
    #[serde(default)]
    pub branch_rule: String,
    #[serde(default)]
    pub tag_rule: String,
    #[serde(default)]
    pub jenkins_rule: String,
}

impl CustomRule {
    /// Every rule field with its name, in declaration order.
    pub fn fields(&self) -> [(&'static str, &str); 4] {
        [
            ("pr_rule", self.pr_rule.as_str()),
            ("branch_rule", self.branch_rule.as_str()),
            ("tag_rule", self.tag_rule.as_str()),
            ("jenkins_rule", self.jenkins_rule.as_str()),
        ]
    }
}

/// Image searching rule: path patterns into a Helm values document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRule {
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub in_use: bool,
    #[serde(default)]
    pub preset_id: i32,
}

impl MatchRule {
    pub fn is_blank(&self) -> bool {
        self.repo.is_empty() && self.image.is_empty() && self.tag.is_empty()
    }
}

/// A project template as stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProductTemplate {
    pub product_name: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default)]
    pub user_ids: Vec<i64>,
    #[serde(default)]
    pub services: Vec<Vec<String>>,
    #[serde(default)]
    pub shared_services: Vec<ServiceInfo>,
    /// Default render variables. Kept in the default render set, not on the template row.
    #[serde(default)]
    pub vars: Vec<RenderKv>,
    #[serde(default)]
    pub env_vars: Vec<EnvRenderKvs>,
    #[serde(default)]
    pub deploy_type: DeployType,
    #[serde(default)]
    pub is_opensource: bool,
    #[serde(default)]
    pub onboarding_status: i32,
    #[serde(default)]
    pub custom_image_rule: Option<CustomRule>,
    #[serde(default)]
    pub custom_tar_rule: Option<CustomRule>,
    #[serde(default)]
    pub image_searching_rules: Vec<MatchRule>,
    #[serde(default)]
    pub update_by: String,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

impl ProductTemplate {
    /// Own services (owned by this project) followed by shared services.
    pub fn all_service_infos(&self) -> Vec<ServiceInfo> {
        let shared: HashSet<&str> = self
            .shared_services
            .iter()
            .map(|s| s.name.as_str())
            .collect();

        let mut infos: Vec<ServiceInfo> = self
            .services
            .iter()
            .flatten()
            .filter(|name| !shared.contains(name.as_str()))
            .map(|name| ServiceInfo {
                name: name.clone(),
                owner: self.product_name.clone(),
            })
            .collect();
        infos.extend(self.shared_services.iter().cloned());
        infos
    }

    /// Names of every service listed across the ordered service groups.
    pub fn service_names(&self) -> HashSet<&str> {
        self.services.iter().flatten().map(String::as_str).collect()
    }

    pub fn is_helm(&self) -> bool {
        self.deploy_type == DeployType::Helm
    }
}

/// Request body for the service order endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateServiceOrder {
    pub services: Vec<Vec<String>>,
}

/// Request body for the match rule endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMatchRules {
    pub rules: Vec<MatchRule>,
}

/// A template enriched with the caller's effective permissions.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectListing {
    #[serde(flatten)]
    pub template: ProductTemplate,
    pub role: ProjectRole,
    pub permission_uuids: Vec<String>,
    pub show_project: bool,
    pub total_service_num: i64,
    pub total_env_num: i64,
}

impl ProjectListing {
    pub fn new(
        template: ProductTemplate,
        role: ProjectRole,
        permission_uuids: Vec<String>,
        show_project: bool,
    ) -> Self {
        Self {
            template,
            role,
            permission_uuids,
            show_project,
            total_service_num: 0,
            total_env_num: 0,
        }
    }

    pub fn product_name(&self) -> &str {
        &self.template.product_name
    }
}

/// Project → services → containers tree used by selection widgets.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectNode {
    pub value: String,
    pub label: String,
    pub services: Vec<ServiceNode>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceNode {
    pub value: String,
    pub label: String,
    pub containers: Vec<ContainerNode>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ContainerNode {
    pub value: String,
    pub label: String,
}

impl ContainerNode {
    pub fn named(name: &str) -> Self {
        Self {
            value: name.to_string(),
            label: name.to_string(),
        }
    }
}
