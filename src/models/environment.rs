//! Environments instantiated from a project and the render sets feeding them.

use serde::{Deserialize, Serialize};

use crate::models::product::RenderKv;

/// Status written on an environment whose project is being deleted.
pub const ENV_STATUS_DELETING: &str = "deleting";

/// An environment (deployed instance) of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub product_name: String,
    pub env_name: String,
    #[serde(default)]
    pub status: String,
}

/// A workload statistics entry that references a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkloadRef {
    pub env_name: String,
    pub product_name: String,
    pub workload_name: String,
}

/// A service registered from an externally managed environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalService {
    pub product_name: String,
    pub env_name: String,
    pub service_name: String,
}

/// Variable set rendered into a project's services.
///
/// The default set (`is_default`, no `env_name`) carries the template vars;
/// environment-scoped sets override them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderSet {
    pub name: String,
    pub product_tmpl: String,
    #[serde(default)]
    pub env_name: Option<String>,
    #[serde(default)]
    pub update_by: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub kvs: Vec<RenderKv>,
}
