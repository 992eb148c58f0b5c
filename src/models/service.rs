//! Versioned service template records and the containers derived from them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a service is deployed. Only Helm services carry a values payload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    #[default]
    K8s,
    Helm,
    Pm,
    External,
}

impl DeployType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::K8s => "k8s",
            Self::Helm => "helm",
            Self::Pm => "pm",
            Self::External => "external",
        }
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "k8s" => Ok(Self::K8s),
            "helm" => Ok(Self::Helm),
            "pm" => Ok(Self::Pm),
            "external" => Ok(Self::External),
            other => Err(format!("unknown deploy type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(format!("unknown visibility '{other}'")),
        }
    }
}

/// Lifecycle marker on a stored revision. A record without status is live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Deleting,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleting => "deleting",
        }
    }
}

impl FromStr for ServiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deleting" => Ok(Self::Deleting),
            other => Err(format!("unknown service status '{other}'")),
        }
    }
}

/// Helm chart metadata plus the raw `values.yaml` text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HelmChart {
    pub name: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub values_yaml: String,
}

/// Concrete document paths a container's image components were read from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ImagePathSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl ImagePathSpec {
    /// Identity of the path triple, used to deduplicate matches.
    pub fn unique_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.repo.as_deref().unwrap_or_default(),
            self.image.as_deref().unwrap_or_default(),
            self.tag.as_deref().unwrap_or_default()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub image_path: ImagePathSpec,
}

/// One stored revision of a service template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceRecord {
    pub service_name: String,
    pub product_name: String,
    pub deploy_type: DeployType,
    pub revision: i64,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_chart: Option<HelmChart>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub create_by: String,
    pub create_time: DateTime<Utc>,
}

impl ServiceRecord {
    /// Sequence counter key that allocates this service's revisions.
    pub fn counter_key(&self) -> String {
        service_counter_key(&self.service_name, &self.product_name)
    }

    /// The values payload, present only for Helm services that carry a chart.
    pub fn values_payload(&self) -> Option<&str> {
        match (&self.deploy_type, &self.helm_chart) {
            (DeployType::Helm, Some(chart)) => Some(chart.values_yaml.as_str()),
            _ => None,
        }
    }
}

pub fn service_counter_key(service_name: &str, product_name: &str) -> String {
    format!("service:{service_name}:{product_name}")
}
