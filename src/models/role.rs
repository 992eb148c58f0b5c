//! Project roles as reported by the authorization service.

use serde::{Deserialize, Serialize};

/// Role id of a project owner.
pub const ROLE_OWNER_ID: i64 = 2;

/// Role id of the base project user role.
pub const ROLE_USER_ID: i64 = 3;

/// Effective role shown on a project listing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRole {
    Admin,
    Owner,
    User,
}

impl ProjectRole {
    /// Role for an explicit assignment with the given role id.
    pub fn for_role_id(role_id: i64) -> Self {
        if role_id == ROLE_OWNER_ID {
            Self::Owner
        } else {
            Self::User
        }
    }
}

/// A role defined on a project, e.g. its "all users" role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub project_name: String,
}
