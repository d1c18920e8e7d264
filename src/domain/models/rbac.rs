//! RBAC domain models: permissions, roles, and users.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Enumerated permission tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "module:read")]
    ModuleRead,
    #[serde(rename = "module:write")]
    ModuleWrite,
    #[serde(rename = "module:delete")]
    ModuleDelete,
    #[serde(rename = "resource:*")]
    ResourceAll,
    #[serde(rename = "system:admin")]
    SystemAdmin,
    #[serde(rename = "user:manage")]
    UserManage,
    #[serde(rename = "role:manage")]
    RoleManage,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "policy:*")]
    PolicyAll,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Self::ModuleRead,
        Self::ModuleWrite,
        Self::ModuleDelete,
        Self::ResourceAll,
        Self::SystemAdmin,
        Self::UserManage,
        Self::RoleManage,
        Self::AuditRead,
        Self::PolicyAll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModuleRead => "module:read",
            Self::ModuleWrite => "module:write",
            Self::ModuleDelete => "module:delete",
            Self::ResourceAll => "resource:*",
            Self::SystemAdmin => "system:admin",
            Self::UserManage => "user:manage",
            Self::RoleManage => "role:manage",
            Self::AuditRead => "audit:read",
            Self::PolicyAll => "policy:*",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown permission: {s}"))
    }
}

/// A named bundle of permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: String,
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// A principal with role assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub email: String,
    pub roles: Vec<String>,
    pub active: bool,
}
