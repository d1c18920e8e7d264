//! RBAC manager.
//!
//! Roles, users, and permission checks behind a reader-writer lock. Every
//! accessor returns by-value copies so callers can never mutate internal
//! state. A disabled manager allows every check.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{Permission, Role, User};

pub struct RbacManager {
    roles: RwLock<HashMap<String, Role>>,
    users: RwLock<HashMap<String, User>>,
    disabled: AtomicBool,
}

impl Default for RbacManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RbacManager {
    /// Construct with the three default roles: `admin` (everything),
    /// `operator` (module/resource read+write), `readonly`.
    pub fn new() -> Self {
        let mut roles = HashMap::new();
        roles.insert(
            "admin".to_string(),
            Role {
                name: "admin".to_string(),
                description: "Full administrative access".to_string(),
                permissions: Permission::ALL.to_vec(),
            },
        );
        roles.insert(
            "operator".to_string(),
            Role {
                name: "operator".to_string(),
                description: "Plan and apply modules".to_string(),
                permissions: vec![
                    Permission::ModuleRead,
                    Permission::ModuleWrite,
                    Permission::ResourceAll,
                ],
            },
        );
        roles.insert(
            "readonly".to_string(),
            Role {
                name: "readonly".to_string(),
                description: "Read-only access to modules".to_string(),
                permissions: vec![Permission::ModuleRead],
            },
        );

        Self {
            roles: RwLock::new(roles),
            users: RwLock::new(HashMap::new()),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.disabled.store(!enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        !self.disabled.load(Ordering::SeqCst)
    }

    pub async fn create_role(&self, role: Role) -> EngineResult<()> {
        if role.name.trim().is_empty() {
            return Err(EngineError::Config("role name must not be empty".to_string()));
        }
        let mut roles = self.roles.write().await;
        if roles.contains_key(&role.name) {
            return Err(EngineError::Config(format!(
                "role already exists: {}",
                role.name
            )));
        }
        roles.insert(role.name.clone(), role);
        Ok(())
    }

    pub async fn update_role(&self, role: Role) -> EngineResult<()> {
        let mut roles = self.roles.write().await;
        if !roles.contains_key(&role.name) {
            return Err(EngineError::Config(format!("role not found: {}", role.name)));
        }
        roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Delete a role. Rejected while any user still holds it.
    pub async fn delete_role(&self, name: &str) -> EngineResult<()> {
        let users = self.users.read().await;
        if let Some(user) = users.values().find(|u| u.roles.iter().any(|r| r == name)) {
            return Err(EngineError::Config(format!(
                "role {name} is still assigned to user {}",
                user.username
            )));
        }
        drop(users);

        let mut roles = self.roles.write().await;
        if roles.remove(name).is_none() {
            return Err(EngineError::Config(format!("role not found: {name}")));
        }
        Ok(())
    }

    pub async fn get_role(&self, name: &str) -> Option<Role> {
        let roles = self.roles.read().await;
        roles.get(name).cloned()
    }

    pub async fn list_roles(&self) -> Vec<Role> {
        let roles = self.roles.read().await;
        let mut list: Vec<Role> = roles.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Create a user. Every referenced role must exist.
    pub async fn create_user(&self, user: User) -> EngineResult<()> {
        if user.username.trim().is_empty() {
            return Err(EngineError::Config(
                "username must not be empty".to_string(),
            ));
        }
        self.ensure_roles_exist(&user.roles).await?;

        let mut users = self.users.write().await;
        if users.contains_key(&user.username) {
            return Err(EngineError::Config(format!(
                "user already exists: {}",
                user.username
            )));
        }
        debug!(user = %user.username, roles = ?user.roles, "user created");
        users.insert(user.username.clone(), user);
        Ok(())
    }

    pub async fn update_user(&self, user: User) -> EngineResult<()> {
        self.ensure_roles_exist(&user.roles).await?;
        let mut users = self.users.write().await;
        if !users.contains_key(&user.username) {
            return Err(EngineError::Config(format!(
                "user not found: {}",
                user.username
            )));
        }
        users.insert(user.username.clone(), user);
        Ok(())
    }

    pub async fn delete_user(&self, username: &str) -> EngineResult<()> {
        let mut users = self.users.write().await;
        if users.remove(username).is_none() {
            return Err(EngineError::Config(format!("user not found: {username}")));
        }
        Ok(())
    }

    pub async fn get_user(&self, username: &str) -> Option<User> {
        let users = self.users.read().await;
        users.get(username).cloned()
    }

    async fn ensure_roles_exist(&self, role_names: &[String]) -> EngineResult<()> {
        let roles = self.roles.read().await;
        for name in role_names {
            if !roles.contains_key(name) {
                return Err(EngineError::Config(format!("role not found: {name}")));
            }
        }
        Ok(())
    }

    /// True iff the manager is disabled, or the user exists, is active, and
    /// at least one of their roles carries the permission. The `resource`
    /// argument names what is being acted on, for audit context only.
    pub async fn check_permission(
        &self,
        username: &str,
        permission: Permission,
        resource: &str,
    ) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let users = self.users.read().await;
        let Some(user) = users.get(username) else {
            return false;
        };
        if !user.active {
            return false;
        }

        let roles = self.roles.read().await;
        let allowed = user
            .roles
            .iter()
            .filter_map(|name| roles.get(name))
            .any(|role| role.has_permission(permission));

        debug!(
            user = username,
            permission = %permission,
            resource,
            allowed,
            "permission check"
        );
        allowed
    }

    /// Check and convert denial into an error, for call sites gating
    /// mutations.
    pub async fn require_permission(
        &self,
        username: &str,
        permission: Permission,
        resource: &str,
    ) -> EngineResult<()> {
        if self.check_permission(username, permission, resource).await {
            Ok(())
        } else {
            Err(EngineError::AuthorizationDenied {
                user: username.to_string(),
                permission: permission.to_string(),
            })
        }
    }
}
