//! Permission table: `{resource}.{action}` granted to a set of roles.

use crate::user::UserRole;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A grantable resource-action pair
#[derive(Debug, Clone, Serialize)]
pub struct Permission {
    /// `{resource}.{action}`
    pub id: String,
    pub name: String,
    pub description: String,
    pub resource: String,
    pub action: String,
    pub roles: HashSet<UserRole>,
}

/// Registry of permissions
pub struct PermissionTable {
    permissions: RwLock<HashMap<String, Permission>>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self {
            permissions: RwLock::new(HashMap::new()),
        }
    }

    /// The default permission set for the runtime's own resources
    pub fn with_defaults() -> Self {
        use UserRole::{Admin, Operator, User, Viewer};
        let table = Self::new();
        table.add(
            "system",
            "view",
            "View system information and status",
            &[Admin, Operator, User],
        );
        table.add(
            "system",
            "manage",
            "Manage system configuration and settings",
            &[Admin],
        );
        table.add("users", "view", "View user information", &[Admin, Operator]);
        table.add("users", "manage", "Create, update, and delete users", &[Admin]);
        table.add(
            "plugins",
            "view",
            "View plugin information",
            &[Admin, Operator, User],
        );
        table.add(
            "plugins",
            "manage",
            "Install, update, and remove plugins",
            &[Admin],
        );
        table.add(
            "files",
            "view",
            "View files and directories",
            &[Admin, Operator, User, Viewer],
        );
        table.add(
            "files",
            "manage",
            "Create, update, and delete files",
            &[Admin, Operator, User],
        );
        table
    }

    /// Add (or replace) a permission
    pub fn add(&self, resource: &str, action: &str, description: &str, roles: &[UserRole]) {
        let id = format!("{resource}.{action}");
        let permission = Permission {
            id: id.clone(),
            name: id.clone(),
            description: description.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            roles: roles.iter().copied().collect(),
        };
        self.permissions.write().insert(id, permission);
    }

    pub fn get(&self, id: &str) -> Option<Permission> {
        self.permissions.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Permission> {
        let mut all: Vec<Permission> = self.permissions.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Whether any of the given roles is granted `{resource}.{action}`
    pub fn allows(&self, roles: &HashSet<UserRole>, resource: &str, action: &str) -> bool {
        let id = format!("{resource}.{action}");
        match self.permissions.read().get(&id) {
            Some(permission) => roles.iter().any(|role| permission.roles.contains(role)),
            None => false,
        }
    }
}

impl Default for PermissionTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grants() {
        let table = PermissionTable::with_defaults();
        let admin = HashSet::from([UserRole::Admin]);
        let viewer = HashSet::from([UserRole::Viewer]);

        assert!(table.allows(&admin, "system", "manage"));
        assert!(table.allows(&admin, "users", "manage"));
        assert!(!table.allows(&viewer, "system", "view"));
        assert!(table.allows(&viewer, "files", "view"));
    }

    #[test]
    fn test_unknown_permission_denies() {
        let table = PermissionTable::with_defaults();
        let admin = HashSet::from([UserRole::Admin]);
        assert!(!table.allows(&admin, "nonexistent", "anything"));
    }

    #[test]
    fn test_any_role_suffices() {
        let table = PermissionTable::with_defaults();
        let mixed = HashSet::from([UserRole::Viewer, UserRole::Operator]);
        assert!(table.allows(&mixed, "users", "view"));
    }
}
