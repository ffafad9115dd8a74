// ABOUTME: Seam to the external permission and role system
// ABOUTME: Consumed as a data source only; grants are managed elsewhere
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use std::collections::HashMap;
use uuid::Uuid;

/// Read-only view of the permission registry
///
/// The scope mapper derives the scope catalog from this; implementations
/// back it with whatever role system the deployment uses.
pub trait PermissionCatalog: Send + Sync {
    /// Every permission name known to the system
    fn all_permissions(&self) -> Vec<String>;

    /// The permissions a user holds through roles and direct grants
    fn permissions_for_user(&self, user_id: Uuid) -> Vec<String>;
}

/// In-memory catalog used by tests and single-node deployments
#[derive(Debug, Default)]
pub struct StaticPermissionCatalog {
    permissions: Vec<String>,
    user_grants: HashMap<Uuid, Vec<String>>,
}

impl StaticPermissionCatalog {
    #[must_use]
    pub fn new(permissions: Vec<String>) -> Self {
        Self {
            permissions,
            user_grants: HashMap::new(),
        }
    }

    pub fn grant(&mut self, user_id: Uuid, permissions: Vec<String>) {
        self.user_grants.entry(user_id).or_default().extend(permissions);
    }
}

impl PermissionCatalog for StaticPermissionCatalog {
    fn all_permissions(&self) -> Vec<String> {
        self.permissions.clone()
    }

    fn permissions_for_user(&self, user_id: Uuid) -> Vec<String> {
        self.user_grants.get(&user_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_catalog_tracks_grants() {
        let mut catalog = StaticPermissionCatalog::new(vec![
            "read-sales-invoices".to_owned(),
            "create-sales-invoices".to_owned(),
        ]);
        let user = Uuid::new_v4();
        catalog.grant(user, vec!["read-sales-invoices".to_owned()]);

        assert_eq!(catalog.all_permissions().len(), 2);
        assert_eq!(
            catalog.permissions_for_user(user),
            vec!["read-sales-invoices".to_owned()]
        );
        assert!(catalog.permissions_for_user(Uuid::new_v4()).is_empty());
    }
}
