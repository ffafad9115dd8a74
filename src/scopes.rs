// ABOUTME: Scope mapper converting between permission names and OAuth scope keys
// ABOUTME: Pure functions over fixed action, exclusion, and alias tables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

//! Permission ⇄ scope derivation.
//!
//! Permissions follow the `[action]-[category]-[feature]` convention
//! (e.g. `read-sales-invoices`); scopes are the coarser
//! `[category]:[action_group]` keys (e.g. `sales:read`). The mapping is
//! table-driven so scope growth is automatic as new permission-bearing
//! modules appear; the exclusion and alias tables below must be kept
//! current by whoever adds new permission families.

use crate::config::UnmappedPermissionPolicy;
use crate::permissions::PermissionCatalog;
use glob::Pattern;
use std::collections::BTreeSet;

/// Permission families that never map to an OAuth scope (UI-only or
/// admin-only surfaces)
pub const EXCLUDED_RESOURCES: &[&str] = &[
    "admin-panel",
    "dashboard",
    "notifications",
    "settings",
    "users",
    "roles",
    "api-tokens",
    "import-export",
];

/// Resource string → scope category overrides. A reverse hit here means
/// the scope expands to exact permission names instead of wildcards.
pub const CATEGORY_ALIASES: &[(&str, &str)] = &[("common-items", "items")];

/// Scopes managed by hand rather than derived from permissions. They never
/// gate permission checks, so their pattern expansion is empty.
pub const MANUAL_SCOPES: &[(&str, &str)] = &[("mcp:use", "Connect MCP clients to your account")];

/// Coarse action grouping used on the scope side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionGroup {
    Read,
    Write,
    Delete,
}

impl ActionGroup {
    /// Map a fine-grained permission action onto its group
    #[must_use]
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "read" => Some(Self::Read),
            "create" | "update" => Some(Self::Write),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// The permission actions covered by this group
    #[must_use]
    pub const fn actions(self) -> &'static [&'static str] {
        match self {
            Self::Read => &["read"],
            Self::Write => &["create", "update"],
            Self::Delete => &["delete"],
        }
    }

    /// Human label used in consent-screen scope descriptions
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Read => "View",
            Self::Write => "Create and update",
            Self::Delete => "Delete",
        }
    }
}

/// Map a permission name onto its OAuth scope key
///
/// Returns `None` for unknown actions and excluded resources; this is a
/// filter, not an error.
#[must_use]
pub fn to_scope(permission: &str) -> Option<String> {
    let (action, resource) = permission.split_once('-')?;
    let group = ActionGroup::from_action(action)?;

    if EXCLUDED_RESOURCES.contains(&resource) {
        return None;
    }

    let category = CATEGORY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == resource)
        .map_or_else(
            || resource.split('-').next().unwrap_or(resource),
            |(_, category)| *category,
        );

    Some(format!("{category}:{}", group.as_str()))
}

/// Expand a scope key into the permission glob patterns it covers
///
/// Manual scopes expand to nothing; aliased categories expand to exact
/// permission names rather than wildcards.
#[must_use]
pub fn to_permission_patterns(scope: &str) -> Vec<String> {
    if MANUAL_SCOPES.iter().any(|(key, _)| *key == scope) {
        return Vec::new();
    }

    let Some((category, group_str)) = scope.split_once(':') else {
        return Vec::new();
    };
    let Some(group) = ActionGroup::from_str(group_str) else {
        return Vec::new();
    };

    let aliased_resource = CATEGORY_ALIASES
        .iter()
        .find(|(_, cat)| *cat == category)
        .map(|(resource, _)| *resource);

    group
        .actions()
        .iter()
        .map(|action| match aliased_resource {
            Some(resource) => format!("{action}-{resource}"),
            None => format!("{action}-{category}-*"),
        })
        .collect()
}

/// Whether a scope's pattern expansion covers a permission
#[must_use]
pub fn scope_satisfies(scope: &str, permission: &str) -> bool {
    to_permission_patterns(scope).iter().any(|pattern| {
        Pattern::new(pattern).is_ok_and(|p| p.matches(permission))
    })
}

/// OR of `scope_satisfies` across a scope list
#[must_use]
pub fn any_scope_satisfies(scopes: &[String], permission: &str) -> bool {
    scopes.iter().any(|scope| scope_satisfies(scope, permission))
}

/// Derive the sorted, deduplicated scope catalog from every known permission
#[must_use]
pub fn derive_all_scopes(
    catalog: &dyn PermissionCatalog,
    policy: UnmappedPermissionPolicy,
) -> Vec<String> {
    derive_scopes(catalog.all_permissions(), policy)
}

/// Derive the scopes a user's held permissions grant
#[must_use]
pub fn scopes_for_user(
    catalog: &dyn PermissionCatalog,
    user_id: uuid::Uuid,
    policy: UnmappedPermissionPolicy,
) -> Vec<String> {
    derive_scopes(catalog.permissions_for_user(user_id), policy)
}

fn derive_scopes(permissions: Vec<String>, policy: UnmappedPermissionPolicy) -> Vec<String> {
    let mut scopes = BTreeSet::new();
    for permission in permissions {
        match to_scope(&permission) {
            Some(scope) => {
                scopes.insert(scope);
            }
            None => {
                if policy == UnmappedPermissionPolicy::Warn && !is_excluded(&permission) {
                    tracing::warn!(
                        permission = %permission,
                        "permission does not map to any scope and is not excluded"
                    );
                }
            }
        }
    }
    scopes.into_iter().collect()
}

fn is_excluded(permission: &str) -> bool {
    permission
        .split_once('-')
        .is_some_and(|(_, resource)| EXCLUDED_RESOURCES.contains(&resource))
}

/// Human-readable description for a scope key
///
/// Manual scopes have fixed descriptions; derived scopes read as
/// `"{ActionLabel} {CategoryLabel} data"`.
#[must_use]
pub fn describe(scope: &str) -> String {
    if let Some((_, description)) = MANUAL_SCOPES.iter().find(|(key, _)| *key == scope) {
        return (*description).to_owned();
    }

    let Some((category, group_str)) = scope.split_once(':') else {
        return scope.to_owned();
    };
    let Some(group) = ActionGroup::from_str(group_str) else {
        return scope.to_owned();
    };

    format!("{} {} data", group.label(), title_case(category))
}

fn title_case(category: &str) -> String {
    category
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().collect::<String>() + chars.as_str()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
