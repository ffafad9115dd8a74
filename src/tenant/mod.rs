// ABOUTME: Tenant context types and the prioritized tenant resolution chain
// ABOUTME: Resolution runs once at entity construction; the result is frozen
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolved tenant context for one request
///
/// Threaded explicitly through repository calls; never stored in a
/// process-wide global, so concurrent requests cannot leak context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub user_id: Uuid,
}

impl TenantContext {
    #[must_use]
    pub fn new(tenant_id: Uuid, tenant_name: String, user_id: Uuid) -> Self {
        Self {
            tenant_id,
            tenant_name,
            user_id,
        }
    }
}

/// Candidate tenant values gathered from one request, in priority order
///
/// Missing sources degrade gracefully to the next entry rather than
/// failing; an operation that strictly needs a tenant checks the result
/// itself.
#[derive(Debug, Clone, Default)]
pub struct TenantSources {
    /// Tenant stamped on the bearer token presented with the request
    pub token_tenant: Option<Uuid>,
    /// Tenant captured when the in-flight authorization session began
    pub pending_authorization_tenant: Option<Uuid>,
    /// Ambient session or request tenant (explicit header or session value)
    pub session_tenant: Option<Uuid>,
    /// Tenants the acting principal belongs to, first one wins as fallback
    pub memberships: Vec<Uuid>,
}

/// Resolve a single tenant ID from the prioritized source chain
///
/// Invoked exactly once when a new entity is constructed; callers freeze
/// the returned value into the entity and never re-derive it.
#[must_use]
pub fn resolve_tenant(sources: &TenantSources) -> Option<Uuid> {
    sources
        .token_tenant
        .or(sources.pending_authorization_tenant)
        .or(sources.session_tenant)
        .or_else(|| sources.memberships.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_tenant_wins() {
        let token = Uuid::new_v4();
        let session = Uuid::new_v4();
        let sources = TenantSources {
            token_tenant: Some(token),
            session_tenant: Some(session),
            memberships: vec![Uuid::new_v4()],
            ..TenantSources::default()
        };
        assert_eq!(resolve_tenant(&sources), Some(token));
    }

    #[test]
    fn falls_through_to_first_membership() {
        let member = Uuid::new_v4();
        let sources = TenantSources {
            memberships: vec![member, Uuid::new_v4()],
            ..TenantSources::default()
        };
        assert_eq!(resolve_tenant(&sources), Some(member));
    }

    #[test]
    fn no_source_resolves_to_none() {
        assert_eq!(resolve_tenant(&TenantSources::default()), None);
    }
}
