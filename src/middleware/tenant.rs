// ABOUTME: Middleware that extracts tenant context from the bearer token
// ABOUTME: Injects ExtractedTenantContext into request extensions for handlers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::database::Database;
use crate::middleware::audience::extract_bearer;
use crate::models::EntityStatus;
use crate::routes::AppState;
use crate::tenant::{resolve_tenant, TenantContext, TenantSources};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Extracted tenant context wrapper for request extensions
///
/// Holds `Option<TenantContext>` because public routes carry no
/// authentication and extraction may fail gracefully; handlers that
/// require a tenant check the option themselves.
#[derive(Debug, Clone)]
pub struct ExtractedTenantContext(pub Option<TenantContext>);

impl ExtractedTenantContext {
    #[must_use]
    pub const fn get(&self) -> Option<&TenantContext> {
        self.0.as_ref()
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<Uuid> {
        self.0.as_ref().map(|ctx| ctx.tenant_id)
    }

    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.0.as_ref().map(|ctx| ctx.user_id)
    }
}

/// Extract tenant context once per request and stash it in extensions
///
/// Gathers every candidate source, runs the priority chain, and freezes
/// the result. Requests without usable credentials proceed with
/// `ExtractedTenantContext(None)` rather than being rejected here.
pub async fn tenant_context_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let headers = req.headers();

    let header_tenant = headers
        .get("x-tenant-id")
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.parse::<Uuid>().ok());

    let tenant_context = match extract_bearer(headers) {
        Some(token_id) => {
            build_context_from_token(&state.database, &token_id, header_tenant).await
        }
        None => {
            debug!("no bearer token on request, proceeding without tenant context");
            None
        }
    };

    if let Some(ref ctx) = tenant_context {
        tracing::Span::current()
            .record("tenant_id", ctx.tenant_id.to_string())
            .record("tenant_user_id", ctx.user_id.to_string());
    }

    req.extensions_mut()
        .insert(ExtractedTenantContext(tenant_context));

    next.run(req).await
}

/// Resolve the tenant for an authenticated request
///
/// The bearer token's frozen tenant stamp wins; an explicit `x-tenant-id`
/// header is honored next, but only after membership is verified; the
/// user's first membership is the final fallback.
async fn build_context_from_token(
    database: &Database,
    token_id: &str,
    header_tenant: Option<Uuid>,
) -> Option<TenantContext> {
    let token = match database.find_access_token_by_id(token_id).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!("bearer token not found, no tenant context");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "token lookup failed in tenant middleware");
            return None;
        }
    };

    if token.status != EntityStatus::Active || Utc::now() > token.expires_at {
        debug!(token_id = %token.id, "inactive token, no tenant context");
        return None;
    }

    let user_id = token.user_id?;

    let session_tenant = match header_tenant {
        Some(tid) => match database.user_belongs_to_tenant(user_id, tid).await {
            Ok(true) => Some(tid),
            Ok(false) => {
                warn!(user_id = %user_id, tenant_id = %tid, "header tenant rejected: not a member");
                None
            }
            Err(e) => {
                warn!(error = %e, "membership check failed in tenant middleware");
                None
            }
        },
        None => None,
    };

    let memberships = match database.list_tenants_for_user(user_id).await {
        Ok(memberships) => memberships,
        Err(e) => {
            warn!(error = %e, "membership listing failed in tenant middleware");
            Vec::new()
        }
    };

    let sources = TenantSources {
        token_tenant: token.tenant_id,
        pending_authorization_tenant: None,
        session_tenant,
        memberships,
    };
    let tenant_id = resolve_tenant(&sources)?;

    let tenant_name = match database.get_tenant_by_id(tenant_id).await {
        Ok(Some(tenant)) => tenant.name,
        Ok(None) => {
            warn!(tenant_id = %tenant_id, "resolved tenant does not exist");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "tenant lookup failed in tenant middleware");
            return None;
        }
    };

    Some(TenantContext::new(tenant_id, tenant_name, user_id))
}
