// ABOUTME: HTTP middleware: tenant context extraction and audience enforcement
// ABOUTME: Applied to the router in routes.rs via from_fn_with_state
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

pub mod audience;
pub mod tenant;

pub use audience::{authenticate_bearer, www_authenticate};
pub use tenant::{tenant_context_middleware, ExtractedTenantContext};
