// ABOUTME: OAuth 2.1 server surface: engine seam, interactive flow, registration
// ABOUTME: Route handlers compose these pieces; persistence lives in database
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

pub mod authorization;
pub mod engine;
pub mod models;
pub mod rate_limiting;
pub mod registration;

pub use authorization::{AuthorizationFlow, AuthorizationOutcome, AuthorizeError};
pub use engine::{AuthorizationGrant, CompletedAuthorization, DefaultEngine, ProtocolEngine};
pub use rate_limiting::{RateLimitStatus, RegistrationRateLimiter};
pub use registration::ClientRegistrar;
