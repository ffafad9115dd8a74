// ABOUTME: Configuration module grouping environment-driven server settings
// ABOUTME: Re-exports the ServerConfig used across the crate
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

pub mod environment;

pub use environment::{
    AudienceConfig, LogLevel, RegistrationConfig, ServerConfig, TokenLifetimeConfig,
    UnmappedPermissionPolicy,
};
