// ABOUTME: Multi-tenant OAuth 2.1 authorization server library
// ABOUTME: Dynamic client registration, audience-bound tokens, permission-derived scopes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

//! Ledgergate is a multi-tenant OAuth 2.1 authorization server.
//!
//! It issues opaque, audience-bound bearer tokens (RFC 8707), supports
//! dynamic client registration and self-management (RFC 7591/7592),
//! derives OAuth scopes from an application permission catalog, and keeps
//! every persisted entity stamped with the tenant it was created under.
//! A retention engine handles routine cleanup and operator-driven purges.

pub mod activity;
pub mod config;
pub mod database;
pub mod errors;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod oauth2;
pub mod permissions;
pub mod retention;
pub mod routes;
pub mod scopes;
pub mod tenant;
