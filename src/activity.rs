// ABOUTME: Fire-and-forget audit event recorder for OAuth lifecycle events
// ABOUTME: Sink failures are logged and never block the OAuth response
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::database::Database;
use crate::models::ActivityLogEntry;
use chrono::Utc;
use uuid::Uuid;

/// Builder for one audit event
#[derive(Debug, Clone)]
pub struct ActivityEvent {
    entry: ActivityLogEntry,
}

impl ActivityEvent {
    /// Start an event with a dot-namespaced type, e.g. `oauth.token.created`
    #[must_use]
    pub fn new(event_type: &str) -> Self {
        Self {
            entry: ActivityLogEntry {
                id: 0,
                tenant_id: None,
                user_id: None,
                event_type: event_type.to_owned(),
                resource_type: None,
                resource_id: None,
                client_id: None,
                client_name: None,
                token_id: None,
                scopes: Vec::new(),
                ip_address: None,
                user_agent: None,
                description: None,
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            },
        }
    }

    #[must_use]
    pub const fn tenant(mut self, tenant_id: Option<Uuid>) -> Self {
        self.entry.tenant_id = tenant_id;
        self
    }

    #[must_use]
    pub const fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.entry.user_id = user_id;
        self
    }

    #[must_use]
    pub fn client(mut self, client_id: &str, client_name: &str) -> Self {
        self.entry.client_id = Some(client_id.to_owned());
        self.entry.client_name = Some(client_name.to_owned());
        self
    }

    #[must_use]
    pub fn resource(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.entry.resource_type = Some(resource_type.to_owned());
        self.entry.resource_id = Some(resource_id.to_owned());
        self
    }

    #[must_use]
    pub fn token(mut self, token_id: &str) -> Self {
        self.entry.token_id = Some(token_id.to_owned());
        self
    }

    #[must_use]
    pub fn scopes(mut self, scopes: &[String]) -> Self {
        self.entry.scopes = scopes.to_vec();
        self
    }

    #[must_use]
    pub fn requester(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.entry.ip_address = ip;
        self.entry.user_agent = user_agent;
        self
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.entry.description = Some(description.to_owned());
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.entry.metadata = metadata;
        self
    }
}

/// Audit sink shared by the state machine, registrar, and routes
#[derive(Clone)]
pub struct ActivityRecorder {
    database: Database,
}

impl ActivityRecorder {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Record an event, swallowing sink failures
    pub async fn record(&self, event: ActivityEvent) {
        if let Err(e) = self.database.insert_activity(&event.entry).await {
            tracing::warn!(
                event_type = %event.entry.event_type,
                error = %e,
                "failed to record activity event"
            );
        }
    }
}
