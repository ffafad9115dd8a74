// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables, defaults, and runtime configuration parsing
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use uuid::Uuid;

/// Strongly typed log level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }

    /// Convert to a tracing level
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

/// Policy for permissions that map to no scope and are not in the exclusion set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnmappedPermissionPolicy {
    /// Silently filter the permission out of scope derivation
    #[default]
    Ignore,
    /// Filter it out, but emit a tracing warning naming the permission
    Warn,
}

impl UnmappedPermissionPolicy {
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "warn" => Self::Warn,
            _ => Self::Ignore,
        }
    }
}

/// Token lifetime configuration, all values in minutes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLifetimeConfig {
    pub access_token_minutes: i64,
    pub refresh_token_minutes: i64,
    pub personal_access_token_minutes: i64,
    pub auth_code_minutes: i64,
}

impl Default for TokenLifetimeConfig {
    fn default() -> Self {
        Self {
            access_token_minutes: 60,
            refresh_token_minutes: 30 * 24 * 60,
            personal_access_token_minutes: 365 * 24 * 60,
            auth_code_minutes: 10,
        }
    }
}

/// Dynamic client registration (RFC 7591) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Domains allowed as redirect URI hosts; empty list allows any https host
    pub allowed_domains: Vec<String>,
    /// Whether RFC 7592 client self-management is enabled
    pub management_enabled: bool,
    /// Max registrations accepted per source IP per window
    pub max_clients_per_ip: u32,
    /// Rate-limit window in seconds
    pub rate_limit_window_secs: u64,
    /// Rate-limiter map size that triggers lazy cleanup of stale entries
    pub rate_limit_cleanup_threshold: usize,
    /// Unused dynamically-registered clients are cleanup-eligible after this many days
    pub client_expiration_days: i64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            management_enabled: true,
            max_clients_per_ip: 10,
            rate_limit_window_secs: 3600,
            rate_limit_cleanup_threshold: 10_000,
            client_expiration_days: 90,
        }
    }
}

/// Audience (RFC 8707) enforcement settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudienceConfig {
    /// Reject tokens that carry no audience at all
    pub require_audience: bool,
    /// Extra accepted audience values beyond the base URL and its /mcp resource
    pub extra_audiences: Vec<String>,
}

/// Full server configuration assembled from environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Public base URL, used as issuer and default audience
    pub base_url: String,
    pub database_url: String,
    pub log_level: LogLevel,
    /// Whether the OAuth server is enabled at all
    pub oauth_enabled: bool,
    /// Whether tenant isolation checks are enforced
    pub tenancy_enabled: bool,
    /// Whether PKCE is required for public clients on authorization_code
    pub require_pkce: bool,
    /// Whether client secrets are stored argon2-hashed
    pub hash_client_secrets: bool,
    /// Scope granted when a request carries none
    pub default_scope: Option<String>,
    /// Whether the password grant is advertised in discovery metadata
    pub password_grant_enabled: bool,
    /// Tenant assigned to anonymously registered clients
    pub default_tenant_id: Option<Uuid>,
    pub unmapped_permission_policy: UnmappedPermissionPolicy,
    pub token_lifetimes: TokenLifetimeConfig,
    pub registration: RegistrationConfig,
    pub audience: AudienceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            http_port: 8081,
            base_url: "http://127.0.0.1:8081".to_owned(),
            database_url: "sqlite::memory:".to_owned(),
            log_level: LogLevel::Info,
            oauth_enabled: true,
            tenancy_enabled: true,
            require_pkce: true,
            hash_client_secrets: true,
            default_scope: None,
            password_grant_enabled: false,
            default_tenant_id: None,
            unmapped_permission_policy: UnmappedPermissionPolicy::Ignore,
            token_lifetimes: TokenLifetimeConfig::default(),
            registration: RegistrationConfig::default(),
            audience: AudienceConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is present but cannot be parsed
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host = env::var("LEDGERGATE_HOST").unwrap_or(defaults.host);
        let http_port = parse_env("LEDGERGATE_HTTP_PORT", defaults.http_port)?;
        let base_url = env::var("LEDGERGATE_BASE_URL")
            .unwrap_or_else(|_| format!("http://{host}:{http_port}"));

        Ok(Self {
            base_url,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            log_level: env::var("LEDGERGATE_LOG_LEVEL")
                .map(|s| LogLevel::from_str_or_default(&s))
                .unwrap_or_default(),
            oauth_enabled: parse_env("LEDGERGATE_OAUTH_ENABLED", defaults.oauth_enabled)?,
            tenancy_enabled: parse_env("LEDGERGATE_TENANCY_ENABLED", defaults.tenancy_enabled)?,
            require_pkce: parse_env("LEDGERGATE_REQUIRE_PKCE", defaults.require_pkce)?,
            hash_client_secrets: parse_env(
                "LEDGERGATE_HASH_CLIENT_SECRETS",
                defaults.hash_client_secrets,
            )?,
            default_scope: env::var("LEDGERGATE_DEFAULT_SCOPE").ok(),
            password_grant_enabled: parse_env(
                "LEDGERGATE_PASSWORD_GRANT_ENABLED",
                defaults.password_grant_enabled,
            )?,
            default_tenant_id: parse_optional_uuid("LEDGERGATE_DEFAULT_TENANT_ID")?,
            unmapped_permission_policy: env::var("LEDGERGATE_UNMAPPED_PERMISSION_POLICY")
                .map(|s| UnmappedPermissionPolicy::from_str_or_default(&s))
                .unwrap_or_default(),
            token_lifetimes: TokenLifetimeConfig {
                access_token_minutes: parse_env(
                    "LEDGERGATE_ACCESS_TOKEN_MINUTES",
                    defaults.token_lifetimes.access_token_minutes,
                )?,
                refresh_token_minutes: parse_env(
                    "LEDGERGATE_REFRESH_TOKEN_MINUTES",
                    defaults.token_lifetimes.refresh_token_minutes,
                )?,
                personal_access_token_minutes: parse_env(
                    "LEDGERGATE_PERSONAL_TOKEN_MINUTES",
                    defaults.token_lifetimes.personal_access_token_minutes,
                )?,
                auth_code_minutes: parse_env(
                    "LEDGERGATE_AUTH_CODE_MINUTES",
                    defaults.token_lifetimes.auth_code_minutes,
                )?,
            },
            registration: RegistrationConfig {
                allowed_domains: parse_env_list("LEDGERGATE_DCR_ALLOWED_DOMAINS"),
                management_enabled: parse_env(
                    "LEDGERGATE_DCR_MANAGEMENT_ENABLED",
                    defaults.registration.management_enabled,
                )?,
                max_clients_per_ip: parse_env(
                    "LEDGERGATE_DCR_MAX_CLIENTS_PER_IP",
                    defaults.registration.max_clients_per_ip,
                )?,
                rate_limit_window_secs: parse_env(
                    "LEDGERGATE_DCR_RATE_LIMIT_WINDOW_SECS",
                    defaults.registration.rate_limit_window_secs,
                )?,
                rate_limit_cleanup_threshold: defaults.registration.rate_limit_cleanup_threshold,
                client_expiration_days: parse_env(
                    "LEDGERGATE_DCR_CLIENT_EXPIRATION_DAYS",
                    defaults.registration.client_expiration_days,
                )?,
            },
            audience: AudienceConfig {
                require_audience: parse_env(
                    "LEDGERGATE_REQUIRE_AUDIENCE",
                    defaults.audience.require_audience,
                )?,
                extra_audiences: parse_env_list("LEDGERGATE_ACCEPTED_AUDIENCES"),
            },
            host,
            http_port,
        })
    }

    /// Issuer identifier advertised in discovery metadata
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// All accepted audience values: base URL, its /mcp resource, plus extras
    #[must_use]
    pub fn accepted_audiences(&self) -> Vec<String> {
        let base = self.issuer().to_owned();
        let mut audiences = vec![format!("{base}/mcp"), base];
        audiences.extend(self.audience.extra_audiences.iter().cloned());
        audiences
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {key}: {value}")),
        Err(_) => Ok(default),
    }
}

fn parse_optional_uuid(key: &str) -> Result<Option<Uuid>> {
    match env::var(key) {
        Ok(value) => Ok(Some(
            value
                .parse()
                .with_context(|| format!("invalid UUID for {key}: {value}"))?,
        )),
        Err(_) => Ok(None),
    }
}

fn parse_env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default()
}
