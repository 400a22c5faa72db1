//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following
//! precedence (highest to lowest):
//! 1. Environment variables (prefix: AYB_, `__` as section separator)
//! 2. Current working directory: ./config.toml
//! 3. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Admin control plane configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Job engine configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// SMS configuration
    #[serde(default)]
    pub sms: SmsConfig,

    /// Email configuration
    #[serde(default)]
    pub email: EmailConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Graceful shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Allowed CORS origins; a single `*` allows everything
    #[serde(default = "default_cors_origins")]
    pub cors_allowed_origins: Vec<String>,

    /// Request body limit in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            cors_allowed_origins: default_cors_origins(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Admin control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Whether the admin API and SPA are mounted
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// URL prefix the SPA is served under
    #[serde(default = "default_admin_path")]
    pub path: String,

    /// Directory holding the SPA static assets
    #[serde(default)]
    pub assets_dir: Option<String>,

    /// Admin password; admin auth always rejects when unset
    #[serde(default)]
    pub password: Option<String>,

    /// Admin login attempts per minute per IP
    #[serde(default = "default_admin_login_rate_limit")]
    pub login_rate_limit: u32,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_admin_path(),
            assets_dir: None,
            password: None,
            login_rate_limit: default_admin_login_rate_limit(),
        }
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Whether user auth routes are mounted
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Initial JWT signing secret; generated at boot when unset
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Access token lifetime in seconds
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,

    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,

    /// Argon2 memory cost in KiB
    #[serde(default = "default_argon_memory")]
    pub argon_memory_kib: u32,

    /// Argon2 iterations
    #[serde(default = "default_argon_time")]
    pub argon_time_cost: u32,

    /// Auth endpoint requests per minute per IP
    #[serde(default = "default_auth_rate_limit")]
    pub rate_limit: u32,

    /// Redirect URL for the hosted OAuth flow
    #[serde(default)]
    pub oauth_redirect_url: Option<String>,

    /// Whether magic-link login is enabled
    #[serde(default)]
    pub magic_link_enabled: bool,

    /// Whether the SMS surface is enabled
    #[serde(default)]
    pub sms_enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwt_secret: None,
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            argon_memory_kib: default_argon_memory(),
            argon_time_cost: default_argon_time(),
            rate_limit: default_auth_rate_limit(),
            oauth_redirect_url: None,
            magic_link_enabled: false,
            sms_enabled: false,
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Schema cache refresh interval in seconds
    #[serde(default = "default_schema_refresh")]
    pub schema_refresh_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
            schema_refresh_secs: default_schema_refresh(),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Whether the storage surface is mounted
    #[serde(default)]
    pub enabled: bool,

    /// Root directory for bucket data
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// Per-object size cap in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    /// Signed URL lifetime in seconds
    #[serde(default = "default_sign_ttl")]
    pub sign_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: default_storage_root(),
            max_file_size_bytes: default_max_file_size(),
            sign_ttl_secs: default_sign_ttl(),
        }
    }
}

/// Job engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Whether the job engine runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Claim poll interval in seconds
    #[serde(default = "default_job_poll")]
    pub poll_interval_secs: u64,

    /// Scheduler tick interval in seconds
    #[serde(default = "default_scheduler_tick")]
    pub scheduler_tick_secs: u64,

    /// Concurrent job handlers
    #[serde(default = "default_job_workers")]
    pub workers: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_job_poll(),
            scheduler_tick_secs: default_scheduler_tick(),
            workers: default_job_workers(),
        }
    }
}

/// SMS provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsConfig {
    /// Provider name recorded on outbox rows
    #[serde(default = "default_sms_provider")]
    pub provider: String,

    /// Provider API base URL
    #[serde(default)]
    pub api_url: Option<String>,

    /// Provider account identifier
    #[serde(default)]
    pub account_sid: Option<String>,

    /// Provider auth token
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Sender number in E.164 form
    #[serde(default)]
    pub from_number: Option<String>,

    /// ISO country-code allowlist (e.g. `["1", "44"]`); empty allows all
    #[serde(default)]
    pub allowed_country_codes: Vec<String>,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            provider: default_sms_provider(),
            api_url: None,
            account_sid: None,
            auth_token: None,
            from_number: None,
            allowed_country_codes: Vec::new(),
        }
    }
}

/// Email settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// SMTP host; email send is disabled when unset
    #[serde(default)]
    pub smtp_host: Option<String>,

    /// SMTP port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// SMTP username
    #[serde(default)]
    pub smtp_username: Option<String>,

    /// SMTP password
    #[serde(default)]
    pub smtp_password: Option<String>,

    /// From address on outbound mail
    #[serde(default)]
    pub from_address: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            from_address: None,
        }
    }
}

impl Config {
    /// Load configuration from defaults, `./config.toml`, and `AYB_*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration with an explicit TOML path (used by tests)
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("AYB_").split("__"))
            .extract()?;
        Ok(config)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_shutdown_timeout() -> u64 {
    20
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_body_limit() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_admin_path() -> String {
    "/admin".to_string()
}

fn default_admin_login_rate_limit() -> u32 {
    20
}

fn default_access_ttl() -> u64 {
    900
}

fn default_refresh_ttl() -> u64 {
    30 * 24 * 3600
}

fn default_argon_memory() -> u32 {
    19 * 1024
}

fn default_argon_time() -> u32 {
    2
}

fn default_auth_rate_limit() -> u32 {
    10
}

fn default_database_url() -> String {
    "postgres://localhost:5432/aybase".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    5
}

fn default_schema_refresh() -> u64 {
    300
}

fn default_storage_root() -> String {
    "./data/storage".to_string()
}

fn default_max_file_size() -> u64 {
    25 * 1024 * 1024
}

fn default_sign_ttl() -> u64 {
    900
}

fn default_job_poll() -> u64 {
    2
}

fn default_scheduler_tick() -> u64 {
    15
}

fn default_job_workers() -> usize {
    4
}

fn default_sms_provider() -> String {
    "twilio".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.admin.path, "/admin");
        assert_eq!(config.admin.login_rate_limit, 20);
        assert_eq!(config.auth.rate_limit, 10);
        assert!(config.admin.password.is_none());
        assert_eq!(config.server.cors_allowed_origins, vec!["*".to_string()]);
        assert!(config.jobs.enabled);
        assert!(!config.storage.enabled);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 9000
cors_allowed_origins = ["https://app.example.com", "https://admin.example.com"]

[admin]
password = "mypassword"
login_rate_limit = 3
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.cors_allowed_origins.len(), 2);
        assert_eq!(config.admin.password.as_deref(), Some("mypassword"));
        assert_eq!(config.admin.login_rate_limit, 3);
        // untouched sections keep defaults
        assert_eq!(config.auth.access_ttl_secs, 900);
    }
}
