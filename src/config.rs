//! Configuration management for Switchyard
//!
//! Process-level settings come from environment variables (optionally via a
//! `.env` file). The tenant/deployment layout comes from a JSON gateway file
//! whose path is itself an environment setting.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::ConfigError;
use crate::routing::FailoverOrder;
use crate::upstream::BackendFamily;

/// Default listen port of the gateway
pub const DEFAULT_PORT: u16 = 4337;

/// Default listen host of the gateway
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the JSON gateway file
    pub gateway_config_path: PathBuf,
    /// Host override (takes precedence over the gateway file)
    pub host: Option<String>,
    /// Port override (takes precedence over the gateway file)
    pub port: Option<u16>,

    /// Remaining lifetime below which a cached access token is refreshed
    pub token_refresh_buffer: Duration,
    /// Lifetime assumed when the token endpoint omits `expires_in`
    pub token_lifetime: Duration,
    /// Attempts per credential exchange before giving up
    pub token_exchange_attempts: u32,
    /// Base delay between credential exchange attempts
    pub token_retry_backoff: Duration,
    /// Bound on a single credential exchange attempt
    pub token_exchange_timeout: Duration,

    /// Idle pooled connections kept per upstream host
    pub pool_max_idle_per_host: usize,
    /// Maximum concurrently outstanding upstream calls
    pub pool_max_concurrent: usize,
    /// How long a request may wait for a free upstream slot
    pub pool_acquire_timeout: Duration,

    /// Timeout of a whole non-streaming upstream call
    pub upstream_timeout: Duration,
    /// TCP/TLS connect timeout for upstream calls
    pub upstream_connect_timeout: Duration,
    /// Maximum silence between two chunks of an upstream stream
    pub stream_idle_timeout: Duration,

    /// Failover order override (takes precedence over the gateway file)
    pub failover_order: Option<FailoverOrder>,

    /// Append-only JSON-lines usage log; usage goes to tracing when unset
    pub usage_log_path: Option<PathBuf>,
    /// Emit logs as JSON
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_config_path: PathBuf::from("config.json"),
            host: None,
            port: None,
            token_refresh_buffer: Duration::from_secs(300),
            token_lifetime: Duration::from_secs(4 * 60 * 60),
            token_exchange_attempts: 3,
            token_retry_backoff: Duration::from_millis(250),
            token_exchange_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 32,
            pool_max_concurrent: 256,
            pool_acquire_timeout: Duration::from_millis(2000),
            upstream_timeout: Duration::from_secs(300),
            upstream_connect_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(120),
            failover_order: None,
            usage_log_path: None,
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            gateway_config_path: env::var("SWITCHYARD_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.gateway_config_path),
            host: env::var("HOST").ok(),
            port: env::var("PORT")
                .ok()
                .map(|p| p.parse())
                .transpose()
                .context("Invalid PORT")?,

            token_refresh_buffer: secs_var("TOKEN_REFRESH_BUFFER_SECS", 300)?,
            token_lifetime: secs_var("TOKEN_LIFETIME_SECS", 4 * 60 * 60)?,
            token_exchange_attempts: env::var("TOKEN_EXCHANGE_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid TOKEN_EXCHANGE_ATTEMPTS")?,
            token_retry_backoff: defaults.token_retry_backoff,
            token_exchange_timeout: secs_var("TOKEN_EXCHANGE_TIMEOUT_SECS", 30)?,

            pool_max_idle_per_host: env::var("POOL_MAX_IDLE_PER_HOST")
                .unwrap_or_else(|_| "32".to_string())
                .parse()
                .context("Invalid POOL_MAX_IDLE_PER_HOST")?,
            pool_max_concurrent: env::var("POOL_MAX_CONCURRENT")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .context("Invalid POOL_MAX_CONCURRENT")?,
            pool_acquire_timeout: Duration::from_millis(
                env::var("POOL_ACQUIRE_TIMEOUT_MS")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .context("Invalid POOL_ACQUIRE_TIMEOUT_MS")?,
            ),

            upstream_timeout: secs_var("UPSTREAM_TIMEOUT_SECS", 300)?,
            upstream_connect_timeout: secs_var("UPSTREAM_CONNECT_TIMEOUT_SECS", 10)?,
            stream_idle_timeout: secs_var("STREAM_IDLE_TIMEOUT_SECS", 120)?,

            failover_order: env::var("FAILOVER_ORDER")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("Invalid FAILOVER_ORDER")?,

            usage_log_path: env::var("USAGE_LOG_PATH").ok().map(PathBuf::from),
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    let secs: u64 = env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))?;
    Ok(Duration::from_secs(secs))
}

/// Service credential of a tenant, as issued by the upstream platform.
/// Other fields of the issued key, such as `serviceurls`, are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceKey {
    pub clientid: String,
    pub clientsecret: String,
    /// Base URL of the token endpoint
    pub url: String,
}

/// One tenant ("subaccount") entry of the gateway file
#[derive(Debug, Clone, Deserialize)]
pub struct TenantSection {
    pub resource_group: String,
    /// Path of a service key file, relative to the gateway file
    #[serde(default)]
    pub service_key_json: Option<PathBuf>,
    /// Inline service key; filled from `service_key_json` at load time
    #[serde(default)]
    pub service_key: Option<ServiceKey>,
    /// Model name -> ordered deployment URLs
    #[serde(default)]
    pub deployment_models: HashMap<String, Vec<String>>,
}

/// Per-million-token prices of a model
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct ModelPrice {
    #[serde(default)]
    pub input_per_million: f64,
    #[serde(default)]
    pub output_per_million: f64,
}

/// Field denylist applied to bodies sent to one backend family
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SanitizeRules {
    /// Keys removed wherever they appear
    #[serde(default)]
    pub keys: Vec<String>,
    /// Vendor-extension wrappers removed together with a denied key
    #[serde(default)]
    pub wrappers: Vec<String>,
}

impl Default for SanitizeRules {
    fn default() -> Self {
        Self {
            keys: vec!["cache_control".to_string()],
            wrappers: vec!["custom".to_string()],
        }
    }
}

/// Parsed gateway file
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayFile {
    /// Tenants keyed by name. A BTreeMap keeps tenant order stable.
    #[serde(rename = "subAccounts")]
    pub sub_accounts: std::collections::BTreeMap<String, TenantSection>,
    pub secret_authentication_tokens: Vec<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub failover_order: Option<FailoverOrder>,
    #[serde(default)]
    pub pricing: HashMap<String, ModelPrice>,
    #[serde(default)]
    pub sanitize: HashMap<BackendFamily, SanitizeRules>,
}

impl GatewayFile {
    /// Parse a gateway file from a JSON string without touching the disk.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    /// Read the gateway file and inline every referenced service key.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Unreadable(path.display().to_string(), e.to_string()))?;
        let mut file = Self::from_json(&raw)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for (name, tenant) in file.sub_accounts.iter_mut() {
            if tenant.service_key.is_some() {
                continue;
            }
            let Some(key_path) = tenant.service_key_json.as_ref() else {
                continue;
            };
            let key_path = base.join(key_path);
            let raw = std::fs::read_to_string(&key_path).map_err(|e| {
                ConfigError::MissingCredential(
                    name.clone(),
                    format!("{}: {}", key_path.display(), e),
                )
            })?;
            let key: ServiceKey = serde_json::from_str(&raw).map_err(|e| {
                ConfigError::MissingCredential(name.clone(), format!("{}: {}", key_path.display(), e))
            })?;
            tenant.service_key = Some(key);
        }

        Ok(file)
    }

    /// Listen address, with environment overrides applied
    pub fn listen_addr(&self, config: &Config) -> (String, u16) {
        let host = config
            .host
            .clone()
            .or_else(|| self.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = config.port.or(self.port).unwrap_or(DEFAULT_PORT);
        (host, port)
    }
}

/// Bind the listen socket. `host` may be a name such as `localhost`; every
/// address it resolves to is tried in turn.
pub async fn bind_listener(host: &str, port: u16) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind listen address {}:{}", host, port))
}
