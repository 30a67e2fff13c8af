//! Switchyard - multi-tenant LLM gateway
//!
//! This library provides the core functionality for the Switchyard server.
//! Callers speak the OpenAI, Anthropic or Google wire format; requests are
//! load-balanced across the deployments of several tenants, failed over on
//! transport errors and translated to the format each backend speaks.

pub mod config;
pub mod credentials;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod routing;
pub mod singleflight;
pub mod streaming;
pub mod tokens;
pub mod translate;
pub mod upstream;
pub mod usage;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};

pub use crate::config::{Config, GatewayFile};
pub use crate::credentials::{CredentialExchange, OAuthClientCredentials, TokenManager, TokenSettings};
pub use crate::registry::ConfigRegistry;
pub use crate::routing::{BackendSelector, FailoverOrder};
pub use crate::upstream::{ClientCache, ConnectionPool, PoolSettings};
pub use crate::usage::{JsonLinesUsageSink, TracingUsageSink, UsageFact, UsageSink};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ConfigRegistry>,
    pub selector: Arc<BackendSelector>,
    pub token_manager: Arc<TokenManager>,
    /// Pooled transport and per-(tenant, model) backend clients
    pub client_cache: Arc<ClientCache>,
    pub usage_sink: Arc<dyn UsageSink>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new application state
    ///
    /// Credential exchanges use the OAuth client-credentials grant over the
    /// shared upstream transport.
    pub fn new(
        config: Config,
        registry: ConfigRegistry,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(PoolSettings::from(&config))?);
        let exchange: Arc<dyn CredentialExchange> = Arc::new(
            OAuthClientCredentials::new(pool.session().clone())
                .with_timeout(config.token_exchange_timeout),
        );

        Ok(Self::assemble(config, registry, exchange, pool, usage_sink))
    }

    fn assemble(
        config: Config,
        registry: ConfigRegistry,
        exchange: Arc<dyn CredentialExchange>,
        pool: Arc<ConnectionPool>,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Self {
        let registry = Arc::new(registry);
        let selector = Arc::new(BackendSelector::new(&registry));
        let token_manager = Arc::new(TokenManager::new(exchange, TokenSettings::from(&config)));
        let client_cache = Arc::new(ClientCache::new(pool, config.upstream_timeout));

        Self {
            config,
            registry,
            selector,
            token_manager,
            client_cache,
            usage_sink,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Create a new application state for testing with an injected
    /// credential exchange
    ///
    /// Backends are expected to be mock servers; the pool uses the settings
    /// derived from `config`.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(
        config: Config,
        registry: ConfigRegistry,
        exchange: Arc<dyn CredentialExchange>,
        usage_sink: Arc<dyn UsageSink>,
    ) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(PoolSettings::from(&config))?);
        Ok(Self::assemble(config, registry, exchange, pool, usage_sink))
    }
}
