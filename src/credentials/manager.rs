//! Per-tenant access token cache with single-flight refresh

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::registry::Tenant;
use crate::singleflight::SingleFlight;

use super::{AccessToken, CredentialExchange, UpstreamAuthError};

/// Token lifetime policy
#[derive(Debug, Clone, Copy)]
pub struct TokenSettings {
    /// A token with less remaining lifetime than this is refreshed before use
    pub refresh_buffer: Duration,
    /// Lifetime assumed when the issuer does not report one
    pub default_lifetime: Duration,
    /// Exchange attempts per refresh
    pub max_attempts: u32,
    /// Base delay between attempts, grows linearly
    pub retry_backoff: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(300),
            default_lifetime: Duration::from_secs(4 * 60 * 60),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

impl From<&Config> for TokenSettings {
    fn from(config: &Config) -> Self {
        Self {
            refresh_buffer: config.token_refresh_buffer,
            default_lifetime: config.token_lifetime,
            max_attempts: config.token_exchange_attempts.max(1),
            retry_backoff: config.token_retry_backoff,
        }
    }
}

type TokenCache = Arc<RwLock<HashMap<String, AccessToken>>>;

/// Hands out access tokens per tenant.
///
/// Concurrent `acquire` calls for a tenant without a fresh token collapse into
/// one credential exchange; all of them receive its result.
pub struct TokenManager {
    exchange: Arc<dyn CredentialExchange>,
    cache: TokenCache,
    flights: SingleFlight<String, Result<AccessToken, UpstreamAuthError>>,
    settings: TokenSettings,
}

impl TokenManager {
    pub fn new(exchange: Arc<dyn CredentialExchange>, settings: TokenSettings) -> Self {
        Self {
            exchange,
            cache: Arc::new(RwLock::new(HashMap::new())),
            flights: SingleFlight::new(),
            settings,
        }
    }

    /// A token for `tenant` with more remaining lifetime than the refresh buffer.
    ///
    /// For tokens issued with less than twice the buffer, half their lifetime
    /// stands in for the buffer.
    pub async fn acquire(&self, tenant: &Arc<Tenant>) -> Result<AccessToken, UpstreamAuthError> {
        if let Some(token) = fresh_token(&self.cache, &tenant.name) {
            return Ok(token);
        }

        let exchange = Arc::clone(&self.exchange);
        let cache = Arc::clone(&self.cache);
        let settings = self.settings;
        let name = tenant.name.clone();
        let tenant = Arc::clone(tenant);

        self.flights
            .run(name.clone(), move || refresh(exchange, cache, tenant, settings))
            .await
            .unwrap_or_else(|e| {
                Err(UpstreamAuthError::Unreachable {
                    tenant: name,
                    message: e.to_string(),
                })
            })
    }

    /// Drop the cached token of `tenant`, e.g. after the upstream rejected it.
    pub fn invalidate(&self, tenant: &str) {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tenant);
        if removed.is_some() {
            info!(tenant = %tenant, "Invalidated cached access token");
        }
    }
}

fn fresh_token(cache: &TokenCache, tenant: &str) -> Option<AccessToken> {
    cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(tenant)
        .filter(|t| t.is_fresh(Utc::now()))
        .cloned()
}

async fn refresh(
    exchange: Arc<dyn CredentialExchange>,
    cache: TokenCache,
    tenant: Arc<Tenant>,
    settings: TokenSettings,
) -> Result<AccessToken, UpstreamAuthError> {
    // A flight that finished just before this one started may have cached a token.
    if let Some(token) = fresh_token(&cache, &tenant.name) {
        return Ok(token);
    }

    let mut attempt = 0;
    let issued = loop {
        attempt += 1;
        match exchange.exchange(&tenant).await {
            Ok(issued) => break issued,
            Err(e) if attempt < settings.max_attempts && e.is_retryable() => {
                let delay = backoff(settings.retry_backoff, attempt);
                warn!(
                    tenant = %tenant.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Credential exchange failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(tenant = %tenant.name, attempt, error = %e, "Credential exchange failed");
                metrics::counter!(
                    "switchyard_token_exchanges_total",
                    "tenant" => tenant.name.clone(),
                    "outcome" => "failure"
                )
                .increment(1);
                return Err(e);
            }
        }
    };

    let lifetime = issued.expires_in.unwrap_or(settings.default_lifetime);
    if lifetime < settings.refresh_buffer {
        debug!(
            tenant = %tenant.name,
            lifetime_secs = lifetime.as_secs(),
            "Issued token is shorter lived than the refresh buffer"
        );
    }
    let token = AccessToken::issued(
        tenant.name.clone(),
        issued.value,
        Utc::now(),
        lifetime,
        settings.refresh_buffer,
    );

    cache
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(tenant.name.clone(), token.clone());

    metrics::counter!(
        "switchyard_token_exchanges_total",
        "tenant" => tenant.name.clone(),
        "outcome" => "success"
    )
    .increment(1);
    debug!(tenant = %tenant.name, expires_at = %token.expires_at, attempt, "Access token refreshed");

    Ok(token)
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let jitter = rand::rng().random_range(0..=base_ms / 2);
    Duration::from_millis(base_ms * u64::from(attempt) + jitter)
}
