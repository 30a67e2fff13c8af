//! Service credential -> access token exchange

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::registry::Tenant;

use super::UpstreamAuthError;

/// A freshly issued access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub value: String,
    /// Lifetime reported by the issuer, if any
    pub expires_in: Option<Duration>,
}

/// Exchanges a tenant's service credential for a short-lived access token.
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    async fn exchange(&self, tenant: &Tenant) -> Result<IssuedToken, UpstreamAuthError>;
}

/// Bound on one exchange attempt when none is configured
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth2 client-credentials grant against the tenant's token endpoint
pub struct OAuthClientCredentials {
    http: reqwest::Client,
    timeout: Duration,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

impl OAuthClientCredentials {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    /// Bound each exchange attempt, covering both the request and the body read
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn token_url(base: &str) -> String {
        format!(
            "{}/oauth/token?grant_type=client_credentials",
            base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CredentialExchange for OAuthClientCredentials {
    async fn exchange(&self, tenant: &Tenant) -> Result<IssuedToken, UpstreamAuthError> {
        let key = &tenant.credential;
        let url = Self::token_url(&key.url);
        debug!(tenant = %tenant.name, url = %url, "Requesting access token");

        let response = self
            .http
            .post(&url)
            .basic_auth(&key.clientid, Some(&key.clientsecret))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| unreachable_error(tenant, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamAuthError::Rejected {
                tenant: tenant.name.clone(),
                status: status.as_u16(),
                body: truncate(&body, 256),
            });
        }

        let parsed: TokenResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                unreachable_error(tenant, e)
            } else {
                UpstreamAuthError::InvalidResponse {
                    tenant: tenant.name.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let value = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamAuthError::InvalidResponse {
                tenant: tenant.name.clone(),
                message: "missing access_token".to_string(),
            })?;

        Ok(IssuedToken {
            value,
            expires_in: parsed.expires_in.map(Duration::from_secs),
        })
    }
}

fn unreachable_error(tenant: &Tenant, err: reqwest::Error) -> UpstreamAuthError {
    let message = if err.is_timeout() {
        "token endpoint timed out".to_string()
    } else {
        err.to_string()
    };
    UpstreamAuthError::Unreachable {
        tenant: tenant.name.clone(),
        message,
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
