//! Tenant credential lifecycle
//!
//! Access tokens are owned by the [`TokenManager`]; other components only hold
//! one for the duration of a single upstream call.

pub mod exchange;
pub mod manager;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use exchange::{CredentialExchange, IssuedToken, OAuthClientCredentials};
pub use manager::{TokenManager, TokenSettings};

/// Credential exchange failures. Cloneable so every waiter of a shared
/// refresh receives the same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamAuthError {
    #[error("token endpoint for tenant '{tenant}' is unreachable: {message}")]
    Unreachable { tenant: String, message: String },

    #[error("token endpoint for tenant '{tenant}' returned {status}: {body}")]
    Rejected {
        tenant: String,
        status: u16,
        body: String,
    },

    #[error("token endpoint for tenant '{tenant}' returned an invalid response: {message}")]
    InvalidResponse { tenant: String, message: String },
}

impl UpstreamAuthError {
    /// Whether another exchange attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unreachable { .. } => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse { .. } => false,
        }
    }
}

/// A bearer token for one tenant
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub tenant: String,
    pub value: String,
    pub expires_at: DateTime<Utc>,
    /// From this instant on the token is refreshed before use
    pub refresh_at: DateTime<Utc>,
}

impl AccessToken {
    /// A token issued at `now` for `lifetime`.
    ///
    /// The refresh buffer is capped at half the lifetime, so a token issued
    /// for less than the buffer is still served for a while instead of being
    /// exchanged again on every use.
    pub fn issued(
        tenant: String,
        value: String,
        now: DateTime<Utc>,
        lifetime: Duration,
        buffer: Duration,
    ) -> Self {
        let buffer = buffer.min(lifetime / 2);
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::zero());
        let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::zero());
        let expires_at = now + lifetime;
        Self {
            tenant,
            value,
            expires_at,
            refresh_at: expires_at - buffer,
        }
    }

    /// Whether the token may be used at `now` without a refresh
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("tenant", &self.tenant)
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}
