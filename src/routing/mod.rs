//! Backend selection
//!
//! Turns a model name into the ordered list of (tenant, deployment)
//! candidates one request walks through on failover.

mod selector;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use selector::BackendSelector;

/// How the candidates after the primary are ordered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverOrder {
    /// Alternate tenants on every step
    #[default]
    Interleave,
    /// Exhaust the primary's tenant before moving to the next tenant
    TenantFirst,
}

#[derive(Debug, Error)]
#[error("unknown failover order '{0}', expected 'interleave' or 'tenant_first'")]
pub struct UnknownFailoverOrder(String);

impl FromStr for FailoverOrder {
    type Err = UnknownFailoverOrder;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interleave" => Ok(Self::Interleave),
            "tenant_first" | "tenant-first" => Ok(Self::TenantFirst),
            other => Err(UnknownFailoverOrder(other.to_string())),
        }
    }
}

/// No configured tenant exposes the requested model
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("model '{0}' is not available")]
pub struct ModelNotFoundError(pub String);
