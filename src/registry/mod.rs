//! Config registry
//!
//! The validated, read-only view of the gateway file: tenants, their
//! deployments, the model index and the accepted caller tokens. Built once at
//! startup and never mutated; reconfiguration builds a new registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{GatewayFile, ModelPrice, SanitizeRules, ServiceKey};
use crate::routing::FailoverOrder;
use crate::upstream::BackendFamily;

/// Fatal configuration problems. The process must not start serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed gateway configuration: {0}")]
    Malformed(String),

    #[error("cannot read {0}: {1}")]
    Unreadable(String, String),

    #[error("tenant '{0}' has no usable service credential: {1}")]
    MissingCredential(String, String),

    #[error("tenant '{tenant}' lists an empty deployment URL for model '{model}'")]
    EmptyDeploymentUrl { tenant: String, model: String },

    #[error("tenant '{tenant}' lists no deployments for model '{model}'")]
    NoDeployments { tenant: String, model: String },

    #[error("no tenants configured")]
    NoTenants,

    #[error("accepted caller token list is empty")]
    NoCallerTokens,
}

/// A backend endpoint serving one model under one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub tenant: String,
    pub model: String,
    pub url: String,
}

/// A credentialed account scope
#[derive(Debug)]
pub struct Tenant {
    pub name: String,
    /// Sent upstream as `AI-Resource-Group`
    pub resource_group: String,
    pub credential: ServiceKey,
    deployments: HashMap<String, Vec<Arc<Deployment>>>,
}

impl Tenant {
    /// Deployments of `model` in configuration order
    pub fn deployments(&self, model: &str) -> &[Arc<Deployment>] {
        self.deployments.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.deployments.keys().map(String::as_str)
    }
}

/// One (tenant, deployment) pair able to serve a request
#[derive(Debug, Clone)]
pub struct Candidate {
    pub tenant: Arc<Tenant>,
    pub deployment: Arc<Deployment>,
}

impl Candidate {
    pub fn tenant_name(&self) -> &str {
        &self.tenant.name
    }

    pub fn url(&self) -> &str {
        &self.deployment.url
    }
}

/// All candidates for one model, grouped per tenant in tenant order
#[derive(Debug)]
pub struct ModelEntry {
    pub model: String,
    pub family: BackendFamily,
    groups: Vec<Vec<Candidate>>,
}

impl ModelEntry {
    /// Per-tenant candidate groups; never empty, no group is empty
    pub fn groups(&self) -> &[Vec<Candidate>] {
        &self.groups
    }

    /// Total number of distinct candidates
    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Model name -> candidates across all tenants
#[derive(Debug, Default)]
pub struct ModelIndex {
    entries: BTreeMap<String, ModelEntry>,
}

impl ModelIndex {
    fn build(tenants: &[Arc<Tenant>]) -> Self {
        let mut entries: BTreeMap<String, ModelEntry> = BTreeMap::new();

        for tenant in tenants {
            let mut models: Vec<&str> = tenant.models().collect();
            models.sort_unstable();

            for model in models {
                let mut seen = HashSet::new();
                let group: Vec<Candidate> = tenant
                    .deployments(model)
                    .iter()
                    .filter(|d| seen.insert(d.url.clone()))
                    .map(|d| Candidate {
                        tenant: Arc::clone(tenant),
                        deployment: Arc::clone(d),
                    })
                    .collect();

                entries
                    .entry(model.to_string())
                    .or_insert_with(|| ModelEntry {
                        model: model.to_string(),
                        family: BackendFamily::for_model(model),
                        groups: Vec::new(),
                    })
                    .groups
                    .push(group);
            }
        }

        Self { entries }
    }

    pub fn get(&self, model: &str) -> Option<&ModelEntry> {
        self.entries.get(model)
    }

    /// Model names in sorted order
    pub fn models(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accepted caller tokens, stored as SHA-256 digests
#[derive(Debug, Default)]
pub struct CallerTokens {
    digests: HashSet<[u8; 32]>,
}

impl CallerTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            digests: tokens.into_iter().map(|t| digest(t.as_ref())).collect(),
        }
    }

    pub fn contains(&self, token: &str) -> bool {
        self.digests.contains(&digest(token))
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Validated gateway configuration
#[derive(Debug)]
pub struct ConfigRegistry {
    tenants: Vec<Arc<Tenant>>,
    index: ModelIndex,
    callers: CallerTokens,
    pricing: HashMap<String, ModelPrice>,
    sanitize: HashMap<BackendFamily, SanitizeRules>,
    failover_order: FailoverOrder,
}

impl ConfigRegistry {
    /// Validate a parsed gateway file and build the model index.
    pub fn from_file(file: GatewayFile) -> Result<Self, ConfigError> {
        if file.sub_accounts.is_empty() {
            return Err(ConfigError::NoTenants);
        }
        let callers: Vec<&String> = file
            .secret_authentication_tokens
            .iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        if callers.is_empty() {
            return Err(ConfigError::NoCallerTokens);
        }

        let mut tenants = Vec::with_capacity(file.sub_accounts.len());
        for (name, section) in file.sub_accounts {
            let credential = section.service_key.ok_or_else(|| {
                ConfigError::MissingCredential(
                    name.clone(),
                    "neither service_key nor a readable service_key_json".to_string(),
                )
            })?;
            validate_credential(&name, &credential)?;

            let mut deployments = HashMap::with_capacity(section.deployment_models.len());
            for (model, urls) in section.deployment_models {
                if urls.is_empty() {
                    return Err(ConfigError::NoDeployments {
                        tenant: name.clone(),
                        model,
                    });
                }
                let mut list = Vec::with_capacity(urls.len());
                for url in urls {
                    let url = url.trim().trim_end_matches('/').to_string();
                    if url.is_empty() {
                        return Err(ConfigError::EmptyDeploymentUrl {
                            tenant: name.clone(),
                            model,
                        });
                    }
                    list.push(Arc::new(Deployment {
                        tenant: name.clone(),
                        model: model.clone(),
                        url,
                    }));
                }
                deployments.insert(model, list);
            }

            debug!(tenant = %name, models = deployments.len(), "Loaded tenant");
            tenants.push(Arc::new(Tenant {
                name,
                resource_group: section.resource_group,
                credential,
                deployments,
            }));
        }

        let index = ModelIndex::build(&tenants);
        let mut sanitize: HashMap<BackendFamily, SanitizeRules> = BackendFamily::ALL
            .iter()
            .map(|f| (*f, SanitizeRules::default()))
            .collect();
        sanitize.extend(file.sanitize);

        info!(
            tenants = tenants.len(),
            models = index.len(),
            callers = callers.len(),
            "Gateway configuration validated"
        );

        Ok(Self {
            tenants,
            index,
            callers: CallerTokens::new(callers),
            pricing: file.pricing,
            sanitize,
            failover_order: file.failover_order.unwrap_or_default(),
        })
    }

    /// Candidates for `model`, or `None` if no tenant exposes it
    pub fn resolve(&self, model: &str) -> Option<&ModelEntry> {
        self.index.get(model)
    }

    pub fn is_authorized_caller(&self, token: &str) -> bool {
        self.callers.contains(token)
    }

    pub fn index(&self) -> &ModelIndex {
        &self.index
    }

    pub fn tenants(&self) -> &[Arc<Tenant>] {
        &self.tenants
    }

    pub fn price(&self, model: &str) -> ModelPrice {
        self.pricing.get(model).copied().unwrap_or_default()
    }

    pub fn sanitize_rules(&self, family: BackendFamily) -> SanitizeRules {
        self.sanitize.get(&family).cloned().unwrap_or_default()
    }

    pub fn failover_order(&self) -> FailoverOrder {
        self.failover_order
    }

    /// Replace the failover order, e.g. from an environment override
    pub fn with_failover_order(mut self, order: FailoverOrder) -> Self {
        self.failover_order = order;
        self
    }
}

fn validate_credential(tenant: &str, key: &ServiceKey) -> Result<(), ConfigError> {
    let missing = [
        ("clientid", key.clientid.trim()),
        ("clientsecret", key.clientsecret.trim()),
        ("url", key.url.trim()),
    ]
    .into_iter()
    .find(|(_, v)| v.is_empty());

    match missing {
        Some((field, _)) => Err(ConfigError::MissingCredential(
            tenant.to_string(),
            format!("service key field '{}' is empty", field),
        )),
        None => Ok(()),
    }
}
