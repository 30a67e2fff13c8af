//! Per-(tenant, model) backend clients
//!
//! A [`BackendClient`] binds a tenant's resource group and a family adapter to
//! the shared transport. Access tokens are passed per call, so a client never
//! has to be rebuilt when its tenant's token is refreshed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::credentials::AccessToken;
use crate::registry::{Deployment, Tenant};
use crate::singleflight::{FlightAborted, SingleFlight};

use super::headers::build_upstream_headers;
use super::{adapter_for, BackendAdapter, BackendFamily, ConnectionPool, DispatchError};

/// Upstream operation of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Chat { stream: bool },
    Embeddings,
}

pub struct BackendClient {
    tenant: Arc<Tenant>,
    model: String,
    adapter: Arc<dyn BackendAdapter>,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl BackendClient {
    pub fn family(&self) -> BackendFamily {
        self.adapter.family()
    }

    pub fn tenant(&self) -> &Arc<Tenant> {
        &self.tenant
    }

    /// Endpoint of `op` on a deployment, if the family supports it
    pub fn endpoint(&self, deployment: &Deployment, op: Operation) -> Option<String> {
        match op {
            Operation::Chat { stream } => {
                Some(self.adapter.chat_url(&deployment.url, &self.model, stream))
            }
            Operation::Embeddings => self.adapter.embeddings_url(&deployment.url),
        }
    }

    /// Apply the family's body quirks for `op`
    pub fn finalize_body(&self, body: &mut Value, op: Operation) {
        if let Operation::Chat { stream } = op {
            self.adapter.finalize_body(body, &self.model, stream);
        }
    }

    /// POST `body` to `url`. Non-2xx statuses become [`DispatchError::Status`].
    ///
    /// Non-streaming calls are bounded by the request timeout end to end;
    /// streaming calls only until response headers arrive.
    pub async fn post(
        &self,
        url: &str,
        token: &AccessToken,
        body: &Value,
        stream: bool,
    ) -> Result<reqwest::Response, DispatchError> {
        let headers = build_upstream_headers(&token.value, &self.tenant.resource_group)
            .map_err(|e| DispatchError::Transport(format!("invalid header: {}", e)))?;

        let mut request = self.http.post(url).headers(headers).json(body);
        if !stream {
            request = request.timeout(self.request_timeout);
        }

        let response = match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(result) => result.map_err(DispatchError::from_reqwest)?,
            Err(_) => {
                return Err(DispatchError::Transport(format!(
                    "timeout: no response within {} s",
                    self.request_timeout.as_secs()
                )))
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(DispatchError::Status {
            status: status.as_u16(),
            body: excerpt(&body, 2000),
        })
    }
}

fn excerpt(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

type ClientKey = (String, String);

/// Lazily built clients, one per (tenant, model)
pub struct ClientCache {
    pool: Arc<ConnectionPool>,
    request_timeout: Duration,
    clients: RwLock<HashMap<ClientKey, Arc<BackendClient>>>,
    flights: SingleFlight<ClientKey, Arc<BackendClient>>,
    built: Arc<AtomicUsize>,
}

impl ClientCache {
    pub fn new(pool: Arc<ConnectionPool>, request_timeout: Duration) -> Self {
        Self {
            pool,
            request_timeout,
            clients: RwLock::new(HashMap::new()),
            flights: SingleFlight::new(),
            built: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// The client for (`tenant`, `model`), built on first use.
    pub async fn client(
        &self,
        tenant: &Arc<Tenant>,
        model: &str,
    ) -> Result<Arc<BackendClient>, FlightAborted> {
        let key = (tenant.name.clone(), model.to_string());
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(client));
        }

        let tenant = Arc::clone(tenant);
        let model = model.to_string();
        let http = self.pool.session().clone();
        let request_timeout = self.request_timeout;
        let built = Arc::clone(&self.built);

        let client = self
            .flights
            .run(key.clone(), move || async move {
                built.fetch_add(1, Ordering::SeqCst);
                debug!(tenant = %tenant.name, model = %model, "Building backend client");
                Arc::new(BackendClient {
                    adapter: adapter_for(BackendFamily::for_model(&model)),
                    tenant,
                    model,
                    http,
                    request_timeout,
                })
            })
            .await?;

        Ok(self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert_with(|| Arc::clone(&client))
            .clone())
    }

    /// Number of clients constructed so far
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}
