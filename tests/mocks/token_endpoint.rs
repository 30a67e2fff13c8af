//! Mock OAuth token endpoint for testing
//!
//! Every tenant's service key points at `{uri}/{tenant}`, so the token
//! endpoint of tenant `t` is `POST {uri}/t/oauth/token?grant_type=client_credentials`.

use std::time::Duration;

use serde_json::json;
use wiremock::{
    matchers::{header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

/// Access token issued for `tenant`
pub fn access_token_for(tenant: &str) -> String {
    format!("token-{}", tenant)
}

/// Mock token endpoint shared by all tenants
pub struct MockTokenEndpoint {
    server: MockServer,
}

impl MockTokenEndpoint {
    /// Start a new mock token endpoint
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    /// Get the mock server URI
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Base URL written into the service key of `tenant`
    pub fn tenant_url(&self, tenant: &str) -> String {
        format!("{}/{}", self.server.uri(), tenant)
    }

    fn token_path(tenant: &str) -> String {
        format!("/{}/oauth/token", tenant)
    }

    /// Issue `token-{tenant}` valid for an hour
    pub async fn mock_token_success(&self, tenant: &str) {
        self.mock_token_delayed(tenant, Duration::ZERO).await;
    }

    /// Issue `token-{tenant}` after `delay`
    pub async fn mock_token_delayed(&self, tenant: &str, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(Self::token_path(tenant)))
            .and(query_param("grant_type", "client_credentials"))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "access_token": access_token_for(tenant),
                        "token_type": "bearer",
                        "expires_in": 3600
                    }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Refuse the credentials of `tenant`
    pub async fn mock_token_rejected(&self, tenant: &str) {
        Mock::given(method("POST"))
            .and(path(Self::token_path(tenant)))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "Bad credentials"
            })))
            .mount(&self.server)
            .await;
    }

    /// Number of exchanges performed for `tenant`
    pub async fn exchanges(&self, tenant: &str) -> usize {
        let token_path = Self::token_path(tenant);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == token_path)
            .count()
    }
}
