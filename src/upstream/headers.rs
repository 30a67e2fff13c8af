//! Header utilities for upstream calls
//!
//! Caller headers are never forwarded. Every upstream request carries only the
//! tenant's access token, its resource group and the content type.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE,
};

/// Resource-group scope header of the upstream platform
pub const RESOURCE_GROUP: &str = "AI-Resource-Group";

/// Headers for one upstream request
pub fn build_upstream_headers(
    access_token: &str,
    resource_group: &str,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", access_token))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(
        HeaderName::from_static("ai-resource-group"),
        HeaderValue::from_str(resource_group)?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}
