//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format for monitoring.

use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export.
///
/// `None` when another recorder was installed first (e.g. several test
/// servers in one process); metrics are then recorded but not rendered here.
static PROMETHEUS_HANDLE: Lazy<Option<PrometheusHandle>> =
    Lazy::new(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    });

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "switchyard_requests_total",
        "Total number of requests processed"
    );
    metrics::describe_counter!(
        "switchyard_failovers_total",
        "Dispatch attempts that failed and moved on to the next candidate"
    );
    metrics::describe_counter!(
        "switchyard_token_exchanges_total",
        "Credential exchanges against tenant token endpoints"
    );
    metrics::describe_counter!("switchyard_tokens_total", "Total tokens processed");
    metrics::describe_counter!(
        "switchyard_pool_saturated_total",
        "Requests refused because no upstream slot became free"
    );
    metrics::describe_counter!(
        "switchyard_streams_cancelled_total",
        "Streams abandoned by the caller before completion"
    );
    metrics::describe_histogram!(
        "switchyard_request_duration_seconds",
        "Request duration in seconds"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.as_ref() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder unavailable\n".to_string(),
        ),
    }
}

/// Record a finished request
pub fn record_request(endpoint: &str, status: StatusCode, duration_secs: f64) {
    metrics::counter!(
        "switchyard_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!("switchyard_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration_secs);
}

/// Record tokens processed
pub fn record_tokens(model: &str, kind: &str, count: u64) {
    metrics::counter!(
        "switchyard_tokens_total",
        "model" => model.to_string(),
        "kind" => kind.to_string()
    )
    .increment(count);
}
