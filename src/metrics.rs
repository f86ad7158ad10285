#[cfg(feature = "server")]
use axum::{http::StatusCode, response::IntoResponse};
#[cfg(feature = "server")]
use metrics::{counter, histogram};
#[cfg(feature = "server")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "server")]
use std::sync::OnceLock;

#[cfg(feature = "server")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[cfg(feature = "server")]
pub fn init_metrics() {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Metrics recorder already initialized");
                return;
            }

            // Initialize metrics with zero values
            counter!("geo_requests_total", "provider" => "none").absolute(0);
            counter!("geo_cache_hits_total").absolute(0);
            counter!("geo_cache_misses_total").absolute(0);
            counter!("geo_errors_total", "error_type" => "unknown").absolute(0);
            histogram!("geo_request_duration_seconds").record(0.0);
        }
        Err(e) => {
            tracing::error!("Failed to install metrics recorder: {}", e);
        }
    }
}

/// Count a resolution, labelled with the provider that answered.
#[cfg(feature = "server")]
pub fn increment_requests(provider: Option<&str>) {
    let provider = provider.unwrap_or("none").to_string();
    counter!("geo_requests_total", "provider" => provider).increment(1);
}

#[cfg(feature = "server")]
pub fn increment_cache_hits() {
    counter!("geo_cache_hits_total").increment(1);
}

#[cfg(feature = "server")]
pub fn increment_cache_misses() {
    counter!("geo_cache_misses_total").increment(1);
}

#[cfg(feature = "server")]
pub fn increment_errors(error_type: &str) {
    counter!("geo_errors_total", "error_type" => error_type.to_string()).increment(1);
}

#[cfg(feature = "server")]
pub fn record_query_time(duration_ms: u64) {
    let duration_seconds = duration_ms as f64 / 1000.0;
    histogram!("geo_request_duration_seconds").record(duration_seconds);
}

#[cfg(feature = "server")]
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized".to_string()),
    }
}
