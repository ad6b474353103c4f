//! Observability metrics
//!
//! Prometheus metrics for the retrieval core. `init_metrics` installs the
//! recorder once at startup; the `/metrics` route renders it.

use axum::response::IntoResponse;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder
///
/// Must be called once at startup before recording any metrics.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    register_default_metrics();

    METRICS_HANDLE.get_or_init(|| handle.clone());
    handle
}

/// Register default application metrics
fn register_default_metrics() {
    counter!("parley_context_requests_total").absolute(0);
    counter!("parley_context_degraded_total").absolute(0);
    counter!("parley_ingest_documents_total").absolute(0);
    counter!("parley_ingest_chunks_total").absolute(0);

    histogram!("parley_context_latency_seconds").record(0.0);
    histogram!("parley_ingest_duration_seconds").record(0.0);
}

/// Render the Prometheus exposition text
pub async fn metrics_endpoint() -> impl IntoResponse {
    match METRICS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
