// src/metrics/mod.rs
// Prometheus metrics for the QA orchestrator. Thin wrapper over the
// `metrics`/`metrics-exporter-prometheus` crates, following the teacher's
// own `metrics::mod` shape (a global recorder installed once, a handful of
// named counters/histograms/gauges, a `/metrics` handler). Kept even though
// spec.md doesn't mention observability: a Non-goal on rate limiting and
// secrets doesn't exclude the ambient metrics surface the teacher ships on
// every service.

use axum::{http::StatusCode, response::IntoResponse};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Requests currently streaming an SSE response.
static ACTIVE_STREAMS: AtomicU64 = AtomicU64::new(0);

pub fn init_metrics() {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    PROMETHEUS_HANDLE
        .set(handle)
        .expect("Prometheus handle already initialized");

    info!("Prometheus metrics initialized");
}

/// GET /metrics
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized".to_string()),
    }
}

/// Record a completed `/ask` request's route and outcome.
pub fn record_request(route: &str, outcome: &str) {
    counter!("qa_requests_total", "route" => route.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

/// Record end-to-end request latency, labeled by route.
pub fn record_request_duration(route: &str, duration_seconds: f64) {
    histogram!("qa_request_duration_seconds", "route" => route.to_string()).record(duration_seconds);
}

/// Record a backend LLM call outcome.
pub fn record_llm_call(model: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("qa_llm_calls_total", "model" => model.to_string(), "status" => status).increment(1);
}

/// Record tokens streamed back on each channel for a completed request.
pub fn record_tokens(reasoning_tokens: u64, final_tokens: u64) {
    counter!("qa_tokens_total", "channel" => "reasoning").increment(reasoning_tokens);
    counter!("qa_tokens_total", "channel" => "final").increment(final_tokens);
}

pub fn stream_opened() {
    let count = ACTIVE_STREAMS.fetch_add(1, Ordering::SeqCst) + 1;
    gauge!("qa_active_streams").set(count as f64);
}

pub fn stream_closed() {
    let count = ACTIVE_STREAMS.fetch_sub(1, Ordering::SeqCst) - 1;
    gauge!("qa_active_streams").set(count as f64);
}

/// Scoped timer: records `qa_request_duration_seconds` on drop, labeled by
/// the route decided for this request. `route` starts as "unrouted" and
/// should be updated via `set_route` once the classifier decides.
pub struct RequestTimer {
    start: Instant,
    route: String,
}

impl RequestTimer {
    pub fn new() -> Self {
        Self { start: Instant::now(), route: "unrouted".to_string() }
    }

    pub fn set_route(&mut self, route: &str) {
        self.route = route.to_string();
    }
}

impl Default for RequestTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.route, self.start.elapsed().as_secs_f64());
    }
}
