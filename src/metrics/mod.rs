use crate::error::{LimiterError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service exposing the Prometheus recorder
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder.
    ///
    /// Fails if a recorder is already installed in this process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            LimiterError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "cmdgate_requests_total",
            "Total number of requests seen by the rate limiter"
        );
        describe_counter!(
            "cmdgate_rate_limit_exceeded_total",
            "Total number of requests rejected due to rate limiting"
        );
        describe_counter!(
            "cmdgate_swept_entries_total",
            "Total number of expired window counters reclaimed"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record one admit/reject decision.
///
/// `policy` is the registered command name or the fallback name, never the
/// raw client-supplied command, so label cardinality stays bounded.
pub fn record_decision(policy: &str, allowed: bool) {
    let labels = [
        ("policy", policy.to_string()),
        ("decision", if allowed { "admitted" } else { "rejected" }.to_string()),
    ];
    counter!("cmdgate_requests_total", &labels).increment(1);

    if !allowed {
        counter!("cmdgate_rate_limit_exceeded_total", "policy" => policy.to_string()).increment(1);
    }
}

/// Record counters reclaimed by a sweep
pub fn record_swept(removed: usize) {
    counter!("cmdgate_swept_entries_total").increment(removed as u64);
}
