pub mod middleware;

pub use middleware::MetricsMiddleware;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::{Arc, OnceLock};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const HTTP_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];
const DATABASE_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Handle to the process-wide Prometheus recorder
///
/// The recorder is installed by the first instance created; later instances
/// share it, so global labels come from whichever config arrived first.
#[derive(Clone)]
pub struct AppMetrics {
    prometheus_handle: Arc<PrometheusHandle>,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::with_config(None)
    }

    pub fn with_config(config: Option<&crate::config::AppConfig>) -> Self {
        let handle = PROMETHEUS_HANDLE.get_or_init(|| install(config));

        Self {
            prometheus_handle: Arc::new(handle.clone()),
        }
    }

    // HTTP metrics
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration_secs: f64) {
        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            "http_requests_duration_seconds",
            "method" => method.to_string(),
            "route" => route.to_string()
        )
        .record(duration_secs);
    }

    pub fn http_request_start(&self) {
        gauge!("http_requests_in_flight").increment(1.0);
    }

    pub fn http_request_end(&self) {
        gauge!("http_requests_in_flight").decrement(1.0);
    }

    // Prometheus export
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn install(config: Option<&crate::config::AppConfig>) -> PrometheusHandle {
    let builder = match config {
        Some(cfg) => PrometheusBuilder::new()
            .add_global_label("service", cfg.app.name.clone())
            .add_global_label("version", cfg.app.version.clone())
            .add_global_label("environment", cfg.app.environment.clone()),
        None => PrometheusBuilder::new(),
    };

    let builder = builder
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            HTTP_BUCKETS,
        )
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Full("database_queries_duration_seconds".to_string()),
                DATABASE_BUCKETS,
            )
        })
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Falling back to default histogram buckets");
            PrometheusBuilder::new()
        });

    let recorder = builder.build_recorder();
    let handle = recorder.handle();
    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("A metrics recorder is already installed, /metrics will be empty");
    }

    describe_metrics();
    handle
}

fn describe_metrics() {
    // HTTP metrics
    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_requests_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        "http_requests_in_flight",
        "Number of HTTP requests currently being processed"
    );

    // Session store
    describe_histogram!(
        "database_queries_duration_seconds",
        "Session store statement duration in seconds, by breaker class"
    );

    // Circuit breakers
    describe_gauge!(
        "circuit_breaker_state",
        "Breaker state: 0 closed, 1 half-open, 2 open"
    );
    describe_counter!(
        "circuit_breaker_events_total",
        "Breaker lifecycle and per-call events"
    );

    // Gate, guard and proxy
    describe_counter!("auth_failures_total", "Rejected credentials, by error code");
    describe_counter!("rate_limit_rejections_total", "Requests rejected with 429, by tier");
    describe_counter!(
        "upstream_failures_total",
        "Forwards that failed to reach the upstream, by route"
    );
}
