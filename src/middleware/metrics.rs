//! Prometheus metrics for the query API's own traffic.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Every routed request passes through `track_requests`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{
    histogram_opts, opts, CounterVec, Encoder, HistogramVec, Registry, TextEncoder,
};

use crate::AppState;

/// Label used for requests that matched no route, so path probing cannot
/// inflate label cardinality.
const UNMATCHED_ROUTE: &str = "unmatched";

/// Prometheus metrics recorder.
/// Owns its registry so several app instances can coexist in one process.
pub struct PrometheusRecorder {
    registry: Registry,

    // Counters
    requests_total: CounterVec,
    auth_failures_total: CounterVec,

    // Histograms
    request_duration_seconds: HistogramVec,
}

impl PrometheusRecorder {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            opts!("ratewatch_http_requests_total", "Total query API requests"),
            &["route", "method", "status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let auth_failures_total = CounterVec::new(
            opts!(
                "ratewatch_auth_failures_total",
                "Requests rejected with 401 or 403"
            ),
            &["route", "status_code"],
        )?;
        registry.register(Box::new(auth_failures_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "ratewatch_http_request_duration_seconds",
                "Query API latency in seconds",
                vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
            ),
            &["route"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            auth_failures_total,
            request_duration_seconds,
        })
    }

    /// Record one completed request.
    pub fn record(&self, route: &str, method: &str, status: u16, elapsed_secs: f64) {
        let status = status.to_string();
        self.requests_total
            .with_label_values(&[route, method, &status])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[route])
            .observe(elapsed_secs);
        if status == "401" || status == "403" {
            self.auth_failures_total
                .with_label_values(&[route, &status])
                .inc();
        }
    }

    /// Encode all registered metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Middleware: counts and times every request by matched route.
pub async fn track_requests(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
    let method = req.method().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    state.recorder.record(
        &route,
        &method,
        resp.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    resp
}

// ── Tests ─────────────────────────────────────────────────────
