//! ratewatch: rate-limiting observability pipeline.
//!
//! Raw request logs roll up into hourly buckets, an admin query API serves
//! time-ranged summaries, and a dashboard client fetches and renders them.

use std::sync::Arc;

pub mod aggregate;
pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod filters;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod stats;
pub mod store;

use middleware::metrics::PrometheusRecorder;
use store::MetricsStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn MetricsStore>,
    pub config: config::Config,
    pub recorder: PrometheusRecorder,
}

impl AppState {
    pub fn new(store: Arc<dyn MetricsStore>, config: config::Config) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            config,
            recorder: PrometheusRecorder::new()?,
        })
    }
}
