//! Background job: refresh hourly metric buckets from raw request logs.
//!
//! Each pass recomputes the current hour and the previous one. The previous
//! hour is recomputed once more after it closes so late writes land in it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time;

use crate::aggregate::hour_floor;
use crate::store::MetricsStore;

/// Spawn the background rollup task. Call this once at startup.
pub fn spawn(store: Arc<dyn MetricsStore>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = run_once(store.as_ref(), Utc::now()).await {
                tracing::error!("rollup job failed: {:#}", e);
            }
        }
    });
}

/// Roll up the hour containing `now` and the hour before it.
/// Returns the number of buckets written.
pub async fn run_once(store: &dyn MetricsStore, now: DateTime<Utc>) -> anyhow::Result<u64> {
    let current = hour_floor(now);
    let previous = current - chrono::Duration::hours(1);

    let mut written = 0;
    for hour in [previous, current] {
        let n = store.rollup_hour(hour).await?;
        tracing::debug!(hour = %hour, buckets = n, "rolled up hour");
        written += n;
    }
    Ok(written)
}
