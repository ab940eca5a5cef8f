//! Background job: retention purge of raw events and rollups.
//!
//! Runs hourly. Deletes request logs, hourly buckets, violations and daily
//! usage rows older than `retention_days`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time;

use crate::store::MetricsStore;

/// Spawn the background cleanup task. Call this once at startup.
pub fn spawn(store: Arc<dyn MetricsStore>, retention_days: i64) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;
            if let Err(e) = purge_expired(store.as_ref(), retention_days, Utc::now()).await {
                tracing::error!("cleanup job failed: {:#}", e);
            }
        }
    });
}

/// Delete everything older than `now - retention_days`. Returns rows removed.
pub async fn purge_expired(
    store: &dyn MetricsStore,
    retention_days: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<u64> {
    let cutoff = now - chrono::Duration::days(retention_days);
    let removed = store.purge_before(cutoff).await?;

    if removed > 0 {
        tracing::info!(rows = removed, cutoff = %cutoff, "purged expired rate-limiting data");
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metrics::RequestEvent;
    use crate::store::memory::MemoryStore;

    fn request(at: DateTime<Utc>) -> RequestEvent {
        RequestEvent {
            occurred_at: at,
            endpoint_path: "/api/topics".into(),
            feature_name: "topic-generator".into(),
            user_id: Some("u1".into()),
            ip_address: None,
            status_code: 200,
            rate_limited: false,
            response_time_ms: 10.0,
        }
    }

    #[tokio::test]
    async fn test_purge_respects_retention_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .record_request(&request(now - chrono::Duration::days(91)))
            .await
            .unwrap();
        store
            .record_request(&request(now - chrono::Duration::days(89)))
            .await
            .unwrap();

        assert_eq!(purge_expired(&store, 90, now).await.unwrap(), 1);
        assert_eq!(purge_expired(&store, 90, now).await.unwrap(), 0);
    }
}
