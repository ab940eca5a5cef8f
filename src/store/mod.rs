pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::metrics::{HourlyMetricBucket, RequestEvent};
use crate::models::usage::{DailyUsage, UsageIncrement, UserUsageDay};
use crate::models::violations::{
    TopViolatingUser, ViolationEvent, ViolationPatterns, ViolationRecord,
};
use crate::models::{DateRange, Profile};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsQuery {
    pub range: DateRange,
    pub endpoint_path: Option<String>,
    pub feature_name: Option<String>,
    pub limit: Option<i64>,
}

impl MetricsQuery {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            endpoint_path: None,
            feature_name: None,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViolationQuery {
    pub range: DateRange,
    pub feature_name: Option<String>,
    pub violation_type: Option<String>,
    pub limit: Option<i64>,
}

impl ViolationQuery {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            feature_name: None,
            violation_type: None,
            limit: None,
        }
    }
}

/// Persistence for raw rate-limiting events and their rollups.
/// Implementations: PgStore (Postgres), MemoryStore (in-process).
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Append one raw request observation.
    async fn record_request(&self, event: &RequestEvent) -> anyhow::Result<()>;

    /// Append one rate-limit violation.
    async fn log_violation(&self, event: &ViolationEvent) -> anyhow::Result<()>;

    /// Count one use of `feature` by `user_id` on the UTC day of `now`.
    async fn increment_feature_usage(
        &self,
        user_id: &str,
        feature: &str,
        plan: &str,
        plan_limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UsageIncrement>;

    async fn upsert_profile(&self, profile: &Profile) -> anyhow::Result<()>;

    /// Recompute every bucket of the hour starting at `hour_start` from raw
    /// requests. Idempotent. Returns the number of buckets written.
    async fn rollup_hour(&self, hour_start: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Delete raw events and rollups older than `cutoff`. Returns rows removed.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Buckets whose `hour_start` lies in the range, newest first.
    async fn hourly_metrics(&self, query: &MetricsQuery) -> anyhow::Result<Vec<HourlyMetricBucket>>;

    async fn violation_summary(&self, query: &ViolationQuery) -> anyhow::Result<Vec<ViolationRecord>>;

    /// Users ranked by violation count. `None` returns every user.
    async fn top_violating_users(
        &self,
        range: DateRange,
        limit: Option<i64>,
    ) -> anyhow::Result<Vec<TopViolatingUser>>;

    async fn violation_patterns(&self, range: DateRange) -> anyhow::Result<ViolationPatterns>;

    /// Daily usage rows whose date falls within the range's UTC dates.
    async fn daily_usage(
        &self,
        range: DateRange,
        feature: Option<&str>,
    ) -> anyhow::Result<Vec<DailyUsage>>;

    /// Daily history of one user's use of one feature, newest first, capped
    /// at `USER_HISTORY_DAYS` rows.
    async fn user_usage_stats(
        &self,
        user_id: &str,
        feature: &str,
        range: DateRange,
    ) -> anyhow::Result<Vec<UserUsageDay>>;

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> anyhow::Result<()>;
}
