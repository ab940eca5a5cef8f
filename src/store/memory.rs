use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{MetricsQuery, MetricsStore, ViolationQuery};
use crate::aggregate;
use crate::filters::{apply_filters, FilterCriteria};
use crate::models::metrics::{HourlyMetricBucket, RequestEvent};
use crate::models::usage::{DailyUsage, UsageIncrement, UserUsageDay, USER_HISTORY_DAYS};
use crate::models::violations::{
    TopViolatingUser, ViolationEvent, ViolationPatterns, ViolationRecord,
};
use crate::models::{DateRange, Profile};

type BucketKey = (DateTime<Utc>, String, String);
type UsageKey = (String, String, NaiveDate);

#[derive(Default)]
struct Inner {
    requests: Vec<RequestEvent>,
    buckets: BTreeMap<BucketKey, HourlyMetricBucket>,
    violations: Vec<ViolationEvent>,
    usage: BTreeMap<UsageKey, DailyUsage>,
    profiles: HashMap<String, Profile>,
}

/// Events loaded into a `MemoryStore` at startup (`serve --in-memory --seed`).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeedData {
    pub requests: Vec<RequestEvent>,
    pub violations: Vec<ViolationEvent>,
    pub usage: Vec<DailyUsage>,
    pub profiles: Vec<Profile>,
}

/// In-process store backed by vectors and maps.
///
/// Aggregation goes through the same pure functions the rollup job uses, so
/// it answers queries exactly like `PgStore` for the same events.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load seed events and roll up every hour they touch. Returns the number
    /// of hourly buckets written.
    pub async fn load_seed(&self, seed: SeedData) -> anyhow::Result<u64> {
        let hours: BTreeSet<DateTime<Utc>> = seed
            .requests
            .iter()
            .map(|r| aggregate::hour_floor(r.occurred_at))
            .collect();
        for event in &seed.requests {
            self.record_request(event).await?;
        }
        for event in &seed.violations {
            self.log_violation(event).await?;
        }
        for profile in &seed.profiles {
            self.upsert_profile(profile).await?;
        }
        {
            let mut inner = self.inner.write().await;
            for row in seed.usage {
                inner.usage.insert(
                    (row.user_id.clone(), row.feature_name.clone(), row.usage_date),
                    row,
                );
            }
        }

        let mut written = 0;
        for hour in hours {
            written += self.rollup_hour(hour).await?;
        }
        Ok(written)
    }

    fn violations_in(inner: &Inner, range: DateRange) -> Vec<ViolationEvent> {
        inner
            .violations
            .iter()
            .filter(|v| range.contains(v.occurred_at))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn record_request(&self, event: &RequestEvent) -> anyhow::Result<()> {
        self.inner.write().await.requests.push(event.clone());
        Ok(())
    }

    async fn log_violation(&self, event: &ViolationEvent) -> anyhow::Result<()> {
        self.inner.write().await.violations.push(event.clone());
        Ok(())
    }

    async fn increment_feature_usage(
        &self,
        user_id: &str,
        feature: &str,
        plan: &str,
        plan_limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UsageIncrement> {
        let date = now.date_naive();
        let mut inner = self.inner.write().await;
        let row = inner
            .usage
            .entry((user_id.to_string(), feature.to_string(), date))
            .or_insert_with(|| DailyUsage {
                user_id: user_id.to_string(),
                feature_name: feature.to_string(),
                usage_date: date,
                plan: plan.to_string(),
                total_uses: 0,
                plan_limit,
                violations: 0,
            });
        row.total_uses += 1;
        row.plan = plan.to_string();
        row.plan_limit = plan_limit;

        let result = UsageIncrement::evaluate(row.total_uses, plan_limit, now);
        if result.exceeded_limit {
            row.violations += 1;
        }
        Ok(result)
    }

    async fn upsert_profile(&self, profile: &Profile) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn rollup_hour(&self, hour_start: DateTime<Utc>) -> anyhow::Result<u64> {
        let hour_start = aggregate::hour_floor(hour_start);
        let hour_end = hour_start + Duration::hours(1);
        let mut inner = self.inner.write().await;

        let events: Vec<RequestEvent> = inner
            .requests
            .iter()
            .filter(|r| r.occurred_at >= hour_start && r.occurred_at < hour_end)
            .cloned()
            .collect();
        let buckets = aggregate::rollup_requests(&events);

        inner.buckets.retain(|(hour, _, _), _| *hour != hour_start);
        let written = buckets.len() as u64;
        for b in buckets {
            inner.buckets.insert(
                (b.hour_start, b.endpoint_path.clone(), b.feature_name.clone()),
                b,
            );
        }
        Ok(written)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.requests.len()
            + inner.buckets.len()
            + inner.violations.len()
            + inner.usage.len();

        let cutoff_date = cutoff.date_naive();
        inner.requests.retain(|r| r.occurred_at >= cutoff);
        inner.buckets.retain(|(hour, _, _), _| *hour >= cutoff);
        inner.violations.retain(|v| v.occurred_at >= cutoff);
        inner.usage.retain(|(_, _, date), _| *date >= cutoff_date);

        let after = inner.requests.len()
            + inner.buckets.len()
            + inner.violations.len()
            + inner.usage.len();
        Ok((before - after) as u64)
    }

    async fn hourly_metrics(&self, query: &MetricsQuery) -> anyhow::Result<Vec<HourlyMetricBucket>> {
        let inner = self.inner.read().await;
        let in_range: Vec<HourlyMetricBucket> = inner
            .buckets
            .values()
            .rev()
            .filter(|b| query.range.contains(b.hour_start))
            .cloned()
            .collect();

        let mut criteria = FilterCriteria::default();
        if let Some(f) = &query.feature_name {
            criteria = criteria.feature(f.clone());
        }
        if let Some(e) = &query.endpoint_path {
            criteria = criteria.category(e.clone());
        }
        if let Some(n) = query.limit {
            criteria = criteria.limit(n.max(0) as usize);
        }
        Ok(apply_filters(&in_range, &criteria))
    }

    async fn violation_summary(&self, query: &ViolationQuery) -> anyhow::Result<Vec<ViolationRecord>> {
        let events = Self::violations_in(&*self.inner.read().await, query.range);
        let records = aggregate::summarize_violations(&events);

        let mut criteria = FilterCriteria::default();
        if let Some(f) = &query.feature_name {
            criteria = criteria.feature(f.clone());
        }
        if let Some(t) = &query.violation_type {
            criteria = criteria.category(t.clone());
        }
        if let Some(n) = query.limit {
            criteria = criteria.limit(n.max(0) as usize);
        }
        Ok(apply_filters(&records, &criteria))
    }

    async fn top_violating_users(
        &self,
        range: DateRange,
        limit: Option<i64>,
    ) -> anyhow::Result<Vec<TopViolatingUser>> {
        let inner = self.inner.read().await;
        let events = Self::violations_in(&inner, range);
        Ok(aggregate::rank_violators(
            &events,
            &inner.profiles,
            limit.map_or(usize::MAX, |n| n.max(0) as usize),
        ))
    }

    async fn violation_patterns(&self, range: DateRange) -> anyhow::Result<ViolationPatterns> {
        let inner = self.inner.read().await;
        let events = Self::violations_in(&inner, range);
        Ok(aggregate::violation_patterns(&events, &inner.profiles))
    }

    async fn daily_usage(
        &self,
        range: DateRange,
        feature: Option<&str>,
    ) -> anyhow::Result<Vec<DailyUsage>> {
        let (first, last) = (range.start_date.date_naive(), range.end_date.date_naive());
        Ok(self
            .inner
            .read()
            .await
            .usage
            .values()
            .filter(|u| u.usage_date >= first && u.usage_date <= last)
            .filter(|u| feature.map_or(true, |f| u.feature_name == f))
            .cloned()
            .collect())
    }

    async fn user_usage_stats(
        &self,
        user_id: &str,
        feature: &str,
        range: DateRange,
    ) -> anyhow::Result<Vec<UserUsageDay>> {
        let (first, last) = (range.start_date.date_naive(), range.end_date.date_naive());
        Ok(self
            .inner
            .read()
            .await
            .usage
            .values()
            .rev()
            .filter(|u| u.user_id == user_id && u.feature_name == feature)
            .filter(|u| u.usage_date >= first && u.usage_date <= last)
            .take(USER_HISTORY_DAYS as usize)
            .cloned()
            .map(UserUsageDay::from)
            .collect())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::violations::{ActionTaken, IdentifierType, ViolationType};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 2, h, m, 0).unwrap()
    }

    fn req(t: DateTime<Utc>, endpoint: &str, feature: &str, status: u16) -> RequestEvent {
        RequestEvent {
            occurred_at: t,
            endpoint_path: endpoint.into(),
            feature_name: feature.into(),
            user_id: Some("u1".into()),
            ip_address: Some("10.1.1.1".into()),
            status_code: status,
            rate_limited: status == 429,
            response_time_ms: 120.0,
        }
    }

    fn violation(user: &str, feature: &str, t: DateTime<Utc>) -> ViolationEvent {
        ViolationEvent {
            user_id: Some(user.into()),
            identifier_type: IdentifierType::UserId,
            identifier_value: user.into(),
            feature_name: feature.into(),
            endpoint_path: None,
            violation_type: ViolationType::PerMinute,
            limit_threshold: 5,
            actual_count: 6,
            window_start: None,
            window_end: None,
            ip_address: None,
            user_agent: None,
            action_taken: ActionTaken::Blocked,
            metadata: serde_json::json!({}),
            occurred_at: t,
        }
    }

    #[tokio::test]
    async fn test_rollup_is_idempotent_and_refreshes_open_hour() {
        let store = MemoryStore::new();
        store.record_request(&req(at(10, 5), "/a", "f", 200)).await.unwrap();
        assert_eq!(store.rollup_hour(at(10, 30)).await.unwrap(), 1);
        assert_eq!(store.rollup_hour(at(10, 0)).await.unwrap(), 1);

        store.record_request(&req(at(10, 40), "/a", "f", 429)).await.unwrap();
        store.rollup_hour(at(10, 0)).await.unwrap();

        let q = MetricsQuery::new(DateRange::new(at(0, 0), at(23, 0)));
        let buckets = store.hourly_metrics(&q).await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].total_requests, 2);
        assert_eq!(buckets[0].rate_limited_requests, 1);
    }

    #[tokio::test]
    async fn test_hourly_metrics_filters_and_orders() {
        let store = MemoryStore::new();
        store.record_request(&req(at(8, 0), "/a", "topic-generator", 200)).await.unwrap();
        store.record_request(&req(at(9, 0), "/b", "pdf-analysis", 200)).await.unwrap();
        store.record_request(&req(at(9, 1), "/a", "topic-generator", 200)).await.unwrap();
        store.rollup_hour(at(8, 0)).await.unwrap();
        store.rollup_hour(at(9, 0)).await.unwrap();

        let mut q = MetricsQuery::new(DateRange::new(at(0, 0), at(23, 0)));
        let all = store.hourly_metrics(&q).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].hour_start, at(9, 0));
        assert_eq!(all[2].hour_start, at(8, 0));

        q.feature_name = Some("topic-generator".into());
        assert_eq!(store.hourly_metrics(&q).await.unwrap().len(), 2);

        q.endpoint_path = Some("/b".into());
        assert!(store.hourly_metrics(&q).await.unwrap().is_empty());

        let narrow = MetricsQuery::new(DateRange::new(at(8, 30), at(23, 0)));
        assert_eq!(store.hourly_metrics(&narrow).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_increment_feature_usage_counts_violations_past_limit() {
        let store = MemoryStore::new();
        let now = at(12, 0);
        for _ in 0..2 {
            let inc = store
                .increment_feature_usage("u1", "topic-generator", "free", Some(2), now)
                .await
                .unwrap();
            assert!(!inc.exceeded_limit);
        }
        let inc = store
            .increment_feature_usage("u1", "topic-generator", "free", Some(2), now)
            .await
            .unwrap();
        assert!(inc.exceeded_limit);
        assert_eq!(inc.total_uses, 3);

        let rows = store
            .daily_usage(DateRange::new(at(0, 0), at(23, 0)), None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].violations, 1);

        let other = store
            .daily_usage(DateRange::new(at(0, 0), at(23, 0)), Some("pdf-analysis"))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_violation_queries_respect_range() {
        let store = MemoryStore::new();
        store.log_violation(&violation("u1", "a", at(1, 0))).await.unwrap();
        store.log_violation(&violation("u1", "b", at(2, 0))).await.unwrap();
        store.log_violation(&violation("u2", "a", at(20, 0))).await.unwrap();

        let morning = DateRange::new(at(0, 0), at(6, 0));
        let summary = store.violation_summary(&ViolationQuery::new(morning)).await.unwrap();
        assert_eq!(summary.iter().map(|r| r.violation_count).sum::<i64>(), 2);

        let users = store.top_violating_users(morning, Some(50)).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].features_violated, 2);

        let mut q = ViolationQuery::new(DateRange::new(at(0, 0), at(23, 0)));
        q.feature_name = Some("a".into());
        let only_a = store.violation_summary(&q).await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].affected_users, 2);
    }

    #[tokio::test]
    async fn test_purge_before_removes_old_rows() {
        let store = MemoryStore::new();
        store.record_request(&req(at(1, 0), "/a", "f", 200)).await.unwrap();
        store.record_request(&req(at(5, 0), "/a", "f", 200)).await.unwrap();
        store.rollup_hour(at(1, 0)).await.unwrap();
        store.rollup_hour(at(5, 0)).await.unwrap();
        store.log_violation(&violation("u1", "a", at(1, 0))).await.unwrap();

        let removed = store.purge_before(at(3, 0)).await.unwrap();
        assert_eq!(removed, 3);

        let q = MetricsQuery::new(DateRange::new(at(0, 0), at(23, 0)));
        assert_eq!(store.hourly_metrics(&q).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_user_usage_stats_is_newest_first_and_capped() {
        let store = MemoryStore::new();
        let day0 = at(9, 0);
        for d in 0..40 {
            let now = day0 + Duration::days(d);
            store
                .increment_feature_usage("u1", "pdf-analysis", "free", Some(1), now)
                .await
                .unwrap();
            if d == 39 {
                store
                    .increment_feature_usage("u1", "pdf-analysis", "free", Some(1), now)
                    .await
                    .unwrap();
            }
        }
        store
            .increment_feature_usage("u2", "pdf-analysis", "free", Some(1), day0)
            .await
            .unwrap();
        store
            .increment_feature_usage("u1", "topic-generator", "free", None, day0)
            .await
            .unwrap();

        let all = DateRange::new(day0 - Duration::days(1), day0 + Duration::days(60));
        let days = store.user_usage_stats("u1", "pdf-analysis", all).await.unwrap();
        assert_eq!(days.len(), 30);
        assert_eq!(days[0].usage_date, (day0 + Duration::days(39)).date_naive());
        assert!(days[0].exceeded_limit);
        assert_eq!(days[0].total_uses, 2);
        assert!(!days[1].exceeded_limit);
        assert!(days.windows(2).all(|w| w[0].usage_date > w[1].usage_date));

        let first_week = DateRange::new(day0, day0 + Duration::days(6));
        let days = store
            .user_usage_stats("u1", "pdf-analysis", first_week)
            .await
            .unwrap();
        assert_eq!(days.len(), 7);
        assert_eq!(days.last().unwrap().usage_date, day0.date_naive());
    }

    #[tokio::test]
    async fn test_load_seed_makes_events_queryable() {
        let seed: SeedData = serde_json::from_value(serde_json::json!({
            "requests": [
                {
                    "occurredAt": "2024-09-02T10:05:00Z",
                    "endpointPath": "/api/topics",
                    "featureName": "topic-generator",
                    "userId": "u1",
                    "ipAddress": "10.0.0.1",
                    "statusCode": 200,
                    "rateLimited": false,
                    "responseTimeMs": 80.0
                },
                {
                    "occurredAt": "2024-09-02T11:40:00Z",
                    "endpointPath": "/api/topics",
                    "featureName": "topic-generator",
                    "userId": "u1",
                    "ipAddress": "10.0.0.1",
                    "statusCode": 429,
                    "rateLimited": true,
                    "responseTimeMs": 5.0
                }
            ],
            "usage": [{
                "userId": "u1",
                "featureName": "topic-generator",
                "usageDate": "2024-09-02",
                "plan": "free",
                "totalUses": 12,
                "planLimit": 10,
                "violations": 2
            }],
            "profiles": [{ "userId": "u1", "fullName": "Ada", "email": null, "plan": "free" }]
        }))
        .unwrap();
        assert!(seed.violations.is_empty());

        let store = MemoryStore::new();
        assert_eq!(store.load_seed(seed).await.unwrap(), 2);

        let day = DateRange::new(at(0, 0), at(23, 0));
        let buckets = store.hourly_metrics(&MetricsQuery::new(day)).await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].rate_limited_requests, 1);

        let usage = store.daily_usage(day, None).await.unwrap();
        assert_eq!(usage[0].total_uses, 12);
    }
}
