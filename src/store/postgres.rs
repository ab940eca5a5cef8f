use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use super::{MetricsQuery, MetricsStore, ViolationQuery};
use crate::aggregate;
use crate::models::metrics::{HourlyMetricBucket, HourlyMetricRow, RequestEvent};
use crate::models::usage::{DailyUsage, UsageIncrement, UserUsageDay, USER_HISTORY_DAYS};
use crate::models::violations::{
    TopViolatingUser, TopViolatingUserRow, ViolationEvent, ViolationPatterns, ViolationRecord,
};
use crate::models::{DateRange, Profile, DEFAULT_PLAN};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricsStore for PgStore {
    // -- Ingestion --

    async fn record_request(&self, event: &RequestEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO api_request_log
                (occurred_at, endpoint_path, feature_name, user_id, ip_address, status_code, rate_limited, response_time_ms)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(event.occurred_at)
        .bind(&event.endpoint_path)
        .bind(&event.feature_name)
        .bind(&event.user_id)
        .bind(&event.ip_address)
        .bind(event.status_code as i32)
        .bind(event.rate_limited)
        .bind(event.response_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn log_violation(&self, event: &ViolationEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO rate_limit_violations
                (user_id, identifier_type, identifier_value, feature_name, endpoint_path,
                 violation_type, limit_threshold, actual_count, window_start, window_end,
                 ip_address, user_agent, action_taken, metadata, occurred_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"#,
        )
        .bind(&event.user_id)
        .bind(event.identifier_type.as_str())
        .bind(&event.identifier_value)
        .bind(&event.feature_name)
        .bind(&event.endpoint_path)
        .bind(event.violation_type.as_str())
        .bind(event.limit_threshold)
        .bind(event.actual_count)
        .bind(event.window_start)
        .bind(event.window_end)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.action_taken.as_str())
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
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
        // The violation column is bumped in the same statement so concurrent
        // increments cannot both miss the limit crossing.
        let total_uses = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO user_feature_usage_daily
                (user_id, feature_name, usage_date, plan, total_uses, plan_limit, violations)
               VALUES ($1, $2, $3, $4, 1, $5::bigint,
                       CASE WHEN $5::bigint IS NOT NULL AND 1 > $5::bigint THEN 1 ELSE 0 END)
               ON CONFLICT (user_id, feature_name, usage_date) DO UPDATE SET
                 total_uses = user_feature_usage_daily.total_uses + 1,
                 plan = EXCLUDED.plan,
                 plan_limit = EXCLUDED.plan_limit,
                 violations = user_feature_usage_daily.violations
                   + CASE WHEN EXCLUDED.plan_limit IS NOT NULL
                           AND user_feature_usage_daily.total_uses + 1 > EXCLUDED.plan_limit
                          THEN 1 ELSE 0 END
               RETURNING total_uses"#,
        )
        .bind(user_id)
        .bind(feature)
        .bind(now.date_naive())
        .bind(plan)
        .bind(plan_limit)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageIncrement::evaluate(total_uses, plan_limit, now))
    }

    async fn upsert_profile(&self, profile: &Profile) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO profiles (user_id, full_name, email, plan)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (user_id) DO UPDATE SET
                 full_name = EXCLUDED.full_name,
                 email = EXCLUDED.email,
                 plan = EXCLUDED.plan"#,
        )
        .bind(&profile.user_id)
        .bind(&profile.full_name)
        .bind(&profile.email)
        .bind(&profile.plan)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Aggregation --

    async fn rollup_hour(&self, hour_start: DateTime<Utc>) -> anyhow::Result<u64> {
        let hour_start = aggregate::hour_floor(hour_start);
        let hour_end = hour_start + Duration::hours(1);

        let written = sqlx::query(
            r#"
            WITH per_user AS (
                SELECT endpoint_path, feature_name, user_id, COUNT(*) AS n
                FROM api_request_log
                WHERE occurred_at >= $1 AND occurred_at < $2 AND user_id IS NOT NULL
                GROUP BY 1, 2, 3
            ),
            agg AS (
                SELECT
                    endpoint_path,
                    feature_name,
                    COUNT(*) AS total_requests,
                    COUNT(*) FILTER (WHERE status_code < 400 AND NOT rate_limited) AS successful_requests,
                    COUNT(*) FILTER (WHERE rate_limited) AS rate_limited_requests,
                    COUNT(*) FILTER (WHERE status_code >= 400 AND status_code < 500) AS status_4xx,
                    COUNT(*) FILTER (WHERE status_code >= 500) AS status_5xx,
                    AVG(response_time_ms)::float8 AS avg_response_time_ms,
                    COUNT(DISTINCT user_id) AS unique_users,
                    COUNT(DISTINCT ip_address) AS unique_ips
                FROM api_request_log
                WHERE occurred_at >= $1 AND occurred_at < $2
                GROUP BY 1, 2
            )
            INSERT INTO api_metrics_hourly
                (hour_start, endpoint_path, feature_name, total_requests, successful_requests,
                 rate_limited_requests, status_4xx, status_5xx, avg_response_time_ms,
                 unique_users, unique_ips, max_requests_per_user, updated_at)
            SELECT
                $1, a.endpoint_path, a.feature_name, a.total_requests, a.successful_requests,
                a.rate_limited_requests, a.status_4xx, a.status_5xx, a.avg_response_time_ms,
                a.unique_users, a.unique_ips,
                COALESCE((SELECT MAX(p.n) FROM per_user p
                          WHERE p.endpoint_path = a.endpoint_path
                            AND p.feature_name = a.feature_name), 0),
                now()
            FROM agg a
            ON CONFLICT (hour_start, endpoint_path, feature_name) DO UPDATE SET
                total_requests = EXCLUDED.total_requests,
                successful_requests = EXCLUDED.successful_requests,
                rate_limited_requests = EXCLUDED.rate_limited_requests,
                status_4xx = EXCLUDED.status_4xx,
                status_5xx = EXCLUDED.status_5xx,
                avg_response_time_ms = EXCLUDED.avg_response_time_ms,
                unique_users = EXCLUDED.unique_users,
                unique_ips = EXCLUDED.unique_ips,
                max_requests_per_user = EXCLUDED.max_requests_per_user,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(hour_start)
        .bind(hour_end)
        .execute(&self.pool)
        .await?;

        Ok(written.rows_affected())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        removed += sqlx::query("DELETE FROM api_request_log WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        removed += sqlx::query("DELETE FROM api_metrics_hourly WHERE hour_start < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        removed += sqlx::query("DELETE FROM rate_limit_violations WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        removed += sqlx::query("DELETE FROM user_feature_usage_daily WHERE usage_date < $1")
            .bind(cutoff.date_naive())
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed)
    }

    // -- Queries --

    async fn hourly_metrics(&self, query: &MetricsQuery) -> anyhow::Result<Vec<HourlyMetricBucket>> {
        let rows = sqlx::query_as::<_, HourlyMetricRow>(
            r#"SELECT hour_start, endpoint_path, feature_name, total_requests, successful_requests,
                      rate_limited_requests, status_4xx, status_5xx, avg_response_time_ms,
                      unique_users, unique_ips, max_requests_per_user
               FROM api_metrics_hourly
               WHERE hour_start >= $1 AND hour_start <= $2
                 AND ($3::text IS NULL OR endpoint_path = $3)
                 AND ($4::text IS NULL OR feature_name = $4)
               ORDER BY hour_start DESC, endpoint_path DESC, feature_name DESC
               LIMIT $5"#,
        )
        .bind(query.range.start_date)
        .bind(query.range.end_date)
        .bind(&query.endpoint_path)
        .bind(&query.feature_name)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HourlyMetricRow::normalize).collect())
    }

    async fn violation_summary(&self, query: &ViolationQuery) -> anyhow::Result<Vec<ViolationRecord>> {
        let rows = sqlx::query_as::<_, ViolationRecord>(
            r#"SELECT
                feature_name,
                violation_type,
                COUNT(*)::bigint AS violation_count,
                COUNT(DISTINCT user_id)::bigint AS affected_users,
                COUNT(DISTINCT identifier_value)::bigint AS unique_identifiers,
                COALESCE(MAX(GREATEST(actual_count - limit_threshold, 0)), 0)::bigint AS max_excess,
                MIN(occurred_at) AS first_seen,
                MAX(occurred_at) AS last_seen
               FROM rate_limit_violations
               WHERE occurred_at >= $1 AND occurred_at <= $2
                 AND ($3::text IS NULL OR feature_name = $3)
                 AND ($4::text IS NULL OR violation_type = $4)
               GROUP BY feature_name, violation_type
               ORDER BY violation_count DESC, feature_name ASC, violation_type ASC
               LIMIT $5"#,
        )
        .bind(query.range.start_date)
        .bind(query.range.end_date)
        .bind(&query.feature_name)
        .bind(&query.violation_type)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn top_violating_users(
        &self,
        range: DateRange,
        limit: Option<i64>,
    ) -> anyhow::Result<Vec<TopViolatingUser>> {
        let rows = sqlx::query_as::<_, TopViolatingUserRow>(
            r#"SELECT
                v.user_id AS user_id,
                p.full_name,
                p.email,
                COUNT(*)::bigint AS total_violations,
                COUNT(DISTINCT v.feature_name)::bigint AS features_violated,
                MAX(v.occurred_at) AS last_violation
               FROM rate_limit_violations v
               LEFT JOIN profiles p ON p.user_id = v.user_id
               WHERE v.user_id IS NOT NULL
                 AND v.occurred_at >= $1 AND v.occurred_at <= $2
               GROUP BY v.user_id, p.full_name, p.email
               ORDER BY total_violations DESC, v.user_id ASC
               LIMIT $3"#,
        )
        .bind(range.start_date)
        .bind(range.end_date)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TopViolatingUserRow::normalize).collect())
    }

    async fn violation_patterns(&self, range: DateRange) -> anyhow::Result<ViolationPatterns> {
        let by_feature = sqlx::query_as::<_, (String, i64)>(
            r#"SELECT feature_name, COUNT(*)::bigint
               FROM rate_limit_violations
               WHERE occurred_at >= $1 AND occurred_at <= $2
               GROUP BY 1"#,
        )
        .bind(range.start_date)
        .bind(range.end_date)
        .fetch_all(&self.pool)
        .await?;

        let by_plan = sqlx::query_as::<_, (String, i64)>(
            r#"SELECT COALESCE(p.plan, $3), COUNT(*)::bigint
               FROM rate_limit_violations v
               LEFT JOIN profiles p ON p.user_id = v.user_id
               WHERE v.user_id IS NOT NULL
                 AND v.occurred_at >= $1 AND v.occurred_at <= $2
               GROUP BY 1"#,
        )
        .bind(range.start_date)
        .bind(range.end_date)
        .bind(DEFAULT_PLAN)
        .fetch_all(&self.pool)
        .await?;

        Ok(ViolationPatterns {
            violations_by_feature: by_feature.into_iter().collect(),
            violations_by_plan: by_plan.into_iter().collect(),
        })
    }

    async fn daily_usage(
        &self,
        range: DateRange,
        feature: Option<&str>,
    ) -> anyhow::Result<Vec<DailyUsage>> {
        let rows = sqlx::query_as::<_, DailyUsage>(
            r#"SELECT user_id, feature_name, usage_date, plan, total_uses, plan_limit, violations
               FROM user_feature_usage_daily
               WHERE usage_date >= $1 AND usage_date <= $2
                 AND ($3::text IS NULL OR feature_name = $3)
               ORDER BY usage_date DESC, feature_name ASC, user_id ASC"#,
        )
        .bind(range.start_date.date_naive())
        .bind(range.end_date.date_naive())
        .bind(feature)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn user_usage_stats(
        &self,
        user_id: &str,
        feature: &str,
        range: DateRange,
    ) -> anyhow::Result<Vec<UserUsageDay>> {
        let rows = sqlx::query_as::<_, DailyUsage>(
            r#"SELECT user_id, feature_name, usage_date, plan, total_uses, plan_limit, violations
               FROM user_feature_usage_daily
               WHERE user_id = $1 AND feature_name = $2
                 AND usage_date >= $3 AND usage_date <= $4
               ORDER BY usage_date DESC
               LIMIT $5"#,
        )
        .bind(user_id)
        .bind(feature)
        .bind(range.start_date.date_naive())
        .bind(range.end_date.date_naive())
        .bind(USER_HISTORY_DAYS)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserUsageDay::from).collect())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
