use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats;

/// Per-user, per-feature usage counter for one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub user_id: String,
    pub feature_name: String,
    pub usage_date: NaiveDate,
    pub plan: String,
    pub total_uses: i64,
    pub plan_limit: Option<i64>,
    pub violations: i64,
}

/// Usage of one feature on one day by users of one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub feature_name: String,
    pub date: NaiveDate,
    pub plan: String,
    pub total_uses: i64,
    pub unique_users: i64,
    pub violations: i64,
}

impl UsageRecord {
    pub fn violation_rate(&self) -> f64 {
        stats::violation_rate(self.total_uses, self.violations)
    }
}

/// Result of counting one more use of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageIncrement {
    pub total_uses: i64,
    pub exceeded_limit: bool,
    pub plan_limit: Option<i64>,
    pub reset_at: DateTime<Utc>,
}

impl UsageIncrement {
    /// Daily counters reset at the next UTC midnight.
    pub fn evaluate(total_uses: i64, plan_limit: Option<i64>, now: DateTime<Utc>) -> Self {
        let reset_at = now
            .date_naive()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(NaiveTime::MIN).and_utc())
            .unwrap_or(now);
        Self {
            total_uses,
            exceeded_limit: plan_limit.is_some_and(|limit| total_uses > limit),
            plan_limit,
            reset_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_uses: i64,
    pub unique_users: i64,
    pub unique_dates: i64,
    pub violations: i64,
    pub violation_rate: f64,
    pub avg_uses_per_user: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureUsage {
    pub total: i64,
    pub users: i64,
    pub violations: i64,
}

impl FeatureUsage {
    pub fn violation_rate(&self) -> f64 {
        stats::violation_rate(self.total, self.violations)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMeta {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Body of `GET /api/admin/rate-limiting/usage?view=overview`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub summary: UsageSummary,
    pub usage_by_feature: BTreeMap<String, FeatureUsage>,
    pub usage_by_plan: BTreeMap<String, i64>,
    /// Per (feature, date, plan) breakdown, oldest first.
    #[serde(default)]
    pub records: Vec<UsageRecord>,
    pub meta: UsageMeta,
}

/// Most recent days returned by a per-user usage history.
pub const USER_HISTORY_DAYS: i64 = 30;

/// One day of a single user's usage of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUsageDay {
    pub usage_date: NaiveDate,
    pub total_uses: i64,
    pub plan_limit: Option<i64>,
    pub exceeded_limit: bool,
}

impl From<DailyUsage> for UserUsageDay {
    fn from(row: DailyUsage) -> Self {
        Self {
            usage_date: row.usage_date,
            total_uses: row.total_uses,
            plan_limit: row.plan_limit,
            exceeded_limit: row.plan_limit.is_some_and(|limit| row.total_uses > limit),
        }
    }
}

/// Body of `GET /api/admin/rate-limiting/usage?view=user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUsageResponse {
    pub user_id: String,
    pub feature_name: String,
    /// Newest first.
    pub days: Vec<UserUsageDay>,
    pub meta: UsageMeta,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_increment_resets_at_next_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 2, 29, 17, 45, 0).unwrap();
        let inc = UsageIncrement::evaluate(3, Some(5), now);
        assert_eq!(inc.reset_at, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert!(!inc.exceeded_limit);
    }

    #[test]
    fn test_increment_exceeds_only_past_limit() {
        let now = Utc::now();
        assert!(!UsageIncrement::evaluate(5, Some(5), now).exceeded_limit);
        assert!(UsageIncrement::evaluate(6, Some(5), now).exceeded_limit);
        assert!(!UsageIncrement::evaluate(10_000, None, now).exceeded_limit);
    }

    #[test]
    fn test_user_usage_day_flags_days_over_limit() {
        let row = |total, limit| DailyUsage {
            user_id: "u1".into(),
            feature_name: "pdf-analysis".into(),
            usage_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            plan: "free".into(),
            total_uses: total,
            plan_limit: limit,
            violations: 0,
        };
        assert!(!UserUsageDay::from(row(5, Some(5))).exceeded_limit);
        assert!(UserUsageDay::from(row(6, Some(5))).exceeded_limit);
        assert!(!UserUsageDay::from(row(600, None)).exceeded_limit);
    }

    #[test]
    fn test_feature_usage_wire_shape() {
        let json = serde_json::to_value(FeatureUsage {
            total: 0,
            users: 0,
            violations: 0,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"total": 0, "users": 0, "violations": 0}));
    }
}
