//! Derived statistics.
//!
//! Every rate here is recomputed from its counters and is `0.0` when the
//! denominator is zero, so no NaN or infinity ever reaches a response body
//! or a rendered cell.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::metrics::{HourlyMetricBucket, MetricsSummary};
use crate::models::usage::{DailyUsage, FeatureUsage, UsageSummary};
use crate::models::violations::{ViolationAggregates, ViolationRecord};

/// `numerator / total * 100`, or `0.0` when `total` is not positive.
pub fn percentage(numerator: i64, total: i64) -> f64 {
    if total > 0 {
        numerator as f64 * 100.0 / total as f64
    } else {
        0.0
    }
}

/// Share of uses that violated a limit, in percent.
pub fn violation_rate(total: i64, violations: i64) -> f64 {
    percentage(violations, total)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Collapse hourly buckets into the range summary.
///
/// `avg_response_time_ms` is weighted by each bucket's request count.
/// Unique users/IPs are summed per bucket, since the buckets carry no
/// identities to deduplicate across hours.
pub fn summarize_metrics(buckets: &[HourlyMetricBucket]) -> MetricsSummary {
    let mut s = MetricsSummary {
        hourly_data_points: buckets.len(),
        ..MetricsSummary::default()
    };
    let mut weighted_ms = 0.0;

    for b in buckets {
        s.total_requests += b.total_requests;
        s.successful_requests += b.successful_requests;
        s.rate_limited_requests += b.rate_limited_requests;
        s.status_4xx += b.status_4xx;
        s.status_5xx += b.status_5xx;
        s.total_unique_users += b.unique_users;
        s.total_unique_ips += b.unique_ips;
        weighted_ms += b.avg_response_time_ms * b.total_requests as f64;
    }

    s.success_rate = percentage(s.successful_requests, s.total_requests);
    s.rate_limit_rate = percentage(s.rate_limited_requests, s.total_requests);
    s.error_rate = percentage(s.status_4xx + s.status_5xx, s.total_requests);
    s.avg_response_time_ms = if s.total_requests > 0 {
        round2(weighted_ms / s.total_requests as f64)
    } else {
        0.0
    };
    s
}

pub fn violation_aggregates(records: &[ViolationRecord]) -> ViolationAggregates {
    let mut by_feature: BTreeMap<&str, i64> = BTreeMap::new();
    let mut types = BTreeSet::new();
    let mut agg = ViolationAggregates::default();

    for r in records {
        agg.total_violations += r.violation_count;
        agg.total_affected_users += r.affected_users;
        *by_feature.entry(r.feature_name.as_str()).or_default() += r.violation_count;
        types.insert(r.violation_type.clone());
    }

    // Ties go to the alphabetically first feature.
    agg.most_violated_feature = by_feature
        .iter()
        .fold(None::<(&str, i64)>, |best, (name, count)| match best {
            Some((_, c)) if c >= *count => best,
            _ => Some((*name, *count)),
        })
        .map(|(name, _)| name.to_string())
        .unwrap_or_default();
    agg.features_affected = by_feature.keys().map(|k| k.to_string()).collect();
    agg.violation_types = types.into_iter().collect();
    agg
}

/// Usage totals over a set of daily rows: the overall summary, per-feature
/// breakdown and uses per plan.
pub fn usage_overview(
    rows: &[DailyUsage],
) -> (UsageSummary, BTreeMap<String, FeatureUsage>, BTreeMap<String, i64>) {
    let mut users = BTreeSet::new();
    let mut dates = BTreeSet::new();
    let mut feature_users: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut by_feature: BTreeMap<String, FeatureUsage> = BTreeMap::new();
    let mut by_plan: BTreeMap<String, i64> = BTreeMap::new();
    let mut summary = UsageSummary::default();

    for row in rows {
        summary.total_uses += row.total_uses;
        summary.violations += row.violations;
        users.insert(row.user_id.as_str());
        dates.insert(row.usage_date);
        feature_users
            .entry(row.feature_name.as_str())
            .or_default()
            .insert(row.user_id.as_str());

        let f = by_feature.entry(row.feature_name.clone()).or_default();
        f.total += row.total_uses;
        f.violations += row.violations;
        *by_plan.entry(row.plan.clone()).or_default() += row.total_uses;
    }

    for (feature, set) in feature_users {
        if let Some(f) = by_feature.get_mut(feature) {
            f.users = set.len() as i64;
        }
    }

    summary.unique_users = users.len() as i64;
    summary.unique_dates = dates.len() as i64;
    summary.violation_rate = round2(violation_rate(summary.total_uses, summary.violations));
    summary.avg_uses_per_user = if summary.unique_users > 0 {
        round2(summary.total_uses as f64 / summary.unique_users as f64)
    } else {
        0.0
    };

    (summary, by_feature, by_plan)
}

// ── Chart series (client side) ───────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageChartPoint {
    pub feature_name: String,
    pub total_uses: i64,
    pub violations: i64,
    pub violation_rate: f64,
}

pub fn usage_chart(by_feature: &BTreeMap<String, FeatureUsage>) -> Vec<UsageChartPoint> {
    by_feature
        .iter()
        .map(|(feature, f)| UsageChartPoint {
            feature_name: feature.clone(),
            total_uses: f.total,
            violations: f.violations,
            violation_rate: f.violation_rate(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationChartPoint {
    pub feature_name: String,
    pub violation_count: i64,
    pub affected_users: i64,
}

pub fn violation_chart(records: &[ViolationRecord]) -> Vec<ViolationChartPoint> {
    records
        .iter()
        .map(|r| ViolationChartPoint {
            feature_name: r.feature_name.clone(),
            violation_count: r.violation_count,
            affected_users: r.affected_users,
        })
        .collect()
}

/// One hour across every endpoint and feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyPoint {
    pub hour_start: DateTime<Utc>,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub rate_limited_requests: i64,
    pub avg_response_time_ms: f64,
}

/// Merge per-endpoint buckets into one point per hour, oldest first.
pub fn hourly_series(buckets: &[HourlyMetricBucket]) -> Vec<HourlyPoint> {
    let mut hours: BTreeMap<DateTime<Utc>, (HourlyPoint, f64)> = BTreeMap::new();
    for b in buckets {
        let (point, weighted) = hours.entry(b.hour_start).or_insert_with(|| {
            (
                HourlyPoint {
                    hour_start: b.hour_start,
                    total_requests: 0,
                    successful_requests: 0,
                    rate_limited_requests: 0,
                    avg_response_time_ms: 0.0,
                },
                0.0,
            )
        });
        point.total_requests += b.total_requests;
        point.successful_requests += b.successful_requests;
        point.rate_limited_requests += b.rate_limited_requests;
        *weighted += b.avg_response_time_ms * b.total_requests as f64;
    }

    hours
        .into_values()
        .map(|(mut point, weighted)| {
            if point.total_requests > 0 {
                point.avg_response_time_ms = round2(weighted / point.total_requests as f64);
            }
            point
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn bucket(hour: u32, endpoint: &str, total: i64, ok: i64, limited: i64, avg: f64) -> HourlyMetricBucket {
        HourlyMetricBucket {
            hour_start: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            endpoint_path: endpoint.into(),
            feature_name: "topic-generator".into(),
            total_requests: total,
            successful_requests: ok,
            rate_limited_requests: limited,
            status_4xx: limited,
            status_5xx: 0,
            avg_response_time_ms: avg,
            unique_users: 2,
            unique_ips: 3,
            max_requests_per_user: 4,
        }
    }

    fn usage(user: &str, feature: &str, day: u32, plan: &str, total: i64, violations: i64) -> DailyUsage {
        DailyUsage {
            user_id: user.into(),
            feature_name: feature.into(),
            usage_date: NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
            plan: plan.into(),
            total_uses: total,
            plan_limit: None,
            violations,
        }
    }

    #[test]
    fn test_percentage_guards_zero_total() {
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, -1), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
    }

    #[test]
    fn test_violation_rate_zero_usage_is_exactly_zero() {
        for violations in [0, 1, 17, i64::MAX] {
            let rate = violation_rate(0, violations);
            assert_eq!(rate, 0.0);
            assert!(rate.is_finite());
        }
    }

    #[test]
    fn test_violation_rate_matches_ratio() {
        for (total, violations) in [(1, 1), (3, 1), (200, 7), (1_000_000, 999_999)] {
            let expected = violations as f64 / total as f64 * 100.0;
            assert!((violation_rate(total, violations) - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_summarize_metrics() {
        let buckets = vec![
            bucket(10, "/a", 600, 500, 80, 100.0),
            bucket(10, "/b", 400, 300, 70, 400.0),
        ];
        let s = summarize_metrics(&buckets);
        assert_eq!(s.total_requests, 1000);
        assert_eq!(s.successful_requests, 800);
        assert_eq!(s.rate_limited_requests, 150);
        assert!((s.success_rate - 80.0).abs() < 1e-9);
        assert!((s.rate_limit_rate - 15.0).abs() < 1e-9);
        assert!((s.error_rate - 15.0).abs() < 1e-9);
        // (600*100 + 400*400) / 1000
        assert_eq!(s.avg_response_time_ms, 220.0);
        assert_eq!(s.total_unique_users, 4);
        assert_eq!(s.hourly_data_points, 2);
    }

    #[test]
    fn test_summarize_empty_range() {
        let s = summarize_metrics(&[]);
        assert_eq!(s, MetricsSummary::default());
        assert!(s.success_rate.is_finite());
    }

    #[test]
    fn test_violation_aggregates() {
        let now = Utc::now();
        let rec = |feature: &str, vt: &str, count: i64, users: i64| ViolationRecord {
            feature_name: feature.into(),
            violation_type: vt.into(),
            violation_count: count,
            affected_users: users,
            unique_identifiers: users,
            max_excess: 1,
            first_seen: now,
            last_seen: now,
        };
        let agg = violation_aggregates(&[
            rec("pdf-analysis", "per_minute", 4, 2),
            rec("topic-generator", "daily_quota", 3, 1),
            rec("topic-generator", "per_minute", 3, 3),
        ]);
        assert_eq!(agg.total_violations, 10);
        assert_eq!(agg.total_affected_users, 6);
        assert_eq!(agg.most_violated_feature, "topic-generator");
        assert_eq!(agg.violation_types, vec!["daily_quota", "per_minute"]);
        assert_eq!(agg.features_affected, vec!["pdf-analysis", "topic-generator"]);

        assert_eq!(violation_aggregates(&[]).most_violated_feature, "");
    }

    #[test]
    fn test_usage_overview() {
        let rows = vec![
            usage("u1", "topic-generator", 1, "free", 10, 2),
            usage("u1", "topic-generator", 2, "free", 5, 0),
            usage("u2", "topic-generator", 2, "pro", 20, 0),
            usage("u2", "pdf-analysis", 2, "pro", 0, 0),
        ];
        let (summary, by_feature, by_plan) = usage_overview(&rows);
        assert_eq!(summary.total_uses, 35);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(summary.unique_dates, 2);
        assert_eq!(summary.violations, 2);
        assert_eq!(summary.violation_rate, 5.71);
        assert_eq!(summary.avg_uses_per_user, 17.5);

        assert_eq!(by_feature["topic-generator"], FeatureUsage { total: 35, users: 2, violations: 2 });
        assert_eq!(by_feature["pdf-analysis"].violation_rate(), 0.0);
        assert_eq!(by_plan["free"], 15);
        assert_eq!(by_plan["pro"], 20);
    }

    #[test]
    fn test_usage_chart_keeps_zero_usage_features() {
        let mut by_feature = BTreeMap::new();
        by_feature.insert(
            "topic-generator".to_string(),
            FeatureUsage { total: 0, users: 0, violations: 0 },
        );
        by_feature.insert(
            "pdf-analysis".to_string(),
            FeatureUsage { total: 50, users: 5, violations: 5 },
        );
        let chart = usage_chart(&by_feature);
        assert_eq!(chart.len(), 2);
        assert_eq!(chart[0].feature_name, "pdf-analysis");
        assert_eq!(chart[0].violation_rate, 10.0);
        assert_eq!(chart[1].violation_rate, 0.0);
    }

    #[test]
    fn test_hourly_series_merges_endpoints() {
        let series = hourly_series(&[
            bucket(11, "/a", 10, 10, 0, 50.0),
            bucket(10, "/a", 30, 20, 10, 100.0),
            bucket(10, "/b", 10, 10, 0, 300.0),
        ]);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].hour_start.format("%H").to_string(), "10");
        assert_eq!(series[0].total_requests, 40);
        assert_eq!(series[0].rate_limited_requests, 10);
        assert_eq!(series[0].avg_response_time_ms, 150.0);
        assert_eq!(series[1].total_requests, 10);
    }
}
