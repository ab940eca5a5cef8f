//! Metrics aggregator: turns raw events into hourly buckets, violation
//! summaries and violator rankings.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, DurationRound, NaiveDate, TimeDelta, Utc};

use crate::models::metrics::{HourlyMetricBucket, RequestEvent};
use crate::models::usage::{DailyUsage, UsageRecord};
use crate::models::violations::{
    TopViolatingUser, ViolationEvent, ViolationPatterns, ViolationRecord,
};
use crate::models::{non_blank, Profile, DEFAULT_PLAN};

/// Start of the UTC hour containing `t`.
pub fn hour_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(TimeDelta::hours(1)).unwrap_or(t)
}

/// Group request events by (hour, endpoint, feature) and compute each bucket.
///
/// Output is ordered newest hour first, then by endpoint and feature.
pub fn rollup_requests(events: &[RequestEvent]) -> Vec<HourlyMetricBucket> {
    #[derive(Default)]
    struct Acc<'a> {
        total: i64,
        ok: i64,
        limited: i64,
        s4xx: i64,
        s5xx: i64,
        response_ms: f64,
        per_user: HashMap<&'a str, i64>,
        ips: BTreeSet<&'a str>,
    }

    let mut groups: BTreeMap<(DateTime<Utc>, &str, &str), Acc> = BTreeMap::new();
    for ev in events {
        let acc = groups
            .entry((
                hour_floor(ev.occurred_at),
                ev.endpoint_path.as_str(),
                ev.feature_name.as_str(),
            ))
            .or_default();
        acc.total += 1;
        acc.ok += ev.is_success() as i64;
        acc.limited += ev.rate_limited as i64;
        acc.s4xx += ev.is_4xx() as i64;
        acc.s5xx += ev.is_5xx() as i64;
        acc.response_ms += ev.response_time_ms;
        if let Some(user) = ev.user_id.as_deref() {
            *acc.per_user.entry(user).or_default() += 1;
        }
        if let Some(ip) = ev.ip_address.as_deref() {
            acc.ips.insert(ip);
        }
    }

    groups
        .into_iter()
        .rev()
        .map(|((hour_start, endpoint, feature), acc)| HourlyMetricBucket {
            hour_start,
            endpoint_path: endpoint.to_string(),
            feature_name: feature.to_string(),
            total_requests: acc.total,
            successful_requests: acc.ok,
            rate_limited_requests: acc.limited,
            status_4xx: acc.s4xx,
            status_5xx: acc.s5xx,
            avg_response_time_ms: if acc.total > 0 {
                acc.response_ms / acc.total as f64
            } else {
                0.0
            },
            unique_users: acc.per_user.len() as i64,
            unique_ips: acc.ips.len() as i64,
            max_requests_per_user: acc.per_user.values().copied().max().unwrap_or(0),
        })
        .collect()
}

/// Group violation events by (feature, violation type), most frequent first.
pub fn summarize_violations(events: &[ViolationEvent]) -> Vec<ViolationRecord> {
    struct Acc<'a> {
        count: i64,
        users: BTreeSet<&'a str>,
        identifiers: BTreeSet<&'a str>,
        max_excess: i64,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
    }

    let mut groups: BTreeMap<(&str, &str), Acc> = BTreeMap::new();
    for ev in events {
        let acc = groups
            .entry((ev.feature_name.as_str(), ev.violation_type.as_str()))
            .or_insert_with(|| Acc {
                count: 0,
                users: BTreeSet::new(),
                identifiers: BTreeSet::new(),
                max_excess: 0,
                first_seen: ev.occurred_at,
                last_seen: ev.occurred_at,
            });
        acc.count += 1;
        if let Some(user) = ev.user_id.as_deref() {
            acc.users.insert(user);
        }
        acc.identifiers.insert(ev.identifier_value.as_str());
        acc.max_excess = acc.max_excess.max(ev.excess());
        acc.first_seen = acc.first_seen.min(ev.occurred_at);
        acc.last_seen = acc.last_seen.max(ev.occurred_at);
    }

    let mut records: Vec<ViolationRecord> = groups
        .into_iter()
        .map(|((feature, vt), acc)| ViolationRecord {
            feature_name: feature.to_string(),
            violation_type: vt.to_string(),
            violation_count: acc.count,
            affected_users: acc.users.len() as i64,
            unique_identifiers: acc.identifiers.len() as i64,
            max_excess: acc.max_excess,
            first_seen: acc.first_seen,
            last_seen: acc.last_seen,
        })
        .collect();
    // stable: equal counts keep (feature, type) order
    records.sort_by(|a, b| b.violation_count.cmp(&a.violation_count));
    records
}

/// Rank users by violation count. Anonymous violations (no user id) are skipped.
pub fn rank_violators(
    events: &[ViolationEvent],
    profiles: &HashMap<String, Profile>,
    limit: usize,
) -> Vec<TopViolatingUser> {
    let mut per_user: BTreeMap<&str, (i64, BTreeSet<&str>, DateTime<Utc>)> = BTreeMap::new();
    for ev in events {
        let Some(user) = ev.user_id.as_deref() else {
            continue;
        };
        let entry = per_user
            .entry(user)
            .or_insert_with(|| (0, BTreeSet::new(), ev.occurred_at));
        entry.0 += 1;
        entry.1.insert(ev.feature_name.as_str());
        entry.2 = entry.2.max(ev.occurred_at);
    }

    let mut users: Vec<TopViolatingUser> = per_user
        .into_iter()
        .map(|(user, (total, features, last))| {
            let profile = profiles.get(user);
            TopViolatingUser {
                user_id: user.to_string(),
                full_name: non_blank(profile.and_then(|p| p.full_name.clone())),
                email: non_blank(profile.and_then(|p| p.email.clone())),
                total_violations: total,
                features_violated: features.len() as i64,
                last_violation: last,
            }
        })
        .collect();
    users.sort_by(|a, b| b.total_violations.cmp(&a.total_violations));
    users.truncate(limit);
    users
}

/// Violation counts per feature (all events) and per plan (identified users).
pub fn violation_patterns(
    events: &[ViolationEvent],
    profiles: &HashMap<String, Profile>,
) -> ViolationPatterns {
    let mut patterns = ViolationPatterns::default();
    for ev in events {
        *patterns
            .violations_by_feature
            .entry(ev.feature_name.clone())
            .or_default() += 1;
        if let Some(user) = ev.user_id.as_deref() {
            let plan = profiles
                .get(user)
                .map(|p| p.plan.as_str())
                .unwrap_or(DEFAULT_PLAN);
            *patterns.violations_by_plan.entry(plan.to_string()).or_default() += 1;
        }
    }
    patterns
}

/// Collapse per-user daily rows into (feature, date, plan) usage records.
pub fn usage_records(rows: &[DailyUsage]) -> Vec<UsageRecord> {
    let mut groups: BTreeMap<(&str, NaiveDate, &str), (i64, BTreeSet<&str>, i64)> =
        BTreeMap::new();
    for row in rows {
        let acc = groups
            .entry((row.feature_name.as_str(), row.usage_date, row.plan.as_str()))
            .or_default();
        acc.0 += row.total_uses;
        acc.1.insert(row.user_id.as_str());
        acc.2 += row.violations;
    }
    groups
        .into_iter()
        .map(|((feature, date, plan), (total, users, violations))| UsageRecord {
            feature_name: feature.to_string(),
            date,
            plan: plan.to_string(),
            total_uses: total,
            unique_users: users.len() as i64,
            violations,
        })
        .collect()
}
