//! Plain-text rendering of a dashboard snapshot.

use crate::filters::{apply_filters, FilterCriteria};
use crate::models::metrics::{MetricsResponse, MetricsSummary};
use crate::models::usage::UsageResponse;
use crate::models::violations::{TopUsersResponse, ViolationsResponse};
use crate::stats;

use super::{Snapshot, TimeRange};

pub const NO_DATA: &str = "No data available";
/// Rows shown in the top-violators card.
pub const TOP_USERS_SHOWN: usize = 5;

/// `1234567` → `1,234,567`.
pub fn format_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

pub fn format_percentage(value: f64) -> String {
    format!("{:.2}%", value)
}

/// Sub-second values in milliseconds (up to two decimals, trailing zeros
/// dropped), otherwise seconds. The unit switches on the displayed value.
pub fn format_time(ms: f64) -> String {
    let shown = format!("{:.2}", ms);
    if shown.parse::<f64>().map_or(false, |v| v < 1000.0) {
        let trimmed = shown.trim_end_matches('0').trim_end_matches('.');
        format!("{}ms", trimmed)
    } else {
        format!("{:.2}s", ms / 1000.0)
    }
}

/// Violation-rate cell; a feature with no uses shows `0%`.
pub fn violation_rate_cell(total: i64, violations: i64) -> String {
    if total == 0 {
        "0%".to_string()
    } else {
        format_percentage(stats::violation_rate(total, violations))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatCard {
    pub title: &'static str,
    pub value: String,
    pub detail: String,
}

/// The four headline cards. Rates are recomputed from the counters.
pub fn stat_cards(summary: &MetricsSummary) -> Vec<StatCard> {
    let total = summary.total_requests;
    vec![
        StatCard {
            title: "Total Requests",
            value: format_number(total),
            detail: format!("{} hourly data points", summary.hourly_data_points),
        },
        StatCard {
            title: "Success Rate",
            value: format_percentage(stats::percentage(summary.successful_requests, total)),
            detail: format!("{} successful", format_number(summary.successful_requests)),
        },
        StatCard {
            title: "Rate Limited",
            value: format_number(summary.rate_limited_requests),
            detail: format!(
                "{} of requests",
                format_percentage(stats::percentage(summary.rate_limited_requests, total))
            ),
        },
        StatCard {
            title: "Avg Response Time",
            value: format_time(summary.avg_response_time_ms),
            detail: format!(
                "{} errors",
                format_percentage(stats::percentage(
                    summary.status_4xx + summary.status_5xx,
                    total
                ))
            ),
        },
    ]
}

fn metrics_section(metrics: Option<&MetricsResponse>) -> Vec<String> {
    let mut lines = vec!["== Overview ==".to_string()];
    let Some(m) = metrics else {
        lines.push(NO_DATA.to_string());
        return lines;
    };
    for card in stat_cards(&m.summary) {
        lines.push(format!("{:<18} {:>12}  ({})", card.title, card.value, card.detail));
    }

    let series = stats::hourly_series(&m.metrics);
    if series.is_empty() {
        lines.push(NO_DATA.to_string());
        return lines;
    }
    lines.push(format!(
        "{:<17} {:>10} {:>10} {:>10} {:>10}",
        "HOUR", "REQUESTS", "SUCCESS", "LIMITED", "AVG"
    ));
    for p in series {
        lines.push(format!(
            "{:<17} {:>10} {:>10} {:>10} {:>10}",
            p.hour_start.format("%Y-%m-%d %H:00"),
            format_number(p.total_requests),
            format_number(p.successful_requests),
            format_number(p.rate_limited_requests),
            format_time(p.avg_response_time_ms),
        ));
    }
    lines
}

fn violations_section(
    violations: Option<&ViolationsResponse>,
    criteria: &FilterCriteria,
) -> Vec<String> {
    let mut lines = vec!["== Violations ==".to_string()];
    let rows = violations
        .map(|v| apply_filters(&v.summary, criteria))
        .unwrap_or_default();
    if rows.is_empty() {
        lines.push(NO_DATA.to_string());
        return lines;
    }
    if let Some(v) = violations {
        lines.push(format!(
            "total {} · affected users {} · most violated {}",
            format_number(v.aggregates.total_violations),
            format_number(v.aggregates.total_affected_users),
            if v.aggregates.most_violated_feature.is_empty() {
                "-"
            } else {
                v.aggregates.most_violated_feature.as_str()
            },
        ));
    }
    lines.push(format!(
        "{:<24} {:<14} {:>8} {:>8} {:>8}",
        "FEATURE", "TYPE", "COUNT", "USERS", "EXCESS"
    ));
    for (point, record) in stats::violation_chart(&rows).iter().zip(&rows) {
        lines.push(format!(
            "{:<24} {:<14} {:>8} {:>8} {:>8}",
            point.feature_name,
            record.violation_type,
            format_number(point.violation_count),
            format_number(point.affected_users),
            format_number(record.max_excess),
        ));
    }
    lines
}

fn usage_section(usage: Option<&UsageResponse>) -> Vec<String> {
    let mut lines = vec!["== Feature Usage ==".to_string()];
    let Some(u) = usage else {
        lines.push(NO_DATA.to_string());
        return lines;
    };
    if u.usage_by_feature.is_empty() {
        lines.push(NO_DATA.to_string());
        return lines;
    }
    lines.push(format!(
        "{:<24} {:>10} {:>8} {:>10} {:>10}",
        "FEATURE", "USES", "USERS", "VIOLATIONS", "RATE"
    ));
    for (point, (_, f)) in stats::usage_chart(&u.usage_by_feature)
        .iter()
        .zip(&u.usage_by_feature)
    {
        lines.push(format!(
            "{:<24} {:>10} {:>8} {:>10} {:>10}",
            point.feature_name,
            format_number(point.total_uses),
            format_number(f.users),
            format_number(point.violations),
            violation_rate_cell(point.total_uses, point.violations),
        ));
    }
    lines.push(format!(
        "overall {} uses · {} users · violation rate {}",
        format_number(u.summary.total_uses),
        format_number(u.summary.unique_users),
        violation_rate_cell(u.summary.total_uses, u.summary.violations),
    ));
    lines
}

fn top_users_section(top: Option<&TopUsersResponse>, criteria: &FilterCriteria) -> Vec<String> {
    let mut lines = vec!["== Top Violators ==".to_string()];
    let users = top
        .map(|t| apply_filters(&t.users, criteria))
        .unwrap_or_default();
    if users.is_empty() {
        lines.push(NO_DATA.to_string());
        return lines;
    }
    for (i, u) in users.iter().take(TOP_USERS_SHOWN).enumerate() {
        lines.push(format!(
            "{}. {:<32} {:>6} violations · {} features · last {}",
            i + 1,
            u.display_name(),
            format_number(u.total_violations),
            u.features_violated,
            u.last_violation.format("%Y-%m-%d %H:%M"),
        ));
    }
    lines
}

/// Render every section. Sections whose slice is missing show the
/// placeholder instead of stale data.
pub fn render_dashboard(snapshot: &Snapshot, range: TimeRange, criteria: &FilterCriteria) -> String {
    // features/categories narrow the violation table only; top users span features
    let user_criteria = FilterCriteria {
        search: criteria.search.clone(),
        ..FilterCriteria::default()
    };

    let mut lines = vec![format!("Rate Limiting Dashboard ({})", range.label())];
    for section in [
        metrics_section(snapshot.metrics.as_ref()),
        violations_section(snapshot.violations.as_ref(), criteria),
        usage_section(snapshot.usage.as_ref()),
        top_users_section(snapshot.top_users.as_ref(), &user_criteria),
    ] {
        lines.push(String::new());
        lines.extend(section);
    }
    lines.join("\n")
}
