use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw API request as observed by the rate-limiting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub occurred_at: DateTime<Utc>,
    pub endpoint_path: String,
    pub feature_name: String,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub status_code: u16,
    /// Rejected by a rate limit. Usually also a 429, so it overlaps `status_4xx`.
    pub rate_limited: bool,
    pub response_time_ms: f64,
}

impl RequestEvent {
    pub fn is_success(&self) -> bool {
        self.status_code < 400 && !self.rate_limited
    }

    pub fn is_4xx(&self) -> bool {
        (400..500).contains(&self.status_code)
    }

    pub fn is_5xx(&self) -> bool {
        self.status_code >= 500
    }
}

/// Hourly rollup of request counters for one (hour, endpoint, feature).
///
/// The status counters are reported independently; `total_requests` is not
/// guaranteed to equal their sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyMetricBucket {
    pub hour_start: DateTime<Utc>,
    pub endpoint_path: String,
    pub feature_name: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub rate_limited_requests: i64,
    #[serde(rename = "status4xx")]
    pub status_4xx: i64,
    #[serde(rename = "status5xx")]
    pub status_5xx: i64,
    pub avg_response_time_ms: f64,
    pub unique_users: i64,
    pub unique_ips: i64,
    pub max_requests_per_user: i64,
}

/// `api_metrics_hourly` as stored; nullable columns are resolved in `normalize`.
#[derive(Debug, sqlx::FromRow)]
pub struct HourlyMetricRow {
    pub hour_start: DateTime<Utc>,
    pub endpoint_path: String,
    pub feature_name: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub rate_limited_requests: i64,
    pub status_4xx: i64,
    pub status_5xx: i64,
    pub avg_response_time_ms: Option<f64>,
    pub unique_users: Option<i64>,
    pub unique_ips: Option<i64>,
    pub max_requests_per_user: Option<i64>,
}

impl HourlyMetricRow {
    pub fn normalize(self) -> HourlyMetricBucket {
        HourlyMetricBucket {
            hour_start: self.hour_start,
            endpoint_path: self.endpoint_path,
            feature_name: self.feature_name,
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            rate_limited_requests: self.rate_limited_requests,
            status_4xx: self.status_4xx,
            status_5xx: self.status_5xx,
            avg_response_time_ms: self
                .avg_response_time_ms
                .filter(|v| v.is_finite())
                .unwrap_or(0.0),
            unique_users: self.unique_users.unwrap_or(0),
            unique_ips: self.unique_ips.unwrap_or(0),
            max_requests_per_user: self.max_requests_per_user.unwrap_or(0),
        }
    }
}

/// Totals and derived rates over every bucket in the requested range.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_requests: i64,
    pub successful_requests: i64,
    pub rate_limited_requests: i64,
    #[serde(rename = "status4xx")]
    pub status_4xx: i64,
    #[serde(rename = "status5xx")]
    pub status_5xx: i64,
    pub success_rate: f64,
    pub rate_limit_rate: f64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub total_unique_users: i64,
    pub total_unique_ips: i64,
    pub hourly_data_points: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsMeta {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub filters: MetricsFilters,
}

/// Body of `GET /api/admin/rate-limiting/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub summary: MetricsSummary,
    pub metrics: Vec<HourlyMetricBucket>,
    pub meta: MetricsMeta,
}
