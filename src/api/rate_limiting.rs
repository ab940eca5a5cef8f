use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;

use crate::errors::AppError;
use crate::filters::{apply_filters, FilterCriteria};
use crate::models::metrics::{MetricsFilters, MetricsMeta, MetricsResponse};
use crate::aggregate;
use crate::models::usage::{UsageMeta, UsageResponse, UserUsageResponse};
use crate::models::violations::{
    TopUsersMeta, TopUsersResponse, ViolationFilters, ViolationsMeta, ViolationsResponse,
};
use crate::models::DateRange;
use crate::stats;
use crate::store::{MetricsQuery, ViolationQuery};
use crate::AppState;

/// Window used when the caller omits `startDate`.
pub const DEFAULT_WINDOW_HOURS: i64 = 24;
pub const DEFAULT_TOP_USERS_LIMIT: i64 = 50;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub endpoint_path: Option<String>,
    pub feature_name: Option<String>,
    pub violation_type: Option<String>,
    pub view: Option<String>,
    pub user_id: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

impl RateLimitParams {
    fn range(&self) -> Result<DateRange, AppError> {
        resolve_range(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            Utc::now(),
        )
    }

    fn limit(&self) -> Result<Option<i64>, AppError> {
        match self.limit {
            Some(n) if n <= 0 => Err(AppError::BadRequest(format!(
                "limit must be positive, got {}",
                n
            ))),
            other => Ok(other),
        }
    }

    fn criteria(&self) -> FilterCriteria {
        match non_empty(&self.search) {
            Some(text) => FilterCriteria::default().search(text),
            None => FilterCriteria::default(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn parse_instant(name: &str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    // bare dates mean midnight UTC
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| AppError::BadRequest(format!("invalid {}: '{}'", name, raw)))
}

/// Resolve the optional `startDate`/`endDate` pair into a window.
/// Missing end is `now`, missing start is 24 hours before the end.
pub fn resolve_range(
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateRange, AppError> {
    let end_date = match end {
        Some(raw) => parse_instant("endDate", raw)?,
        None => now,
    };
    let start_date = match start {
        Some(raw) => parse_instant("startDate", raw)?,
        None => end_date - Duration::hours(DEFAULT_WINDOW_HOURS),
    };
    if start_date >= end_date {
        return Err(AppError::BadRequest(
            "startDate must be before endDate".into(),
        ));
    }
    Ok(DateRange::new(start_date, end_date))
}

fn params(query: Result<Query<RateLimitParams>, QueryRejection>) -> Result<RateLimitParams, AppError> {
    query
        .map(|Query(p)| p)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// GET /api/admin/rate-limiting/metrics: hourly buckets plus a summary over
/// the whole filtered range.
pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RateLimitParams>, QueryRejection>,
) -> Result<Json<MetricsResponse>, AppError> {
    let params = params(query)?;
    let range = params.range()?;
    let limit = params.limit()?;

    let query = MetricsQuery {
        range,
        endpoint_path: non_empty(&params.endpoint_path),
        feature_name: non_empty(&params.feature_name),
        limit: None,
    };

    let mut buckets = state.store.hourly_metrics(&query).await.map_err(|e| {
        tracing::error!("get_metrics failed: {:#}", e);
        AppError::Internal(e)
    })?;

    let summary = stats::summarize_metrics(&buckets);
    if let Some(n) = limit {
        buckets.truncate(n as usize);
    }

    tracing::debug!(
        buckets = buckets.len(),
        total_requests = summary.total_requests,
        "metrics query served"
    );

    Ok(Json(MetricsResponse {
        summary,
        metrics: buckets,
        meta: MetricsMeta {
            start_date: range.start_date,
            end_date: range.end_date,
            filters: MetricsFilters {
                endpoint_path: query.endpoint_path,
                feature_name: query.feature_name,
            },
        },
    }))
}

/// GET /api/admin/rate-limiting/violations: `view=summary` (default) or
/// `view=users`.
pub async fn get_violations(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RateLimitParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = params(query)?;
    let range = params.range()?;
    let limit = params.limit()?;

    match params.view.as_deref().unwrap_or("summary") {
        "summary" => {
            let query = ViolationQuery {
                range,
                feature_name: non_empty(&params.feature_name),
                violation_type: non_empty(&params.violation_type),
                limit: None,
            };
            let records = state.store.violation_summary(&query).await.map_err(|e| {
                tracing::error!("get_violations failed: {:#}", e);
                AppError::Internal(e)
            })?;
            let mut records = apply_filters(&records, &params.criteria());
            let aggregates = stats::violation_aggregates(&records);
            if let Some(n) = limit {
                records.truncate(n as usize);
            }

            Ok(Json(ViolationsResponse {
                summary: records,
                aggregates,
                meta: ViolationsMeta {
                    start_date: range.start_date,
                    end_date: range.end_date,
                    filters: ViolationFilters {
                        feature_name: query.feature_name,
                        violation_type: query.violation_type,
                    },
                },
            })
            .into_response())
        }
        "users" => {
            let limit = limit.unwrap_or(DEFAULT_TOP_USERS_LIMIT);
            let (users, patterns) = tokio::try_join!(
                state.store.top_violating_users(range, None),
                state.store.violation_patterns(range),
            )
            .map_err(|e| {
                tracing::error!("get_top_violators failed: {:#}", e);
                AppError::Internal(e)
            })?;
            let mut users = apply_filters(&users, &params.criteria());
            let total_users = users.len();
            users.truncate(limit as usize);

            Ok(Json(TopUsersResponse {
                meta: TopUsersMeta {
                    total_users,
                    top_violator: users.first().cloned(),
                },
                users,
                patterns,
            })
            .into_response())
        }
        other => Err(AppError::BadRequest(format!(
            "unknown view '{}', expected 'summary' or 'users'",
            other
        ))),
    }
}

/// GET /api/admin/rate-limiting/usage: `view=overview` (default) with
/// per-feature and per-plan usage, or `view=user` with one user's daily
/// history of one feature.
pub async fn get_usage(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RateLimitParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = params(query)?;
    let range = params.range()?;
    let feature = non_empty(&params.feature_name);
    let meta = UsageMeta {
        start_date: range.start_date,
        end_date: range.end_date,
    };

    match params.view.as_deref().unwrap_or("overview") {
        "overview" => {
            let rows = state
                .store
                .daily_usage(range, feature.as_deref())
                .await
                .map_err(|e| {
                    tracing::error!("get_usage failed: {:#}", e);
                    AppError::Internal(e)
                })?;

            let (summary, usage_by_feature, usage_by_plan) = stats::usage_overview(&rows);

            Ok(Json(UsageResponse {
                summary,
                usage_by_feature,
                usage_by_plan,
                records: aggregate::usage_records(&rows),
                meta,
            })
            .into_response())
        }
        "user" => {
            let user_id = non_empty(&params.user_id)
                .ok_or_else(|| AppError::BadRequest("view=user requires userId".into()))?;
            let feature_name = feature
                .ok_or_else(|| AppError::BadRequest("view=user requires featureName".into()))?;

            let days = state
                .store
                .user_usage_stats(&user_id, &feature_name, range)
                .await
                .map_err(|e| {
                    tracing::error!("get_user_usage failed: {:#}", e);
                    AppError::Internal(e)
                })?;

            Ok(Json(UserUsageResponse {
                user_id,
                feature_name,
                days,
                meta,
            })
            .into_response())
        }
        other => Err(AppError::BadRequest(format!(
            "unknown view '{}', expected 'overview' or 'user'",
            other
        ))),
    }
}
