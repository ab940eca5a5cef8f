use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::non_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    DailyQuota,
    PerMinute,
    AuthFailures,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::DailyQuota => "daily_quota",
            ViolationType::PerMinute => "per_minute",
            ViolationType::AuthFailures => "auth_failures",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily_quota" => Ok(ViolationType::DailyQuota),
            "per_minute" => Ok(ViolationType::PerMinute),
            "auth_failures" => Ok(ViolationType::AuthFailures),
            other => Err(format!("unknown violation type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    UserId,
    Ip,
    Email,
    IpUserPair,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::UserId => "user_id",
            IdentifierType::Ip => "ip",
            IdentifierType::Email => "email",
            IdentifierType::IpUserPair => "ip_user_pair",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    #[default]
    Logged,
    Blocked,
    CaptchaRequired,
}

impl ActionTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTaken::Logged => "logged",
            ActionTaken::Blocked => "blocked",
            ActionTaken::CaptchaRequired => "captcha_required",
        }
    }
}

/// A single rate-limit-exceeded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub user_id: Option<String>,
    pub identifier_type: IdentifierType,
    pub identifier_value: String,
    pub feature_name: String,
    pub endpoint_path: Option<String>,
    pub violation_type: ViolationType,
    pub limit_threshold: i64,
    pub actual_count: i64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub action_taken: ActionTaken,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl ViolationEvent {
    /// How far the observed count went past the limit; never negative.
    pub fn excess(&self) -> i64 {
        (self.actual_count - self.limit_threshold).max(0)
    }
}

/// Violations of one feature and type within the queried window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRecord {
    pub feature_name: String,
    pub violation_type: String,
    pub violation_count: i64,
    pub affected_users: i64,
    pub unique_identifiers: i64,
    pub max_excess: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationAggregates {
    pub total_violations: i64,
    pub total_affected_users: i64,
    pub most_violated_feature: String,
    pub violation_types: Vec<String>,
    pub features_affected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationsMeta {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub filters: ViolationFilters,
}

/// Body of `GET /api/admin/rate-limiting/violations?view=summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationsResponse {
    pub summary: Vec<ViolationRecord>,
    pub aggregates: ViolationAggregates,
    pub meta: ViolationsMeta,
}

/// Per-user violation totals, ranked by `total_violations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopViolatingUser {
    pub user_id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub total_violations: i64,
    pub features_violated: i64,
    pub last_violation: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TopViolatingUserRow {
    pub user_id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub total_violations: i64,
    pub features_violated: i64,
    pub last_violation: DateTime<Utc>,
}

impl TopViolatingUserRow {
    pub fn normalize(self) -> TopViolatingUser {
        TopViolatingUser {
            user_id: self.user_id,
            full_name: non_blank(self.full_name),
            email: non_blank(self.email),
            total_violations: self.total_violations,
            features_violated: self.features_violated,
            last_violation: self.last_violation,
        }
    }
}

impl TopViolatingUser {
    /// Name shown in tables: full name, then email, then the raw id.
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationPatterns {
    pub violations_by_feature: BTreeMap<String, i64>,
    pub violations_by_plan: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUsersMeta {
    pub total_users: usize,
    pub top_violator: Option<TopViolatingUser>,
}

/// Body of `GET /api/admin/rate-limiting/violations?view=users`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUsersResponse {
    pub users: Vec<TopViolatingUser>,
    pub patterns: ViolationPatterns,
    pub meta: TopUsersMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_type_round_trips_through_str() {
        for vt in [
            ViolationType::DailyQuota,
            ViolationType::PerMinute,
            ViolationType::AuthFailures,
        ] {
            assert_eq!(vt.as_str().parse::<ViolationType>().unwrap(), vt);
        }
        assert!("hourly".parse::<ViolationType>().is_err());
    }

    #[test]
    fn test_event_defaults_action_and_metadata() {
        let ev: ViolationEvent = serde_json::from_value(serde_json::json!({
            "userId": "u1",
            "identifierType": "user_id",
            "identifierValue": "u1",
            "featureName": "topic-generator",
            "endpointPath": null,
            "violationType": "per_minute",
            "limitThreshold": 10,
            "actualCount": 7,
            "windowStart": null,
            "windowEnd": null,
            "ipAddress": null,
            "userAgent": null,
            "occurredAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(ev.action_taken, ActionTaken::Logged);
        assert_eq!(ev.metadata, serde_json::json!({}));
        assert_eq!(ev.excess(), 0);
    }

    #[test]
    fn test_display_name_falls_back() {
        let row = TopViolatingUserRow {
            user_id: "u-9".into(),
            full_name: Some("  ".into()),
            email: Some("nine@example.edu".into()),
            total_violations: 3,
            features_violated: 1,
            last_violation: Utc::now(),
        };
        let user = row.normalize();
        assert_eq!(user.full_name, None);
        assert_eq!(user.display_name(), "nine@example.edu");
    }
}
