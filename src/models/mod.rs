pub mod metrics;
pub mod usage;
pub mod violations;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive time window used by every query: `start_date <= t <= end_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            start_date,
            end_date,
        }
    }

    /// The window of length `span` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, span: Duration) -> Self {
        Self::new(end - span, end)
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start_date && t <= self.end_date
    }

    pub fn span(&self) -> Duration {
        self.end_date - self.start_date
    }
}

/// Display name, contact and subscription plan of a platform user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub plan: String,
}

/// Plan assumed for users without a profile row.
pub const DEFAULT_PLAN: &str = "free";

/// Trim an optional text column; blank strings become `None`.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_date_range_contains_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let range = DateRange::new(start, end);
        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + Duration::seconds(1)));
        assert_eq!(range.span(), Duration::hours(24));
    }

    #[test]
    fn test_date_range_serializes_camel_case() {
        let end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let json = serde_json::to_value(DateRange::ending_at(end, Duration::days(7))).unwrap();
        assert_eq!(json["startDate"], "2024-02-24T00:00:00Z");
        assert_eq!(json["endDate"], "2024-03-02T00:00:00Z");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  Ada ".into())), Some("Ada".into()));
        assert_eq!(non_blank(Some("   ".into())), None);
        assert_eq!(non_blank(None), None);
    }
}
