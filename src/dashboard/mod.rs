//! Admin dashboard state: time-range selection, concurrent fetch of the four
//! summaries and per-section failure handling.

pub mod render;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::client::{ClientError, RateLimitClient};
use crate::models::metrics::MetricsResponse;
use crate::models::usage::UsageResponse;
use crate::models::violations::{TopUsersResponse, ViolationsResponse};
use crate::models::DateRange;

// ── Time range ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    Last24h,
    Last7d,
    Last30d,
}

impl TimeRange {
    pub fn span(&self) -> Duration {
        match self {
            TimeRange::Last24h => Duration::hours(24),
            TimeRange::Last7d => Duration::days(7),
            TimeRange::Last30d => Duration::days(30),
        }
    }

    /// The window ending at `now`.
    pub fn date_range(&self, now: DateTime<Utc>) -> DateRange {
        DateRange::ending_at(now, self.span())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Last24h => "24h",
            TimeRange::Last7d => "7d",
            TimeRange::Last30d => "30d",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeRange::Last24h => "Last 24 hours",
            TimeRange::Last7d => "Last 7 days",
            TimeRange::Last30d => "Last 30 days",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "24h" => Ok(TimeRange::Last24h),
            "7d" => Ok(TimeRange::Last7d),
            "30d" => Ok(TimeRange::Last30d),
            other => Err(format!("unknown time range '{}', expected 24h, 7d or 30d", other)),
        }
    }
}

// ── Collaborators ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Metrics,
    Violations,
    Usage,
    TopUsers,
}

impl Section {
    pub fn label(&self) -> &'static str {
        match self {
            Section::Metrics => "metrics",
            Section::Violations => "violations",
            Section::Usage => "usage",
            Section::TopUsers => "top users",
        }
    }
}

/// Where the dashboard gets its four summaries from.
#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn metrics(&self, range: DateRange) -> Result<MetricsResponse, ClientError>;
    async fn violations(&self, range: DateRange) -> Result<ViolationsResponse, ClientError>;
    async fn usage(&self, range: DateRange) -> Result<UsageResponse, ClientError>;
    async fn top_users(&self, range: DateRange) -> Result<TopUsersResponse, ClientError>;
}

#[async_trait]
impl SummarySource for RateLimitClient {
    async fn metrics(&self, range: DateRange) -> Result<MetricsResponse, ClientError> {
        self.fetch_metrics(range).await
    }

    async fn violations(&self, range: DateRange) -> Result<ViolationsResponse, ClientError> {
        self.fetch_violations(range).await
    }

    async fn usage(&self, range: DateRange) -> Result<UsageResponse, ClientError> {
        self.fetch_usage(range).await
    }

    async fn top_users(&self, range: DateRange) -> Result<TopUsersResponse, ClientError> {
        self.fetch_top_users(range).await
    }
}

/// User-visible error notifications.
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Notifier that keeps every toast in order.
#[derive(Debug, Default)]
pub struct ToastLog {
    messages: Mutex<Vec<String>>,
}

impl ToastLog {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Notifier for ToastLog {
    fn error(&self, message: &str) {
        if let Ok(mut m) = self.messages.lock() {
            m.push(message.to_string());
        }
    }
}

// ── State ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
}

/// The four slices shown on screen. A slice is `None` when its last fetch
/// failed or nothing has been fetched yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub metrics: Option<MetricsResponse>,
    pub violations: Option<ViolationsResponse>,
    pub usage: Option<UsageResponse>,
    pub top_users: Option<TopUsersResponse>,
}

impl Snapshot {
    pub fn loaded_sections(&self) -> usize {
        [
            self.metrics.is_some(),
            self.violations.is_some(),
            self.usage.is_some(),
            self.top_users.is_some(),
        ]
        .iter()
        .filter(|loaded| **loaded)
        .count()
    }
}

pub struct Dashboard {
    source: Arc<dyn SummarySource>,
    notifier: Arc<dyn Notifier>,
    time_range: TimeRange,
    phase: Phase,
    snapshot: Snapshot,
    last_range: Option<DateRange>,
}

impl Dashboard {
    pub fn new(source: Arc<dyn SummarySource>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            source,
            notifier,
            time_range: TimeRange::default(),
            phase: Phase::Idle,
            snapshot: Snapshot::default(),
            last_range: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Window used by the most recent refresh.
    pub fn last_range(&self) -> Option<DateRange> {
        self.last_range
    }

    pub async fn set_time_range(&mut self, range: TimeRange) -> Phase {
        self.time_range = range;
        self.refresh().await
    }

    pub async fn refresh(&mut self) -> Phase {
        self.refresh_at(Utc::now()).await
    }

    /// Fetch all four sections concurrently for the window ending at `now`.
    /// Returns once every fetch has settled.
    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> Phase {
        self.phase = Phase::Loading;
        let range = self.time_range.date_range(now);
        self.last_range = Some(range);

        let source = self.source.as_ref();
        let (metrics, violations, usage, top_users) = tokio::join!(
            source.metrics(range),
            source.violations(range),
            source.usage(range),
            source.top_users(range),
        );

        self.snapshot = Snapshot {
            metrics: self.settle(Section::Metrics, metrics),
            violations: self.settle(Section::Violations, violations),
            usage: self.settle(Section::Usage, usage),
            top_users: self.settle(Section::TopUsers, top_users),
        };

        self.phase = if self.snapshot.loaded_sections() > 0 {
            Phase::Loaded
        } else {
            Phase::Error
        };
        tracing::debug!(
            range = %self.time_range,
            loaded = self.snapshot.loaded_sections(),
            phase = ?self.phase,
            "dashboard refreshed"
        );
        self.phase
    }

    fn settle<T>(&self, section: Section, result: Result<T, ClientError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::error!(section = section.label(), error = %e, "dashboard fetch failed");
                self.notifier
                    .error(&format!("Failed to fetch {}: {}", section.label(), e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metrics::{MetricsFilters, MetricsMeta, MetricsSummary};
    use crate::models::usage::{UsageMeta, UsageSummary};
    use crate::models::violations::{
        TopUsersMeta, ViolationAggregates, ViolationPatterns, ViolationsMeta,
    };
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        fail: Vec<Section>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn failing(sections: &[Section]) -> Self {
            Self {
                fail: sections.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }

        fn check(&self, section: Section) -> Result<(), ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.contains(&section) {
                Err(ClientError::Api {
                    status: 500,
                    message: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SummarySource for FakeSource {
        async fn metrics(&self, range: DateRange) -> Result<MetricsResponse, ClientError> {
            self.check(Section::Metrics)?;
            Ok(MetricsResponse {
                summary: MetricsSummary::default(),
                metrics: vec![],
                meta: MetricsMeta {
                    start_date: range.start_date,
                    end_date: range.end_date,
                    filters: MetricsFilters::default(),
                },
            })
        }

        async fn violations(&self, range: DateRange) -> Result<ViolationsResponse, ClientError> {
            self.check(Section::Violations)?;
            Ok(ViolationsResponse {
                summary: vec![],
                aggregates: ViolationAggregates::default(),
                meta: ViolationsMeta {
                    start_date: range.start_date,
                    end_date: range.end_date,
                    filters: Default::default(),
                },
            })
        }

        async fn usage(&self, range: DateRange) -> Result<UsageResponse, ClientError> {
            self.check(Section::Usage)?;
            Ok(UsageResponse {
                summary: UsageSummary::default(),
                usage_by_feature: BTreeMap::new(),
                usage_by_plan: BTreeMap::new(),
                records: vec![],
                meta: UsageMeta {
                    start_date: range.start_date,
                    end_date: range.end_date,
                },
            })
        }

        async fn top_users(&self, _range: DateRange) -> Result<TopUsersResponse, ClientError> {
            self.check(Section::TopUsers)?;
            Ok(TopUsersResponse {
                users: vec![],
                patterns: ViolationPatterns::default(),
                meta: TopUsersMeta {
                    total_users: 0,
                    top_violator: None,
                },
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_time_range_windows() {
        for (range, span) in [
            (TimeRange::Last24h, Duration::hours(24)),
            (TimeRange::Last7d, Duration::days(7)),
            (TimeRange::Last30d, Duration::days(30)),
        ] {
            let r = range.date_range(now());
            assert!(r.start_date < r.end_date);
            assert_eq!(r.end_date, now());
            assert_eq!(r.span(), span);
            assert_eq!(range.as_str().parse::<TimeRange>().unwrap(), range);
        }
        assert!("1y".parse::<TimeRange>().is_err());
        assert_eq!(TimeRange::default(), TimeRange::Last24h);
    }

    #[tokio::test]
    async fn test_all_sections_load() {
        let toasts = Arc::new(ToastLog::default());
        let source = Arc::new(FakeSource::default());
        let mut dash = Dashboard::new(source.clone(), toasts.clone());
        assert_eq!(dash.phase(), Phase::Idle);

        assert_eq!(dash.refresh_at(now()).await, Phase::Loaded);
        assert_eq!(dash.snapshot().loaded_sections(), 4);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert!(toasts.messages().is_empty());
    }

    #[tokio::test]
    async fn test_single_failure_clears_only_that_slice() {
        let toasts = Arc::new(ToastLog::default());
        let mut dash = Dashboard::new(
            Arc::new(FakeSource::failing(&[Section::Violations])),
            toasts.clone(),
        );

        assert_eq!(dash.refresh_at(now()).await, Phase::Loaded);
        let snap = dash.snapshot();
        assert!(snap.metrics.is_some());
        assert!(snap.violations.is_none());
        assert!(snap.usage.is_some());
        assert!(snap.top_users.is_some());
        assert_eq!(toasts.messages(), vec!["Failed to fetch violations: boom".to_string()]);
    }

    #[tokio::test]
    async fn test_all_failures_end_in_error_phase() {
        let toasts = Arc::new(ToastLog::default());
        let mut dash = Dashboard::new(
            Arc::new(FakeSource::failing(&[
                Section::Metrics,
                Section::Violations,
                Section::Usage,
                Section::TopUsers,
            ])),
            toasts.clone(),
        );

        assert_eq!(dash.refresh_at(now()).await, Phase::Error);
        assert_eq!(dash.snapshot(), &Snapshot::default());
        assert_eq!(toasts.messages().len(), 4);
        assert!(toasts.messages().contains(&"Failed to fetch top users: boom".to_string()));
    }

    #[tokio::test]
    async fn test_set_time_range_refetches_with_new_window() {
        let source = Arc::new(FakeSource::default());
        let mut dash = Dashboard::new(source.clone(), Arc::new(ToastLog::default()));

        dash.set_time_range(TimeRange::Last7d).await;
        assert_eq!(dash.time_range(), TimeRange::Last7d);
        let range = dash.last_range().unwrap();
        assert!((range.span() - Duration::days(7)).num_seconds().abs() <= 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_repeated_refresh_settles_each_time() {
        let toasts = Arc::new(ToastLog::default());
        let source = Arc::new(FakeSource::failing(&[Section::Usage]));
        let mut dash = Dashboard::new(source.clone(), toasts.clone());

        tokio_test::block_on(async {
            assert_eq!(dash.refresh_at(now()).await, Phase::Loaded);
            assert_eq!(dash.refresh_at(now()).await, Phase::Loaded);
        });
        assert_eq!(dash.snapshot().loaded_sections(), 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), 8);
        assert_eq!(toasts.messages().len(), 2);
    }
}
