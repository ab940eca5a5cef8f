//! Search, filter and sort over already-fetched records.
//!
//! `apply_filters` is a pure function of its inputs so the same criteria give
//! the same output whether called by the query API, the CLI or a test.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::models::metrics::HourlyMetricBucket;
use crate::models::violations::{TopViolatingUser, ViolationRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Primary counter: violations for violation rows, requests for buckets.
    Count,
    AffectedUsers,
    Recency,
    Feature,
}

/// A record that can be searched, filtered and sorted.
pub trait Filterable {
    fn feature(&self) -> &str;
    /// Secondary dimension: violation type, endpoint path, ...
    fn category(&self) -> Option<&str>;
    /// Text fields matched by the free-text search.
    fn haystack(&self) -> Vec<&str>;
    fn metric(&self, key: SortKey) -> f64;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub search: Option<String>,
    pub features: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub sort: Option<SortKey>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl FilterCriteria {
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn feature(mut self, name: impl Into<String>) -> Self {
        self.features.insert(name.into());
        self
    }

    pub fn category(mut self, name: impl Into<String>) -> Self {
        self.categories.insert(name.into());
        self
    }

    pub fn sort_by(mut self, key: SortKey, descending: bool) -> Self {
        self.sort = Some(key);
        self.descending = descending;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches<T: Filterable>(&self, record: &T) -> bool {
        if !self.features.is_empty() && !self.features.contains(record.feature()) {
            return false;
        }
        if !self.categories.is_empty()
            && !record
                .category()
                .is_some_and(|c| self.categories.contains(c))
        {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                record
                    .haystack()
                    .iter()
                    .any(|h| h.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

/// Keep the records matching `criteria`, sorted and truncated as requested.
/// Without a sort key the input order is preserved.
pub fn apply_filters<T: Filterable + Clone>(records: &[T], criteria: &FilterCriteria) -> Vec<T> {
    let mut out: Vec<T> = records
        .iter()
        .filter(|r| criteria.matches(*r))
        .cloned()
        .collect();

    if let Some(key) = criteria.sort {
        out.sort_by(|a, b| {
            let ord = match key {
                SortKey::Feature => a.feature().cmp(b.feature()),
                _ => a
                    .metric(key)
                    .partial_cmp(&b.metric(key))
                    .unwrap_or(Ordering::Equal),
            };
            if criteria.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    if let Some(n) = criteria.limit {
        out.truncate(n);
    }
    out
}

impl Filterable for ViolationRecord {
    fn feature(&self) -> &str {
        &self.feature_name
    }

    fn category(&self) -> Option<&str> {
        Some(&self.violation_type)
    }

    fn haystack(&self) -> Vec<&str> {
        vec![self.feature_name.as_str(), self.violation_type.as_str()]
    }

    fn metric(&self, key: SortKey) -> f64 {
        match key {
            SortKey::Count => self.violation_count as f64,
            SortKey::AffectedUsers => self.affected_users as f64,
            SortKey::Recency => self.last_seen.timestamp_millis() as f64,
            SortKey::Feature => 0.0,
        }
    }
}

impl Filterable for HourlyMetricBucket {
    fn feature(&self) -> &str {
        &self.feature_name
    }

    fn category(&self) -> Option<&str> {
        Some(&self.endpoint_path)
    }

    fn haystack(&self) -> Vec<&str> {
        vec![self.feature_name.as_str(), self.endpoint_path.as_str()]
    }

    fn metric(&self, key: SortKey) -> f64 {
        match key {
            SortKey::Count => self.total_requests as f64,
            SortKey::AffectedUsers => self.unique_users as f64,
            SortKey::Recency => self.hour_start.timestamp_millis() as f64,
            SortKey::Feature => 0.0,
        }
    }
}

impl Filterable for TopViolatingUser {
    // users span features; only the search and sort apply
    fn feature(&self) -> &str {
        ""
    }

    fn category(&self) -> Option<&str> {
        None
    }

    fn haystack(&self) -> Vec<&str> {
        let mut h = vec![self.user_id.as_str()];
        h.extend(self.full_name.as_deref());
        h.extend(self.email.as_deref());
        h
    }

    fn metric(&self, key: SortKey) -> f64 {
        match key {
            SortKey::Count => self.total_violations as f64,
            SortKey::AffectedUsers => self.features_violated as f64,
            SortKey::Recency => self.last_violation.timestamp_millis() as f64,
            SortKey::Feature => 0.0,
        }
    }
}
