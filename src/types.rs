use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::resources::{Account, Campaign, Flow, ListSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    Count,
    Unique,
    SumValue,
}

impl Measurement {
    pub fn as_key(&self) -> &'static str {
        match self {
            Measurement::Count => "count",
            Measurement::Unique => "unique",
            Measurement::SumValue => "sum_value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn as_key(&self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuerySpec {
    pub metric_id: String,
    pub measurements: Vec<Measurement>,
    pub filters: Vec<String>,
    pub group_by: Option<String>,
    pub timezone: String,
    pub interval: Option<Interval>,
}

impl AggregateQuerySpec {
    pub fn new(metric_id: impl Into<String>, measurement: Measurement) -> Self {
        Self {
            metric_id: metric_id.into(),
            measurements: vec![measurement],
            filters: Vec::new(),
            group_by: None,
            timezone: "UTC".to_string(),
            interval: None,
        }
    }

    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }

    pub fn grouped_by(mut self, dimension: impl Into<String>) -> Self {
        self.group_by = Some(dimension.into());
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn is_revenue_sum(&self) -> bool {
        self.measurements.contains(&Measurement::SumValue)
    }

    pub fn has_date_filter(&self) -> bool {
        self.filters.iter().any(|f| f.contains("datetime"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub total: f64,
    pub grouped: BTreeMap<String, f64>,
}

/// Longest trailing window accepted; wider requests are clamped to it.
pub const MAX_WINDOW_DAYS: i64 = 3660;

/// Half-open `[start, end)` range used for aggregate filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// The `days` before `now`, with `days` clamped to `1..=MAX_WINDOW_DAYS`.
    pub fn trailing(days: i64, now: DateTime<Utc>) -> Self {
        let start = TimeDelta::try_days(days.clamp(1, MAX_WINDOW_DAYS))
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { start, end: now }
    }

    pub fn filters(&self) -> Vec<String> {
        const FMT: &str = "%Y-%m-%dT%H:%M:%S";
        vec![
            format!("greater-or-equal(datetime,{})", self.start.format(FMT)),
            format!("less-than(datetime,{})", self.end.format(FMT)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Fetched,
    Degraded { reason: String },
}

/// One part of a snapshot together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubFetch<T> {
    pub value: T,
    #[serde(flatten)]
    pub status: FetchStatus,
}

impl<T> SubFetch<T> {
    pub fn fetched(value: T) -> Self {
        Self {
            value,
            status: FetchStatus::Fetched,
        }
    }

    pub fn degraded(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            status: FetchStatus::Degraded {
                reason: reason.into(),
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, FetchStatus::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.status {
            FetchStatus::Degraded { reason } => Some(reason.as_str()),
            FetchStatus::Fetched => None,
        }
    }
}

impl<T: Default> SubFetch<T> {
    pub fn from_result<E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::fetched(value),
            Err(e) => Self::degraded(T::default(), e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueSummary {
    pub total: f64,
    pub by_channel: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub account: SubFetch<Option<Account>>,
    pub metric_catalog: Vec<MetricDescriptor>,
    pub campaigns: SubFetch<Vec<Campaign>>,
    pub lists: SubFetch<Vec<ListSummary>>,
    pub flows: SubFetch<Vec<Flow>>,
    pub event_counts: BTreeMap<String, SubFetch<f64>>,
    pub revenue: SubFetch<RevenueSummary>,
    pub window: DateWindow,
    pub generated_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl DashboardSnapshot {
    pub fn degraded_parts(&self) -> Vec<String> {
        let mut parts = Vec::new();
        if self.account.is_degraded() {
            parts.push("account".to_string());
        }
        if self.campaigns.is_degraded() {
            parts.push("campaigns".to_string());
        }
        if self.lists.is_degraded() {
            parts.push("lists".to_string());
        }
        if self.flows.is_degraded() {
            parts.push("flows".to_string());
        }
        for (key, counter) in &self.event_counts {
            if counter.is_degraded() {
                parts.push(format!("event_counts.{}", key));
            }
        }
        if self.revenue.is_degraded() {
            parts.push("revenue".to_string());
        }
        parts
    }

    pub fn event_count(&self, key: &str) -> f64 {
        self.event_counts.get(key).map(|c| c.value).unwrap_or(0.0)
    }
}
