use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::api_client::ApiClient;
use crate::errors::ApiError;
use crate::types::{AggregateQuerySpec, AggregateResult, DateWindow, Measurement};

pub const AGGREGATE_ENDPOINT: &str = "metric-aggregates/";
pub const DEFAULT_REVENUE_WINDOW_DAYS: i64 = 30;
const UNKNOWN_GROUP: &str = "unknown";
/// Fallback order when dimension values arrive keyed by dimension name.
const DIMENSION_PRIORITY: &[&str] = &[
    "$attributed_message",
    "$message",
    "$attributed_flow",
    "$flow",
    "$campaign",
];

/// Runs grouped count/unique/sum queries. Failures are surfaced, never degraded here.
#[derive(Debug, Clone, Copy)]
pub struct AggregateQueryExecutor<'a> {
    client: &'a ApiClient,
}

impl<'a> AggregateQueryExecutor<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn run(
        &self,
        credential: &str,
        spec: &AggregateQuerySpec,
    ) -> Result<AggregateResult, ApiError> {
        self.run_at(credential, spec, Utc::now()).await
    }

    /// As `run`, with `now` anchoring any default date window.
    pub async fn run_at(
        &self,
        credential: &str,
        spec: &AggregateQuerySpec,
        now: DateTime<Utc>,
    ) -> Result<AggregateResult, ApiError> {
        let body = build_request_body(spec, now);
        let response = self.client.post(credential, AGGREGATE_ENDPOINT, &body).await?;
        let result = parse_response(&response, spec);
        log::debug!(
            "[Aggregates] metric {} total {} across {} groups",
            spec.metric_id,
            result.total,
            result.grouped.len()
        );
        Ok(result)
    }
}

/// Filters actually sent for `spec`. Revenue sums always carry a date range.
pub fn effective_filters(spec: &AggregateQuerySpec, now: DateTime<Utc>) -> Vec<String> {
    let mut filters = spec.filters.clone();
    if spec.is_revenue_sum() && !spec.has_date_filter() {
        log::debug!(
            "[Aggregates] metric {} has no date filter, defaulting to trailing {} days",
            spec.metric_id,
            DEFAULT_REVENUE_WINDOW_DAYS
        );
        filters.extend(DateWindow::trailing(DEFAULT_REVENUE_WINDOW_DAYS, now).filters());
    }
    filters
}

pub fn build_request_body(spec: &AggregateQuerySpec, now: DateTime<Utc>) -> Value {
    let mut measurements: Vec<&str> = Vec::new();
    for m in &spec.measurements {
        if !measurements.contains(&m.as_key()) {
            measurements.push(m.as_key());
        }
    }

    let mut attributes = Map::new();
    attributes.insert("metric_id".to_string(), json!(spec.metric_id));
    attributes.insert("measurements".to_string(), json!(measurements));

    let filters = effective_filters(spec, now);
    if !filters.is_empty() {
        attributes.insert("filter".to_string(), json!(filters));
    }
    if let Some(interval) = spec.interval {
        attributes.insert("interval".to_string(), json!(interval.as_key()));
    }
    if let Some(by) = &spec.group_by {
        attributes.insert("by".to_string(), json!([by]));
    }
    attributes.insert("timezone".to_string(), json!(spec.timezone));

    json!({
        "data": {
            "type": "metric-aggregate",
            "attributes": attributes,
        }
    })
}

/// Sums numbers, summing arrays produced by interval bucketing.
fn scalar(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Array(items) => Some(items.iter().map(|v| scalar(v).unwrap_or(0.0)).sum()),
        _ => None,
    }
}

fn group_value(measurements: &Map<String, Value>, requested: &[Measurement]) -> f64 {
    requested
        .iter()
        .find_map(|m| measurements.get(m.as_key()).and_then(scalar))
        .or_else(|| measurements.values().find_map(scalar))
        .unwrap_or(0.0)
}

/// The key a result group is bucketed under.
pub fn group_key(dimensions: Option<&Value>) -> String {
    let key = match dimensions {
        Some(Value::Array(values)) => values.iter().find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Object(map) => keyed_dimension(map),
            _ => None,
        }),
        Some(Value::Object(map)) => keyed_dimension(map),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    };
    key.unwrap_or_else(|| UNKNOWN_GROUP.to_string())
}

fn keyed_dimension(map: &Map<String, Value>) -> Option<String> {
    DIMENSION_PRIORITY.iter().find_map(|key| {
        map.get(*key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    })
}

pub fn parse_response(response: &Value, spec: &AggregateQuerySpec) -> AggregateResult {
    let mut result = AggregateResult::default();
    let Some(groups) = response
        .pointer("/data/attributes/data")
        .and_then(|v| v.as_array())
    else {
        return result;
    };

    for group in groups {
        let value = group
            .get("measurements")
            .and_then(|m| m.as_object())
            .map(|m| group_value(m, &spec.measurements))
            .unwrap_or(0.0);
        result.total += value;
        if spec.group_by.is_some() {
            *result
                .grouped
                .entry(group_key(group.get("dimensions")))
                .or_insert(0.0) += value;
        }
    }
    result
}
