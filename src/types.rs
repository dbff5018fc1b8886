//! Core types for the Oura poller
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: date ranges and resource kinds going in, raw payloads coming back
//! from the API, and flat metric maps and time-series points going out.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::PollError;

/// Inclusive calendar-date range consumed by every fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PollError> {
        if start > end {
            return Err(PollError::InvalidRange(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Range ending on `end` and starting `days_back` days earlier
    pub fn ending_at(end: NaiveDate, days_back: u32) -> Result<Self, PollError> {
        let start = end
            .checked_sub_days(chrono::Days::new(u64::from(days_back)))
            .ok_or_else(|| PollError::InvalidRange(format!("{days_back} days before {end}")))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered, both ends included
    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Every calendar day in the range, in order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Current calendar day in the host's local timezone
pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Request parameter shape used by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// `start_date` / `end_date` calendar dates
    DayRange,
    /// `start_datetime` / `end_datetime` instants
    InstantRange,
}

/// One category of health data exposed by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    SleepScore,
    SleepDetail,
    Readiness,
    Activity,
    Heartrate,
    Stress,
    Resilience,
    Spo2,
    Vo2Max,
    CardiovascularAge,
    SleepTime,
}

impl ResourceKind {
    /// All resource kinds, in fan-out order
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::SleepScore,
        ResourceKind::SleepDetail,
        ResourceKind::Readiness,
        ResourceKind::Activity,
        ResourceKind::Heartrate,
        ResourceKind::Stress,
        ResourceKind::Resilience,
        ResourceKind::Spo2,
        ResourceKind::Vo2Max,
        ResourceKind::CardiovascularAge,
        ResourceKind::SleepTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::SleepScore => "sleep_score",
            ResourceKind::SleepDetail => "sleep_detail",
            ResourceKind::Readiness => "readiness",
            ResourceKind::Activity => "activity",
            ResourceKind::Heartrate => "heartrate",
            ResourceKind::Stress => "stress",
            ResourceKind::Resilience => "resilience",
            ResourceKind::Spo2 => "spo2",
            ResourceKind::Vo2Max => "vo2_max",
            ResourceKind::CardiovascularAge => "cardiovascular_age",
            ResourceKind::SleepTime => "sleep_time",
        }
    }

    /// Path suffix under the versioned API base
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::SleepScore => "/daily_sleep",
            ResourceKind::SleepDetail => "/sleep",
            ResourceKind::Readiness => "/daily_readiness",
            ResourceKind::Activity => "/daily_activity",
            ResourceKind::Heartrate => "/heartrate",
            ResourceKind::Stress => "/daily_stress",
            ResourceKind::Resilience => "/daily_resilience",
            ResourceKind::Spo2 => "/daily_spo2",
            ResourceKind::Vo2Max => "/vO2_max",
            ResourceKind::CardiovascularAge => "/daily_cardiovascular_age",
            ResourceKind::SleepTime => "/sleep_time",
        }
    }

    pub fn param_style(&self) -> ParamStyle {
        match self {
            ResourceKind::Heartrate => ParamStyle::InstantRange,
            _ => ParamStyle::DayRange,
        }
    }

    /// Maximum number of calendar days one request may cover, if limited
    pub fn max_span_days(&self) -> Option<u32> {
        match self {
            ResourceKind::Heartrate => Some(crate::window::HEARTRATE_MAX_SPAN_DAYS),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded response body: a chronologically ordered list of opaque entries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    #[serde(default)]
    pub data: Vec<Value>,
}

impl RawPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Most recent entry (the API returns entries oldest first)
    pub fn latest(&self) -> Option<&Value> {
        self.data.last()
    }
}

/// Raw payloads keyed by resource kind; always holds all eleven kinds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawPayloadMap {
    payloads: BTreeMap<ResourceKind, RawPayload>,
    /// Kinds whose fetch failed and were filled with an empty payload
    failed: BTreeSet<ResourceKind>,
}

impl Default for RawPayloadMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RawPayloadMap {
    /// Map with an empty payload for every kind
    pub fn new() -> Self {
        Self {
            payloads: ResourceKind::ALL
                .iter()
                .map(|kind| (*kind, RawPayload::empty()))
                .collect(),
            failed: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, kind: ResourceKind, payload: RawPayload) {
        self.failed.remove(&kind);
        self.payloads.insert(kind, payload);
    }

    /// Record a failed fetch: the kind maps to an empty payload
    pub fn mark_failed(&mut self, kind: ResourceKind) {
        self.payloads.insert(kind, RawPayload::empty());
        self.failed.insert(kind);
    }

    pub fn failed(&self) -> &BTreeSet<ResourceKind> {
        &self.failed
    }

    pub fn with(mut self, kind: ResourceKind, payload: RawPayload) -> Self {
        self.insert(kind, payload);
        self
    }

    pub fn get(&self, kind: ResourceKind) -> &RawPayload {
        // Every kind is seeded at construction and never removed.
        static EMPTY: RawPayload = RawPayload { data: Vec::new() };
        self.payloads.get(&kind).unwrap_or(&EMPTY)
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.values().all(RawPayload::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &RawPayload)> {
        self.payloads.iter().map(|(kind, payload)| (*kind, payload))
    }
}

/// Scalar value of one flat metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    /// Enum labels and ISO time strings, passed through untouched
    Text(String),
}

impl MetricValue {
    /// Convert a JSON leaf; `null` means "not reported"
    pub fn from_json(value: &Value) -> Result<Option<Self>, PollError> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(MetricValue::Integer(i)))
                } else {
                    n.as_f64().map(MetricValue::Float).map(Some).ok_or_else(|| {
                        PollError::Normalization(format!("unrepresentable number {n}"))
                    })
                }
            }
            Value::String(s) => Ok(Some(MetricValue::Text(s.clone()))),
            other => Err(PollError::Normalization(format!(
                "expected a scalar, found {}",
                json_type_name(other)
            ))),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Integer(i) => Some(*i as f64),
            MetricValue::Float(f) => Some(*f),
            MetricValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

/// Flat snapshot of latest known values, keyed by metric key
pub type MetricMap = BTreeMap<String, MetricValue>;

/// One day's value of one metric, produced by historical replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub day: NaiveDate,
    pub metric: String,
    pub value: MetricValue,
}

impl TimeSeriesPoint {
    /// Statistic start instant: noon UTC keeps the point on its day in every timezone
    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.day.and_time(NaiveTime::MIN))
            + chrono::Duration::hours(12)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_date_range_rejects_inverted_bounds() {
        assert!(DateRange::new(date("2024-01-02"), date("2024-01-01")).is_err());
        let range = DateRange::new(date("2024-01-01"), date("2024-01-01")).unwrap();
        assert_eq!(range.day_count(), 1);
    }

    #[test]
    fn test_date_range_ending_at() {
        let range = DateRange::ending_at(date("2024-03-01"), 1).unwrap();
        assert_eq!(range.start(), date("2024-02-29"));
        assert_eq!(range.days().count(), 2);
    }

    #[test]
    fn test_raw_payload_map_always_has_every_kind() {
        let map = RawPayloadMap::new();
        assert_eq!(map.len(), 11);
        assert!(map.is_empty());
        for kind in ResourceKind::ALL {
            assert!(map.get(kind).data.is_empty());
        }
    }

    #[test]
    fn test_raw_payload_defaults_missing_data() {
        let payload: RawPayload = serde_json::from_value(json!({"next_token": null})).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_metric_value_from_json() {
        assert_eq!(
            MetricValue::from_json(&json!(12345)).unwrap(),
            Some(MetricValue::Integer(12345))
        );
        assert_eq!(
            MetricValue::from_json(&json!(-0.5)).unwrap(),
            Some(MetricValue::Float(-0.5))
        );
        assert_eq!(
            MetricValue::from_json(&json!("solid")).unwrap(),
            Some(MetricValue::Text("solid".to_string()))
        );
        assert_eq!(MetricValue::from_json(&Value::Null).unwrap(), None);
        assert!(MetricValue::from_json(&json!({"a": 1})).is_err());
    }

    #[test]
    fn test_point_start_is_noon_utc() {
        let point = TimeSeriesPoint {
            day: date("2024-01-15"),
            metric: "steps".to_string(),
            value: MetricValue::Integer(1),
        };
        assert_eq!(point.start().to_rfc3339(), "2024-01-15T12:00:00+00:00");
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(ResourceKind::Vo2Max.path(), "/vO2_max");
        assert_eq!(ResourceKind::Heartrate.param_style(), ParamStyle::InstantRange);
        assert_eq!(ResourceKind::Heartrate.max_span_days(), Some(7));
        assert_eq!(ResourceKind::Spo2.max_span_days(), None);
    }
}
