//! Field normalization
//!
//! Flattens a [`RawPayloadMap`] into a [`MetricMap`] of latest values, or into
//! day-bucketed [`TimeSeriesPoint`]s for historical replay.
//! - Durations converted to hours (minutes for sleep latency)
//! - Sleep-stage percentages derived from total sleep
//! - Heart rate aggregated over the most recent readings
//! - Absent source fields stay absent in the output

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::PollError;
use crate::fields::{self, expect_object, value_at};
use crate::types::{
    json_type_name, MetricMap, MetricValue, RawPayloadMap, ResourceKind, TimeSeriesPoint,
};

/// Number of trailing heart-rate readings aggregated into the current snapshot
pub const HEART_RATE_TAIL: usize = 10;

/// Normalizer for converting raw payloads to flat metrics
pub struct Normalizer;

impl Normalizer {
    /// Latest-value snapshot: the last entry of each resource contributes
    pub fn normalize(map: &RawPayloadMap) -> Result<MetricMap, PollError> {
        let mut metrics = MetricMap::new();

        for (kind, payload) in map.iter() {
            match kind {
                ResourceKind::Heartrate => {
                    metrics.extend(heart_rate_snapshot(&payload.data)?);
                }
                _ => {
                    if let Some(entry) = payload.latest() {
                        for (key, value) in extract_entry(kind, entry)? {
                            metrics.insert(key.to_string(), value);
                        }
                    }
                }
            }
        }

        debug!(metrics = metrics.len(), "Normalized current snapshot");
        Ok(metrics)
    }

    /// One point per metric per calendar day that has data.
    ///
    /// Day-bucketed resources are keyed by each entry's `day`; when a resource
    /// reports several entries for one day the later one wins. Heart-rate
    /// readings are grouped by the date of their timestamp and aggregated.
    pub fn normalize_historical(map: &RawPayloadMap) -> Result<Vec<TimeSeriesPoint>, PollError> {
        let mut buckets: BTreeMap<(&'static str, NaiveDate), MetricValue> = BTreeMap::new();

        for (kind, payload) in map.iter() {
            if kind == ResourceKind::Heartrate {
                for (day, stats) in heart_rate_by_day(&payload.data)? {
                    for (key, value) in stats.into_metrics() {
                        buckets.insert((key, day), value);
                    }
                }
                continue;
            }

            for entry in &payload.data {
                expect_object(entry, kind)?;
                let Some(day) = entry_day(entry, "day") else {
                    warn!(resource = %kind, "Skipping entry without a parseable day");
                    continue;
                };
                for (key, value) in extract_entry(kind, entry)? {
                    buckets.insert((key, day), value);
                }
            }
        }

        let points: Vec<TimeSeriesPoint> = buckets
            .into_iter()
            .map(|((metric, day), value)| TimeSeriesPoint {
                day,
                metric: metric.to_string(),
                value,
            })
            .collect();
        debug!(points = points.len(), "Normalized historical series");
        Ok(points)
    }
}

/// Extract one day-bucketed entry; heart rate never reaches here
fn extract_entry(
    kind: ResourceKind,
    entry: &Value,
) -> Result<Vec<(&'static str, MetricValue)>, PollError> {
    match fields::table_for(kind) {
        Some(table) => fields::extract(table, entry),
        None if kind == ResourceKind::Spo2 => spo2_metrics(entry),
        None => Ok(Vec::new()),
    }
}

/// SpO2 nests its average one level down, under `spo2_percentage`
fn spo2_metrics(entry: &Value) -> Result<Vec<(&'static str, MetricValue)>, PollError> {
    expect_object(entry, ResourceKind::Spo2)?;
    let mut out = Vec::with_capacity(2);

    match entry.get("spo2_percentage") {
        None | Some(Value::Null) => {}
        Some(Value::Object(percentage)) => {
            if let Some(value) = percentage
                .get("average")
                .map(MetricValue::from_json)
                .transpose()?
                .flatten()
            {
                out.push(("spo2_average", value));
            }
        }
        Some(other) => {
            return Err(PollError::Normalization(format!(
                "spo2_percentage is {}, expected an object",
                json_type_name(other)
            )))
        }
    }

    if let Some(raw) = value_at(entry, &["breathing_disturbance_index"])? {
        if let Some(value) = MetricValue::from_json(raw)? {
            out.push(("breathing_disturbance_index", value));
        }
    }
    Ok(out)
}

/// Average/min/max over a set of bpm readings
#[derive(Debug, Clone, PartialEq)]
struct HeartRateStats {
    average: f64,
    min: MetricValue,
    max: MetricValue,
}

impl HeartRateStats {
    /// `None` when no reading carries a bpm value
    fn from_readings(readings: &[MetricValue]) -> Option<Self> {
        let mut sum = 0.0;
        let mut min: Option<(f64, &MetricValue)> = None;
        let mut max: Option<(f64, &MetricValue)> = None;

        for reading in readings {
            let Some(bpm) = reading.as_f64() else { continue };
            sum += bpm;
            if min.map_or(true, |(m, _)| bpm < m) {
                min = Some((bpm, reading));
            }
            if max.map_or(true, |(m, _)| bpm > m) {
                max = Some((bpm, reading));
            }
        }

        let ((_, min), (_, max)) = (min?, max?);
        Some(Self {
            average: sum / readings.len() as f64,
            min: min.clone(),
            max: max.clone(),
        })
    }

    fn into_metrics(self) -> [(&'static str, MetricValue); 3] {
        [
            ("average_heart_rate", MetricValue::Float(self.average)),
            ("min_heart_rate", self.min),
            ("max_heart_rate", self.max),
        ]
    }
}

/// bpm of one reading; absent or null readings are skipped
fn reading_bpm(entry: &Value) -> Result<Option<MetricValue>, PollError> {
    expect_object(entry, ResourceKind::Heartrate)?;
    match entry.get("bpm") {
        None | Some(Value::Null) => Ok(None),
        Some(raw @ Value::Number(_)) => MetricValue::from_json(raw),
        Some(other) => Err(PollError::Normalization(format!(
            "heart rate bpm is {}, expected a number",
            json_type_name(other)
        ))),
    }
}

/// Current heart rate plus stats over the last [`HEART_RATE_TAIL`] readings
fn heart_rate_snapshot(readings: &[Value]) -> Result<Vec<(String, MetricValue)>, PollError> {
    let Some(latest) = readings.last() else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(5);
    if let Some(bpm) = reading_bpm(latest)? {
        out.push(("current_heart_rate".to_string(), bpm));
    }
    if let Some(ts) = value_at(latest, &["timestamp"])? {
        if let Some(value) = MetricValue::from_json(ts)? {
            out.push(("heart_rate_timestamp".to_string(), value));
        }
    }

    let tail = &readings[readings.len().saturating_sub(HEART_RATE_TAIL)..];
    let mut bpms = Vec::with_capacity(tail.len());
    for reading in tail {
        if let Some(bpm) = reading_bpm(reading)? {
            bpms.push(bpm);
        }
    }
    if let Some(stats) = HeartRateStats::from_readings(&bpms) {
        out.extend(stats.into_metrics().map(|(k, v)| (k.to_string(), v)));
    }
    Ok(out)
}

/// Heart-rate stats per calendar day of the reading timestamps
fn heart_rate_by_day(readings: &[Value]) -> Result<BTreeMap<NaiveDate, HeartRateStats>, PollError> {
    let mut by_day: BTreeMap<NaiveDate, Vec<MetricValue>> = BTreeMap::new();
    for reading in readings {
        let Some(bpm) = reading_bpm(reading)? else { continue };
        let Some(day) = entry_day(reading, "timestamp") else {
            warn!("Skipping heart rate reading without a parseable timestamp");
            continue;
        };
        by_day.entry(day).or_default().push(bpm);
    }

    Ok(by_day
        .into_iter()
        .filter_map(|(day, bpms)| HeartRateStats::from_readings(&bpms).map(|s| (day, s)))
        .collect())
}

/// Calendar day from the date portion of an ISO date or datetime field
fn entry_day(entry: &Value, field: &str) -> Option<NaiveDate> {
    let raw = entry.get(field)?.as_str()?;
    let date_part = raw.split('T').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
