//! Per-resource field extraction tables
//!
//! Each day-bucketed resource is described declaratively: where a value lives
//! in the entry, how its unit is converted, and which flat metric key it feeds.
//! Heart rate (count-tail aggregation) and SpO2 (nested average) do not fit the
//! table and are handled by dedicated routines in the normalizer.

use serde_json::Value;

use crate::error::PollError;
use crate::types::{json_type_name, MetricValue, ResourceKind};

const SECONDS_PER_HOUR: f64 = 3600.0;
const SECONDS_PER_MINUTE: f64 = 60.0;

/// Unit conversion applied to a source value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Pass the value through unchanged (numbers, enum labels, time strings)
    Identity,
    SecondsToHours,
    SecondsToMinutes,
}

impl Transform {
    pub fn apply(&self, value: &Value) -> Result<Option<MetricValue>, PollError> {
        let divisor = match self {
            Transform::Identity => return MetricValue::from_json(value),
            Transform::SecondsToHours => SECONDS_PER_HOUR,
            Transform::SecondsToMinutes => SECONDS_PER_MINUTE,
        };
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_f64().map(|secs| MetricValue::Float(secs / divisor))),
            other => Err(PollError::Normalization(format!(
                "expected a duration in seconds, found {}",
                json_type_name(other)
            ))),
        }
    }
}

/// `{sourcePath, transform, outputKey}` for one metric
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub source_path: &'static [&'static str],
    pub transform: Transform,
    pub output_key: &'static str,
}

/// Share of one duration in another, as a percentage with one decimal
#[derive(Debug, Clone, Copy)]
pub struct StageShare {
    pub numerator: &'static str,
    pub denominator: &'static str,
    pub output_key: &'static str,
}

impl StageShare {
    /// `None` unless the denominator is present and non-zero
    pub fn compute(&self, entry: &Value) -> Result<Option<MetricValue>, PollError> {
        let numerator = number_at(entry, &[self.numerator])?;
        let denominator = number_at(entry, &[self.denominator])?;
        match (numerator, denominator) {
            (Some(part), Some(total)) if total != 0.0 => {
                Ok(Some(MetricValue::Float(round_one_decimal(part / total * 100.0))))
            }
            _ => Ok(None),
        }
    }
}

/// Everything extracted generically from one resource's entries
#[derive(Debug)]
pub struct ResourceFields {
    pub kind: ResourceKind,
    pub mappings: &'static [FieldMapping],
    pub shares: &'static [StageShare],
}

const fn field(
    source_path: &'static [&'static str],
    transform: Transform,
    output_key: &'static str,
) -> FieldMapping {
    FieldMapping {
        source_path,
        transform,
        output_key,
    }
}

use Transform::{Identity, SecondsToHours, SecondsToMinutes};

static SLEEP_SCORE: ResourceFields = ResourceFields {
    kind: ResourceKind::SleepScore,
    mappings: &[
        field(&["score"], Identity, "sleep_score"),
        // contributor sub-scores (1-100), not durations
        field(&["contributors", "efficiency"], Identity, "sleep_efficiency"),
        field(&["contributors", "restfulness"], Identity, "restfulness"),
        field(&["contributors", "timing"], Identity, "sleep_timing"),
    ],
    shares: &[],
};

static SLEEP_DETAIL: ResourceFields = ResourceFields {
    kind: ResourceKind::SleepDetail,
    mappings: &[
        field(&["total_sleep_duration"], SecondsToHours, "total_sleep_duration"),
        field(&["deep_sleep_duration"], SecondsToHours, "deep_sleep_duration"),
        field(&["rem_sleep_duration"], SecondsToHours, "rem_sleep_duration"),
        field(&["light_sleep_duration"], SecondsToHours, "light_sleep_duration"),
        field(&["awake_time"], SecondsToHours, "awake_time"),
        field(&["latency"], SecondsToMinutes, "sleep_latency"),
        field(&["time_in_bed"], SecondsToHours, "time_in_bed"),
        field(&["average_hrv"], Identity, "average_sleep_hrv"),
    ],
    shares: &[
        StageShare {
            numerator: "deep_sleep_duration",
            denominator: "total_sleep_duration",
            output_key: "deep_sleep_percentage",
        },
        StageShare {
            numerator: "rem_sleep_duration",
            denominator: "total_sleep_duration",
            output_key: "rem_sleep_percentage",
        },
    ],
};

static READINESS: ResourceFields = ResourceFields {
    kind: ResourceKind::Readiness,
    mappings: &[
        field(&["score"], Identity, "readiness_score"),
        field(&["temperature_deviation"], Identity, "temperature_deviation"),
        field(&["contributors", "resting_heart_rate"], Identity, "resting_heart_rate"),
        field(&["contributors", "hrv_balance"], Identity, "hrv_balance"),
    ],
    shares: &[],
};

static ACTIVITY: ResourceFields = ResourceFields {
    kind: ResourceKind::Activity,
    mappings: &[
        field(&["score"], Identity, "activity_score"),
        field(&["steps"], Identity, "steps"),
        field(&["active_calories"], Identity, "active_calories"),
        field(&["total_calories"], Identity, "total_calories"),
        field(&["target_calories"], Identity, "target_calories"),
        field(&["high_activity_met_minutes"], Identity, "met_min_high"),
        field(&["medium_activity_met_minutes"], Identity, "met_min_medium"),
        field(&["low_activity_met_minutes"], Identity, "met_min_low"),
    ],
    shares: &[],
};

static STRESS: ResourceFields = ResourceFields {
    kind: ResourceKind::Stress,
    mappings: &[
        field(&["stress_high_duration"], SecondsToHours, "stress_high_duration"),
        field(&["recovery_high_duration"], SecondsToHours, "recovery_high_duration"),
        field(&["day_summary"], Identity, "stress_day_summary"),
    ],
    shares: &[],
};

static RESILIENCE: ResourceFields = ResourceFields {
    kind: ResourceKind::Resilience,
    mappings: &[
        field(&["level"], Identity, "resilience_level"),
        field(&["sleep_recovery_score"], Identity, "sleep_recovery_score"),
        field(&["daytime_recovery_score"], Identity, "daytime_recovery_score"),
        field(&["contributors", "activity_score"], Identity, "stress_resilience_score"),
    ],
    shares: &[],
};

static VO2_MAX: ResourceFields = ResourceFields {
    kind: ResourceKind::Vo2Max,
    mappings: &[field(&["vo2_max"], Identity, "vo2_max")],
    shares: &[],
};

static CARDIOVASCULAR_AGE: ResourceFields = ResourceFields {
    kind: ResourceKind::CardiovascularAge,
    mappings: &[field(&["age"], Identity, "cardiovascular_age")],
    shares: &[],
};

static SLEEP_TIME: ResourceFields = ResourceFields {
    kind: ResourceKind::SleepTime,
    mappings: &[
        field(&["optimal_bedtime_start"], Identity, "optimal_bedtime_start"),
        field(&["optimal_bedtime_end"], Identity, "optimal_bedtime_end"),
    ],
    shares: &[],
};

/// Generic extraction table for `kind`; `None` for the special-cased kinds
pub fn table_for(kind: ResourceKind) -> Option<&'static ResourceFields> {
    match kind {
        ResourceKind::SleepScore => Some(&SLEEP_SCORE),
        ResourceKind::SleepDetail => Some(&SLEEP_DETAIL),
        ResourceKind::Readiness => Some(&READINESS),
        ResourceKind::Activity => Some(&ACTIVITY),
        ResourceKind::Stress => Some(&STRESS),
        ResourceKind::Resilience => Some(&RESILIENCE),
        ResourceKind::Vo2Max => Some(&VO2_MAX),
        ResourceKind::CardiovascularAge => Some(&CARDIOVASCULAR_AGE),
        ResourceKind::SleepTime => Some(&SLEEP_TIME),
        ResourceKind::Heartrate | ResourceKind::Spo2 => None,
    }
}

/// Keys produced by the heart-rate routine
pub const HEART_RATE_KEYS: &[&str] = &[
    "current_heart_rate",
    "heart_rate_timestamp",
    "average_heart_rate",
    "min_heart_rate",
    "max_heart_rate",
];

/// Keys produced by the SpO2 routine
pub const SPO2_KEYS: &[&str] = &["spo2_average", "breathing_disturbance_index"];

/// Every metric key `kind` can contribute to a snapshot
pub fn output_keys(kind: ResourceKind) -> Vec<&'static str> {
    match kind {
        ResourceKind::Heartrate => HEART_RATE_KEYS.to_vec(),
        ResourceKind::Spo2 => SPO2_KEYS.to_vec(),
        _ => table_for(kind)
            .map(|table| {
                table
                    .mappings
                    .iter()
                    .map(|m| m.output_key)
                    .chain(table.shares.iter().map(|s| s.output_key))
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Apply a resource table to one entry, in table order.
///
/// Fields missing from the entry produce nothing.
pub fn extract(
    fields: &ResourceFields,
    entry: &Value,
) -> Result<Vec<(&'static str, MetricValue)>, PollError> {
    expect_object(entry, fields.kind)?;

    let mut out = Vec::with_capacity(fields.mappings.len() + fields.shares.len());
    for mapping in fields.mappings {
        if let Some(raw) = value_at(entry, mapping.source_path)? {
            if let Some(value) = mapping.transform.apply(raw)? {
                out.push((mapping.output_key, value));
            }
        }
    }
    for share in fields.shares {
        if let Some(value) = share.compute(entry)? {
            out.push((share.output_key, value));
        }
    }
    Ok(out)
}

/// Walk `path` through nested objects.
///
/// A missing or `null` step yields `None`; stepping into a non-object is a
/// normalization failure.
pub fn value_at<'a>(entry: &'a Value, path: &[&str]) -> Result<Option<&'a Value>, PollError> {
    let mut current = entry;
    for (depth, key) in path.iter().enumerate() {
        match current {
            Value::Object(map) => match map.get(*key) {
                None | Some(Value::Null) => return Ok(None),
                Some(next) => current = next,
            },
            other => {
                return Err(PollError::Normalization(format!(
                    "expected an object at `{}`, found {}",
                    path[..depth].join("."),
                    json_type_name(other)
                )))
            }
        }
    }
    Ok(Some(current))
}

/// Numeric value at `path`, rejecting non-numbers
pub fn number_at(entry: &Value, path: &[&str]) -> Result<Option<f64>, PollError> {
    match value_at(entry, path)? {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(PollError::Normalization(format!(
            "expected a number at `{}`, found {}",
            path.join("."),
            json_type_name(other)
        ))),
    }
}

pub(crate) fn expect_object(entry: &Value, kind: ResourceKind) -> Result<(), PollError> {
    if entry.is_object() {
        Ok(())
    } else {
        Err(PollError::Normalization(format!(
            "{kind} entry is {}, expected an object",
            json_type_name(entry)
        )))
    }
}

/// Round to one decimal place, exact ties going to the even digit (6.25 -> 6.2)
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}
