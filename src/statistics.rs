//! Long-term statistics
//!
//! Display metadata for every produced metric key, and the sink that
//! historical replay writes day-bucketed series into.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::PollError;
use crate::types::TimeSeriesPoint;

/// Prefix of every series id
pub const SERIES_SOURCE: &str = "oura";

/// Display and aggregation metadata for one metric key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatisticMetadata {
    pub key: &'static str,
    pub name: &'static str,
    pub unit: Option<&'static str>,
    /// Day values are averaged when rolled up
    pub has_mean: bool,
    /// Day values are summed when rolled up
    pub has_sum: bool,
}

const fn mean(key: &'static str, name: &'static str, unit: Option<&'static str>) -> StatisticMetadata {
    StatisticMetadata {
        key,
        name,
        unit,
        has_mean: true,
        has_sum: false,
    }
}

const fn sum(key: &'static str, name: &'static str, unit: &'static str) -> StatisticMetadata {
    StatisticMetadata {
        key,
        name,
        unit: Some(unit),
        has_mean: false,
        has_sum: true,
    }
}

const fn label(key: &'static str, name: &'static str) -> StatisticMetadata {
    StatisticMetadata {
        key,
        name,
        unit: None,
        has_mean: false,
        has_sum: false,
    }
}

const SCORE: Option<&str> = Some("score");
const HOURS: Option<&str> = Some("h");
const BPM: Option<&str> = Some("bpm");
const PERCENT: Option<&str> = Some("%");

/// Every metric key the normalizer can produce
pub static METRICS: &[StatisticMetadata] = &[
    mean("sleep_score", "Sleep Score", SCORE),
    mean("sleep_efficiency", "Sleep Efficiency", SCORE),
    mean("restfulness", "Restfulness", SCORE),
    mean("sleep_timing", "Sleep Timing", SCORE),
    mean("total_sleep_duration", "Total Sleep Duration", HOURS),
    mean("deep_sleep_duration", "Deep Sleep Duration", HOURS),
    mean("rem_sleep_duration", "REM Sleep Duration", HOURS),
    mean("light_sleep_duration", "Light Sleep Duration", HOURS),
    mean("awake_time", "Awake Time", HOURS),
    mean("sleep_latency", "Sleep Latency", Some("min")),
    mean("time_in_bed", "Time in Bed", HOURS),
    mean("deep_sleep_percentage", "Deep Sleep Percentage", PERCENT),
    mean("rem_sleep_percentage", "REM Sleep Percentage", PERCENT),
    mean("average_sleep_hrv", "Average Sleep HRV", Some("ms")),
    mean("readiness_score", "Readiness Score", SCORE),
    mean("temperature_deviation", "Temperature Deviation", Some("°C")),
    mean("resting_heart_rate", "Resting Heart Rate Score", SCORE),
    mean("hrv_balance", "HRV Balance Score", SCORE),
    mean("activity_score", "Activity Score", SCORE),
    sum("steps", "Steps", "steps"),
    sum("active_calories", "Active Calories", "kcal"),
    sum("total_calories", "Total Calories", "kcal"),
    mean("target_calories", "Target Calories", Some("kcal")),
    sum("met_min_high", "High Activity MET Minutes", "MET⋅min"),
    sum("met_min_medium", "Medium Activity MET Minutes", "MET⋅min"),
    sum("met_min_low", "Low Activity MET Minutes", "MET⋅min"),
    mean("current_heart_rate", "Current Heart Rate", BPM),
    label("heart_rate_timestamp", "Heart Rate Timestamp"),
    mean("average_heart_rate", "Average Heart Rate", BPM),
    mean("min_heart_rate", "Minimum Heart Rate", BPM),
    mean("max_heart_rate", "Maximum Heart Rate", BPM),
    mean("stress_high_duration", "Stress High Duration", HOURS),
    mean("recovery_high_duration", "Recovery High Duration", HOURS),
    label("stress_day_summary", "Stress Day Summary"),
    label("resilience_level", "Resilience Level"),
    mean("sleep_recovery_score", "Sleep Recovery Score", SCORE),
    mean("daytime_recovery_score", "Daytime Recovery Score", SCORE),
    mean("stress_resilience_score", "Stress Resilience Score", SCORE),
    mean("spo2_average", "SpO2 Average", PERCENT),
    mean("breathing_disturbance_index", "Breathing Disturbance Index", None),
    mean("vo2_max", "VO2 Max", Some("ml/kg/min")),
    mean("cardiovascular_age", "Cardiovascular Age", Some("years")),
    label("optimal_bedtime_start", "Optimal Bedtime Start"),
    label("optimal_bedtime_end", "Optimal Bedtime End"),
];

/// Metadata for a metric key, `None` for keys outside the produced set
pub fn metric_metadata(key: &str) -> Option<&'static StatisticMetadata> {
    METRICS.iter().find(|m| m.key == key)
}

/// Series id under which a metric's history is recorded
pub fn series_id(key: &str) -> String {
    format!("{SERIES_SOURCE}:{key}")
}

/// Receiver of imported long-term statistics
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn record(
        &self,
        series_id: &str,
        metadata: &StatisticMetadata,
        points: &[TimeSeriesPoint],
    ) -> Result<(), PollError>;
}

/// One `record` call as seen by [`MemorySink`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedSeries {
    pub series_id: String,
    pub metadata: StatisticMetadata,
    pub points: Vec<TimeSeriesPoint>,
}

/// In-process sink keeping everything recorded, keyed by series id
#[derive(Debug, Default)]
pub struct MemorySink {
    series: Mutex<BTreeMap<String, RecordedSeries>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded series, ordered by id
    pub fn recorded(&self) -> Vec<RecordedSeries> {
        self.series
            .lock()
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, series_id: &str) -> Option<RecordedSeries> {
        self.series.lock().ok()?.get(series_id).cloned()
    }
}

#[async_trait]
impl StatisticsSink for MemorySink {
    async fn record(
        &self,
        series_id: &str,
        metadata: &StatisticMetadata,
        points: &[TimeSeriesPoint],
    ) -> Result<(), PollError> {
        let mut series = self
            .series
            .lock()
            .map_err(|_| PollError::Sink("memory sink lock poisoned".to_string()))?;

        // re-imports replace earlier points for the same day
        let entry = series
            .entry(series_id.to_string())
            .or_insert_with(|| RecordedSeries {
                series_id: series_id.to_string(),
                metadata: *metadata,
                points: Vec::new(),
            });
        entry.points.retain(|p| !points.iter().any(|new| new.day == p.day));
        entry.points.extend(points.iter().cloned());
        entry.points.sort_by_key(|p| p.day);

        debug!(series_id, points = points.len(), "Recorded statistics");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricValue;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    const PRODUCED_KEYS: [&str; 44] = [
        "sleep_score",
        "sleep_efficiency",
        "restfulness",
        "sleep_timing",
        "total_sleep_duration",
        "deep_sleep_duration",
        "rem_sleep_duration",
        "light_sleep_duration",
        "awake_time",
        "sleep_latency",
        "time_in_bed",
        "deep_sleep_percentage",
        "rem_sleep_percentage",
        "average_sleep_hrv",
        "readiness_score",
        "temperature_deviation",
        "resting_heart_rate",
        "hrv_balance",
        "activity_score",
        "steps",
        "active_calories",
        "total_calories",
        "target_calories",
        "met_min_high",
        "met_min_medium",
        "met_min_low",
        "current_heart_rate",
        "heart_rate_timestamp",
        "average_heart_rate",
        "min_heart_rate",
        "max_heart_rate",
        "stress_high_duration",
        "recovery_high_duration",
        "stress_day_summary",
        "resilience_level",
        "sleep_recovery_score",
        "daytime_recovery_score",
        "stress_resilience_score",
        "spo2_average",
        "breathing_disturbance_index",
        "vo2_max",
        "cardiovascular_age",
        "optimal_bedtime_start",
        "optimal_bedtime_end",
    ];

    fn point(day: u32, value: i64) -> TimeSeriesPoint {
        TimeSeriesPoint {
            day: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            metric: "steps".to_string(),
            value: MetricValue::Integer(value),
        }
    }

    #[test]
    fn test_metadata_covers_produced_keys_exactly() {
        let table: HashSet<&str> = METRICS.iter().map(|m| m.key).collect();
        let produced: HashSet<&str> = PRODUCED_KEYS.into_iter().collect();
        assert_eq!(table, produced);
        assert_eq!(METRICS.len(), PRODUCED_KEYS.len());
    }

    #[test]
    fn test_sum_and_mean_flags() {
        let steps = metric_metadata("steps").unwrap();
        assert!(steps.has_sum && !steps.has_mean);

        let sleep = metric_metadata("total_sleep_duration").unwrap();
        assert!(sleep.has_mean && !sleep.has_sum);
        assert_eq!(sleep.unit, Some("h"));

        let level = metric_metadata("resilience_level").unwrap();
        assert!(!level.has_mean && !level.has_sum);
        assert_eq!(level.unit, None);

        assert!(metric_metadata("battery_level").is_none());
    }

    #[test]
    fn test_series_id() {
        assert_eq!(series_id("sleep_score"), "oura:sleep_score");
    }

    #[tokio::test]
    async fn test_memory_sink_replaces_same_day_points() {
        let sink = MemorySink::new();
        let metadata = metric_metadata("steps").unwrap();

        sink.record("oura:steps", metadata, &[point(2, 200), point(1, 100)])
            .await
            .unwrap();
        sink.record("oura:steps", metadata, &[point(2, 250), point(3, 300)])
            .await
            .unwrap();

        let recorded = sink.get("oura:steps").unwrap();
        assert_eq!(recorded.points, vec![point(1, 100), point(2, 250), point(3, 300)]);
        assert_eq!(sink.recorded().len(), 1);
    }
}
