//! Historical replay
//!
//! One-time wide-range backfill run at first setup. Fetches up to 90 days,
//! records a day-bucketed series per metric into a [`StatisticsSink`], and
//! seeds the current snapshot from the same payloads.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::aggregate;
use crate::config::validate_historical_days;
use crate::error::PollError;
use crate::fetcher::ResourceSource;
use crate::normalizer::Normalizer;
use crate::statistics::{metric_metadata, series_id, StatisticsSink};
use crate::types::{local_today, DateRange, MetricMap, ResourceKind, TimeSeriesPoint};

/// Result of a completed replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub range: DateRange,
    /// Latest-value snapshot computed from the replayed payloads
    pub snapshot: MetricMap,
    pub series: Vec<TimeSeriesPoint>,
    /// Resources whose fetch failed during the replay
    pub failed: BTreeSet<ResourceKind>,
}

pub struct Replayer {
    source: Arc<dyn ResourceSource>,
    sink: Arc<dyn StatisticsSink>,
}

impl Replayer {
    pub fn new(source: Arc<dyn ResourceSource>, sink: Arc<dyn StatisticsSink>) -> Self {
        Self { source, sink }
    }

    /// Replay the last `days` days, ending today
    pub async fn replay(&self, days: u32) -> Result<ReplayOutcome, PollError> {
        self.replay_ending(local_today(), days).await
    }

    /// Replay the `days` days before `today`, `today` included.
    ///
    /// Any normalization or sink failure abandons the whole replay; per-resource
    /// fetch failures are absorbed and only thin out the series.
    pub async fn replay_ending(&self, today: NaiveDate, days: u32) -> Result<ReplayOutcome, PollError> {
        validate_historical_days(days)?;
        let range = DateRange::ending_at(today, days)?;
        info!(%range, days, "Starting historical replay");

        let payloads = aggregate(self.source.as_ref(), range).await;
        let series = Normalizer::normalize_historical(&payloads)?;
        let snapshot = Normalizer::normalize(&payloads)?;

        let mut by_metric: BTreeMap<&str, Vec<TimeSeriesPoint>> = BTreeMap::new();
        for point in &series {
            by_metric
                .entry(point.metric.as_str())
                .or_default()
                .push(point.clone());
        }

        for (metric, points) in &by_metric {
            let Some(metadata) = metric_metadata(metric) else {
                warn!(metric, "No statistics metadata, skipping series");
                continue;
            };
            self.sink.record(&series_id(metric), metadata, points).await?;
        }

        info!(
            %range,
            series = by_metric.len(),
            points = series.len(),
            metrics = snapshot.len(),
            "Historical replay complete"
        );
        Ok(ReplayOutcome {
            range,
            snapshot,
            series,
            failed: payloads.failed().clone(),
        })
    }
}
