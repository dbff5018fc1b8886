//! Refresh coordination
//!
//! Owns the last-known metric snapshot and drives the regular fetch cycle.
//! Cycles never overlap: every entry point takes `&mut self`.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::aggregator::aggregate;
use crate::config::PollerConfig;
use crate::error::PollError;
use crate::fetcher::ResourceSource;
use crate::fields::output_keys;
use crate::normalizer::Normalizer;
use crate::replay::{ReplayOutcome, Replayer};
use crate::statistics::StatisticsSink;
use crate::types::{local_today, DateRange, MetricMap, ResourceKind};

pub struct Coordinator {
    config: PollerConfig,
    source: Arc<dyn ResourceSource>,
    replayer: Replayer,
    snapshot: MetricMap,
    last_update_success: bool,
    last_success_at: Option<DateTime<Utc>>,
    updates: watch::Sender<MetricMap>,
}

impl Coordinator {
    pub fn new(
        config: PollerConfig,
        source: Arc<dyn ResourceSource>,
        sink: Arc<dyn StatisticsSink>,
    ) -> Self {
        let (updates, _) = watch::channel(MetricMap::new());
        Self {
            replayer: Replayer::new(source.clone(), sink),
            config,
            source,
            snapshot: MetricMap::new(),
            last_update_success: false,
            last_success_at: None,
            updates,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Last successfully normalized values; may be stale after a failed cycle
    pub fn snapshot(&self) -> &MetricMap {
        &self.snapshot
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<MetricMap> {
        self.updates.subscribe()
    }

    /// Run one regular cycle over the configured look-back ending today
    pub async fn refresh(&mut self) -> Result<&MetricMap, PollError> {
        self.refresh_ending(local_today()).await
    }

    #[instrument(skip(self), fields(cycle_id = %Uuid::new_v4()))]
    pub async fn refresh_ending(&mut self, today: NaiveDate) -> Result<&MetricMap, PollError> {
        let range = DateRange::ending_at(today, self.config.lookback_days)?;
        let payloads = aggregate(self.source.as_ref(), range).await;

        match Normalizer::normalize(&payloads) {
            Ok(metrics) => {
                info!(
                    %range,
                    metrics = metrics.len(),
                    failed = payloads.failed().len(),
                    "Refresh cycle complete"
                );
                self.publish(metrics, payloads.failed());
                Ok(&self.snapshot)
            }
            Err(e) => {
                self.last_update_success = false;
                error!(%range, error = %e, "Error processing Oura data, keeping previous values");
                Err(PollError::UpdateFailed(e.to_string()))
            }
        }
    }

    /// First-setup backfill over `days` days.
    ///
    /// A failed replay leaves the coordinator untouched; the next regular
    /// refresh proceeds as usual.
    pub async fn load_historical(&mut self, days: u32) -> Result<ReplayOutcome, PollError> {
        self.load_historical_ending(local_today(), days).await
    }

    #[instrument(skip(self), fields(cycle_id = %Uuid::new_v4()))]
    pub async fn load_historical_ending(
        &mut self,
        today: NaiveDate,
        days: u32,
    ) -> Result<ReplayOutcome, PollError> {
        match self.replayer.replay_ending(today, days).await {
            Ok(outcome) => {
                self.publish(outcome.snapshot.clone(), &outcome.failed);
                Ok(outcome)
            }
            Err(e) => {
                error!(days, error = %e, "Historical data load failed");
                Err(e)
            }
        }
    }

    /// Refresh every `period` until `shutdown` resolves.
    ///
    /// The first cycle runs immediately. Failed cycles are logged and the loop
    /// carries on with the next tick.
    pub async fn run_until<F>(&mut self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(?period, "Starting refresh loop");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Refresh failed, retrying next interval");
                    }
                }
            }
        }
        info!("Refresh loop stopped");
    }

    /// Replace the snapshot with `metrics`.
    ///
    /// Keys belonging to a resource whose fetch failed keep their previous
    /// value; keys a healthy resource stopped reporting are dropped.
    fn publish(&mut self, metrics: MetricMap, failed: &BTreeSet<ResourceKind>) {
        let mut next = metrics;
        for key in failed.iter().flat_map(|kind| output_keys(*kind)) {
            if next.contains_key(key) {
                continue;
            }
            if let Some(stale) = self.snapshot.get(key) {
                next.insert(key.to_string(), stale.clone());
            }
        }
        self.snapshot = next;
        self.last_update_success = true;
        self.last_success_at = Some(Utc::now());
        self.updates.send_replace(self.snapshot.clone());
    }
}
