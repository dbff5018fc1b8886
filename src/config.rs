//! Poller configuration
//!
//! Defaults mirror the hosted integration: a five minute refresh cycle that
//! looks back one day, and a one-time historical backfill on first setup.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PollError;

/// Versioned base of every resource path
pub const DEFAULT_API_BASE_URL: &str = "https://api.ouraring.com/v2/usercollection";

pub const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 5;
pub const MIN_UPDATE_INTERVAL_MINUTES: u64 = 1;
pub const MAX_UPDATE_INTERVAL_MINUTES: u64 = 60;

pub const DEFAULT_HISTORICAL_DAYS: u32 = 30;
pub const MIN_HISTORICAL_DAYS: u32 = 1;
pub const MAX_HISTORICAL_DAYS: u32 = 90;

/// Days looked back by each regular refresh cycle
pub const DEFAULT_LOOKBACK_DAYS: u32 = 1;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const ENV_API_BASE_URL: &str = "OURA_API_BASE_URL";
pub const ENV_UPDATE_INTERVAL_MINUTES: &str = "OURA_UPDATE_INTERVAL_MINUTES";
pub const ENV_HISTORICAL_DAYS: &str = "OURA_HISTORICAL_DAYS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "OURA_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    pub api_base_url: String,
    pub update_interval_minutes: u64,
    pub historical_days: u32,
    pub lookback_days: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            update_interval_minutes: DEFAULT_UPDATE_INTERVAL_MINUTES,
            historical_days: DEFAULT_HISTORICAL_DAYS,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl PollerConfig {
    /// Defaults overlaid with any `OURA_*` environment variables, validated
    pub fn from_env() -> Result<Self, PollError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PollError> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_BASE_URL) {
            config.api_base_url = url;
        }
        if let Some(raw) = lookup(ENV_UPDATE_INTERVAL_MINUTES) {
            config.update_interval_minutes = parse_var(ENV_UPDATE_INTERVAL_MINUTES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_HISTORICAL_DAYS) {
            config.historical_days = parse_var(ENV_HISTORICAL_DAYS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout_secs = parse_var(ENV_REQUEST_TIMEOUT_SECS, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PollError> {
        if self.api_base_url.trim().is_empty() {
            return Err(PollError::InvalidConfig("API base URL cannot be empty".to_string()));
        }
        if !(MIN_UPDATE_INTERVAL_MINUTES..=MAX_UPDATE_INTERVAL_MINUTES)
            .contains(&self.update_interval_minutes)
        {
            return Err(PollError::InvalidConfig(format!(
                "update interval must be between {MIN_UPDATE_INTERVAL_MINUTES} and {MAX_UPDATE_INTERVAL_MINUTES} minutes, got {}",
                self.update_interval_minutes
            )));
        }
        validate_historical_days(self.historical_days)?;
        if self.lookback_days == 0 {
            return Err(PollError::InvalidConfig(
                "lookback must be at least one day".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(PollError::InvalidConfig(
                "request timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_minutes * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Historical replay accepts between 1 and 90 days
pub fn validate_historical_days(days: u32) -> Result<(), PollError> {
    if (MIN_HISTORICAL_DAYS..=MAX_HISTORICAL_DAYS).contains(&days) {
        Ok(())
    } else {
        Err(PollError::InvalidConfig(format!(
            "historical days must be between {MIN_HISTORICAL_DAYS} and {MAX_HISTORICAL_DAYS}, got {days}"
        )))
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, PollError> {
    raw.trim()
        .parse()
        .map_err(|_| PollError::InvalidConfig(format!("{key} must be a valid number, got {raw:?}")))
}
