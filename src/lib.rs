//! Oura Poller - Polling and normalization client for the Oura Ring cloud API
//!
//! Retrieves daily and intraday health data from the Oura v2 user collection
//! endpoints and flattens it into a uniform metric map through a fixed
//! pipeline: window batching → concurrent endpoint fetches → field
//! normalization → snapshot / long-term statistics.
//!
//! ## Modules
//!
//! - **Regular polling**: [`Coordinator`] refreshes a narrow look-back window on an interval
//! - **Historical replay**: [`Replayer`] backfills up to 90 days into a [`StatisticsSink`]

pub mod aggregator;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod fields;
pub mod normalizer;
pub mod replay;
pub mod statistics;
pub mod types;
pub mod window;

pub use aggregator::aggregate;
pub use auth::{resolve_bearer_token, FileTokenStore, StaticTokenProvider, TokenProvider};
pub use config::PollerConfig;
pub use coordinator::Coordinator;
pub use error::PollError;
pub use fetcher::{EndpointFetcher, ResourceSource};
pub use normalizer::Normalizer;
pub use replay::{ReplayOutcome, Replayer};
pub use statistics::{metric_metadata, series_id, MemorySink, StatisticMetadata, StatisticsSink};
pub use types::{DateRange, MetricMap, MetricValue, RawPayload, RawPayloadMap, ResourceKind, TimeSeriesPoint};

/// Crate version, also sent in the HTTP user agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
