//! Error types for the Oura poller

use crate::types::ResourceKind;
use thiserror::Error;

/// Errors that can occur while fetching or normalizing Oura data
#[derive(Debug, Error)]
pub enum PollError {
    /// No usable bearer credential could be obtained
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The remote answered with a non-success status or an unreadable body
    #[error("Remote error for {kind}: {reason}")]
    Remote { kind: ResourceKind, reason: String },

    /// Reserved: the fan-out absorbs per-resource failures, so this is never raised today
    #[error("Aggregate failure: {0}")]
    AggregateFailure(String),

    /// A payload had an unexpected shape while flattening
    #[error("Normalization error: {0}")]
    Normalization(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Statistics sink error: {0}")]
    Sink(String),

    /// A regular refresh cycle failed; the previous snapshot is now stale
    #[error("Update failed: {0}")]
    UpdateFailed(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PollError {
    pub(crate) fn remote(kind: ResourceKind, reason: impl Into<String>) -> Self {
        PollError::Remote {
            kind,
            reason: reason.into(),
        }
    }
}
