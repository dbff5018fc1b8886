//! Endpoint fetching
//!
//! One authenticated GET per resource kind and date range. Range-limited kinds
//! are batched through [`crate::window::split`] and the sub-results stitched
//! back together in chronological order.

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::{Client, ClientBuilder};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::auth::{resolve_bearer_token, TokenProvider};
use crate::config::PollerConfig;
use crate::error::PollError;
use crate::types::{json_type_name, DateRange, ParamStyle, RawPayload, ResourceKind};
use crate::window;

/// Longest response body excerpt kept in error messages
const ERROR_BODY_EXCERPT: usize = 200;

/// Anything that can produce a raw payload for one resource kind and range
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn fetch(&self, kind: ResourceKind, range: DateRange) -> Result<RawPayload, PollError>;
}

#[async_trait]
impl<T: ResourceSource + ?Sized> ResourceSource for Arc<T> {
    async fn fetch(&self, kind: ResourceKind, range: DateRange) -> Result<RawPayload, PollError> {
        (**self).fetch(kind, range).await
    }
}

/// HTTP fetcher for the Oura v2 user collection endpoints
pub struct EndpointFetcher {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl EndpointFetcher {
    /// Build a fetcher with its own pooled client using the configured timeouts
    pub fn new(config: &PollerConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, PollError> {
        let client = ClientBuilder::new()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(format!("oura-poller/{}", crate::VERSION))
            .build()
            .map_err(|e| PollError::InvalidConfig(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, &config.api_base_url, tokens))
    }

    /// Use an existing transport, e.g. one shared with other integrations
    pub fn with_client(client: Client, base_url: &str, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn url(&self, kind: ResourceKind) -> String {
        format!("{}{}", self.base_url, kind.path())
    }

    /// Query parameters for one request
    pub fn request_params(kind: ResourceKind, range: DateRange) -> [(&'static str, String); 2] {
        match kind.param_style() {
            ParamStyle::DayRange => [
                ("start_date", range.start().format("%Y-%m-%d").to_string()),
                ("end_date", range.end().format("%Y-%m-%d").to_string()),
            ],
            ParamStyle::InstantRange => [
                ("start_datetime", format!("{}T00:00:00", range.start().format("%Y-%m-%d"))),
                ("end_datetime", format!("{}T23:59:59", range.end().format("%Y-%m-%d"))),
            ],
        }
    }

    async fn get(
        &self,
        kind: ResourceKind,
        range: DateRange,
        bearer: &str,
    ) -> Result<RawPayload, PollError> {
        let url = self.url(kind);
        let params = Self::request_params(kind, range);
        debug!(%url, ?params, "Requesting Oura resource");

        let response = self
            .client
            .get(&url)
            .bearer_auth(bearer)
            .query(&params)
            .send()
            .await
            .map_err(|e| PollError::remote(kind, format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PollError::remote(kind, format!("cannot read body: {e}")))?;

        if !status.is_success() {
            let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
            return Err(PollError::remote(kind, format!("HTTP {status}: {excerpt}")));
        }

        let payload = decode_payload(kind, &body)?;
        debug!(items = payload.data.len(), "Received Oura resource");
        Ok(payload)
    }

    /// Fetch each window concurrently; failed windows are logged and skipped
    async fn get_batched(
        &self,
        kind: ResourceKind,
        range: DateRange,
        max_span_days: u32,
        bearer: &str,
    ) -> RawPayload {
        let windows = window::split(range, Some(max_span_days));
        let results = join_all(windows.iter().map(|w| self.get(kind, *w, bearer))).await;

        let mut merged = RawPayload::empty();
        for (window, result) in windows.iter().zip(results) {
            match result {
                Ok(payload) => merged.data.extend(payload.data),
                Err(e) => warn!(resource = %kind, window = %window, error = %e, "Skipping failed window"),
            }
        }
        merged
    }
}

#[async_trait]
impl ResourceSource for EndpointFetcher {
    #[instrument(skip(self, kind, range), fields(resource = %kind, range = %range))]
    async fn fetch(&self, kind: ResourceKind, range: DateRange) -> Result<RawPayload, PollError> {
        let bearer = resolve_bearer_token(self.tokens.as_ref()).await?;

        match kind.max_span_days() {
            Some(span) => Ok(self.get_batched(kind, range, span, &bearer).await),
            None => self.get(kind, range, &bearer).await,
        }
    }
}

/// Decode a response body into a payload.
///
/// The body must be a JSON object. A missing or `null` `data` key reads as no
/// entries; any other non-array `data` is a remote error.
pub fn decode_payload(kind: ResourceKind, body: &str) -> Result<RawPayload, PollError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| PollError::remote(kind, format!("malformed JSON body: {e}")))?;

    let mut object = match value {
        Value::Object(object) => object,
        other => {
            return Err(PollError::remote(
                kind,
                format!("expected a JSON object, found {}", json_type_name(&other)),
            ))
        }
    };

    match object.remove("data") {
        None | Some(Value::Null) => Ok(RawPayload::empty()),
        Some(Value::Array(data)) => Ok(RawPayload { data }),
        Some(other) => Err(PollError::remote(
            kind,
            format!("expected `data` to be an array, found {}", json_type_name(&other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(
            NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap(),
            NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_day_range_params() {
        let params =
            EndpointFetcher::request_params(ResourceKind::SleepScore, range("2024-01-14", "2024-01-15"));
        assert_eq!(
            params,
            [
                ("start_date", "2024-01-14".to_string()),
                ("end_date", "2024-01-15".to_string()),
            ]
        );
    }

    #[test]
    fn test_instant_range_params_span_whole_days() {
        let params =
            EndpointFetcher::request_params(ResourceKind::Heartrate, range("2024-01-14", "2024-01-15"));
        assert_eq!(
            params,
            [
                ("start_datetime", "2024-01-14T00:00:00".to_string()),
                ("end_datetime", "2024-01-15T23:59:59".to_string()),
            ]
        );
    }

    #[test]
    fn test_decode_payload_shapes() {
        let payload = decode_payload(ResourceKind::Stress, r#"{"data": [{"day": "2024-01-15"}], "next_token": null}"#)
            .unwrap();
        assert_eq!(payload.data.len(), 1);

        assert!(decode_payload(ResourceKind::Stress, r#"{"next_token": null}"#)
            .unwrap()
            .is_empty());

        for body in ["not json", "[1, 2]", r#"{"data": {"day": "2024-01-15"}}"#] {
            let err = decode_payload(ResourceKind::Stress, body).unwrap_err();
            assert!(matches!(err, PollError::Remote { kind: ResourceKind::Stress, .. }));
        }
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let fetcher = EndpointFetcher::with_client(
            Client::new(),
            "https://api.ouraring.com/v2/usercollection/",
            Arc::new(crate::auth::StaticTokenProvider::new("t")),
        );
        assert_eq!(
            fetcher.url(ResourceKind::CardiovascularAge),
            "https://api.ouraring.com/v2/usercollection/daily_cardiovascular_age"
        );
    }
}
