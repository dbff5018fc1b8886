//! Integration tests for the endpoint fetcher and the full polling pipeline
//! against a mock Oura API.

use chrono::NaiveDate;
use oura_poller::{
    aggregate, Coordinator, DateRange, EndpointFetcher, FileTokenStore, MemorySink, MetricValue,
    PollError, PollerConfig, Replayer, ResourceKind, ResourceSource, StaticTokenProvider,
    TokenProvider,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_PREFIX: &str = "/v2/usercollection";

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn range(start: &str, end: &str) -> DateRange {
    DateRange::new(day(start), day(end)).unwrap()
}

fn fetcher(server: &MockServer, tokens: Arc<dyn TokenProvider>) -> EndpointFetcher {
    EndpointFetcher::with_client(
        reqwest::Client::new(),
        &format!("{}{}", server.uri(), API_PREFIX),
        tokens,
    )
}

fn static_token() -> Arc<dyn TokenProvider> {
    Arc::new(StaticTokenProvider::new("test-token"))
}

fn api_path(suffix: &str) -> String {
    format!("{API_PREFIX}{suffix}")
}

#[tokio::test]
async fn test_day_range_request_carries_bearer_and_dates() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(api_path("/daily_sleep")))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param("start_date", "2024-01-14"))
        .and(query_param("end_date", "2024-01-15"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"day": "2024-01-15", "score": 85}],
            "next_token": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payload = fetcher(&server, static_token())
        .fetch(ResourceKind::SleepScore, range("2024-01-14", "2024-01-15"))
        .await
        .unwrap();

    assert_eq!(payload.data, vec![json!({"day": "2024-01-15", "score": 85})]);
}

#[tokio::test]
async fn test_configured_client_sends_crate_user_agent() {
    let server = MockServer::start().await;
    let expected = format!("oura-poller/{}", oura_poller::VERSION);

    Mock::given(method("GET"))
        .and(path(api_path("/daily_readiness")))
        .and(header("user-agent", expected.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = PollerConfig {
        api_base_url: format!("{}{}", server.uri(), API_PREFIX),
        ..PollerConfig::default()
    };
    let payload = EndpointFetcher::new(&config, static_token())
        .unwrap()
        .fetch(ResourceKind::Readiness, range("2024-01-14", "2024-01-15"))
        .await
        .unwrap();
    assert!(payload.is_empty());
}

#[tokio::test]
async fn test_error_status_is_remote_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(api_path("/vO2_max")))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(&server, static_token())
        .fetch(ResourceKind::Vo2Max, range("2024-01-14", "2024-01-15"))
        .await
        .unwrap_err();

    match err {
        PollError::Remote { kind, reason } => {
            assert_eq!(kind, ResourceKind::Vo2Max);
            assert!(reason.contains("429"), "{reason}");
            assert!(reason.contains("rate limited"), "{reason}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_heartrate_batches_windows_and_skips_failed_one() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(api_path("/heartrate")))
        .and(query_param("start_datetime", "2024-01-01T00:00:00"))
        .and(query_param("end_datetime", "2024-01-07T23:59:59"))
        // the earliest window answers last; output must still be chronological
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_json(json!({
                    "data": [{"bpm": 60, "timestamp": "2024-01-01T08:00:00+00:00"}]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(api_path("/heartrate")))
        .and(query_param("start_datetime", "2024-01-08T00:00:00"))
        .and(query_param("end_datetime", "2024-01-14T23:59:59"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(api_path("/heartrate")))
        .and(query_param("start_datetime", "2024-01-15T00:00:00"))
        .and(query_param("end_datetime", "2024-01-15T23:59:59"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"bpm": 70, "timestamp": "2024-01-15T08:00:00+00:00"},
                {"bpm": 72, "timestamp": "2024-01-15T08:05:00+00:00"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payload = fetcher(&server, static_token())
        .fetch(ResourceKind::Heartrate, range("2024-01-01", "2024-01-15"))
        .await
        .unwrap();

    let bpms: Vec<i64> = payload
        .data
        .iter()
        .filter_map(|entry| entry["bpm"].as_i64())
        .collect();
    assert_eq!(bpms, vec![60, 70, 72]);
}

#[tokio::test]
async fn test_heartrate_all_windows_failing_is_empty() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(api_path("/heartrate")))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let payload = fetcher(&server, static_token())
        .fetch(ResourceKind::Heartrate, range("2024-01-01", "2024-01-10"))
        .await
        .unwrap();

    assert!(payload.is_empty());
}

#[tokio::test]
async fn test_missing_credential_sends_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn TokenProvider> = Arc::new(FileTokenStore::new(dir.path().join("missing.json")));

    let err = fetcher(&server, store)
        .fetch(ResourceKind::Readiness, range("2024-01-14", "2024-01-15"))
        .await
        .unwrap_err();
    assert!(matches!(err, PollError::Auth(_)));
}

#[tokio::test]
async fn test_expired_stored_token_falls_back_to_cache() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(api_path("/daily_readiness")))
        .and(header("authorization", "Bearer cached-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"day": "2024-01-15", "score": 82}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "{}",
        json!({"token": {"access_token": "cached-token", "expires_at": 1_000_000}})
    )
    .unwrap();
    let store: Arc<dyn TokenProvider> = Arc::new(FileTokenStore::new(file.path()));

    let payload = fetcher(&server, store)
        .fetch(ResourceKind::Readiness, range("2024-01-14", "2024-01-15"))
        .await
        .unwrap();
    assert_eq!(payload.data.len(), 1);
}

#[tokio::test]
async fn test_aggregate_absorbs_unavailable_resources() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(api_path("/daily_activity")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"day": "2024-01-15", "steps": 12345}]
        })))
        .mount(&server)
        .await;

    // every other path falls through to the mock server's 404
    let map = aggregate(&fetcher(&server, static_token()), range("2024-01-14", "2024-01-15")).await;

    assert_eq!(map.len(), ResourceKind::ALL.len());
    assert_eq!(map.get(ResourceKind::Activity).data.len(), 1);
    for kind in ResourceKind::ALL.iter().filter(|k| **k != ResourceKind::Activity) {
        assert!(map.get(*kind).is_empty(), "{kind} should be empty");
    }
}

#[tokio::test]
async fn test_coordinator_refresh_end_to_end() {
    let server = MockServer::start().await;

    let responses = [
        ("/daily_sleep", json!([{"day": "2024-01-15", "score": 85, "contributors": {"efficiency": 90}}])),
        (
            "/sleep",
            json!([{"day": "2024-01-15", "total_sleep_duration": 28800, "deep_sleep_duration": 7200}]),
        ),
        ("/daily_spo2", json!([{"day": "2024-01-15", "spo2_percentage": {"average": 96.5}}])),
        ("/daily_stress", json!([{"day": "2024-01-15", "day_summary": "restored"}])),
        (
            "/heartrate",
            json!([
                {"bpm": 55, "timestamp": "2024-01-15T07:50:00+00:00"},
                {"bpm": 61, "timestamp": "2024-01-15T07:55:00+00:00"}
            ]),
        ),
    ];
    for (suffix, data) in responses {
        Mock::given(method("GET"))
            .and(path(api_path(suffix)))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
            .mount(&server)
            .await;
    }

    let config = PollerConfig {
        api_base_url: format!("{}{}", server.uri(), API_PREFIX),
        ..PollerConfig::default()
    };
    let fetcher = EndpointFetcher::new(&config, static_token()).unwrap();
    let mut coordinator = Coordinator::new(config, Arc::new(fetcher), Arc::new(MemorySink::new()));

    let snapshot = coordinator.refresh().await.unwrap();

    assert_eq!(snapshot.get("sleep_score"), Some(&MetricValue::Integer(85)));
    assert_eq!(snapshot.get("sleep_efficiency"), Some(&MetricValue::Integer(90)));
    assert_eq!(snapshot.get("total_sleep_duration"), Some(&MetricValue::Float(8.0)));
    assert_eq!(snapshot.get("deep_sleep_percentage"), Some(&MetricValue::Float(25.0)));
    assert_eq!(snapshot.get("spo2_average"), Some(&MetricValue::Float(96.5)));
    assert_eq!(
        snapshot.get("stress_day_summary").and_then(MetricValue::as_str),
        Some("restored")
    );
    assert_eq!(snapshot.get("current_heart_rate"), Some(&MetricValue::Integer(61)));
    assert_eq!(snapshot.get("average_heart_rate"), Some(&MetricValue::Float(58.0)));
    assert!(!snapshot.contains_key("readiness_score"));
    assert!(coordinator.last_update_success());
}

#[tokio::test]
async fn test_replay_records_series_through_mock_api() {
    let server = MockServer::start().await;

    let sleep: Vec<_> = (1..=14)
        .map(|d| json!({"day": format!("2024-01-{d:02}"), "score": 70 + d}))
        .collect();
    Mock::given(method("GET"))
        .and(path(api_path("/daily_sleep")))
        .and(query_param("start_date", "2024-01-01"))
        .and(query_param("end_date", "2024-01-14"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": sleep })))
        .expect(1)
        .mount(&server)
        .await;

    // 14 days split into two heart-rate windows
    Mock::given(method("GET"))
        .and(path(api_path("/heartrate")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(2)
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let replayer = Replayer::new(Arc::new(fetcher(&server, static_token())), sink.clone());

    let outcome = replayer.replay_ending(day("2024-01-14"), 13).await.unwrap();

    assert_eq!(outcome.series.len(), 14);
    assert_eq!(outcome.snapshot.get("sleep_score"), Some(&MetricValue::Integer(84)));

    let recorded = sink.get("oura:sleep_score").unwrap();
    assert_eq!(recorded.metadata.name, "Sleep Score");
    assert_eq!(recorded.points.len(), 14);
    assert_eq!(recorded.points[0].day, day("2024-01-01"));
    assert_eq!(
        recorded.points[0].start().to_rfc3339(),
        "2024-01-01T12:00:00+00:00"
    );
}
