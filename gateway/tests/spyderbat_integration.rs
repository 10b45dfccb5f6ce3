//! Integration tests for the Spyderbat output
//!
//! A mock Spyderbat API (axum on an ephemeral port) records every request so
//! the tests can check provisioning and delivery end to end.

#![allow(clippy::unwrap_used, clippy::panic)]

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use flate2::read::GzDecoder;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use sidekick_gateway::config::{SpyderbatConfig, StartupPolicy};
use sidekick_gateway::metrics::{CountSample, CountSink, Metrics};
use sidekick_gateway::output::spyderbat::source::{create_source, source_exists};
use sidekick_gateway::{
    KubearmorEvent, MetricsQueue, Output, OutputStats, SinkError, SpyderbatOutput,
};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const ORG: &str = "org123";
const API_KEY: &str = "test-key";

// ============================================================================
// Mock Spyderbat API
// ============================================================================

#[derive(Default)]
struct MockSpyderbat {
    /// uids of existing sources
    sources: Mutex<Vec<String>>,
    /// Upcoming listing calls that answer 503
    list_failures: AtomicU32,
    /// Raw listing body replacing the generated one
    list_body: Mutex<Option<String>>,
    /// Delay before answering a listing call
    list_delay: Mutex<Option<Duration>>,
    /// Status returned by source creation
    create_status: Mutex<StatusCode>,
    /// Create the source even when reporting a failure (concurrent creator)
    create_despite_failure: AtomicBool,
    /// Fail every second data post with 500
    data_fail_alternate: AtomicBool,
    /// Status returned by data posts
    data_status: Mutex<StatusCode>,

    list_calls: AtomicUsize,
    create_calls: AtomicUsize,
    data_calls: AtomicUsize,
    created: Mutex<Vec<Value>>,
    received: Mutex<Vec<(HeaderMap, Value)>>,
}

impl MockSpyderbat {
    fn with_sources(uids: &[&str]) -> Self {
        Self {
            sources: Mutex::new(uids.iter().map(|u| u.to_string()).collect()),
            ..Default::default()
        }
    }
}

#[derive(Deserialize)]
struct CreateBody {
    uid: String,
}

async fn list_sources(State(mock): State<Arc<MockSpyderbat>>, headers: HeaderMap) -> (StatusCode, String) {
    mock.list_calls.fetch_add(1, Ordering::SeqCst);

    let delay = *mock.list_delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if headers.get("authorization").map(|v| v.as_bytes()) != Some(format!("Bearer {API_KEY}").as_bytes()) {
        return (StatusCode::UNAUTHORIZED, "unauthorized".to_string());
    }

    let remaining = mock.list_failures.load(Ordering::SeqCst);
    if remaining > 0 {
        mock.list_failures.fetch_sub(1, Ordering::SeqCst);
        return (StatusCode::SERVICE_UNAVAILABLE, "try later".to_string());
    }

    if let Some(body) = mock.list_body.lock().clone() {
        return (StatusCode::OK, body);
    }

    let mut listing: Vec<Value> = mock
        .sources
        .lock()
        .iter()
        .map(|uid| json!({"uid": uid, "name": "existing"}))
        .collect();
    listing.push(json!({"name": "source without uid"}));
    (StatusCode::OK, Value::Array(listing).to_string())
}

async fn create_source_handler(
    State(mock): State<Arc<MockSpyderbat>>,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    mock.create_calls.fetch_add(1, Ordering::SeqCst);
    mock.created.lock().push(body.clone());

    let uid = serde_json::from_value::<CreateBody>(body).unwrap().uid;
    let status = *mock.create_status.lock();
    if status == StatusCode::OK || mock.create_despite_failure.load(Ordering::SeqCst) {
        mock.sources.lock().push(uid);
    }

    let reason = if status == StatusCode::BAD_REQUEST {
        "source uid already in use"
    } else {
        ""
    };
    (status, reason.to_string())
}

async fn post_data(
    State(mock): State<Arc<MockSpyderbat>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let n = mock.data_calls.fetch_add(1, Ordering::SeqCst);

    let mut line = String::new();
    GzDecoder::new(body.as_ref()).read_to_string(&mut line).unwrap();
    let payload: Value = serde_json::from_str(line.trim_end()).unwrap();
    mock.received.lock().push((headers, payload));

    if mock.data_fail_alternate.load(Ordering::SeqCst) && n % 2 == 1 {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    *mock.data_status.lock()
}

async fn start_mock(mock: MockSpyderbat) -> (SocketAddr, Arc<MockSpyderbat>) {
    let mock = Arc::new(mock);

    let app = Router::new()
        .route(
            "/api/v1/org/{org}/source/",
            get(list_sources).post(create_source_handler),
        )
        .route("/api/v1/org/{org}/source/{source}/data/sb-agent", post(post_data))
        .with_state(Arc::clone(&mock));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, mock)
}

fn config_for(addr: SocketAddr) -> SpyderbatConfig {
    SpyderbatConfig {
        api_url: format!("http://{addr}"),
        org_uid: ORG.to_string(),
        api_key: API_KEY.to_string(),
        source: "KubeArmor".to_string(),
        source_description: "KubeArmor alerts".to_string(),
        check_cert: true,
        startup: StartupPolicy {
            deadline: Duration::from_secs(5),
            request_timeout: Duration::from_secs(2),
            max_attempts: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        },
    }
}

async fn build_output(
    config: &SpyderbatConfig,
) -> (Result<SpyderbatOutput, SinkError>, Arc<OutputStats>) {
    let stats = Arc::new(OutputStats::new());
    let (queue, worker) = MetricsQueue::new(256);
    drop(worker);
    (SpyderbatOutput::new(config, stats.clone(), queue).await, stats)
}

/// Count sink keeping every drained sample
#[derive(Default)]
struct RecordingSink {
    samples: Mutex<Vec<CountSample>>,
}

impl CountSink for RecordingSink {
    fn count(&self, sample: &CountSample) {
        self.samples.lock().push(sample.clone());
    }
}

fn outputs_sample(status: &str) -> CountSample {
    CountSample {
        category: "outputs",
        value: 1,
        tags: vec!["output:spyderbat".to_string(), format!("status:{status}")],
    }
}

fn alert(timestamp: i64) -> KubearmorEvent {
    KubearmorEvent::new("Alert", timestamp)
        .with_field("PID", 4242)
        .with_field("proc.cmdline", "cat /etc/shadow")
        .with_field("container.id", "0123456789ab")
}

// ============================================================================
// Resource Prober / Provisioner
// ============================================================================

#[tokio::test]
async fn test_probe_finds_existing_source() {
    let (addr, _mock) = start_mock(MockSpyderbat::with_sources(&["other", "kubearmor_org123"])).await;
    let client = reqwest::Client::new();

    assert!(source_exists(&client, &config_for(addr)).await.unwrap());
}

#[tokio::test]
async fn test_probe_reports_missing_source() {
    let (addr, _mock) = start_mock(MockSpyderbat::with_sources(&["kubearmor_someone_else"])).await;
    let client = reqwest::Client::new();

    assert!(!source_exists(&client, &config_for(addr)).await.unwrap());
}

#[tokio::test]
async fn test_probe_errors() {
    let mock = MockSpyderbat::default();
    *mock.list_body.lock() = Some(r#"{"not": "a list"}"#.to_string());
    let (addr, mock) = start_mock(mock).await;
    let client = reqwest::Client::new();

    let err = source_exists(&client, &config_for(addr)).await.unwrap_err();
    assert!(matches!(err, SinkError::Decode(_)));

    *mock.list_body.lock() = None;
    mock.list_failures.store(1, Ordering::SeqCst);
    let err = source_exists(&client, &config_for(addr)).await.unwrap_err();
    assert!(matches!(err, SinkError::Transport(msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_create_source_sends_body() {
    let (addr, mock) = start_mock(MockSpyderbat::default()).await;
    let client = reqwest::Client::new();

    create_source(&client, &config_for(addr)).await.unwrap();

    let created = mock.created.lock();
    assert_eq!(
        created[0],
        json!({"name": "KubeArmor", "description": "KubeArmor alerts", "uid": "kubearmor_org123"})
    );
}

#[tokio::test]
async fn test_create_source_bad_request_carries_reason() {
    let mock = MockSpyderbat::default();
    *mock.create_status.lock() = StatusCode::BAD_REQUEST;
    let (addr, _mock) = start_mock(mock).await;

    let err = create_source(&reqwest::Client::new(), &config_for(addr))
        .await
        .unwrap_err();
    assert!(matches!(err, SinkError::Validation(reason) if reason == "source uid already in use"));
}

// ============================================================================
// Client construction
// ============================================================================

#[tokio::test]
async fn test_construction_with_existing_source_skips_create() {
    let (addr, mock) = start_mock(MockSpyderbat::with_sources(&["kubearmor_org123"])).await;

    let (output, _stats) = build_output(&config_for(addr)).await;
    let output = output.unwrap();

    assert_eq!(mock.create_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        output.endpoint().as_str(),
        format!("http://{addr}/api/v1/org/org123/source/kubearmor_org123/data/sb-agent")
    );
}

#[tokio::test]
async fn test_construction_creates_missing_source() {
    let (addr, mock) = start_mock(MockSpyderbat::default()).await;

    let (output, _stats) = build_output(&config_for(addr)).await;

    assert!(output.is_ok());
    assert_eq!(mock.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.sources.lock().as_slice(), ["kubearmor_org123"]);
}

#[tokio::test]
async fn test_failed_create_and_still_absent_is_creation_error() {
    let mock = MockSpyderbat::default();
    *mock.create_status.lock() = StatusCode::INTERNAL_SERVER_ERROR;
    let (addr, mock) = start_mock(mock).await;

    let (output, _stats) = build_output(&config_for(addr)).await;

    assert!(matches!(output, Err(SinkError::ClientCreation { output: "spyderbat", .. })));
    // probe, create, re-probe
    assert_eq!(mock.list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(mock.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_create_recovered_when_source_appears() {
    let mock = MockSpyderbat::default();
    *mock.create_status.lock() = StatusCode::CONFLICT;
    mock.create_despite_failure.store(true, Ordering::SeqCst);
    let (addr, mock) = start_mock(mock).await;

    let (output, _stats) = build_output(&config_for(addr)).await;

    assert!(output.is_ok());
    assert_eq!(mock.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transient_probe_failures_are_retried() {
    let mock = MockSpyderbat::with_sources(&["kubearmor_org123"]);
    mock.list_failures.store(2, Ordering::SeqCst);
    let (addr, mock) = start_mock(mock).await;

    let mut config = config_for(addr);
    config.startup.max_attempts = 3;
    let (output, _stats) = build_output(&config).await;

    assert!(output.is_ok());
    assert_eq!(mock.list_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let mock = MockSpyderbat::default();
    mock.list_failures.store(10, Ordering::SeqCst);
    let (addr, mock) = start_mock(mock).await;

    let mut config = config_for(addr);
    config.startup.max_attempts = 2;
    let (output, _stats) = build_output(&config).await;

    assert!(matches!(output, Err(SinkError::ClientCreation { .. })));
    assert_eq!(mock.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let mock = MockSpyderbat::default();
    *mock.create_status.lock() = StatusCode::BAD_REQUEST;
    let (addr, mock) = start_mock(mock).await;

    let mut config = config_for(addr);
    config.startup.max_attempts = 3;
    let (output, _stats) = build_output(&config).await;

    let Err(SinkError::ClientCreation { reason, .. }) = output else {
        panic!("expected a client creation error");
    };
    assert!(reason.contains("source uid already in use"));
    assert_eq!(mock.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_api_key_is_not_retried() {
    let (addr, mock) = start_mock(MockSpyderbat::with_sources(&["kubearmor_org123"])).await;

    let mut config = config_for(addr);
    config.api_key = "wrong-key".to_string();
    config.startup.max_attempts = 3;
    config.startup.initial_backoff = Duration::from_secs(1);
    config.startup.max_backoff = Duration::from_secs(1);

    let start = Instant::now();
    let (output, _stats) = build_output(&config).await;

    let Err(SinkError::ClientCreation { reason, .. }) = output else {
        panic!("expected a client creation error");
    };
    assert!(reason.contains("401"));
    assert_eq!(mock.list_calls.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_probe_client_error_is_rejected() {
    let (addr, _mock) = start_mock(MockSpyderbat::default()).await;
    let mut config = config_for(addr);
    config.api_key = "wrong-key".to_string();

    let err = source_exists(&reqwest::Client::new(), &config).await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected { status: 401, ref body } if body == "unauthorized"));
}

#[tokio::test]
async fn test_hung_endpoint_is_bounded_by_deadline() {
    let mock = MockSpyderbat::default();
    *mock.list_delay.lock() = Some(Duration::from_secs(30));
    let (addr, _mock) = start_mock(mock).await;

    let mut config = config_for(addr);
    config.startup.deadline = Duration::from_millis(200);
    config.startup.request_timeout = Duration::from_secs(60);

    let start = Instant::now();
    let (output, _stats) = build_output(&config).await;

    assert!(matches!(output, Err(SinkError::ClientCreation { reason, .. }) if reason.contains("deadline")));
    assert!(start.elapsed() < Duration::from_secs(5));
}

// ============================================================================
// Post path
// ============================================================================

#[tokio::test]
async fn test_post_delivers_gzipped_payload() {
    let (addr, mock) = start_mock(MockSpyderbat::with_sources(&["kubearmor_org123"])).await;
    let (output, stats) = build_output(&config_for(addr)).await;
    let output = output.unwrap();

    output.post(&alert(3_000_000_000)).await;

    assert_eq!(stats.total(), 1);
    assert_eq!(stats.ok(), 1);
    assert_eq!(stats.error(), 0);

    let received = mock.received.lock();
    let (headers, payload) = &received[0];
    assert_eq!(headers["authorization"], "Bearer test-key");
    assert_eq!(headers["content-encoding"], "gzip");
    assert_eq!(headers["content-type"], "application/ndjson");

    assert_eq!(payload["schema"], "kubearmor_alert::1.0.0");
    assert_eq!(payload["time"], 3.0);
    assert_eq!(payload["level"], "high");
    assert_eq!(payload["pid"], 4242);
    assert_eq!(payload["args"], "cat /etc/shadow");
    assert_eq!(payload["container"], "0123456789ab");
}

#[tokio::test]
async fn test_post_failure_counts_error_and_does_not_propagate() {
    let mock = MockSpyderbat::with_sources(&["kubearmor_org123"]);
    *mock.data_status.lock() = StatusCode::BAD_GATEWAY;
    let (addr, mock) = start_mock(mock).await;
    let (output, stats) = build_output(&config_for(addr)).await;
    let output = output.unwrap();

    output.post(&alert(1)).await;

    assert_eq!(stats.total(), 1);
    assert_eq!(stats.error(), 1);
    assert_eq!(stats.ok(), 0);
    assert_eq!(mock.data_calls.load(Ordering::SeqCst), 1);

    // the output keeps working after a failure
    *mock.data_status.lock() = StatusCode::OK;
    output.post(&alert(2)).await;
    assert_eq!(stats.ok(), 1);
}

#[tokio::test]
async fn test_post_outcomes_reach_count_sink_and_prometheus() {
    let metrics = Metrics::init().unwrap();
    let failed = metrics.outputs.with_label_values(&["spyderbat", "error"]);
    let delivered = metrics.outputs.with_label_values(&["spyderbat", "ok"]);
    let (failed_before, delivered_before) = (failed.get(), delivered.get());

    let mock = MockSpyderbat::with_sources(&["kubearmor_org123"]);
    *mock.data_status.lock() = StatusCode::BAD_GATEWAY;
    let (addr, mock) = start_mock(mock).await;

    let sink = Arc::new(RecordingSink::default());
    let (queue, worker) = MetricsQueue::new(16);
    let drain = tokio::spawn(worker.run(sink.clone()));

    let output = SpyderbatOutput::new(&config_for(addr), Arc::new(OutputStats::new()), queue)
        .await
        .unwrap();

    output.post(&alert(1)).await;
    *mock.data_status.lock() = StatusCode::OK;
    output.post(&alert(2)).await;

    // the output holds the last queue handle
    drop(output);
    drain.await.unwrap();

    assert_eq!(
        *sink.samples.lock(),
        vec![outputs_sample("error"), outputs_sample("ok")]
    );
    assert!(failed.get() > failed_before);
    assert!(delivered.get() > delivered_before);
}

#[tokio::test]
async fn test_malformed_event_is_a_per_event_failure() {
    let (addr, mock) = start_mock(MockSpyderbat::with_sources(&["kubearmor_org123"])).await;
    let (output, stats) = build_output(&config_for(addr)).await;
    let output = output.unwrap();

    output
        .post(&KubearmorEvent::new("Alert", 0).with_field("PID", "not a pid"))
        .await;

    assert_eq!(stats.error(), 1);
    assert_eq!(mock.data_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_posts_each_count_once() {
    let mock = MockSpyderbat::with_sources(&["kubearmor_org123"]);
    mock.data_fail_alternate.store(true, Ordering::SeqCst);
    let (addr, mock) = start_mock(mock).await;
    let (output, stats) = build_output(&config_for(addr)).await;
    let output = Arc::new(output.unwrap());

    let posts = (0..50).map(|i| {
        let output = Arc::clone(&output);
        tokio::spawn(async move { output.post(&alert(i)).await })
    });
    for result in futures::future::join_all(posts).await {
        result.unwrap();
    }

    assert_eq!(stats.total(), 50);
    assert_eq!(stats.ok() + stats.error(), 50);
    assert_eq!(stats.ok(), 25);
    assert_eq!(mock.data_calls.load(Ordering::SeqCst), 50);

    // every request carried its own intact headers
    for (headers, _) in mock.received.lock().iter() {
        assert_eq!(headers["authorization"], "Bearer test-key");
        assert_eq!(headers.get_all("content-encoding").iter().count(), 1);
    }
}
