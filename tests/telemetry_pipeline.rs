// Logger + metrics + tracer working together, plus the HTTP/file harness
// doubles against a real mock server.

use std::sync::Arc;

use faultline::{
    fields, Environment, FailureConfig, FailureMode, FaultError, LogLevel, LogSink, MemorySink,
    MetricsCollector, StructuredLogger, TelemetryConfig, TestFileSystem, TestHttpClient, Tracer,
};
use httpmock::prelude::*;
use serde_json::{json, Value};

fn production_config(level: LogLevel) -> TelemetryConfig {
    TelemetryConfig {
        log_level: level,
        environment: Environment::Production,
        flush_interval_secs: 60,
    }
}

fn captured_logger(level: LogLevel) -> (StructuredLogger, Arc<MemorySink>) {
    let sink = MemorySink::new();
    let logger =
        StructuredLogger::with_sink(&production_config(level), sink.clone() as Arc<dyn LogSink>);
    (logger, sink)
}

#[tokio::test]
async fn test_traced_failure_end_to_end() {
    let (logger, _sink) = captured_logger(LogLevel::Fatal);
    let tracer = Tracer::new(logger);

    let result: Result<(), FaultError> = tracer
        .trace("checkout", None, None, |_context| async {
            Err(FaultError::new("boom"))
        })
        .await;

    // The original error reaches the caller unchanged...
    assert_eq!(result.unwrap_err().message(), "boom");

    // ...and exactly one completed span records the failure.
    let completed = tracer.completed_spans();
    assert_eq!(completed.len(), 1);
    let span = &completed[0];
    assert_eq!(span.operation_name, "checkout");
    assert_eq!(span.tags["errorMessage"], "boom");
    assert!(span.duration_ms.unwrap() >= 0);
}

#[tokio::test]
async fn test_trace_correlates_log_lines() -> anyhow::Result<()> {
    let (logger, sink) = captured_logger(LogLevel::Info);
    let tracer = Tracer::new(logger.clone());

    let context = tracer.start_trace("ingest", None);
    let request_logger = logger.child(fields(json!({"component": "parser"})));
    request_logger.info("parsed payload", None);
    tracer.finish_span(&context.span_id);

    let parsed: Vec<Value> = sink
        .lines()
        .iter()
        .map(|line| serde_json::from_str(line))
        .collect::<Result<_, _>>()?;

    // Both the trace banner and the child's line carry the same trace id.
    assert!(parsed
        .iter()
        .filter(|entry| entry["message"] != "Span finished: ingest")
        .all(|entry| entry["context"]["traceId"] == context.trace_id.as_str()));
    assert!(parsed
        .iter()
        .any(|entry| entry["message"] == "parsed payload"
            && entry["context"]["component"] == "parser"));

    Ok(())
}

#[tokio::test]
async fn test_metrics_snapshot_shapes() {
    let sink = MemorySink::new();
    let collector = MetricsCollector::with_sink(sink.clone() as Arc<dyn LogSink>);

    collector.increment("jobs.started", 1.0, None);
    collector.increment("jobs.started", 1.0, None);
    collector.gauge("queue.depth", 7.0, None);
    for latency in [10.0, 20.0, 30.0, 40.0, 50.0] {
        collector.histogram("job.latency", latency, None);
    }

    let rendered = serde_json::to_string(&collector.snapshot()).unwrap();
    let snapshot: Value = serde_json::from_str(&rendered).unwrap();

    assert_eq!(snapshot["jobs.started:counter:{}"], 2.0);
    assert_eq!(snapshot["queue.depth:gauge:{}"], 7.0);
    assert_eq!(snapshot["job.latency.histogram"]["p50"], 30.0);
    assert_eq!(snapshot["job.latency.histogram"]["avg"], 30.0);

    // Flush empties the window; the next snapshot starts from scratch.
    collector.flush();
    assert!(collector.snapshot().is_empty());
    assert!(sink.lines()[0].starts_with("Flushing metrics: "));
}

#[tokio::test]
async fn test_http_client_against_mock_server() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let ok_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/status");
            then.status(200).json_body(json!({"healthy": true}));
        })
        .await;
    let failing_mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/broken");
            then.status(500);
        })
        .await;

    let client = TestHttpClient::new();

    let body = client.get(&server.url("/status")).await?;
    assert_eq!(body["healthy"], true);
    ok_mock.assert_async().await;

    let err = client.get(&server.url("/broken")).await.unwrap_err();
    assert_eq!(err.message(), "HTTP 500: Internal Server Error");
    failing_mock.assert_async().await;

    Ok(())
}

#[tokio::test]
async fn test_injected_fault_short_circuits_network() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/never");
            then.status(200).json_body(json!({}));
        })
        .await;

    let client = TestHttpClient::new();
    client.inject_failure(FailureMode::RateLimit);

    let err = client.get(&server.url("/never")).await.unwrap_err();
    assert_eq!(err.message(), "Rate limit exceeded");

    // The fault fired before any request went out.
    assert_eq!(mock.hits_async().await, 0);
}

#[tokio::test]
async fn test_post_reaches_server_after_wear_off() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/ingest");
            then.status(200).json_body(json!({"accepted": true}));
        })
        .await;

    let client = TestHttpClient::new();
    client.injector().configure(FailureConfig {
        mode: FailureMode::NetworkError,
        fail_after_count: Some(1),
        ..Default::default()
    });

    let first = client.post(&server.url("/ingest"), &json!({"seq": 1})).await;
    assert!(first.is_err());

    let second = client
        .post(&server.url("/ingest"), &json!({"seq": 2}))
        .await?;
    assert_eq!(second["accepted"], true);
    assert_eq!(mock.hits_async().await, 1);

    Ok(())
}

#[tokio::test]
async fn test_file_system_under_intermittent_writes() -> anyhow::Result<()> {
    let fs = TestFileSystem::new();
    fs.injector().configure(FailureConfig {
        mode: FailureMode::Intermittent,
        probability: Some(1.0),
        fail_after_count: Some(3),
        ..Default::default()
    });

    // Three failures, then the injection wears off and the write lands.
    let mut attempts = 0;
    loop {
        attempts += 1;
        if fs.write_file("/journal", "entry").await.is_ok() {
            break;
        }
    }

    assert_eq!(attempts, 4);
    assert_eq!(fs.read_file("/journal").await?, "entry");

    Ok(())
}
