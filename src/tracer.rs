//! Span construction and trace correlation.
//!
//! A span is mutable while active and frozen once finished, when it moves
//! from the active map into the completed list. The tracer writes
//! side-channel debug output through [`StructuredLogger`] — the one
//! deliberate cross-component coupling in this crate.

use std::fmt;
use std::future::Future;
use std::sync::{LazyLock, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::logger::{fields, logger, Fields, StructuredLogger};

/// Upper bound on retained completed spans; oldest are evicted first.
const MAX_COMPLETED_SPANS: usize = 10_000;

/// Span outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Ok,
    Error,
    Cancelled,
}

/// Timestamped event attached to a span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanLog {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub message: String,
    pub fields: Fields,
}

/// One operation in a trace tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// Shared by every span in one trace.
    pub trace_id: String,
    /// Unique per span.
    pub span_id: String,
    /// `None` for root spans.
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub duration_ms: Option<i64>,
    pub tags: Fields,
    pub logs: Vec<SpanLog>,
    pub status: SpanStatus,
}

/// Propagation handle for starting child spans.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    /// Carried through to child contexts unchanged.
    pub baggage: std::collections::HashMap<String, String>,
}

/// Span tracker: active map plus completed list.
pub struct Tracer {
    active: DashMap<String, Span>,
    completed: Mutex<Vec<Span>>,
    logger: StructuredLogger,
    production: bool,
}

impl Tracer {
    pub fn new(logger: StructuredLogger) -> Self {
        Self::with_environment(logger, false)
    }

    /// In production, finished spans are also handed to
    /// [`send_to_backend`](Self::send_to_backend).
    pub fn with_environment(logger: StructuredLogger, production: bool) -> Self {
        Self {
            active: DashMap::new(),
            completed: Mutex::new(Vec::new()),
            logger,
            production,
        }
    }

    /// Start a new trace with a root span.
    ///
    /// Also merges `{traceId, spanId}` into the logger's global context so
    /// co-occurring log lines correlate with the trace.
    pub fn start_trace(&self, operation_name: &str, tags: Option<Fields>) -> TraceContext {
        let trace_id = generate_id();
        let span_id = generate_id();

        self.active.insert(
            span_id.clone(),
            Span {
                trace_id: trace_id.clone(),
                span_id: span_id.clone(),
                parent_span_id: None,
                operation_name: operation_name.to_string(),
                start_time: current_millis(),
                end_time: None,
                duration_ms: None,
                tags: tags.unwrap_or_default(),
                logs: Vec::new(),
                status: SpanStatus::Ok,
            },
        );

        self.logger
            .set_global_context(fields(json!({ "traceId": &trace_id, "spanId": &span_id })));
        self.logger.info(
            &format!("Trace started: {}", operation_name),
            Some(fields(json!({ "traceId": &trace_id, "spanId": &span_id }))),
        );

        TraceContext {
            trace_id,
            span_id,
            baggage: Default::default(),
        }
    }

    /// Start a child span under `parent`. The returned context carries the
    /// parent's baggage unchanged.
    pub fn start_span(
        &self,
        operation_name: &str,
        parent: &TraceContext,
        tags: Option<Fields>,
    ) -> TraceContext {
        let span_id = generate_id();

        self.active.insert(
            span_id.clone(),
            Span {
                trace_id: parent.trace_id.clone(),
                span_id: span_id.clone(),
                parent_span_id: Some(parent.span_id.clone()),
                operation_name: operation_name.to_string(),
                start_time: current_millis(),
                end_time: None,
                duration_ms: None,
                tags: tags.unwrap_or_default(),
                logs: Vec::new(),
                status: SpanStatus::Ok,
            },
        );

        self.logger.debug(
            &format!("Span started: {}", operation_name),
            Some(fields(json!({
                "traceId": &parent.trace_id,
                "spanId": &span_id,
                "parentSpanId": &parent.span_id,
            }))),
        );

        TraceContext {
            trace_id: parent.trace_id.clone(),
            span_id,
            baggage: parent.baggage.clone(),
        }
    }

    /// Set a tag on an active span. No-op if the span is not active.
    pub fn add_tag(&self, span_id: &str, key: &str, value: serde_json::Value) {
        if let Some(mut span) = self.active.get_mut(span_id) {
            span.tags.insert(key.to_string(), value);
        }
    }

    /// Append a log event to an active span. No-op if the span is not active.
    pub fn add_log(&self, span_id: &str, message: &str, event_fields: Option<Fields>) {
        if let Some(mut span) = self.active.get_mut(span_id) {
            span.logs.push(SpanLog {
                timestamp: current_millis(),
                message: message.to_string(),
                fields: event_fields.unwrap_or_default(),
            });
        }
    }

    /// Mark an active span as errored: status becomes `Error`, error tags
    /// are recorded, and an `"Error occurred"` event is appended. Only
    /// meaningful before `finish_span`.
    pub fn set_error(&self, span_id: &str, error: &dyn fmt::Display) {
        let message = error.to_string();
        if let Some(mut span) = self.active.get_mut(span_id) {
            span.status = SpanStatus::Error;
            span.tags.insert("error".to_string(), json!(true));
            span.tags
                .insert("errorMessage".to_string(), json!(message.clone()));
            span.logs.push(SpanLog {
                timestamp: current_millis(),
                message: "Error occurred".to_string(),
                fields: fields(json!({ "error": message })),
            });
        }
    }

    /// Finish a span: stamp end time and duration, move it to the completed
    /// list. Unknown (or already finished) span IDs are a silent no-op, so
    /// calling this twice is safe.
    pub fn finish_span(&self, span_id: &str) {
        let Some((_, mut span)) = self.active.remove(span_id) else {
            return;
        };

        let end_time = current_millis();
        span.end_time = Some(end_time);
        span.duration_ms = Some((end_time - span.start_time).max(0));

        self.logger.debug(
            &format!("Span finished: {}", span.operation_name),
            Some(fields(json!({
                "traceId": &span.trace_id,
                "spanId": &span.span_id,
                "duration": span.duration_ms,
                "status": span.status,
            }))),
        );

        if self.production {
            self.send_to_backend(&span);
        }

        let mut completed = match self.completed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if completed.len() >= MAX_COMPLETED_SPANS {
            completed.remove(0);
        }
        completed.push(span);
    }

    /// Integration point for a real tracing backend. Currently a stub that
    /// logs the span at debug level.
    fn send_to_backend(&self, span: &Span) {
        self.logger.debug(
            "Sending span to backend",
            Some(fields(json!({
                "traceId": &span.trace_id,
                "spanId": &span.span_id,
                "operationName": &span.operation_name,
            }))),
        );
    }

    /// Run `f` inside a span: a root span when `parent` is `None`, a child
    /// span otherwise. The span is finished exactly once on both paths; on
    /// failure it is marked errored first and the original error is returned
    /// unmodified.
    pub async fn trace<T, E, F, Fut>(
        &self,
        operation_name: &str,
        parent: Option<&TraceContext>,
        tags: Option<Fields>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(TraceContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let context = match parent {
            Some(parent) => self.start_span(operation_name, parent, tags),
            None => self.start_trace(operation_name, tags),
        };
        let span_id = context.span_id.clone();

        match f(context).await {
            Ok(value) => {
                self.finish_span(&span_id);
                Ok(value)
            }
            Err(err) => {
                self.set_error(&span_id, &err);
                self.finish_span(&span_id);
                Err(err)
            }
        }
    }

    /// Snapshot of all finished spans, in finish order.
    pub fn completed_spans(&self) -> Vec<Span> {
        match self.completed.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Snapshot of one active span, if any (test inspection).
    pub fn active_span(&self, span_id: &str) -> Option<Span> {
        self.active.get(span_id).map(|span| span.clone())
    }

    /// Drop all active and completed spans (test isolation).
    pub fn reset(&self) {
        self.active.clear();
        match self.completed.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

static GLOBAL_TRACER: LazyLock<Tracer> = LazyLock::new(|| {
    let config = crate::config::TelemetryConfig::from_env();
    Tracer::with_environment(logger().clone(), config.environment.is_production())
});

/// The process-wide tracer, wired to the global logger.
pub fn tracer() -> &'static Tracer {
    &GLOBAL_TRACER
}
