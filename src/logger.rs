//! Structured, leveled logging with hierarchical context merging.
//!
//! A logger owns a severity threshold (read once at construction), a
//! process-wide shared context, and a per-logger overlay added by
//! [`StructuredLogger::child`]. Entries render as colored lines in
//! development and as single JSON lines in production.
//!
//! Recording never fails and never panics: malformed values are rendered
//! best-effort rather than surfaced to the caller.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, RwLock};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::TelemetryConfig;
use crate::error::FaultError;
use crate::sink::{LogSink, StdoutSink};

/// Open string-keyed context attached to every entry.
///
/// Recognized keys: `traceId`, `spanId`, `userId`, `requestId`, `service`,
/// `component`. Contexts compose by shallow merge, later values winning, in
/// the order global -> child chain -> per-call.
pub type LogContext = serde_json::Map<String, Value>;

/// Free-form metadata attached to a single entry, span tag set, or span log.
pub type Fields = serde_json::Map<String, Value>;

/// Convert a `json!` object literal into a field map.
///
/// Non-object values are wrapped under a `"value"` key rather than rejected,
/// keeping the recording path infallible.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Fields::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Log severity, totally ordered from `Trace` up to `Fatal`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl FromStr for LogLevel {
    type Err = FaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(FaultError::new(format!("Unknown log level: {}", other))),
        }
    }
}

/// One rendered log record. Immutable once constructed.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub context: LogContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Fields>,
}

/// Structured logger with child-context support.
///
/// Cloning is cheap: clones share the sink and the process-wide context map,
/// so `set_global_context` on any handle is visible to all of them (children
/// included) unless a child overlay overrides the same key.
#[derive(Clone)]
pub struct StructuredLogger {
    level: LogLevel,
    production: bool,
    global: Arc<RwLock<LogContext>>,
    overlay: LogContext,
    sink: Arc<dyn LogSink>,
}

impl StructuredLogger {
    /// Logger writing to stdout, configured from `config`.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    /// Logger writing to the given sink. Tests pair this with
    /// [`crate::sink::MemorySink`] to capture output.
    pub fn with_sink(config: &TelemetryConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            level: config.log_level,
            production: config.environment.is_production(),
            global: Arc::new(RwLock::new(LogContext::new())),
            overlay: LogContext::new(),
            sink,
        }
    }

    /// Shallow-merge `context` into the shared global context.
    pub fn set_global_context(&self, context: LogContext) {
        match self.global.write() {
            Ok(mut global) => global.extend(context),
            Err(poisoned) => poisoned.into_inner().extend(context),
        }
    }

    /// Child logger whose overlay is this logger's overlay merged with
    /// `context` (later wins). Shares level, sink, and global context.
    pub fn child(&self, context: LogContext) -> Self {
        let mut overlay = self.overlay.clone();
        overlay.extend(context);
        Self {
            level: self.level,
            production: self.production,
            global: Arc::clone(&self.global),
            overlay,
            sink: Arc::clone(&self.sink),
        }
    }

    /// Clear the shared global context (test isolation).
    pub fn reset(&self) {
        match self.global.write() {
            Ok(mut global) => global.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn trace(&self, message: &str, metadata: Option<Fields>) {
        self.log(LogLevel::Trace, message, metadata);
    }

    pub fn debug(&self, message: &str, metadata: Option<Fields>) {
        self.log(LogLevel::Debug, message, metadata);
    }

    pub fn info(&self, message: &str, metadata: Option<Fields>) {
        self.log(LogLevel::Info, message, metadata);
    }

    pub fn warn(&self, message: &str, metadata: Option<Fields>) {
        self.log(LogLevel::Warn, message, metadata);
    }

    pub fn error(&self, message: &str, metadata: Option<Fields>) {
        self.log(LogLevel::Error, message, metadata);
    }

    /// Error entry carrying a source error's message in the `error` field.
    pub fn error_with(
        &self,
        message: &str,
        error: &dyn std::error::Error,
        metadata: Option<Fields>,
    ) {
        let mut entry = self.entry(LogLevel::Error, message, metadata);
        entry.error = Some(error.to_string());
        self.emit(entry);
    }

    /// Fatal entry. With no source error, the message itself is attached as
    /// the `error` field.
    pub fn fatal(&self, message: &str, metadata: Option<Fields>) {
        let mut entry = self.entry(LogLevel::Fatal, message, metadata);
        entry.error = Some(message.to_string());
        self.emit(entry);
    }

    pub fn fatal_with(
        &self,
        message: &str,
        error: &dyn std::error::Error,
        metadata: Option<Fields>,
    ) {
        let mut entry = self.entry(LogLevel::Fatal, message, metadata);
        entry.error = Some(error.to_string());
        self.emit(entry);
    }

    /// Start a timed operation. Invoking the returned closure emits one
    /// info entry `"<label> completed"` with the elapsed milliseconds.
    pub fn time(&self, label: &str) -> impl FnOnce() {
        let logger = self.clone();
        let label = label.to_string();
        let start = Instant::now();
        move || {
            let mut entry = logger.entry(LogLevel::Info, &format!("{} completed", label), None);
            entry.duration = Some(start.elapsed().as_millis() as u64);
            logger.emit(entry);
        }
    }

    /// Await `f()`, logging `"<label> completed"` on success or
    /// `"<label> failed"` at error level on failure. The original result is
    /// returned unmodified either way.
    pub async fn time_async<T, E, F, Fut>(&self, label: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start = Instant::now();
        match f().await {
            Ok(value) => {
                let mut entry = self.entry(LogLevel::Info, &format!("{} completed", label), None);
                entry.duration = Some(start.elapsed().as_millis() as u64);
                self.emit(entry);
                Ok(value)
            }
            Err(err) => {
                let mut entry = self.entry(LogLevel::Error, &format!("{} failed", label), None);
                entry.duration = Some(start.elapsed().as_millis() as u64);
                entry.error = Some(err.to_string());
                self.emit(entry);
                Err(err)
            }
        }
    }

    fn log(&self, level: LogLevel, message: &str, metadata: Option<Fields>) {
        let entry = self.entry(level, message, metadata);
        self.emit(entry);
    }

    fn entry(&self, level: LogLevel, message: &str, metadata: Option<Fields>) -> LogEntry {
        LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            message: message.to_string(),
            context: self.effective_context(),
            error: None,
            duration: None,
            metadata,
        }
    }

    /// Global context merged with this logger's overlay (overlay wins).
    fn effective_context(&self) -> LogContext {
        let mut context = match self.global.read() {
            Ok(global) => global.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        context.extend(self.overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        context
    }

    fn emit(&self, entry: LogEntry) {
        if entry.level < self.level {
            return;
        }
        let line = if self.production {
            render_json(&entry)
        } else {
            render_pretty(&entry)
        };
        self.sink.write_line(&line);
    }
}

fn render_json(entry: &LogEntry) -> String {
    serde_json::to_string(entry).unwrap_or_else(|_| {
        format!(
            r#"{{"timestamp":"{}","level":"{}","message":{:?}}}"#,
            entry.timestamp, entry.level, entry.message
        )
    })
}

fn render_pretty(entry: &LogEntry) -> String {
    let label = entry.level.to_string().to_uppercase();
    let label = match entry.level {
        LogLevel::Trace => label.as_str().dimmed(),
        LogLevel::Debug => label.as_str().cyan(),
        LogLevel::Info => label.as_str().green(),
        LogLevel::Warn => label.as_str().yellow(),
        LogLevel::Error => label.as_str().red(),
        LogLevel::Fatal => label.as_str().magenta(),
    };

    let mut line = format!("[{}] {}: {}", entry.timestamp, label, entry.message);
    if !entry.context.is_empty() {
        line.push_str(&format!(" {}", Value::Object(entry.context.clone())));
    }
    if let Some(metadata) = &entry.metadata {
        if !metadata.is_empty() {
            line.push_str(&format!(" {}", Value::Object(metadata.clone())));
        }
    }
    if let Some(error) = &entry.error {
        line.push_str(&format!(" error={}", error));
    }
    if let Some(duration) = entry.duration {
        line.push_str(&format!(" duration={}ms", duration));
    }
    line
}

static GLOBAL_LOGGER: LazyLock<StructuredLogger> =
    LazyLock::new(|| StructuredLogger::new(&TelemetryConfig::from_env()));

/// The process-wide logger, configured from the environment on first use.
pub fn logger() -> &'static StructuredLogger {
    &GLOBAL_LOGGER
}
