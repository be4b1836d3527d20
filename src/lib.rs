//! faultline: observability and failure injection for tokio services.
//!
//! Four cooperating components, independent of each other except where
//! noted, each also available as a lazily-constructed process-wide
//! instance with a `reset()` escape hatch for tests:
//!
//! - [`logger::StructuredLogger`] — leveled logging with hierarchical
//!   context merging and child loggers.
//! - [`metrics::MetricsCollector`] — counter/gauge/histogram aggregation
//!   with percentile computation and windowed flush.
//! - [`tracer::Tracer`] — span trees with trace correlation; writes
//!   side-channel debug output through the logger.
//! - [`injection::FailureInjector`] (plus presets, the
//!   [`chaos::ChaosOrchestrator`], and the [`harness`] doubles) — fault
//!   injection for exercising real error-handling paths.
//!
//! Prefer constructing instances and passing them explicitly; the global
//! accessors ([`logger()`], [`metrics()`], [`tracer()`]) exist for code
//! that wants a process-wide default wired from the environment.

pub mod chaos;
pub mod config;
pub mod error;
pub mod harness;
pub mod injection;
pub mod instrument;
pub mod logger;
pub mod metrics;
pub mod sink;
pub mod tracer;

use std::time::Duration;

pub use chaos::{ChaosOrchestrator, ChaosScenario};
pub use crate::config::{Environment, TelemetryConfig};
pub use error::FaultError;
pub use harness::{Job, TestCache, TestFileSystem, TestHttpClient, TestQueue};
pub use injection::{
    ApiFailureInjector, DatabaseFailureInjector, FailureConfig, FailureInjector, FailureMode,
};
pub use instrument::{with_metrics, with_tracing};
pub use logger::{fields, logger, LogLevel, StructuredLogger};
pub use metrics::{metrics, HistogramSummary, MetricsCollector};
pub use sink::{LogSink, MemorySink, StdoutSink};
pub use tracer::{tracer, Span, SpanStatus, TraceContext, Tracer};

/// Start background telemetry work.
///
/// In production this spawns the periodic metrics flush on the global
/// collector; in development it does nothing. Must be called from within a
/// tokio runtime.
pub fn init() {
    let config = TelemetryConfig::from_env();
    if config.environment.is_production() {
        let period = Duration::from_secs(config.flush_interval_secs);
        tokio::spawn(async move {
            metrics().run_flush_task(period).await;
        });
    }
}
