//! Higher-order instrumentation wrappers over the global collector and
//! tracer. These replace annotation-style method decoration with explicit
//! composition: wrap the operation where it is called.

use std::fmt;
use std::future::Future;

use crate::metrics::metrics;
use crate::tracer::tracer;

/// Count and time an operation on the global collector: bumps
/// `"{name}.calls"` and records `"{name}.duration"` tagged with the
/// outcome. The wrapped result is returned unmodified.
pub async fn with_metrics<T, E, F, Fut>(name: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    metrics().increment(&format!("{}.calls", name), 1.0, None);
    metrics().time(name, None, f).await
}

/// Run an operation inside a root span on the global tracer. The wrapped
/// result is returned unmodified; failures mark the span errored first.
pub async fn with_tracing<T, E, F, Fut>(operation_name: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    tracer()
        .trace(operation_name, None, None, |_context| f())
        .await
}
