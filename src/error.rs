use thiserror::Error;

/// The crate's only error type: a human-readable message, nothing else.
///
/// Injected faults, harness failures, and config-loading problems all
/// surface as a `FaultError`. Callers are expected to handle one exactly
/// as they would a genuine fault from the wrapped operation, so there is
/// deliberately no variant taxonomy to branch on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FaultError {
    message: String,
}

impl FaultError {
    /// Create a fault carrying the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The fault's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for FaultError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(format!("HTTP request failed: {}", err))
    }
}

impl From<std::io::Error> for FaultError {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("I/O error: {}", err))
    }
}
