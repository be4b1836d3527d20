//! Configurable fault injection for async operations.
//!
//! A [`FailureInjector`] wraps an operation with one of eight fault modes so
//! tests can exercise real retry and error-handling paths without mocking
//! the component under test. Injectors are shareable (`Arc`) and internally
//! synchronized; no lock is held across an await point.

use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::error::FaultError;

const DEFAULT_TIMEOUT_MS: u64 = 100;
const DEFAULT_SLOW_RESPONSE_MS: u64 = 5_000;
const DEFAULT_INTERMITTENT_PROBABILITY: f64 = 0.5;

/// Fault mode applied by [`FailureInjector::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Pass through to the wrapped operation unchanged.
    #[default]
    None,
    /// Never run the operation; reject after the configured delay.
    Timeout,
    /// Reject immediately with a connection-style error.
    NetworkError,
    /// Reject immediately with a rate-limit error.
    RateLimit,
    /// Resolve with an empty/default value without running the operation.
    InvalidResponse,
    /// Reject with the configured probability, otherwise run the operation.
    Intermittent,
    /// Delay, then run the operation.
    SlowResponse,
    /// Run the operation; batch results get every other element replaced
    /// with an error (scalar results pass through unchanged).
    PartialFailure,
}

/// Injector configuration. Optional fields fall back to per-mode defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureConfig {
    #[serde(default)]
    pub mode: FailureMode,
    /// Rejection probability for `Intermittent` (default 0.5).
    pub probability: Option<f64>,
    /// Delay for `Timeout` (default 100) and `SlowResponse` (default 5000).
    pub delay_ms: Option<u64>,
    pub error_message: Option<String>,
    /// Injection wears off: once the call counter exceeds this, the mode is
    /// forced to `None` for all subsequent calls.
    pub fail_after_count: Option<u32>,
}

impl FailureConfig {
    fn message_or(&self, default: &str) -> FaultError {
        FaultError::new(self.error_message.as_deref().unwrap_or(default))
    }
}

/// Fault-injection wrapper around async operations.
pub struct FailureInjector {
    config: Mutex<FailureConfig>,
    call_count: AtomicU32,
}

impl Default for FailureInjector {
    fn default() -> Self {
        Self::new(FailureConfig::default())
    }
}

impl FailureInjector {
    pub fn new(config: FailureConfig) -> Self {
        Self {
            config: Mutex::new(config),
            call_count: AtomicU32::new(0),
        }
    }

    /// Change the failure mode and reset the call counter. Other config
    /// fields (message, delay, probability) are left untouched so the
    /// preset helpers can layer on top.
    pub fn set_mode(&self, mode: FailureMode) {
        self.with_config(|config| config.mode = mode);
        self.call_count.store(0, Ordering::SeqCst);
    }

    /// Replace the whole configuration.
    pub fn configure(&self, config: FailureConfig) {
        let mut guard = self.lock_config();
        *guard = config;
    }

    /// Back to `{mode: None}` with a zeroed call counter.
    pub fn reset(&self) {
        self.configure(FailureConfig::default());
        self.call_count.store(0, Ordering::SeqCst);
    }

    /// Current mode (after any wear-off).
    pub fn mode(&self) -> FailureMode {
        self.lock_config().mode
    }

    /// Number of `execute`/`execute_batch` calls since the last counter
    /// reset.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Run `op` under the configured fault mode.
    ///
    /// The `Default` bound supplies the garbage value for
    /// [`FailureMode::InvalidResponse`], which resolves without ever
    /// invoking `op`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, FaultError>
    where
        T: Default,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FaultError>>,
    {
        let config = self.arm();

        match config.mode {
            FailureMode::None => op().await,
            FailureMode::Timeout => {
                sleep(Duration::from_millis(
                    config.delay_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                ))
                .await;
                Err(config.message_or("Request timeout"))
            }
            FailureMode::NetworkError => {
                Err(config.message_or("Network error: Connection refused"))
            }
            FailureMode::RateLimit => Err(config.message_or("Rate limit exceeded")),
            FailureMode::InvalidResponse => Ok(T::default()),
            FailureMode::Intermittent => {
                if roll(config.probability) {
                    Err(config.message_or("Intermittent failure"))
                } else {
                    op().await
                }
            }
            FailureMode::SlowResponse => {
                sleep(Duration::from_millis(
                    config.delay_ms.unwrap_or(DEFAULT_SLOW_RESPONSE_MS),
                ))
                .await;
                op().await
            }
            FailureMode::PartialFailure => op().await,
        }
    }

    /// Batch variant of [`execute`](Self::execute): under
    /// [`FailureMode::PartialFailure`], every odd-indexed element of the
    /// result is replaced with an error while even-indexed elements pass
    /// through untouched. All other modes behave as in `execute`, with the
    /// whole batch succeeding or failing together.
    pub async fn execute_batch<T, F, Fut>(
        &self,
        op: F,
    ) -> Result<Vec<Result<T, FaultError>>, FaultError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, FaultError>>,
    {
        let config = self.arm();

        match config.mode {
            FailureMode::None => Ok(all_ok(op().await?)),
            FailureMode::Timeout => {
                sleep(Duration::from_millis(
                    config.delay_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                ))
                .await;
                Err(config.message_or("Request timeout"))
            }
            FailureMode::NetworkError => {
                Err(config.message_or("Network error: Connection refused"))
            }
            FailureMode::RateLimit => Err(config.message_or("Rate limit exceeded")),
            FailureMode::InvalidResponse => Ok(Vec::new()),
            FailureMode::Intermittent => {
                if roll(config.probability) {
                    Err(config.message_or("Intermittent failure"))
                } else {
                    Ok(all_ok(op().await?))
                }
            }
            FailureMode::SlowResponse => {
                sleep(Duration::from_millis(
                    config.delay_ms.unwrap_or(DEFAULT_SLOW_RESPONSE_MS),
                ))
                .await;
                Ok(all_ok(op().await?))
            }
            FailureMode::PartialFailure => {
                let items = op().await?;
                Ok(items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        if index % 2 == 0 {
                            Ok(item)
                        } else {
                            Err(FaultError::new("Partial failure"))
                        }
                    })
                    .collect())
            }
        }
    }

    /// Bump the call counter, apply wear-off, and snapshot the config.
    fn arm(&self) -> FailureConfig {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut config = self.lock_config();
        if let Some(limit) = config.fail_after_count {
            if count > limit {
                config.mode = FailureMode::None;
            }
        }
        config.clone()
    }

    fn with_config(&self, f: impl FnOnce(&mut FailureConfig)) {
        f(&mut self.lock_config());
    }

    fn lock_config(&self) -> std::sync::MutexGuard<'_, FailureConfig> {
        self.config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn roll(probability: Option<f64>) -> bool {
    rand::thread_rng().gen::<f64>() < probability.unwrap_or(DEFAULT_INTERMITTENT_PROBABILITY)
}

fn all_ok<T>(items: Vec<T>) -> Vec<Result<T, FaultError>> {
    items.into_iter().map(Ok).collect()
}

/// Named presets for common database failure scenarios. Pure configuration
/// sugar over [`FailureInjector`].
pub struct DatabaseFailureInjector {
    inner: Arc<FailureInjector>,
}

impl Default for DatabaseFailureInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseFailureInjector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FailureInjector::default()),
        }
    }

    /// Shared handle, e.g. for registering with a
    /// [`crate::chaos::ChaosOrchestrator`].
    pub fn handle(&self) -> Arc<FailureInjector> {
        Arc::clone(&self.inner)
    }

    /// Connection acquisition hangs and times out.
    pub fn simulate_pool_exhaustion(&self) {
        self.inner.set_mode(FailureMode::Timeout);
        self.inner.with_config(|config| {
            config.error_message = Some("Connection pool exhausted".to_string());
            config.delay_ms = Some(30_000);
        });
    }

    pub fn simulate_deadlock(&self) {
        self.inner.set_mode(FailureMode::NetworkError);
        self.inner.with_config(|config| {
            config.error_message = Some("Deadlock detected".to_string());
        });
    }

    pub fn simulate_replication_lag(&self, delay: Duration) {
        self.inner.set_mode(FailureMode::SlowResponse);
        self.inner.with_config(|config| {
            config.delay_ms = Some(delay.as_millis() as u64);
        });
    }

    pub fn simulate_transaction_rollback(&self) {
        self.inner.set_mode(FailureMode::NetworkError);
        self.inner.with_config(|config| {
            config.error_message = Some("Transaction rolled back".to_string());
        });
    }
}

impl Deref for DatabaseFailureInjector {
    type Target = FailureInjector;

    fn deref(&self) -> &FailureInjector {
        &self.inner
    }
}

/// Named presets for common upstream API failure scenarios.
pub struct ApiFailureInjector {
    inner: Arc<FailureInjector>,
}

impl Default for ApiFailureInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiFailureInjector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FailureInjector::default()),
        }
    }

    pub fn handle(&self) -> Arc<FailureInjector> {
        Arc::clone(&self.inner)
    }

    pub fn simulate_429(&self) {
        self.inner.set_mode(FailureMode::RateLimit);
        self.inner.with_config(|config| {
            config.error_message = Some("429 Too Many Requests".to_string());
        });
    }

    pub fn simulate_503(&self) {
        self.inner.set_mode(FailureMode::NetworkError);
        self.inner.with_config(|config| {
            config.error_message = Some("503 Service Unavailable".to_string());
        });
    }

    pub fn simulate_flaky_api(&self, failure_rate: f64) {
        self.inner.set_mode(FailureMode::Intermittent);
        self.inner.with_config(|config| {
            config.probability = Some(failure_rate);
            config.error_message = Some("API request failed".to_string());
        });
    }

    pub fn simulate_slow_api(&self, delay: Duration) {
        self.inner.set_mode(FailureMode::SlowResponse);
        self.inner.with_config(|config| {
            config.delay_ms = Some(delay.as_millis() as u64);
        });
    }
}

impl Deref for ApiFailureInjector {
    type Target = FailureInjector;

    fn deref(&self) -> &FailureInjector {
        &self.inner
    }
}
