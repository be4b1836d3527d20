//! Real-implementation test doubles wired through a [`FailureInjector`].
//!
//! These are not mocks of the code under test: the file system actually
//! stores content and the HTTP client actually performs requests (unless a
//! mock response is registered for a URL). The injector sits in front so a
//! test can flip any operation into a failure mode and watch the system
//! under test cope.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::error::FaultError;
use crate::injection::{FailureInjector, FailureMode};
use crate::logger::{fields, logger};

/// In-memory file system with injectable failures.
#[derive(Default)]
pub struct TestFileSystem {
    injector: FailureInjector,
    files: DashMap<String, String>,
}

impl TestFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), FaultError> {
        self.injector
            .execute(|| async {
                self.files.insert(path.to_string(), content.to_string());
                Ok(())
            })
            .await
    }

    pub async fn read_file(&self, path: &str) -> Result<String, FaultError> {
        self.injector
            .execute(|| async {
                self.files
                    .get(path)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| FaultError::new(format!("File not found: {}", path)))
            })
            .await
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), FaultError> {
        self.injector
            .execute(|| async {
                self.files
                    .remove(path)
                    .map(|_| ())
                    .ok_or_else(|| FaultError::new(format!("File not found: {}", path)))
            })
            .await
    }

    pub async fn exists(&self, path: &str) -> Result<bool, FaultError> {
        self.injector
            .execute(|| async { Ok(self.files.contains_key(path)) })
            .await
    }

    /// Flip all file operations into the given failure mode.
    pub fn inject_failure(&self, mode: FailureMode) {
        self.injector.set_mode(mode);
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }

    /// Clear stored files and restore the injector to pass-through.
    pub fn reset(&self) {
        self.files.clear();
        self.injector.reset();
    }
}

/// HTTP client with injectable failures and per-URL mock responses.
///
/// A registered mock short-circuits the network entirely; otherwise the
/// request really goes out and non-2xx statuses surface as faults.
pub struct TestHttpClient {
    injector: FailureInjector,
    client: reqwest::Client,
    mock_responses: DashMap<String, Value>,
}

impl Default for TestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHttpClient {
    pub fn new() -> Self {
        Self {
            injector: FailureInjector::default(),
            client: reqwest::Client::new(),
            mock_responses: DashMap::new(),
        }
    }

    pub async fn get(&self, url: &str) -> Result<Value, FaultError> {
        self.injector
            .execute(|| async {
                if let Some(mock) = self.mock_responses.get(url) {
                    return Ok(mock.value().clone());
                }

                let response = self.client.get(url).send().await?;
                Self::into_json(response).await
            })
            .await
    }

    pub async fn post(&self, url: &str, body: &Value) -> Result<Value, FaultError> {
        self.injector
            .execute(|| async {
                if let Some(mock) = self.mock_responses.get(url) {
                    return Ok(mock.value().clone());
                }

                let response = self.client.post(url).json(body).send().await?;
                Self::into_json(response).await
            })
            .await
    }

    async fn into_json(response: reqwest::Response) -> Result<Value, FaultError> {
        let status = response.status();
        if !status.is_success() {
            return Err(FaultError::new(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown")
            )));
        }
        Ok(response.json().await?)
    }

    /// Serve this response for the URL instead of hitting the network.
    pub fn set_mock_response(&self, url: impl Into<String>, response: Value) {
        self.mock_responses.insert(url.into(), response);
    }

    /// Flip all requests into the given failure mode.
    pub fn inject_failure(&self, mode: FailureMode) {
        self.injector.set_mode(mode);
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }

    /// Drop mock responses and restore the injector to pass-through.
    pub fn reset(&self) {
        self.mock_responses.clear();
        self.injector.reset();
    }
}

struct CacheEntry {
    value: Value,
    /// Epoch milliseconds.
    expires_at: i64,
}

/// TTL cache with injectable failures. Expired entries are dropped lazily
/// on read.
#[derive(Default)]
pub struct TestCache {
    injector: FailureInjector,
    entries: DashMap<String, CacheEntry>,
}

impl TestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), FaultError> {
        self.injector
            .execute(|| async {
                self.entries.insert(
                    key.to_string(),
                    CacheEntry {
                        value,
                        expires_at: Utc::now().timestamp_millis() + ttl.as_millis() as i64,
                    },
                );
                Ok(())
            })
            .await
    }

    /// `None` for a missing or expired key.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, FaultError> {
        self.injector
            .execute(|| async {
                let expired = match self.entries.get(key) {
                    None => return Ok(None),
                    Some(entry) if Utc::now().timestamp_millis() > entry.expires_at => true,
                    Some(entry) => return Ok(Some(entry.value.clone())),
                };
                if expired {
                    self.entries.remove(key);
                }
                Ok(None)
            })
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), FaultError> {
        self.injector
            .execute(|| async {
                self.entries.remove(key);
                Ok(())
            })
            .await
    }

    pub async fn clear(&self) -> Result<(), FaultError> {
        self.injector
            .execute(|| async {
                self.entries.clear();
                Ok(())
            })
            .await
    }

    /// Flip all cache operations into the given failure mode.
    pub fn inject_failure(&self, mode: FailureMode) {
        self.injector.set_mode(mode);
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }

    pub fn reset(&self) {
        self.entries.clear();
        self.injector.reset();
    }
}

/// A queued job awaiting processing.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_type: String,
    pub data: Value,
    /// Enqueue time, epoch milliseconds.
    pub timestamp: i64,
}

type JobHandler = Box<dyn Fn(Value) -> BoxFuture<'static, Result<(), FaultError>> + Send + Sync>;

/// In-memory job queue with injectable failures.
///
/// Unlike the background-processing original, draining is explicit: call
/// [`process`](Self::process) to run queued jobs through their handlers.
/// Handler failures are logged and swallowed; the queue keeps draining.
#[derive(Default)]
pub struct TestQueue {
    injector: FailureInjector,
    jobs: Mutex<VecDeque<Job>>,
    handlers: DashMap<String, JobHandler>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, job_type: &str, data: Value) -> Result<(), FaultError> {
        self.injector
            .execute(|| async {
                self.lock_jobs().push_back(Job {
                    job_type: job_type.to_string(),
                    data,
                    timestamp: Utc::now().timestamp_millis(),
                });
                Ok(())
            })
            .await
    }

    /// Register the handler for one job type. Jobs with no handler are
    /// dropped silently when processed.
    pub fn on_job<F>(&self, job_type: &str, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, Result<(), FaultError>> + Send + Sync + 'static,
    {
        self.handlers.insert(job_type.to_string(), Box::new(handler));
    }

    /// Drain the queue, running each job's handler through the injector.
    /// Returns the number of jobs that completed successfully.
    pub async fn process(&self) -> usize {
        let mut succeeded = 0;

        while let Some(job) = self.pop_job() {
            // Build the handler future before awaiting so no map guard is
            // held across the await point.
            let fut = match self.handlers.get(&job.job_type) {
                Some(handler) => handler.value()(job.data.clone()),
                None => continue,
            };

            let result = self.injector.execute(move || fut).await;
            match result {
                Ok(()) => succeeded += 1,
                Err(err) => logger().error(
                    &format!("Job failed: {}", job.job_type),
                    Some(fields(json!({ "error": err.to_string() }))),
                ),
            }
        }

        succeeded
    }

    pub fn size(&self) -> usize {
        self.lock_jobs().len()
    }

    /// Flip enqueue/processing into the given failure mode.
    pub fn inject_failure(&self, mode: FailureMode) {
        self.injector.set_mode(mode);
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }

    pub fn reset(&self) {
        self.lock_jobs().clear();
        self.handlers.clear();
        self.injector.reset();
    }

    fn pop_job(&self) -> Option<Job> {
        self.lock_jobs().pop_front()
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, VecDeque<Job>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
