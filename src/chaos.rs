//! Chaos scenario orchestration.
//!
//! An orchestrator holds named injectors and runs scripted scenarios
//! against them: setup, an async test body, optional cleanup, and an
//! unconditional reset of every registered injector — even when the test
//! body fails.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::json;
use tokio::time::sleep;

use crate::error::FaultError;
use crate::injection::{FailureInjector, FailureMode};
use crate::logger::{fields, logger};

/// One scripted chaos scenario.
pub struct ChaosScenario {
    pub name: String,
    pub description: String,
    pub setup: Box<dyn FnOnce() + Send>,
    pub test: BoxFuture<'static, Result<(), FaultError>>,
    pub cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl ChaosScenario {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        setup: impl FnOnce() + Send + 'static,
        test: impl std::future::Future<Output = Result<(), FaultError>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            setup: Box::new(setup),
            test: Box::pin(test),
            cleanup: None,
        }
    }

    pub fn with_cleanup(mut self, cleanup: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

/// Registry of named injectors plus the scenario runner.
#[derive(Default)]
pub struct ChaosOrchestrator {
    injectors: DashMap<String, Arc<FailureInjector>>,
}

impl ChaosOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an injector under a component name. A later registration
    /// under the same name replaces the earlier one.
    pub fn register(&self, name: impl Into<String>, injector: Arc<FailureInjector>) {
        self.injectors.insert(name.into(), injector);
    }

    /// Shared handle to a registered injector.
    pub fn injector(&self, name: &str) -> Option<Arc<FailureInjector>> {
        self.injectors.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Run a scenario: setup, test, cleanup, then reset every registered
    /// injector regardless of the test outcome. Returns the test's result.
    pub async fn run_scenario(&self, scenario: ChaosScenario) -> Result<(), FaultError> {
        logger().info(
            &format!("Running chaos scenario: {}", scenario.name),
            Some(fields(json!({ "description": scenario.description }))),
        );

        (scenario.setup)();
        let result = scenario.test.await;

        if let Some(cleanup) = scenario.cleanup {
            cleanup();
        }
        self.reset_all();

        result
    }

    /// Reset every registered injector to `{mode: None}`.
    pub fn reset_all(&self) {
        for entry in self.injectors.iter() {
            entry.value().reset();
        }
    }

    /// Flip the named components to `NetworkError` one after another,
    /// staggered by `delay_between`, to simulate a cascading failure.
    /// Unregistered names are skipped.
    pub fn cascade_failure(&self, components: &[&str], delay_between: Duration) {
        for (index, name) in components.iter().enumerate() {
            let Some(injector) = self.injector(name) else {
                continue;
            };
            let delay = delay_between * index as u32;
            tokio::spawn(async move {
                sleep(delay).await;
                injector.set_mode(FailureMode::NetworkError);
            });
        }
    }
}
