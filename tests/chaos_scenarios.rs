// End-to-end chaos flows: named injectors, scripted scenarios, cascades,
// and failure wear-off as seen by a retrying caller.

use std::sync::Arc;
use std::time::Duration;

use faultline::{
    ApiFailureInjector, ChaosOrchestrator, ChaosScenario, DatabaseFailureInjector, FailureConfig,
    FailureInjector, FailureMode, FaultError,
};

/// A caller that retries until the operation stops failing, counting
/// attempts. Stands in for real retry logic under test.
async fn retry_until_ok(injector: &FailureInjector, max_attempts: u32) -> Result<u32, FaultError> {
    let mut last_err = FaultError::new("never ran");
    for attempt in 1..=max_attempts {
        match injector.execute(|| async { Ok(attempt) }).await {
            Ok(value) => return Ok(value),
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

#[tokio::test]
async fn test_wear_off_lets_retries_succeed() -> anyhow::Result<()> {
    let injector = FailureInjector::new(FailureConfig {
        mode: FailureMode::NetworkError,
        fail_after_count: Some(2),
        ..Default::default()
    });

    // First two attempts hit the injected fault, the third goes through.
    let value = retry_until_ok(&injector, 5).await?;
    assert_eq!(value, 3);
    assert_eq!(injector.mode(), FailureMode::None);

    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted_under_permanent_fault() {
    let injector = FailureInjector::default();
    injector.set_mode(FailureMode::NetworkError);

    let result = retry_until_ok(&injector, 3).await;
    assert_eq!(
        result.unwrap_err().message(),
        "Network error: Connection refused"
    );
    assert_eq!(injector.call_count(), 3);
}

#[tokio::test]
async fn test_scenario_with_preset_injectors() -> anyhow::Result<()> {
    let orchestrator = ChaosOrchestrator::new();
    let database = DatabaseFailureInjector::new();
    let api = ApiFailureInjector::new();
    orchestrator.register("database", database.handle());
    orchestrator.register("api", api.handle());

    let db_handle = database.handle();
    let api_handle = api.handle();
    let scenario = ChaosScenario::new(
        "dependency-outage",
        "database deadlocks while the api rate-limits",
        {
            let database = database.handle();
            let api = api.handle();
            move || {
                database.set_mode(FailureMode::NetworkError);
                api.set_mode(FailureMode::RateLimit);
            }
        },
        async move {
            let db_result: Result<String, _> =
                db_handle.execute(|| async { Ok("row".to_string()) }).await;
            assert!(db_result.is_err());

            let api_result: Result<String, _> =
                api_handle.execute(|| async { Ok("body".to_string()) }).await;
            assert!(api_result.is_err());

            Ok(())
        },
    );

    orchestrator.run_scenario(scenario).await?;

    // Every injector is back to pass-through after the scenario.
    assert_eq!(database.mode(), FailureMode::None);
    assert_eq!(api.mode(), FailureMode::None);
    Ok(())
}

#[tokio::test]
async fn test_failed_scenario_still_resets() {
    let orchestrator = ChaosOrchestrator::new();
    let cache = Arc::new(FailureInjector::default());
    orchestrator.register("cache", Arc::clone(&cache));

    let setup_cache = Arc::clone(&cache);
    let scenario = ChaosScenario::new(
        "cache-outage",
        "cache rejects reads and the test body gives up",
        move || setup_cache.set_mode(FailureMode::NetworkError),
        async { Err(FaultError::new("system did not recover")) },
    );

    let outcome = orchestrator.run_scenario(scenario).await;

    assert_eq!(outcome.unwrap_err().message(), "system did not recover");
    assert_eq!(cache.mode(), FailureMode::None);
}

#[tokio::test]
async fn test_cascade_failure_takes_down_components_in_order() {
    let orchestrator = ChaosOrchestrator::new();
    let frontend = Arc::new(FailureInjector::default());
    let backend = Arc::new(FailureInjector::default());
    let database = Arc::new(FailureInjector::default());
    orchestrator.register("frontend", Arc::clone(&frontend));
    orchestrator.register("backend", Arc::clone(&backend));
    orchestrator.register("database", Arc::clone(&database));

    orchestrator.cascade_failure(
        &["frontend", "backend", "database"],
        Duration::from_millis(20),
    );

    // First component flips almost immediately, the last one only later.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(frontend.mode(), FailureMode::NetworkError);
    assert_eq!(database.mode(), FailureMode::None);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(backend.mode(), FailureMode::NetworkError);
    assert_eq!(database.mode(), FailureMode::NetworkError);

    orchestrator.reset_all();
    assert_eq!(frontend.mode(), FailureMode::None);
    assert_eq!(backend.mode(), FailureMode::None);
    assert_eq!(database.mode(), FailureMode::None);
}

#[tokio::test]
async fn test_partial_batch_failure_as_seen_by_caller() -> anyhow::Result<()> {
    let injector = FailureInjector::default();
    injector.set_mode(FailureMode::PartialFailure);

    let results = injector
        .execute_batch(|| async { Ok(vec![10u32, 20, 30, 40]) })
        .await?;

    let (ok, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    assert_eq!(ok.len(), 2);
    assert_eq!(failed.len(), 2);

    Ok(())
}
