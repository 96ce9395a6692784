use crate::harness::{Suite, TestDatabase};
use dbharness_core::{
    Dialect, ErrorKind, Feature, HarnessError, Result, Scenario, ScenarioContext, ScenarioStatus,
    StepArgs, StepRegistry,
};
use futures::future::BoxFuture;
use std::time::Duration;

fn pause<'a>(_ctx: &'a mut ScenarioContext, args: StepArgs) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(args.int("ms")? as u64)).await;
        Ok(())
    })
}

#[tokio::test]
async fn test_unbound_step_fails_before_any_scenario_runs() {
    let feature = Feature::new("Typos")
        .scenario(Scenario::new("fine").then("the user count should be 3"))
        .scenario(Scenario::new("typo").then("the usr count should be 3"));

    let err = Suite::new("unbound_step")
        .feature(feature)
        .run()
        .await
        .unwrap_err();
    let cause = err
        .downcast_ref::<HarnessError>()
        .expect("harness error in the chain");
    assert_eq!(cause.kind(), ErrorKind::NoBinding);
    assert!(cause.to_string().contains("the usr count should be 3"));
}

#[tokio::test]
async fn test_unchecked_failure_fails_the_scenario() {
    let feature = Feature::new("Unchecked").scenario(
        Scenario::new("ignored duplicate")
            .when("I try to create a user with duplicate username \"jane_smith\"")
            .then("the user count should be 3"),
    );

    Suite::new("unchecked_failure")
        .feature(feature)
        .expect_failed_with("ignored duplicate", ErrorKind::AssertionFailed)
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_failing_step_skips_the_rest() {
    let feature = Feature::new("Failing").scenario(
        Scenario::new("wrong count")
            .then("the user count should be 7")
            .and("the user count should be 3"),
    );

    let report = Suite::new("failing_step")
        .feature(feature)
        .expect_status("wrong count", ScenarioStatus::Failed)
        .expect_step_skipped("wrong count", 1)
        .run()
        .await
        .unwrap();
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_timed_out_scenario_is_torn_down() {
    let mut registry = StepRegistry::standard().unwrap();
    registry.step("I wait for {ms:d} milliseconds", pause).unwrap();

    let feature = Feature::new("Slow")
        .scenario(
            Scenario::new("sleeper")
                .when("I create a new user with username \"sleepy\" and email \"sleepy@example.com\"")
                .then("the user should be created successfully")
                .when("I wait for 3000 milliseconds"),
        )
        .scenario(Scenario::new("next").then("the user count should be 3"));

    Suite::new("timeout")
        .feature(feature)
        .registry(registry)
        .timeout(Duration::from_millis(300))
        .expect_status("sleeper", ScenarioStatus::TimedOut)
        .expect_failed_with("sleeper", ErrorKind::Timeout)
        .expect_passed("next")
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_fatal() {
    let mut db = TestDatabase::new().unwrap();
    db.configure(|c| {
        c.database.driver = Dialect::Postgresql;
        c.database.host = "127.0.0.1".into();
        c.database.port = 1;
        c.database.acquire_timeout_s = 2.0;
    });
    let err = db.connect(StepRegistry::standard().unwrap()).await.unwrap_err();
    let cause = err
        .downcast_ref::<HarnessError>()
        .expect("harness error in the chain");
    assert!(cause.is_fatal(), "{}", cause);
}
