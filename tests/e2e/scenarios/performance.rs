use crate::harness::Suite;
use dbharness_core::{Feature, Scenario, TeardownStrategy};

#[tokio::test]
async fn test_bulk_insert_creates_exact_count() {
    let feature = Feature::new("Bulk").scenario(
        Scenario::new("bulk")
            .given("performance monitoring is enabled")
            .when("I create 250 users in bulk")
            .then("all 250 users should be created")
            .and("the operation should complete within 20 seconds"),
    );

    Suite::new("bulk_insert")
        .feature(feature)
        .expect_all_passed()
        .expect_metric("bulk", "bulk insert users")
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_batched_inserts_beat_single_inserts() {
    let feature = Feature::new("Batching").scenario(
        Scenario::new("batching")
            .when("inserting 300 users in batches should be faster than inserting them one by one"),
    );

    Suite::new("batched_inserts")
        .feature(feature)
        .expect_all_passed()
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_mixed_concurrency_without_contention() {
    let feature = Feature::new("Concurrency").scenario(
        Scenario::new("mixed")
            .when("50 concurrent read operations and 10 concurrent write operations are performed")
            .then("all concurrent operations should succeed")
            .and("no deadlocks should occur")
            .and("no pool exhaustion should occur")
            .and("the total time should be less than 30 seconds"),
    );

    Suite::new("mixed_concurrency")
        .feature(feature)
        .expect_all_passed()
        .expect_strategy("mixed", TeardownStrategy::Restore)
        .expect_no_contention("mixed")
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_threshold_breach_fails_the_scenario() {
    let feature = Feature::new("Budget").scenario(
        Scenario::new("over budget")
            .when("I create the configured number of users in bulk")
            .then("the operation should complete within the configured threshold"),
    );

    Suite::new("threshold_breach")
        .feature(feature)
        .configure(|c| {
            c.performance
                .thresholds
                .insert("bulk insert users".to_string(), 0.000_001);
        })
        .expect_failed_with("over budget", dbharness_core::ErrorKind::PerformanceThresholdExceeded)
        .run()
        .await
        .unwrap();
}
