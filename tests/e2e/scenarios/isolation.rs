use crate::harness::Suite;
use dbharness_core::{DataTable, Feature, Scenario, TeardownStrategy};

fn columns() -> DataTable {
    DataTable::new(["name", "type", "constraints"])
}

#[tokio::test]
async fn test_later_scenario_sees_baseline() {
    let feature = Feature::new("Isolation")
        .scenario(
            Scenario::new("writer")
                .when("I create a new user with username \"leaky\" and email \"leaky@example.com\"")
                .then("the user should be created successfully")
                .and("the user count should be 4"),
        )
        .scenario(Scenario::new("reader").then("the user count should be 3"));

    Suite::new("later_scenario_sees_baseline")
        .feature(feature)
        .expect_all_passed()
        .expect_strategy("writer", TeardownStrategy::Rollback)
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_committed_work_is_restored() {
    let feature = Feature::new("Commit")
        .scenario(
            Scenario::new("committer")
                .when("I start a transaction")
                .and("I create a new user with username \"kept\" and email \"kept@example.com\"")
                .and("I commit the transaction")
                .then("the user count should be 4"),
        )
        .scenario(Scenario::new("reader").then("the user count should be 3"));

    Suite::new("committed_work_is_restored")
        .feature(feature)
        .expect_all_passed()
        .expect_strategy("committer", TeardownStrategy::Restore)
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_created_tables_do_not_survive() {
    let feature = Feature::new("Scratch tables").scenario(
        Scenario::new("creator")
            .when_table(
                "I create a table \"test_scratch\" with the following columns",
                columns()
                    .row(["id", "INTEGER", "PRIMARY KEY"])
                    .row(["note", "TEXT", ""]),
            )
            .then("the table \"test_scratch\" should be created successfully")
            .and("the table \"test_scratch\" should exist"),
    );

    Suite::new("created_tables_do_not_survive")
        .feature(feature)
        .expect_all_passed()
        .expect_table_absent("test_scratch")
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_dropped_baseline_table_comes_back() {
    let feature = Feature::new("Drops").scenario(
        Scenario::new("dropper")
            .tag("@restore")
            .when("I drop table \"orders\" with cascade")
            .then("the schema operation should succeed")
            .and("the table \"orders\" should not exist"),
    );

    Suite::new("dropped_baseline_table_comes_back")
        .feature(feature)
        .expect_all_passed()
        .expect_strategy("dropper", TeardownStrategy::Restore)
        .expect_rows("orders", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_parallel_readers_share_the_baseline() {
    let mut feature = Feature::new("Readers");
    for user in ["john_doe", "jane_smith", "bob_wilson"] {
        feature = feature.scenario(
            Scenario::new(&format!("read {}", user))
                .when(&format!("I retrieve the user by username \"{}\"", user))
                .then("the user should be found")
                .and("the user count should be 3"),
        );
    }
    feature = feature.scenario(
        Scenario::new("read inventory")
            .when("I check the inventory for \"Laptop\"")
            .then("the product should be in stock"),
    );

    Suite::new("parallel_readers_share_the_baseline")
        .feature(feature)
        .workers(3)
        .expect_total(4)
        .expect_all_passed()
        .run()
        .await
        .unwrap();
}
