//! Behavioral properties of the step library, each as a small feature.

use crate::harness::Suite;
use dbharness_core::{DataTable, Feature, Scenario};

fn columns() -> DataTable {
    DataTable::new(["name", "type", "constraints"])
}

fn dml_background() -> Scenario {
    Scenario::new("Background")
        .given("the database is initialized")
        .and("test tables exist for DML operations")
}

#[tokio::test]
async fn test_employees_table_structure() {
    let feature = Feature::new("Structure").scenario(
        Scenario::new("employees")
            .given("no table named \"test_employees\" exists")
            .when_table(
                "I create a table \"test_employees\" with the following columns",
                columns()
                    .row(["id", "INTEGER", "PRIMARY KEY"])
                    .row(["name", "VARCHAR(100)", "NOT NULL"])
                    .row(["email", "VARCHAR(100)", "UNIQUE NOT NULL"]),
            )
            .then("the table \"test_employees\" should have 3 columns")
            .and("the table \"test_employees\" should have a primary key on \"id\"")
            .and("the table \"test_employees\" should have a unique constraint on \"email\""),
    );

    Suite::new("employees_table_structure")
        .feature(feature)
        .expect_all_passed()
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_insert_into_empty_table() {
    let feature = Feature::new("Insert").background(dml_background()).scenario(
        Scenario::new("john doe")
            .given("an empty table \"test_users\" exists")
            .when("I insert a user named \"John Doe\" with email \"john@example.com\" and age 30")
            .then("the record should be inserted successfully")
            .and("the table \"test_users\" should have 1 record")
            .and("the \"email\" of the record with id 1 in \"test_users\" should be \"john@example.com\""),
    );

    Suite::new("insert_into_empty_table")
        .feature(feature)
        .expect_all_passed()
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_empty_table_reports_its_columns() {
    let feature = Feature::new("Empty selects").background(dml_background()).scenario(
        Scenario::new("no rows")
            .given("an empty table \"test_users\" exists")
            .when("I select all records from \"test_users\"")
            .then("the query should return 0 records")
            .and("the result should contain all columns of \"test_users\"")
            .when("I select the columns \"name, email\" from \"test_users\"")
            .then("the result should contain only the columns \"name, email\""),
    );

    Suite::new("empty_table_columns")
        .feature(feature)
        .expect_all_passed()
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_truncate_restarts_identifiers() {
    let feature = Feature::new("Truncate").background(dml_background()).scenario(
        Scenario::new("restart")
            .when_table(
                "I insert the following records into \"test_products\"",
                DataTable::new(["name", "price"])
                    .row(["Pen", "1.50"])
                    .row(["Ink", "4.00"]),
            )
            .then("2 records should be inserted")
            .when("I truncate table \"test_products\"")
            .then("the table \"test_products\" should be empty")
            .when_table(
                "I insert a record into \"test_products\" with values",
                DataTable::new(["column", "value"]).row(["name", "Pad"]),
            )
            .then("the table \"test_products\" should have 1 record")
            .and("the last id in \"test_products\" should be 1"),
    );

    Suite::new("truncate_restarts_identifiers")
        .feature(feature)
        .expect_all_passed()
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_constraint_violations_leave_counts_unchanged() {
    let feature = Feature::new("Constraints")
        .scenario(
            Scenario::new("duplicate username")
                .when("I try to create a user with duplicate username \"john_doe\"")
                .then("the operation should fail with \"UniqueConstraintViolation\"")
                .and("the user count should be 3"),
        )
        .scenario(
            Scenario::new("missing name")
                .given("the database is initialized")
                .and("test tables exist for DML operations")
                .when_table(
                    "I insert a record into \"test_users\" with values",
                    DataTable::new(["column", "value"]).row(["email", "nameless@example.com"]),
                )
                .then("the operation should fail with \"NotNullViolation\"")
                .and("the table \"test_users\" should have 0 records"),
        );

    Suite::new("constraint_violations")
        .feature(feature)
        .expect_all_passed()
        .expect_rows("users", 3)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rollback_and_commit_semantics() {
    let feature = Feature::new("Transactions")
        .scenario(
            Scenario::new("rollback")
                .given("a user exists with username \"john_doe\"")
                .when("I start a transaction")
                .and("I update the user's email to \"rolled@example.com\"")
                .and("I rollback the transaction")
                .then("the email of \"john_doe\" should remain \"john@example.com\""),
        )
        .scenario(
            Scenario::new("commit")
                .given("a user exists with username \"john_doe\"")
                .when("I start a transaction")
                .and("I update the user's email to \"committed@example.com\"")
                .and("I commit the transaction")
                .then("the email of \"john_doe\" should remain \"committed@example.com\""),
        )
        .scenario(
            Scenario::new("after commit")
                .tag("@restore")
                .given("a user exists with username \"john_doe\"")
                .then("the email of \"john_doe\" should remain \"john@example.com\""),
        );

    Suite::new("rollback_and_commit")
        .feature(feature)
        .expect_all_passed()
        .run()
        .await
        .unwrap();
}
