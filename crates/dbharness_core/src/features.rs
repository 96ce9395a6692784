//! Built-in feature catalogue.
//!
//! Every step here binds to the standard library from
//! [`StepRegistry::standard`](crate::StepRegistry::standard).

use crate::scenario::{DataTable, Feature, Scenario};

/// All built-in features, in run order.
pub fn catalogue() -> Vec<Feature> {
    vec![
        connection(),
        user_management(),
        products_and_orders(),
        schema_changes(),
        record_manipulation(),
        transactions(),
        performance(),
        concurrency(),
    ]
}

fn initialized() -> Scenario {
    Scenario::new("Background")
        .given("the database is initialized")
        .and("test data is loaded")
}

fn columns() -> DataTable {
    DataTable::new(["name", "type", "constraints"])
}

pub fn connection() -> Feature {
    Feature::new("Database connection")
        .describe("The harness can reach the configured database")
        .tag("@connection")
        .tag("@smoke")
        .scenario(
            Scenario::new("Establish a connection")
                .given("the database connection is not yet verified")
                .when("I attempt to connect to the database")
                .then("the connection should be established successfully")
                .and("the database should be accessible"),
        )
}

pub fn user_management() -> Feature {
    Feature::new("User management")
        .describe("Creating, reading, updating and deleting users")
        .tag("@users")
        .background(initialized())
        .scenario(
            Scenario::new("Create a new user")
                .tag("@smoke")
                .when("I create a new user with username \"alice\" and email \"alice@example.com\"")
                .then("the user should be created successfully")
                .and("the user count should be 4"),
        )
        .scenario(
            Scenario::new("Reject a duplicate username")
                .given("a user exists with username \"john_doe\"")
                .when("I try to create a user with duplicate username \"john_doe\"")
                .then("the operation should fail with a constraint violation")
                .and("the error message should contain \"unique\"")
                .and("the user count should be 3"),
        )
        .scenario(
            Scenario::new("Retrieve a user by username")
                .when("I retrieve the user by username \"jane_smith\"")
                .then("the user should be found")
                .and("the user's email should be \"jane@example.com\""),
        )
        .scenario(
            Scenario::new("Update a user's email")
                .given("a user exists with username \"bob_wilson\"")
                .when("I update the user's email to \"bob.wilson@example.com\"")
                .then("the user's email should be updated")
                .and("the user's email should be \"bob.wilson@example.com\""),
        )
        .scenario(
            Scenario::new("Delete a user without orders")
                .given("a user exists with username \"temporary_user\"")
                .when("I delete the user")
                .then("the user should be deleted")
                .and("the user count should be 3"),
        )
}

pub fn products_and_orders() -> Feature {
    Feature::new("Products and orders")
        .describe("Inventory lookups and order placement")
        .tag("@orders")
        .background(initialized())
        .scenario(
            Scenario::new("Check the inventory")
                .given("products exist in the inventory")
                .when("I check the inventory for \"Laptop\"")
                .then("the product should be in stock")
                .and("the stock count should be 10"),
        )
        .scenario(
            Scenario::new("Place an order")
                .given("a user exists with username \"john_doe\"")
                .and("a product exists with name \"Mouse\"")
                .when("I place an order for 2 units of \"Mouse\"")
                .then("the order should be created successfully")
                .and("the order total should be 51.98"),
        )
        .scenario(
            Scenario::new("Review the order history")
                .given("orders exist for user \"jane_smith\"")
                .when("I retrieve the order history")
                .then("the order history should contain 1 order")
                .and("the order details should include the product name")
                .and("the orders should be sorted by date with the newest first"),
        )
        .scenario(
            Scenario::new("Deleting a user with orders is rejected")
                .given("orders exist for user \"john_doe\"")
                .when("I delete the user")
                .then("the operation should be \"failed\"")
                .and("the user count should be 3"),
        )
}

pub fn schema_changes() -> Feature {
    Feature::new("Schema changes")
        .describe("Creating, altering and dropping tables, indexes and views")
        .tag("@ddl")
        .background(Scenario::new("Background").given("the database is initialized"))
        .scenario(
            Scenario::new("Create a table with constraints")
                .tag("@smoke")
                .given("no table named \"test_employees\" exists")
                .when_table(
                    "I create a table \"test_employees\" with the following columns",
                    columns()
                        .row(["id", "INTEGER", "PRIMARY KEY"])
                        .row(["name", "VARCHAR(100)", "NOT NULL"])
                        .row(["email", "VARCHAR(100)", "UNIQUE NOT NULL"]),
                )
                .then("the table \"test_employees\" should be created successfully")
                .and("the table \"test_employees\" should have 3 columns")
                .and("the table \"test_employees\" should have a primary key on \"id\"")
                .and("the table \"test_employees\" should have a unique constraint on \"email\"")
                .and("the column \"name\" of table \"test_employees\" should not allow NULL"),
        )
        .scenario(
            Scenario::new("Create a table with a foreign key")
                .given("no table named \"test_departments\" exists")
                .when_table(
                    "I create a table \"test_departments\" with the following columns",
                    columns()
                        .row(["id", "INTEGER", "PRIMARY KEY"])
                        .row(["manager_id", "INTEGER", "REFERENCES users(id)"]),
                )
                .then("the table \"test_departments\" should be created successfully")
                .and("the foreign key on \"manager_id\" of table \"test_departments\" should reference \"users\""),
        )
        .scenario(
            Scenario::new("Create single, unique and composite indexes")
                .given_table(
                    "a table \"test_catalog\" exists with columns",
                    columns()
                        .row(["id", "INTEGER", "PRIMARY KEY"])
                        .row(["sku", "VARCHAR(40)", ""])
                        .row(["category", "VARCHAR(40)", ""])
                        .row(["price", "DOUBLE PRECISION", ""]),
                )
                .when("I create an index \"idx_catalog_category\" on table \"test_catalog\" column \"category\"")
                .then("the index \"idx_catalog_category\" should be created successfully")
                .when("I create a unique index \"idx_catalog_sku\" on table \"test_catalog\" column \"sku\"")
                .then("the index \"idx_catalog_sku\" should be created successfully")
                .and("the table \"test_catalog\" should have a unique constraint on \"sku\"")
                .when("I create a composite index \"idx_catalog_cat_price\" on table \"test_catalog\" columns \"category, price\"")
                .then("the index \"idx_catalog_cat_price\" should cover the columns \"category, price\"")
                .when("I drop the index \"idx_catalog_category\"")
                .then("the schema operation should succeed")
                .and("the index \"idx_catalog_category\" should not exist"),
        )
        .scenario(
            Scenario::new("Alter a table")
                .given_table(
                    "a table \"test_inventory\" exists with columns",
                    columns()
                        .row(["id", "INTEGER", "PRIMARY KEY"])
                        .row(["label", "VARCHAR(50)", ""])
                        .row(["obsolete", "INTEGER", ""]),
                )
                .when("I add a column \"quantity\" of type \"INTEGER\" to table \"test_inventory\"")
                .then("the table \"test_inventory\" should have a column \"quantity\"")
                .when("I rename the column \"label\" to \"title\" in table \"test_inventory\"")
                .then("the table \"test_inventory\" should have a column \"title\"")
                .when("I drop the column \"obsolete\" from table \"test_inventory\"")
                .then("the table \"test_inventory\" should have 3 columns")
                .when("I add a unique constraint on \"title\" to table \"test_inventory\"")
                .then("the table \"test_inventory\" should have a unique constraint on \"title\"")
                .when("I rename table \"test_inventory\" to \"test_stock\"")
                .then("the table \"test_stock\" should exist")
                .and("the table \"test_inventory\" should not exist"),
        )
        .scenario(
            Scenario::new("Dropping a referenced table")
                .given_table(
                    "a table \"test_parents\" exists with columns",
                    columns().row(["id", "INTEGER", "PRIMARY KEY"]),
                )
                .and_table(
                    "a table \"test_children\" exists with columns",
                    columns()
                        .row(["id", "INTEGER", "PRIMARY KEY"])
                        .row(["parent_id", "INTEGER", "REFERENCES test_parents(id)"]),
                )
                .when("I drop table \"test_parents\"")
                .then("the drop should be blocked by dependent tables")
                .and("the table \"test_parents\" should exist")
                .when("I drop table \"test_parents\" with cascade")
                .then("the schema operation should succeed")
                .and("the table \"test_parents\" should not exist"),
        )
        .scenario(
            Scenario::new("Truncate restarts identifiers")
                .given_table(
                    "a table \"test_audit\" exists with columns",
                    columns()
                        .row(["id", "INTEGER", "PRIMARY KEY AUTOINCREMENT"])
                        .row(["event", "VARCHAR(100)", "NOT NULL"]),
                )
                .and_table(
                    "I insert the following records into \"test_audit\"",
                    DataTable::new(["event"]).row(["login"]).row(["logout"]),
                )
                .and("2 records should be inserted")
                .when("I truncate table \"test_audit\"")
                .then("the table \"test_audit\" should be empty")
                .and("the table structure of \"test_audit\" should remain intact")
                .when_table(
                    "I insert a record into \"test_audit\" with values",
                    DataTable::new(["column", "value"]).row(["event", "login"]),
                )
                .then("the record should be inserted successfully")
                .and("the last id in \"test_audit\" should be 1"),
        )
        .scenario(
            Scenario::new("Create and drop a view")
                .when("I create a view \"active_users\" as \"SELECT id, username FROM users WHERE is_active = 1\"")
                .then("the schema operation should succeed")
                .and("the view \"active_users\" should exist")
                .when("I drop the view \"active_users\"")
                .then("the schema operation should succeed"),
        )
}

pub fn record_manipulation() -> Feature {
    Feature::new("Record manipulation")
        .describe("Inserting, updating, deleting and selecting records")
        .tag("@dml")
        .background(
            Scenario::new("Background")
                .given("the database is initialized")
                .and("test tables exist for DML operations"),
        )
        .scenario(
            Scenario::new("Insert a single record")
                .tag("@smoke")
                .given("an empty table \"test_users\" exists")
                .when("I insert a user named \"John Doe\" with email \"john@example.com\" and age 30")
                .then("the record should be inserted successfully")
                .and("the table \"test_users\" should have 1 record")
                .and("the \"email\" of the record with id 1 in \"test_users\" should be \"john@example.com\""),
        )
        .scenario(
            Scenario::new("Insert several records")
                .when_table(
                    "I insert the following records into \"test_users\"",
                    DataTable::new(["name", "email", "age", "salary"])
                        .row(["Ann Lee", "ann@example.com", "41", "5200.50"])
                        .row(["Ben Ray", "ben@example.com", "29", "4100"])
                        .row(["Cy Hart", "cy@example.com", "35", "NULL"]),
                )
                .then("3 records should be inserted")
                .and("the table \"test_users\" should have 3 records"),
        )
        .scenario(
            Scenario::new("Update a record")
                .given_table(
                    "I insert a record into \"test_users\" with values",
                    DataTable::new(["column", "value"])
                        .row(["name", "Dana Fox"])
                        .row(["email", "dana@example.com"])
                        .row(["age", "33"]),
                )
                .when_table(
                    "I update the record with id 1 in \"test_users\" with values",
                    DataTable::new(["column", "value"]).row(["age", "34"]).row(["salary", "6100.25"]),
                )
                .then("the record should be updated successfully")
                .and_table(
                    "the record with id 1 in \"test_users\" should have values",
                    DataTable::new(["column", "value"])
                        .row(["name", "Dana Fox"])
                        .row(["age", "34"])
                        .row(["salary", "6100.25"]),
                ),
        )
        .scenario(
            Scenario::new("Delete records by condition")
                .given_table(
                    "I insert the following records into \"test_products\"",
                    DataTable::new(["name", "price", "category"])
                        .row(["Pen", "1.50", "Office"])
                        .row(["Desk", "120", "Office"])
                        .row(["Tea", "4.20", "Food"]),
                )
                .when("I delete the records from \"test_products\" where \"category\" is \"Office\"")
                .then("2 records should be affected")
                .and("the table \"test_products\" should have 1 record"),
        )
        .scenario(
            Scenario::new("Select with projection, filter and ordering")
                .given_table(
                    "I insert the following records into \"test_products\"",
                    DataTable::new(["name", "price", "category", "stock"])
                        .row(["Pen", "1.50", "Office", "100"])
                        .row(["Desk", "120", "Office", "4"])
                        .row(["Tea", "4.20", "Food", "40"]),
                )
                .when("I select all records from \"test_products\"")
                .then("the query should return 3 records")
                .and("the result should contain all columns of \"test_products\"")
                .when("I select the columns \"name, price\" from \"test_products\"")
                .then("the result should contain only the columns \"name, price\"")
                .when("I select the records from \"test_products\" where \"category\" is \"Office\"")
                .then("the query should return 2 records")
                .when("I select the records from \"test_products\" ordered by \"price\" descending")
                .then("the results should be ordered by \"price\" descending")
                .and_table(
                    "the results should match",
                    DataTable::new(["name", "stock"])
                        .row(["Desk", "4"])
                        .row(["Tea", "40"])
                        .row(["Pen", "100"]),
                ),
        )
        .scenario(
            Scenario::new("Constraint violations leave the table unchanged")
                .when_table(
                    "I insert the following records into \"test_users\"",
                    DataTable::new(["name", "email"])
                        .row(["Eve", "same@example.com"])
                        .row(["Fay", "same@example.com"]),
                )
                .then("the operation should fail with \"UniqueConstraintViolation\"")
                .and("the table \"test_users\" should have 0 records")
                .when_table(
                    "I insert a record into \"test_users\" with values",
                    DataTable::new(["column", "value"]).row(["email", "nameless@example.com"]),
                )
                .then("the operation should fail with \"NotNullViolation\"")
                .when_table(
                    "I insert a record into \"test_orders\" with values",
                    DataTable::new(["column", "value"])
                        .row(["user_id", "999"])
                        .row(["product_id", "999"])
                        .row(["quantity", "1"]),
                )
                .then("the operation should fail with \"ReferentialIntegrityError\"")
                .and("the table \"test_orders\" should have 0 records"),
        )
}

pub fn transactions() -> Feature {
    Feature::new("Transactions")
        .describe("Savepoints, rollback and commit inside a scenario")
        .tag("@transactions")
        .background(initialized())
        .scenario(
            Scenario::new("Rollback undoes an update")
                .given("a user exists with username \"john_doe\"")
                .when("I start a transaction")
                .and("I update the user's email to \"changed@example.com\"")
                .then("the user's email should be updated")
                .when("I rollback the transaction")
                .then("the email of \"john_doe\" should remain \"john@example.com\"")
                .and("the transaction state should be \"active\""),
        )
        .scenario(
            Scenario::new("Commit keeps an update")
                .given("a user exists with username \"jane_smith\"")
                .when("I start a transaction")
                .and("I update the user's email to \"jane.smith@example.com\"")
                .then("the user's email should be updated")
                .when("I commit the transaction")
                .then("the email of \"jane_smith\" should remain \"jane.smith@example.com\""),
        )
        .scenario(
            Scenario::new("Nested savepoints")
                .when("I start a transaction")
                .and("I create a savepoint")
                .then("the savepoint depth should be 2")
                .when("I create a new user with username \"nested\" and email \"nested@example.com\"")
                .then("the user should be created successfully")
                .when("I rollback to the savepoint")
                .then("the savepoint depth should be 1")
                .and("the user count should be 3")
                .when("I release the savepoint")
                .then("the savepoint depth should be 0"),
        )
        .scenario(
            Scenario::new("Operations inside a transaction")
                .when("I start a transaction")
                .and("I perform a \"count\" on table \"users\"")
                .then("the operation should be \"successful\"")
                .when("I perform a \"describe\" on table \"no_such_table\"")
                .then("the operation should be \"failed\"")
                .and("the operation should fail with \"NotFound\"")
                .when("I rollback the transaction")
                .then("the transaction state should be \"active\""),
        )
}

pub fn performance() -> Feature {
    Feature::new("Performance")
        .describe("Bulk loads and queries stay within their time budgets")
        .tag("@performance")
        .background(
            Scenario::new("Background")
                .given("the database is initialized")
                .and("test data is loaded")
                .and("performance monitoring is enabled"),
        )
        .scenario(
            Scenario::new("Bulk user creation")
                .when("I create 1000 users in bulk")
                .then("all 1000 users should be created")
                .and("the operation should complete within the configured threshold"),
        )
        .scenario(
            Scenario::new("Search by email domain")
                .given("there are 200 users in the database")
                .when("I search for users with email domain \"example.com\"")
                .then("the query should return valid results")
                .and("the query should return 200 records")
                .and("the query should complete within 2.0 seconds"),
        )
        .scenario(
            Scenario::new("User order statistics")
                .when("I run a complex query for user order statistics")
                .then("the query should return valid results")
                .and("the results should include user information with order counts")
                .and("the operation should complete within the configured threshold"),
        )
        .scenario(
            Scenario::new("Batched inserts beat single inserts")
                .tag("@slow")
                .then("inserting 500 users in batches should be faster than inserting them one by one"),
        )
}

pub fn concurrency() -> Feature {
    Feature::new("Concurrency")
        .describe("Parallel sessions share the pool without conflicts")
        .tag("@performance")
        .tag("@concurrency")
        .background(initialized())
        .scenario(
            Scenario::new("Mixed reads and writes")
                .when("50 concurrent read operations and 10 concurrent write operations are performed")
                .then("all concurrent operations should succeed")
                .and("no deadlocks should occur")
                .and("no pool exhaustion should occur")
                .and("the total time should be less than 30.0 seconds"),
        )
        .scenario(
            Scenario::new("Configured read load")
                .when("I perform the configured number of concurrent read operations")
                .then("all concurrent operations should succeed")
                .and("no pool exhaustion should occur"),
        )
}
