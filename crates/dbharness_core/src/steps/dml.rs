//! Record manipulation steps over arbitrary tables.

use super::{affected, assignments, condition, execute, first, query, returned, settle, split_list};
use crate::assertions::{assert_column_set, assert_field, assert_fields, assert_monotonic, assert_row_count, assert_set_equal};
use crate::context::ScenarioContext;
use crate::error::{HarnessError, Result};
use crate::registry::{StepArgs, StepRegistry, StepTraits};
use crate::schema::DdlOperation;
use crate::types::{ColumnDef, Constraint, Outcome, Row, TableConstraint, TableDef, Value};

/// Tables created by "test tables exist for DML operations", parents first.
pub const DML_TABLES: [&str; 3] = ["test_users", "test_products", "test_orders"];

pub(super) fn register(registry: &mut StepRegistry) -> Result<()> {
    // Given
    registry.step_with(
        "test tables exist for DML operations",
        StepTraits::ddl(DdlOperation::CreateTable),
        handler!(dml_tables),
    )?;
    registry.step_with(
        "an empty table \"{table}\" exists",
        StepTraits::ddl(DdlOperation::Truncate),
        handler!(empty_table),
    )?;

    // When
    registry.step(
        "I insert a record into \"{table}\" with values",
        handler!(insert_record),
    )?;
    registry.step(
        "I insert the following records into \"{table}\"",
        handler!(insert_records),
    )?;
    registry.step(
        "I insert a user named \"{name}\" with email \"{email}\" and age {age:d}",
        handler!(insert_test_user),
    )?;
    registry.step(
        "I update the record with id {id:d} in \"{table}\" with values",
        handler!(update_by_id),
    )?;
    registry.step(
        "I update the records in \"{table}\" where \"{column}\" is \"{value}\" with values",
        handler!(update_where),
    )?;
    registry.step(
        "I delete the record with id {id:d} from \"{table}\"",
        handler!(delete_by_id),
    )?;
    registry.step(
        "I delete the records from \"{table}\" where \"{column}\" is \"{value}\"",
        handler!(delete_where),
    )?;
    registry.step("I select all records from \"{table}\"", handler!(select_all))?;
    registry.step(
        "I select the columns \"{columns}\" from \"{table}\"",
        handler!(select_columns),
    )?;
    registry.step(
        "I select the records from \"{table}\" where \"{column}\" is \"{value}\"",
        handler!(select_where),
    )?;
    registry.step(
        "I select the records from \"{table}\" ordered by \"{column}\" {direction}",
        handler!(select_ordered),
    )?;

    // Then
    registry.step("the record should be inserted successfully", handler!(one_inserted))?;
    registry.step("{count:d} records should be inserted", handler!(n_inserted))?;
    registry.step("the record should be updated successfully", handler!(one_affected))?;
    registry.step("the record should be deleted successfully", handler!(one_affected))?;
    registry.step("{count:d} record should be affected", handler!(n_affected))?;
    registry.step("{count:d} records should be affected", handler!(n_affected))?;
    registry.step(
        "the table \"{table}\" should have {count:d} record",
        handler!(table_count_is),
    )?;
    registry.step(
        "the table \"{table}\" should have {count:d} records",
        handler!(table_count_is),
    )?;
    registry.step("the query should return {count:d} record", handler!(result_count_is))?;
    registry.step("the query should return {count:d} records", handler!(result_count_is))?;
    registry.step(
        "the result should contain only the columns \"{columns}\"",
        handler!(only_columns),
    )?;
    registry.step(
        "the result should contain all columns of \"{table}\"",
        handler!(all_columns),
    )?;
    registry.step(
        "the record with id {id:d} in \"{table}\" should have values",
        handler!(record_has_values),
    )?;
    registry.step(
        "the \"{column}\" of the record with id {id:d} in \"{table}\" should be \"{value}\"",
        handler!(record_field_is),
    )?;
    registry.step(
        "the results should be ordered by \"{column}\" {direction}",
        handler!(results_ordered),
    )?;
    registry.step("the results should match", handler!(results_match))?;
    registry.step(
        "the last id in \"{table}\" should be {id:d}",
        handler!(last_id_is),
    )?;
    Ok(())
}

fn dml_table_defs() -> Vec<TableDef> {
    let id = || ColumnDef::new("id", "INTEGER").with(Constraint::PrimaryKey { autoincrement: true });
    vec![
        TableDef::new("test_users")
            .column(id())
            .column(ColumnDef::new("name", "VARCHAR(100)").with(Constraint::NotNull))
            .column(ColumnDef::new("email", "VARCHAR(100)").with(Constraint::Unique))
            .column(ColumnDef::new("age", "INTEGER"))
            .column(ColumnDef::new("salary", "DOUBLE PRECISION"))
            .column(ColumnDef::new("is_active", "BOOLEAN").with(Constraint::Default("TRUE".into())))
            .if_not_exists(),
        TableDef::new("test_products")
            .column(id())
            .column(ColumnDef::new("name", "VARCHAR(100)").with(Constraint::NotNull))
            .column(ColumnDef::new("price", "DOUBLE PRECISION"))
            .column(ColumnDef::new("category", "VARCHAR(50)"))
            .column(ColumnDef::new("stock", "INTEGER").with(Constraint::Default("0".into())))
            .if_not_exists(),
        TableDef::new("test_orders")
            .column(id())
            .column(ColumnDef::new("user_id", "INTEGER"))
            .column(ColumnDef::new("product_id", "INTEGER"))
            .column(ColumnDef::new("quantity", "INTEGER").with(Constraint::NotNull))
            .column(ColumnDef::new("order_date", "VARCHAR(40)"))
            .constraint(TableConstraint::ForeignKey {
                columns: vec!["user_id".into()],
                ref_table: "test_users".into(),
                ref_columns: vec!["id".into()],
            })
            .constraint(TableConstraint::ForeignKey {
                columns: vec!["product_id".into()],
                ref_table: "test_products".into(),
                ref_columns: vec!["id".into()],
            })
            .if_not_exists(),
    ]
}

async fn truncate_with_dependents(ctx: &mut ScenarioContext, tables: Vec<String>) -> Result<()> {
    let mut ordered: Vec<String> = Vec::new();
    for table in &tables {
        for child in ctx.schema.dependents(&mut ctx.session, table).await? {
            if !ordered.contains(&child) && !tables.contains(&child) {
                ordered.push(child);
            }
        }
    }
    ordered.extend(tables.into_iter().rev());
    let atomic = ctx.session.open_atomic().await?;
    let result = ctx.schema.truncate_many(&mut ctx.session, &ordered).await;
    settle(&mut ctx.session, atomic, &result).await?;
    result
}

fn direction(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "descending" | "desc" => Ok(true),
        "ascending" | "asc" => Ok(false),
        other => Err(HarnessError::Config(format!(
            "ordering must be ascending or descending, got {}",
            other
        ))),
    }
}

// ===== Given =====

async fn dml_tables(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    for def in dml_table_defs() {
        let atomic = ctx.session.open_atomic().await?;
        let result = ctx.schema.create_table(&mut ctx.session, &def).await;
        settle(&mut ctx.session, atomic, &result).await?;
        result?;
    }
    truncate_with_dependents(ctx, DML_TABLES.iter().map(|t| t.to_string()).collect()).await
}

async fn empty_table(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    truncate_with_dependents(ctx, vec![args.text("table")?]).await
}

// ===== When =====

async fn insert_rows(ctx: &mut ScenarioContext, table: &str, rows: &[Row]) {
    let result = ctx.seeder.insert(&mut ctx.session, table, rows).await;
    ctx.record(result.map(Outcome::Affected));
}

async fn insert_record(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let row = args.table()?.pairs();
    insert_rows(ctx, &args.text("table")?, &[row]).await;
    Ok(())
}

async fn insert_records(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = args.table()?.records();
    insert_rows(ctx, &args.text("table")?, &rows).await;
    Ok(())
}

async fn insert_test_user(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let row = Row::new()
        .with("name", args.text("name")?)
        .with("email", args.text("email")?)
        .with("age", args.int("age")?);
    insert_rows(ctx, "test_users", &[row]).await;
    Ok(())
}

async fn update(ctx: &mut ScenarioContext, table: &str, column: &str, value: &Value, values: &Row) -> Result<()> {
    let dialect = ctx.dialect();
    let mut params = Vec::new();
    let set = assignments(dialect, values, &mut params);
    let filter = condition(dialect, column, value, &mut params);
    let sql = format!("UPDATE {} SET {} WHERE {}", dialect.quote(table), set, filter);
    let result = execute(ctx, table, &sql, &params).await;
    ctx.record(result.map(Outcome::Affected));
    Ok(())
}

async fn update_by_id(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let values = args.table()?.pairs();
    update(ctx, &args.text("table")?, "id", &Value::Int(args.int("id")?), &values).await
}

async fn update_where(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let values = args.table()?.pairs();
    let value = Value::parse_literal(&args.text("value")?);
    update(ctx, &args.text("table")?, &args.text("column")?, &value, &values).await
}

async fn delete(ctx: &mut ScenarioContext, table: &str, column: &str, value: &Value) -> Result<()> {
    let dialect = ctx.dialect();
    let mut params = Vec::new();
    let filter = condition(dialect, column, value, &mut params);
    let sql = format!("DELETE FROM {} WHERE {}", dialect.quote(table), filter);
    let result = execute(ctx, table, &sql, &params).await;
    ctx.record(result.map(Outcome::Affected));
    Ok(())
}

async fn delete_by_id(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    delete(ctx, &args.text("table")?, "id", &Value::Int(args.int("id")?)).await
}

async fn delete_where(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let value = Value::parse_literal(&args.text("value")?);
    delete(ctx, &args.text("table")?, &args.text("column")?, &value).await
}

async fn select(ctx: &mut ScenarioContext, table: &str, sql: &str, params: &[Value]) -> Result<()> {
    let result = query(ctx, table, sql, params).await;
    if let Ok(rows) = &result {
        ctx.remember_rows("result", rows.clone());
    }
    ctx.record(result.map(Outcome::Rows));
    Ok(())
}

async fn select_all(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let sql = format!("SELECT * FROM {} ORDER BY 1", ctx.dialect().quote(&table));
    select(ctx, &table, &sql, &[]).await
}

async fn select_columns(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let dialect = ctx.dialect();
    let columns = split_list(&args.text("columns")?)
        .iter()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {} FROM {}", columns, dialect.quote(&table));
    select(ctx, &table, &sql, &[]).await
}

async fn select_where(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let dialect = ctx.dialect();
    let mut params = Vec::new();
    let filter = condition(
        dialect,
        &args.text("column")?,
        &Value::parse_literal(&args.text("value")?),
        &mut params,
    );
    let sql = format!("SELECT * FROM {} WHERE {} ORDER BY 1", dialect.quote(&table), filter);
    select(ctx, &table, &sql, &params).await
}

async fn select_ordered(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let descending = direction(&args.text("direction")?)?;
    let dialect = ctx.dialect();
    let sql = format!(
        "SELECT * FROM {} ORDER BY {} {}",
        dialect.quote(&table),
        dialect.quote(&args.text("column")?),
        if descending { "DESC" } else { "ASC" }
    );
    select(ctx, &table, &sql, &[]).await
}

// ===== Then =====

async fn one_inserted(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    assert_row_count("insert", 1, affected(&ctx.expect_success()?)?)
}

async fn n_inserted(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    assert_row_count("insert", args.count("count")? as u64, affected(&ctx.expect_success()?)?)
}

async fn one_affected(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    assert_row_count("statement", 1, affected(&ctx.expect_success()?)?)
}

async fn n_affected(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    assert_row_count("statement", args.count("count")? as u64, affected(&ctx.expect_success()?)?)
}

async fn table_count_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let count = ctx.seeder.count(&mut ctx.session, &table).await?;
    assert_row_count(&table, args.count("count")? as u64, count as u64)
}

async fn result_count_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    assert_row_count("query", args.count("count")? as u64, rows.len() as u64)
}

async fn only_columns(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    let expected = split_list(&args.text("columns")?);
    let expected: Vec<&str> = expected.iter().map(String::as_str).collect();
    assert_column_set(&rows, &expected)
}

async fn all_columns(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    let desc = ctx.schema.describe(&mut ctx.session, &args.text("table")?).await?;
    assert_column_set(&rows, &desc.column_names())
}

async fn record_by_id(ctx: &mut ScenarioContext, table: &str, id: i64) -> Result<Row> {
    let dialect = ctx.dialect();
    let sql = format!(
        "SELECT * FROM {} WHERE {} = {}",
        dialect.quote(table),
        dialect.quote("id"),
        dialect.placeholder(1)
    );
    let rows = query(ctx, table, &sql, &[Value::Int(id)]).await?;
    first(&rows, &format!("{} with id {}", table, id)).cloned()
}

async fn record_has_values(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let expected = args.table()?.pairs();
    let row = record_by_id(ctx, &args.text("table")?, args.int("id")?).await?;
    assert_fields(&row, &expected)
}

async fn record_field_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let row = record_by_id(ctx, &args.text("table")?, args.int("id")?).await?;
    assert_field(
        &row,
        &args.text("column")?,
        &Value::parse_literal(&args.text("value")?),
    )
}

async fn results_ordered(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    assert_monotonic(&rows, &args.text("column")?, direction(&args.text("direction")?)?)
}

async fn results_match(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    assert_set_equal(&args.table()?.records(), &rows)
}

async fn last_id_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let sql = format!("SELECT MAX(id) FROM {}", ctx.dialect().quote(&table));
    let rows = query(ctx, &table, &sql, &[]).await?;
    assert_field(
        first(&rows, &table)?,
        rows.columns.first().map(String::as_str).unwrap_or("max"),
        &Value::Int(args.int("id")?),
    )
}

#[cfg(test)]
mod tests {
    use crate::context::tests::{context, finish};
    use crate::registry::StepRegistry;
    use crate::scenario::{DataTable, Scenario};
    use crate::transaction::TeardownStrategy;
    use crate::ErrorKind;
    use tempfile::TempDir;

    async fn run(scenario: &Scenario) -> Vec<crate::Result<()>> {
        let tmp = TempDir::new().unwrap();
        let registry = StepRegistry::standard().unwrap();
        let mut ctx = context(&tmp, TeardownStrategy::Rollback).await;
        let mut results = Vec::new();
        for step in scenario.steps() {
            let resolved = registry.resolve(step).unwrap();
            ctx.set_step(&step.text);
            results.push(resolved.run(&mut ctx).await);
        }
        assert!(ctx.uninspected_failures().is_empty());
        finish(ctx).await;
        results
    }

    #[tokio::test]
    async fn test_insert_into_empty_table() {
        let scenario = Scenario::new("insert")
            .given("test tables exist for DML operations")
            .and("an empty table \"test_users\" exists")
            .when("I insert a user named \"John Doe\" with email \"john@example.com\" and age 30")
            .then("the record should be inserted successfully")
            .and("the table \"test_users\" should have 1 record")
            .and("the \"email\" of the record with id 1 in \"test_users\" should be \"john@example.com\"")
            .and("the last id in \"test_users\" should be 1");
        for result in run(&scenario).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_update_delete_and_select() {
        let scenario = Scenario::new("crud")
            .given("test tables exist for DML operations")
            .when_table(
                "I insert the following records into \"test_users\"",
                DataTable::new(["name", "email", "age", "salary"])
                    .row(["Ann", "ann@example.com", "41", "5200.5"])
                    .row(["Ben", "ben@example.com", "29", "4100"])
                    .row(["Cy", "cy@example.com", "35", "NULL"]),
            )
            .then("3 records should be inserted")
            .when_table(
                "I update the record with id 2 in \"test_users\" with values",
                DataTable::new(["column", "value"]).row(["age", "30"]),
            )
            .then("the record should be updated successfully")
            .when("I delete the record with id 3 from \"test_users\"")
            .then("1 record should be affected")
            .when("I select the records from \"test_users\" ordered by \"age\" descending")
            .then("the query should return 2 records")
            .and("the results should be ordered by \"age\" descending")
            .and_table(
                "the results should match",
                DataTable::new(["name", "age"]).row(["Ben", "30"]).row(["Ann", "41"]),
            )
            .when("I select the columns \"name, email\" from \"test_users\"")
            .then("the result should contain only the columns \"email,name\"");
        for result in run(&scenario).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_constraint_violation_leaves_count_unchanged() {
        let scenario = Scenario::new("violations")
            .given("test tables exist for DML operations")
            .when_table(
                "I insert the following records into \"test_users\"",
                DataTable::new(["name", "email"])
                    .row(["Ann", "same@example.com"])
                    .row(["Ben", "same@example.com"]),
            )
            .then("the operation should fail with \"UniqueConstraintViolation\"")
            .and("the table \"test_users\" should have 0 records")
            .when_table(
                "I insert a record into \"test_orders\" with values",
                DataTable::new(["column", "value"])
                    .row(["user_id", "999"])
                    .row(["product_id", "999"])
                    .row(["quantity", "1"]),
            )
            .then("the operation should fail with \"ReferentialIntegrityError\"");
        for result in run(&scenario).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unexpected_failure_fails_expectation() {
        let scenario = Scenario::new("not null")
            .given("test tables exist for DML operations")
            .when_table(
                "I insert a record into \"test_users\" with values",
                DataTable::new(["column", "value"]).row(["email", "x@example.com"]),
            )
            .then("the record should be inserted successfully");
        let results = run(&scenario).await;
        let err = results.last().unwrap().clone().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssertionFailed);
        assert!(err.to_string().contains("NotNullViolation"));
    }
}
