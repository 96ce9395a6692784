//! Schema definition steps.

use super::{settle, split_list};
use crate::assertions::{assert_error, assert_row_count, assert_structure, StructureExpectation};
use crate::context::ScenarioContext;
use crate::error::{ErrorKind, HarnessError, Result};
use crate::registry::{StepArgs, StepRegistry, StepTraits};
use crate::scenario::DataTable;
use crate::schema::DdlOperation;
use crate::types::{AlterChange, ColumnDef, IndexDescriptor, Outcome, TableConstraint, TableDef, Value};

pub(super) fn register(registry: &mut StepRegistry) -> Result<()> {
    use DdlOperation::*;

    // Given
    registry.step_with(
        "no table named \"{table}\" exists",
        StepTraits::ddl(DropTable),
        handler!(no_table),
    )?;
    registry.step_with(
        "a table \"{table}\" exists with columns",
        StepTraits::ddl(CreateTable),
        handler!(table_exists_with),
    )?;

    // When
    registry.step_with(
        "I create a table \"{table}\" with the following columns",
        StepTraits::ddl(CreateTable),
        handler!(create_table),
    )?;
    registry.step_with(
        "I create an index \"{index}\" on table \"{table}\" column \"{column}\"",
        StepTraits::ddl(CreateIndex),
        handler!(create_index),
    )?;
    registry.step_with(
        "I create a unique index \"{index}\" on table \"{table}\" column \"{column}\"",
        StepTraits::ddl(CreateIndex),
        handler!(create_unique_index),
    )?;
    registry.step_with(
        "I create a composite index \"{index}\" on table \"{table}\" columns \"{columns}\"",
        StepTraits::ddl(CreateIndex),
        handler!(create_composite_index),
    )?;
    registry.step_with(
        "I drop the index \"{index}\"",
        StepTraits::ddl(DropIndex),
        handler!(drop_index),
    )?;
    registry.step_with(
        "I drop table \"{table}\"",
        StepTraits::ddl(DropTable),
        handler!(drop_table),
    )?;
    registry.step_with(
        "I drop table \"{table}\" with cascade",
        StepTraits::ddl(DropTable),
        handler!(drop_table_cascade),
    )?;
    registry.step_with(
        "I truncate table \"{table}\"",
        StepTraits::ddl(Truncate),
        handler!(truncate_table),
    )?;
    registry.step_with(
        "I add a column \"{column}\" of type \"{data_type}\" to table \"{table}\"",
        StepTraits::ddl(AlterTable),
        handler!(add_column),
    )?;
    registry.step_with(
        "I drop the column \"{column}\" from table \"{table}\"",
        StepTraits::ddl(AlterTable),
        handler!(drop_column),
    )?;
    registry.step_with(
        "I rename the column \"{from}\" to \"{to}\" in table \"{table}\"",
        StepTraits::ddl(AlterTable),
        handler!(rename_column),
    )?;
    registry.step_with(
        "I rename table \"{from}\" to \"{to}\"",
        StepTraits::ddl(AlterTable),
        handler!(rename_table),
    )?;
    registry.step_with(
        "I add a unique constraint on \"{columns}\" to table \"{table}\"",
        StepTraits::ddl(AlterTable),
        handler!(add_unique),
    )?;
    registry.step_with(
        "I create a view \"{view}\" as \"{query}\"",
        StepTraits::ddl(CreateView),
        handler!(create_view),
    )?;
    registry.step_with(
        "I drop the view \"{view}\"",
        StepTraits::ddl(DropView),
        handler!(drop_view),
    )?;

    // Then
    registry.step(
        "the table \"{table}\" should be created successfully",
        handler!(table_created),
    )?;
    registry.step("the table \"{table}\" should exist", handler!(table_should_exist))?;
    registry.step("the table \"{table}\" should not exist", handler!(table_should_not_exist))?;
    registry.step(
        "the table \"{table}\" should have {count:d} columns",
        handler!(column_count_is),
    )?;
    registry.step(
        "the table \"{table}\" should have a column \"{column}\"",
        handler!(has_column),
    )?;
    registry.step(
        "the table \"{table}\" should have a primary key on \"{column}\"",
        handler!(primary_key_on),
    )?;
    registry.step(
        "the table \"{table}\" should have a unique constraint on \"{column}\"",
        handler!(unique_on),
    )?;
    registry.step(
        "the column \"{column}\" of table \"{table}\" should not allow NULL",
        handler!(not_null_on),
    )?;
    registry.step(
        "the foreign key on \"{column}\" of table \"{table}\" should reference \"{ref_table}\"",
        handler!(foreign_key_on),
    )?;
    registry.step(
        "the index \"{index}\" should be created successfully",
        handler!(index_created),
    )?;
    registry.step(
        "the index \"{index}\" should cover the columns \"{columns}\"",
        handler!(index_covers),
    )?;
    registry.step("the index \"{index}\" should not exist", handler!(index_absent))?;
    registry.step("the table \"{table}\" should be empty", handler!(table_empty))?;
    registry.step(
        "the table structure of \"{table}\" should remain intact",
        handler!(structure_intact),
    )?;
    registry.step(
        "the drop should be blocked by dependent tables",
        handler!(drop_blocked),
    )?;
    registry.step("the view \"{view}\" should exist", handler!(view_should_exist))?;
    registry.step(
        "the schema operation should succeed",
        handler!(schema_operation_succeeded),
    )?;
    Ok(())
}

fn table_def(name: &str, table: &DataTable) -> Result<TableDef> {
    let mut def = TableDef::new(name);
    for i in 0..table.len() {
        let column = table
            .cell(i, "name")
            .or_else(|| table.cell(i, "column"))
            .ok_or_else(|| HarnessError::Config("column table needs a name column".into()))?;
        let data_type = table
            .cell(i, "type")
            .ok_or_else(|| HarnessError::Config("column table needs a type column".into()))?;
        let constraints = table.cell(i, "constraints").unwrap_or("");
        def = def.column(ColumnDef::parse(column.trim(), data_type.trim(), constraints)?);
    }
    Ok(def)
}

/// Runs one schema call as its own atomic section.
macro_rules! schema_call {
    ($ctx:ident, $call:expr) => {{
        let atomic = $ctx.session.open_atomic().await?;
        let result = $call.await;
        settle(&mut $ctx.session, atomic, &result).await?;
        result
    }};
}

// ===== Given =====

async fn no_table(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    if ctx.schema.table_exists(&mut ctx.session, &table).await? {
        schema_call!(ctx, ctx.schema.drop_table(&mut ctx.session, &table, true))?;
    }
    Ok(())
}

async fn table_exists_with(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let def = table_def(&args.text("table")?, args.table()?)?.if_not_exists();
    schema_call!(ctx, ctx.schema.create_table(&mut ctx.session, &def)).map(|_| ())
}

// ===== When =====

async fn create_table(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let def = table_def(&args.text("table")?, args.table()?)?;
    let result = schema_call!(ctx, ctx.schema.create_table(&mut ctx.session, &def));
    ctx.record(result.map(Outcome::Schema));
    Ok(())
}

async fn index_on(ctx: &mut ScenarioContext, args: &StepArgs, columns: Vec<String>, unique: bool) -> Result<()> {
    let index = args.text("index")?;
    let table = args.text("table")?;
    let result = schema_call!(
        ctx,
        ctx.schema.create_index(&mut ctx.session, &index, &table, &columns, unique)
    );
    ctx.record(result.map(Outcome::Schema));
    Ok(())
}

async fn create_index(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let columns = vec![args.text("column")?];
    index_on(ctx, &args, columns, false).await
}

async fn create_unique_index(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let columns = vec![args.text("column")?];
    index_on(ctx, &args, columns, true).await
}

async fn create_composite_index(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let columns = split_list(&args.text("columns")?);
    index_on(ctx, &args, columns, false).await
}

async fn drop_index(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let index = args.text("index")?;
    let result = schema_call!(ctx, ctx.schema.drop_index(&mut ctx.session, &index));
    ctx.record(result.map(|_| Outcome::Done));
    Ok(())
}

async fn drop_table(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let result = schema_call!(ctx, ctx.schema.drop_table(&mut ctx.session, &table, false));
    ctx.record(result.map(|_| Outcome::Done));
    Ok(())
}

async fn drop_table_cascade(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let result = schema_call!(ctx, ctx.schema.drop_table(&mut ctx.session, &table, true));
    ctx.record(result.map(|_| Outcome::Done));
    Ok(())
}

async fn truncate_table(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    if let Ok(before) = ctx.schema.describe(&mut ctx.session, &table).await {
        let structure = serde_json::to_string(&before)
            .map_err(|e| HarnessError::ProtocolViolation(e.to_string()))?;
        ctx.remember(&format!("structure:{}", table), structure);
    }
    let monitor = ctx.monitor.clone();
    let (result, metric) = monitor
        .time(
            &format!("truncate {}", table),
            async { schema_call!(ctx, ctx.schema.truncate(&mut ctx.session, &table)) },
        )
        .await;
    ctx.record_metric(metric);
    ctx.record(result.map(Outcome::Schema));
    Ok(())
}

async fn alter(ctx: &mut ScenarioContext, table: &str, change: AlterChange) -> Result<()> {
    let result = schema_call!(ctx, ctx.schema.alter_table(&mut ctx.session, table, &change));
    ctx.record(result.map(Outcome::Schema));
    Ok(())
}

async fn add_column(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let column = ColumnDef::new(&args.text("column")?, &args.text("data_type")?);
    alter(ctx, &args.text("table")?, AlterChange::AddColumn(column)).await
}

async fn drop_column(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    alter(ctx, &args.text("table")?, AlterChange::DropColumn(args.text("column")?)).await
}

async fn rename_column(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let change = AlterChange::RenameColumn {
        from: args.text("from")?,
        to: args.text("to")?,
    };
    alter(ctx, &args.text("table")?, change).await
}

async fn rename_table(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    alter(ctx, &args.text("from")?, AlterChange::Rename(args.text("to")?)).await
}

async fn add_unique(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let constraint = TableConstraint::Unique(split_list(&args.text("columns")?));
    alter(ctx, &args.text("table")?, AlterChange::AddConstraint(constraint)).await
}

async fn create_view(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let view = args.text("view")?;
    let sql = args.text("query")?;
    let result = schema_call!(ctx, ctx.schema.create_view(&mut ctx.session, &view, &sql));
    ctx.record(result.map(|_| Outcome::Done));
    Ok(())
}

async fn drop_view(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let view = args.text("view")?;
    let result = schema_call!(ctx, ctx.schema.drop_view(&mut ctx.session, &view));
    ctx.record(result.map(|_| Outcome::Done));
    Ok(())
}

// ===== Then =====

async fn expect_table(ctx: &mut ScenarioContext, table: &str, present: bool) -> Result<()> {
    let exists = ctx.schema.table_exists(&mut ctx.session, table).await?;
    if exists == present {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            format!("table {} to {}", table, if present { "exist" } else { "be absent" }),
            if exists { "it exists" } else { "it is absent" },
        ))
    }
}

async fn table_created(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    ctx.expect_success()?;
    expect_table(ctx, &args.text("table")?, true).await
}

async fn table_should_exist(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    expect_table(ctx, &args.text("table")?, true).await
}

async fn table_should_not_exist(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    expect_table(ctx, &args.text("table")?, false).await
}

async fn structure(ctx: &mut ScenarioContext, table: &str, expected: StructureExpectation) -> Result<()> {
    let desc = ctx.schema.describe(&mut ctx.session, table).await?;
    assert_structure(&desc, &expected)
}

async fn column_count_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let expected = StructureExpectation::default().columns(args.count("count")?);
    structure(ctx, &args.text("table")?, expected).await
}

async fn has_column(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let column = args.text("column")?;
    let desc = ctx.schema.describe(&mut ctx.session, &table).await?;
    if desc.column(&column).is_some() {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            format!("column {}.{}", table, column),
            format!("columns [{}]", desc.column_names().join(", ")),
        ))
    }
}

async fn primary_key_on(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let column = args.text("column")?;
    let expected = StructureExpectation::default().primary_key(&[column.as_str()]);
    structure(ctx, &args.text("table")?, expected).await
}

async fn unique_on(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let expected = StructureExpectation::default().unique(&args.text("column")?);
    structure(ctx, &args.text("table")?, expected).await
}

async fn not_null_on(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let expected = StructureExpectation::default().not_null(&args.text("column")?);
    structure(ctx, &args.text("table")?, expected).await
}

async fn foreign_key_on(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let column = args.text("column")?;
    let ref_table = args.text("ref_table")?;
    let desc = ctx.schema.describe(&mut ctx.session, &table).await?;
    match desc.foreign_key_on(&column) {
        Some(fk) if fk.ref_table.eq_ignore_ascii_case(&ref_table) => Ok(()),
        Some(fk) => Err(HarnessError::mismatch(
            format!("{}.{} referencing {}", table, column, ref_table),
            format!("reference to {}", fk.ref_table),
        )),
        None => Err(HarnessError::mismatch(
            format!("{}.{} referencing {}", table, column, ref_table),
            "no foreign key",
        )),
    }
}

async fn find_index(ctx: &mut ScenarioContext, index: &str) -> Result<Option<IndexDescriptor>> {
    let indexes = ctx.schema.list_indexes(&mut ctx.session, None).await?;
    Ok(indexes.into_iter().find(|i| i.name.eq_ignore_ascii_case(index)))
}

async fn index_created(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    ctx.expect_success()?;
    let index = args.text("index")?;
    match find_index(ctx, &index).await? {
        Some(_) => Ok(()),
        None => Err(HarnessError::mismatch(format!("index {}", index), "no such index")),
    }
}

async fn index_covers(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let index = args.text("index")?;
    let expected = split_list(&args.text("columns")?);
    let found = find_index(ctx, &index)
        .await?
        .ok_or_else(|| HarnessError::mismatch(format!("index {}", index), "no such index"))?;
    let matches = found.columns.len() == expected.len()
        && found
            .columns
            .iter()
            .zip(&expected)
            .all(|(a, b)| a.eq_ignore_ascii_case(b));
    if matches {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            format!("index {} on ({})", index, expected.join(", ")),
            format!("index on ({})", found.columns.join(", ")),
        ))
    }
}

async fn index_absent(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let index = args.text("index")?;
    match find_index(ctx, &index).await? {
        None => Ok(()),
        Some(found) => Err(HarnessError::mismatch(
            format!("no index {}", index),
            format!("index on {}", found.table),
        )),
    }
}

async fn table_empty(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let count = ctx.seeder.count(&mut ctx.session, &table).await?;
    assert_row_count(&table, 0, count as u64)
}

async fn structure_intact(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let before = ctx.recall(&format!("structure:{}", table))?.clone();
    let after = ctx.schema.describe(&mut ctx.session, &table).await?;
    let after = serde_json::to_string(&after).map_err(|e| HarnessError::ProtocolViolation(e.to_string()))?;
    if before == Value::Text(after.clone()) {
        Ok(())
    } else {
        Err(HarnessError::mismatch(before, after))
    }
}

async fn drop_blocked(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let outcome = ctx.inspect()?;
    assert_error(&outcome.result, ErrorKind::DependencyExists, None)
}

async fn view_should_exist(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let view = args.text("view")?;
    if ctx.schema.view_exists(&mut ctx.session, &view).await? {
        Ok(())
    } else {
        Err(HarnessError::mismatch(format!("view {}", view), "no such view"))
    }
}

async fn schema_operation_succeeded(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.expect_success().map(|_| ())
}
