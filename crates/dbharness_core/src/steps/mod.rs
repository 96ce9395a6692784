//! Standard step library.
//!
//! Handlers are plain `async fn(&mut ScenarioContext, StepArgs) -> Result<()>`
//! adapted to [`StepHandler`](crate::StepHandler) by the `handler!` macro.
//! Steps that perform a database call under test record its result in the
//! context instead of failing; `Then` steps inspect it.

use crate::connection::{AtomicGuard, Session};
use crate::context::ScenarioContext;
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::registry::StepRegistry;
use crate::types::{Outcome, Row, RowSet, Value};

macro_rules! handler {
    ($f:path) => {{
        fn wrapped<'a>(
            ctx: &'a mut $crate::ScenarioContext,
            args: $crate::StepArgs,
        ) -> ::futures::future::BoxFuture<'a, $crate::Result<()>> {
            Box::pin($f(ctx, args))
        }
        wrapped as $crate::StepHandler
    }};
}

mod connection;
mod ddl;
mod dml;
mod performance;
mod records;
mod transactions;

/// Registers every standard step.
pub fn register_all(registry: &mut StepRegistry) -> Result<()> {
    connection::register(registry)?;
    records::register(registry)?;
    ddl::register(registry)?;
    dml::register(registry)?;
    transactions::register(registry)?;
    performance::register(registry)?;
    Ok(())
}

/// Closes an atomic section according to `result`.
async fn settle<T>(session: &mut Session, guard: AtomicGuard, result: &Result<T>) -> Result<()> {
    session.close_atomic(guard, result.is_ok()).await
}

/// Runs a write under the table's shared lock as its own atomic section, so
/// a failure leaves the enclosing transaction usable.
pub(crate) async fn execute(ctx: &mut ScenarioContext, table: &str, sql: &str, params: &[Value]) -> Result<u64> {
    let _guard = ctx.schema.locks().read(table).await;
    let atomic = ctx.session.open_atomic().await?;
    let result = ctx.session.execute_with(sql, params).await;
    settle(&mut ctx.session, atomic, &result).await?;
    result
}

/// Runs a query the same way as [`execute`].
pub(crate) async fn query(ctx: &mut ScenarioContext, table: &str, sql: &str, params: &[Value]) -> Result<RowSet> {
    let _guard = ctx.schema.locks().read(table).await;
    let atomic = ctx.session.open_atomic().await?;
    let result = ctx.session.query(sql, params).await;
    settle(&mut ctx.session, atomic, &result).await?;
    result
}

/// `column = <placeholder>`, or `column IS NULL` for NULL.
pub(crate) fn condition(dialect: Dialect, column: &str, value: &Value, params: &mut Vec<Value>) -> String {
    if value.is_null() {
        format!("{} IS NULL", dialect.quote(column))
    } else {
        params.push(value.clone());
        format!("{} = {}", dialect.quote(column), dialect.placeholder(params.len()))
    }
}

/// `SET a = ?, b = NULL` body for `row`.
pub(crate) fn assignments(dialect: Dialect, row: &Row, params: &mut Vec<Value>) -> String {
    row.iter()
        .map(|(column, value)| {
            if value.is_null() {
                format!("{} = NULL", dialect.quote(column))
            } else {
                params.push(value.clone());
                format!("{} = {}", dialect.quote(column), dialect.placeholder(params.len()))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Splits `"a, b,c"` into trimmed names.
pub(crate) fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Affected-row count of an outcome that must be a write.
pub(crate) fn affected(outcome: &Outcome) -> Result<u64> {
    outcome
        .affected()
        .ok_or_else(|| HarnessError::mismatch("a write outcome", format!("{:?}", outcome)))
}

/// Rows of an outcome that must be a query.
pub(crate) fn returned(outcome: Outcome) -> Result<RowSet> {
    match outcome {
        Outcome::Rows(rows) => Ok(rows),
        other => Err(HarnessError::mismatch("a query outcome", format!("{:?}", other))),
    }
}

/// First row of an entity, failing when none was retrieved.
pub(crate) fn first<'a>(rows: &'a RowSet, entity: &str) -> Result<&'a Row> {
    rows.first().ok_or_else(|| HarnessError::NotFound {
        object: entity.to_string(),
    })
}

/// Integer id column of `row`.
pub(crate) fn id_of(row: &Row) -> Result<i64> {
    row.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| HarnessError::DataTypeMismatch("row has no integer id".into()))
}
