//! Transaction boundary steps.

use super::settle;
use crate::context::ScenarioContext;
use crate::error::{HarnessError, Result};
use crate::registry::{StepArgs, StepRegistry, StepTraits};
use crate::schema::DdlOperation;
use crate::types::{Outcome, Row, RowSet};

pub(super) fn register(registry: &mut StepRegistry) -> Result<()> {
    registry.step("I start a transaction", handler!(start))?;
    registry.step("I create a savepoint", handler!(start))?;
    registry.step("I rollback the transaction", handler!(rollback))?;
    registry.step("I rollback to the savepoint", handler!(rollback_to_savepoint))?;
    registry.step_with(
        "I commit the transaction",
        StepTraits::commits(),
        handler!(commit),
    )?;
    registry.step("I release the savepoint", handler!(release_savepoint))?;
    registry.step_with(
        "I perform a \"{operation}\" on table \"{table}\"",
        StepTraits::ddl(DdlOperation::Truncate),
        handler!(perform),
    )?;

    registry.step(
        "the transaction state should be \"{state}\"",
        handler!(state_is),
    )?;
    registry.step(
        "the savepoint depth should be {depth:d}",
        handler!(depth_is),
    )?;
    registry.step("the operation should be \"{status}\"", handler!(operation_status))?;
    Ok(())
}

async fn start(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.savepoint().await
}

async fn rollback(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.rollback().await
}

async fn rollback_to_savepoint(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.scope.rollback_to_savepoint(&mut ctx.session).await
}

async fn commit(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.commit().await
}

async fn release_savepoint(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    ctx.scope.release_savepoint(&mut ctx.session).await
}

async fn perform(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let table = args.text("table")?;
    let operation = args.text("operation")?.trim().to_ascii_lowercase();
    let result = match operation.as_str() {
        "count" => ctx
            .seeder
            .count(&mut ctx.session, &table)
            .await
            .map(|n| {
                Outcome::Rows(RowSet {
                    columns: vec!["count".into()],
                    rows: vec![Row::new().with("count", n)],
                })
            }),
        "describe" | "schema" => ctx
            .schema
            .describe(&mut ctx.session, &table)
            .await
            .map(Outcome::Schema),
        "truncate" => {
            let atomic = ctx.session.open_atomic().await?;
            let result = ctx.schema.truncate(&mut ctx.session, &table).await;
            settle(&mut ctx.session, atomic, &result).await?;
            result.map(Outcome::Schema)
        }
        other => {
            return Err(HarnessError::Config(format!(
                "unknown operation '{}', expected count, describe or truncate",
                other
            )))
        }
    };
    ctx.record(result);
    Ok(())
}

async fn state_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let normalize = |s: &str| s.to_ascii_lowercase().replace([' ', '_', '-'], "");
    let expected = args.text("state")?;
    let actual = ctx.scope().state().to_string();
    if normalize(&expected) == normalize(&actual) {
        Ok(())
    } else {
        Err(HarnessError::mismatch(format!("transaction {}", expected), actual))
    }
}

async fn depth_is(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let expected = args.count("depth")?;
    let actual = ctx.scope().savepoint_depth();
    if expected == actual {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            format!("savepoint depth {}", expected),
            actual,
        ))
    }
}

async fn operation_status(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    match args.text("status")?.trim().to_ascii_lowercase().as_str() {
        "successful" | "success" | "succeeded" => ctx.expect_success().map(|_| ()),
        "failed" | "failure" | "unsuccessful" => ctx.expect_failure().map(|_| ()),
        other => Err(HarnessError::Config(format!(
            "operation status must be successful or failed, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::context::tests::{context, finish};
    use crate::registry::StepRegistry;
    use crate::scenario::Scenario;
    use crate::transaction::TeardownStrategy;
    use crate::ErrorKind;
    use tempfile::TempDir;

    async fn run(scenario: &Scenario, strategy: TeardownStrategy) -> Vec<crate::Result<()>> {
        let tmp = TempDir::new().unwrap();
        let registry = StepRegistry::standard().unwrap();
        let mut ctx = context(&tmp, strategy).await;
        let mut results = Vec::new();
        for step in scenario.steps() {
            let resolved = registry.resolve(step).unwrap();
            ctx.set_step(&step.text);
            results.push(resolved.run(&mut ctx).await);
        }
        finish(ctx).await;
        results
    }

    #[tokio::test]
    async fn test_update_then_rollback_keeps_old_value() {
        let scenario = Scenario::new("rollback")
            .given("a user exists with username \"john_doe\"")
            .when("I start a transaction")
            .and("I update the user's email to \"changed@example.com\"")
            .and("I rollback the transaction")
            .then("the email of \"john_doe\" should remain \"john@example.com\"")
            .and("the transaction state should be \"active\"")
            .and("the savepoint depth should be 0");
        for result in run(&scenario, TeardownStrategy::Rollback).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_update_then_commit_keeps_new_value() {
        let scenario = Scenario::new("commit")
            .given("a user exists with username \"john_doe\"")
            .when("I start a transaction")
            .and("I update the user's email to \"changed@example.com\"")
            .and("I commit the transaction")
            .then("the email of \"john_doe\" should remain \"changed@example.com\"")
            .and("the savepoint depth should be 0");
        for result in run(&scenario, TeardownStrategy::Rollback).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_operations_record_outcomes() {
        let scenario = Scenario::new("operations")
            .when("I perform a \"count\" on table \"users\"")
            .then("the operation should be \"successful\"")
            .when("I perform a \"describe\" on table \"missing_table\"")
            .then("the operation should be \"failed\"")
            .and("the operation should fail with \"NotFound\"");
        for result in run(&scenario, TeardownStrategy::Rollback).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_savepoint_misuse_is_reported() {
        let scenario = Scenario::new("misuse").when("I release the savepoint");
        let results = run(&scenario, TeardownStrategy::Rollback).await;
        let err = results[0].clone().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
}
