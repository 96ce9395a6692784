//! Bulk, timing and concurrency steps.

use super::{affected, returned, settle};
use crate::assertions::{assert_column_set, assert_row_count};
use crate::connection::{ConnectionManager, Session};
use crate::context::ScenarioContext;
use crate::error::{HarnessError, Result};
use crate::perf::{ConcurrencySummary, PerformanceMonitor};
use crate::registry::{StepArgs, StepRegistry, StepTraits};
use crate::schema::insert_statement;
use crate::seeder::{timestamp, DataSeeder, UserGenerator};
use crate::types::{Outcome, Row, RowSet, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const USER_ORDER_STATISTICS: &str = "SELECT u.username, COUNT(o.id) AS order_count, \
     COALESCE(SUM(o.total_amount), 0) AS total_spent \
     FROM users u LEFT JOIN orders o ON o.user_id = u.id \
     GROUP BY u.id, u.username ORDER BY total_spent DESC, u.username";

pub(super) fn register(registry: &mut StepRegistry) -> Result<()> {
    registry.step("there are {count:d} users in the database", handler!(ensure_users))?;

    registry.step("I create {count:d} users in bulk", handler!(bulk_users))?;
    registry.step(
        "I create the configured number of users in bulk",
        handler!(bulk_configured_users),
    )?;
    registry.step(
        "I search for users with email domain \"{domain}\"",
        handler!(search_by_domain),
    )?;
    registry.step(
        "I run a complex query for user order statistics",
        handler!(order_statistics),
    )?;
    registry.step_with(
        "{reads:d} concurrent read operations and {writes:d} concurrent write operations are performed",
        StepTraits::cross_session(),
        handler!(concurrent_mixed),
    )?;
    registry.step(
        "I perform {count:d} concurrent read operations",
        handler!(concurrent_reads),
    )?;
    registry.step(
        "I perform the configured number of concurrent read operations",
        handler!(concurrent_configured_reads),
    )?;

    registry.step("all {count:d} users should be created", handler!(all_created))?;
    registry.step(
        "the operation should complete within {seconds:f} seconds",
        handler!(within_seconds),
    )?;
    registry.step(
        "the query should complete within {seconds:f} seconds",
        handler!(within_seconds),
    )?;
    registry.step(
        "the operation should complete within the configured threshold",
        handler!(within_threshold),
    )?;
    registry.step("the query should return valid results", handler!(valid_results))?;
    registry.step(
        "the results should include user information with order counts",
        handler!(statistics_shape),
    )?;
    registry.step("all concurrent operations should succeed", handler!(all_succeeded))?;
    registry.step("no deadlocks should occur", handler!(no_deadlocks))?;
    registry.step("no pool exhaustion should occur", handler!(no_pool_exhaustion))?;
    registry.step(
        "the total time should be less than {seconds:f} seconds",
        handler!(total_time_below),
    )?;
    registry.step(
        "inserting {count:d} users in batches should be faster than inserting them one by one",
        handler!(batching_is_faster),
    )?;
    Ok(())
}

fn seconds(args: &StepArgs) -> Result<Duration> {
    let seconds = args.float("seconds")?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(HarnessError::DataTypeMismatch(format!(
            "seconds must be a non-negative number, got {}",
            seconds
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Runs a timed query under the table's shared lock and records both the
/// metric and the outcome.
async fn timed_query(ctx: &mut ScenarioContext, label: &str, table: &str, sql: &str, params: &[Value]) -> Result<()> {
    let result = {
        let _guard = ctx.schema.locks().read(table).await;
        let atomic = ctx.session.open_atomic().await?;
        let (result, metric) = ctx.monitor.time(label, ctx.session.query(sql, params)).await;
        ctx.record_metric(metric);
        settle(&mut ctx.session, atomic, &result).await?;
        result
    };
    if let Ok(rows) = &result {
        ctx.remember_rows("result", rows.clone());
    }
    ctx.record(result.map(Outcome::Rows));
    Ok(())
}

async fn timed_bulk_users(ctx: &mut ScenarioContext, count: usize) -> Result<()> {
    let mut generator = UserGenerator::new("bulk");
    let (result, metric) = ctx
        .monitor
        .time(
            "bulk insert users",
            ctx.seeder.bulk_insert(&mut ctx.session, "users", count, &mut generator),
        )
        .await;
    info!(count, elapsed_ms = metric.elapsed.as_millis() as u64, "bulk insert finished");
    ctx.record_metric(metric);
    ctx.record(result.map(|report| Outcome::Affected(report.rows)));
    Ok(())
}

// ===== Given =====

async fn ensure_users(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let wanted = args.count("count")?;
    let present = usize::try_from(ctx.seeder.count(&mut ctx.session, "users").await?).unwrap_or(0);
    if present < wanted {
        let mut generator = UserGenerator::new("population");
        ctx.seeder
            .bulk_insert(&mut ctx.session, "users", wanted - present, &mut generator)
            .await?;
    }
    Ok(())
}

// ===== When =====

async fn bulk_users(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    timed_bulk_users(ctx, args.count("count")?).await
}

async fn bulk_configured_users(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let count = ctx.config.performance.bulk_operation_count;
    ctx.remember("bulk_count", count as i64);
    timed_bulk_users(ctx, count).await
}

async fn search_by_domain(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let domain = args.text("domain")?;
    let dialect = ctx.dialect();
    let sql = format!(
        "SELECT * FROM users WHERE email LIKE {} ORDER BY id",
        dialect.placeholder(1)
    );
    let pattern = Value::Text(format!("%@{}", domain.trim_start_matches('@')));
    timed_query(ctx, "search users by email domain", "users", &sql, &[pattern]).await
}

async fn order_statistics(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    timed_query(ctx, "user order statistics", "orders", USER_ORDER_STATISTICS, &[]).await
}

/// Sessions available to concurrent batches: the pool minus the scenario's own.
fn spare_sessions(ctx: &ScenarioContext) -> usize {
    (ctx.config.database.pool_size as usize).saturating_sub(1).max(1)
}

async fn read_batch(
    monitor: PerformanceMonitor,
    manager: Arc<ConnectionManager>,
    count: usize,
    parallelism: usize,
) -> ConcurrencySummary {
    monitor
        .run_concurrent(manager, count, parallelism, |_, mut session: Session| async move {
            let result = session.query("SELECT COUNT(*) FROM users", &[]).await.map(|_| ());
            (session, result)
        })
        .await
}

async fn write_batch(
    monitor: PerformanceMonitor,
    manager: Arc<ConnectionManager>,
    count: usize,
    parallelism: usize,
) -> ConcurrencySummary {
    let dialect = manager.dialect();
    let run: u32 = rand::random();
    monitor
        .run_concurrent(manager, count, parallelism, move |index, mut session: Session| async move {
            let username = format!("concurrent_{:08x}_{}", run, index);
            let row = Row::new()
                .with("username", username.as_str())
                .with("email", format!("{}@example.com", username))
                .with("created_at", timestamp())
                .with("is_active", 1);
            let (sql, params) = insert_statement(dialect, "users", &row);
            let result = session.execute_with(&sql, &params).await.map(|_| ());
            (session, result)
        })
        .await
}

async fn concurrent_mixed(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let reads = args.count("reads")?;
    let writes = args.count("writes")?;
    let spare = spare_sessions(ctx);
    let read_parallelism = if reads + writes == 0 {
        1
    } else {
        (spare * reads / (reads + writes)).max(1)
    };
    let write_parallelism = spare.saturating_sub(read_parallelism).max(1);

    let (mut summary, written) = tokio::join!(
        read_batch(ctx.monitor.clone(), ctx.manager.clone(), reads, read_parallelism),
        write_batch(ctx.monitor.clone(), ctx.manager.clone(), writes, write_parallelism)
    );
    summary.merge(&written);
    info!(
        attempted = summary.attempted,
        failed = summary.failed,
        wall_ms = summary.wall_time.as_millis() as u64,
        "concurrent batch finished"
    );
    ctx.record_concurrency(summary);
    Ok(())
}

async fn concurrent_reads(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let count = args.count("count")?;
    let summary = read_batch(ctx.monitor.clone(), ctx.manager.clone(), count, spare_sessions(ctx)).await;
    ctx.record_concurrency(summary);
    Ok(())
}

async fn concurrent_configured_reads(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let count = ctx.config.performance.concurrent_operations;
    let summary = read_batch(ctx.monitor.clone(), ctx.manager.clone(), count, spare_sessions(ctx)).await;
    ctx.record_concurrency(summary);
    Ok(())
}

// ===== Then =====

async fn all_created(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let inserted = affected(&ctx.expect_success()?)?;
    assert_row_count("bulk insert", args.count("count")? as u64, inserted)
}

async fn within_seconds(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let max = seconds(&args)?;
    let metric = ctx.last_metric()?;
    ctx.monitor.assert_within(metric, max)
}

async fn within_threshold(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let metric = ctx.last_metric()?;
    ctx.monitor.check_threshold(metric)
}

async fn valid_results(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let rows = returned(ctx.expect_success()?)?;
    if rows.is_empty() {
        return Err(HarnessError::mismatch("at least one row", "no rows"));
    }
    Ok(())
}

async fn statistics_shape(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let rows: RowSet = returned(ctx.expect_success()?)?;
    assert_column_set(&rows, &["username", "order_count", "total_spent"])?;
    for row in &rows.rows {
        let count = row.get("order_count").and_then(Value::as_i64);
        if !matches!(count, Some(n) if n >= 0) {
            return Err(HarnessError::mismatch(
                "a non-negative order_count",
                row.get("order_count").cloned().unwrap_or(Value::Null),
            ));
        }
    }
    Ok(())
}

async fn all_succeeded(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let summary = ctx.concurrency()?;
    if summary.failed > 0 {
        return Err(HarnessError::mismatch(
            format!("{} successful operations", summary.attempted),
            format!("{} failures {:?}", summary.failed, summary.failures_by_kind),
        ));
    }
    Ok(())
}

async fn no_deadlocks(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let summary = ctx.concurrency()?;
    if !summary.deadlock_free() {
        return Err(HarnessError::mismatch("no lock conflicts", summary.lock_conflicts));
    }
    Ok(())
}

async fn no_pool_exhaustion(ctx: &mut ScenarioContext, _args: StepArgs) -> Result<()> {
    let summary = ctx.concurrency()?;
    if summary.pool_exhaustions > 0 {
        return Err(HarnessError::mismatch("no pool exhaustion", summary.pool_exhaustions));
    }
    Ok(())
}

async fn total_time_below(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let max = seconds(&args)?;
    let summary = ctx.concurrency()?;
    if summary.wall_time >= max {
        return Err(HarnessError::ThresholdExceeded {
            label: "concurrent operations".into(),
            actual: summary.wall_time,
            expected: max,
        });
    }
    Ok(())
}

async fn batching_is_faster(ctx: &mut ScenarioContext, args: StepArgs) -> Result<()> {
    let count = args.count("count")?;
    let batch_size = ctx.config.performance.bulk_batch_size;
    let one_by_one = DataSeeder::new(ctx.schema.clone(), usize::MAX, batch_size);
    let batched = DataSeeder::new(ctx.schema.clone(), 0, batch_size);

    let mut generator = UserGenerator::new("single");
    let (single, single_metric) = ctx
        .monitor
        .time(
            "insert users one by one",
            one_by_one.bulk_insert(&mut ctx.session, "users", count, &mut generator),
        )
        .await;
    let mut generator = UserGenerator::new("batched");
    let (multi, multi_metric) = ctx
        .monitor
        .time(
            "insert users in batches",
            batched.bulk_insert(&mut ctx.session, "users", count, &mut generator),
        )
        .await;
    let (single, multi) = (single?, multi?);
    assert_row_count("one-by-one insert", count as u64, single.rows)?;
    assert_row_count("batched insert", count as u64, multi.rows)?;

    let (single_elapsed, multi_elapsed) = (single_metric.elapsed, multi_metric.elapsed);
    ctx.record_metric(single_metric);
    ctx.record_metric(multi_metric);
    if multi_elapsed >= single_elapsed {
        return Err(HarnessError::mismatch(
            format!("batched insert faster than {:?}", single_elapsed),
            format!("{:?} over {} statements", multi_elapsed, multi.statements),
        ));
    }
    Ok(())
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
    async fn test_bulk_users_are_counted_and_timed() {
        let scenario = Scenario::new("bulk")
            .when("I create 120 users in bulk")
            .then("all 120 users should be created")
            .and("the operation should complete within 30 seconds")
            .and("the user count should be 123");
        for result in run(&scenario, TeardownStrategy::Rollback).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_population_tops_up_to_target() {
        let scenario = Scenario::new("population")
            .given("there are 40 users in the database")
            .and("there are 10 users in the database")
            .then("the user count should be 40")
            .when("I search for users with email domain \"example.com\"")
            .then("the query should return valid results")
            .and("the query should return 40 records");
        for result in run(&scenario, TeardownStrategy::Rollback).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_order_statistics_shape() {
        let scenario = Scenario::new("statistics")
            .when("I run a complex query for user order statistics")
            .then("the query should return valid results")
            .and("the results should include user information with order counts")
            .and("the query should return 3 records");
        for result in run(&scenario, TeardownStrategy::Rollback).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_mixed_concurrency_summary() {
        let scenario = Scenario::new("concurrency")
            .when("20 concurrent read operations and 5 concurrent write operations are performed")
            .then("all concurrent operations should succeed")
            .and("no deadlocks should occur")
            .and("no pool exhaustion should occur")
            .and("the total time should be less than 30 seconds");
        for result in run(&scenario, TeardownStrategy::Restore).await {
            result.unwrap();
        }
    }

    #[tokio::test]
    async fn test_zero_threshold_is_exceeded() {
        let scenario = Scenario::new("threshold")
            .when("I create 5 users in bulk")
            .then("the operation should complete within 0 seconds");
        let results = run(&scenario, TeardownStrategy::Rollback).await;
        let err = results[1].clone().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PerformanceThresholdExceeded);
    }

    #[tokio::test]
    async fn test_concurrency_checks_need_a_batch() {
        let scenario = Scenario::new("no batch").then("no deadlocks should occur");
        let results = run(&scenario, TeardownStrategy::Rollback).await;
        assert_eq!(results[0].clone().unwrap_err().kind(), ErrorKind::ProtocolViolation);
    }
}
