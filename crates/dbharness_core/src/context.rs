//! Per-scenario state threaded through the steps.

use crate::config::HarnessConfig;
use crate::connection::{ConnectionManager, Session};
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::perf::{ConcurrencySummary, PerformanceMetric, PerformanceMonitor};
use crate::schema::SchemaManager;
use crate::seeder::DataSeeder;
use crate::transaction::TransactionScope;
use crate::types::{Outcome, RowSet, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Recorded result of a DDL/DML step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Text of the step that produced it.
    pub step: String,
    /// What the database call returned.
    pub result: Result<Outcome>,
    /// Whether a later step looked at it.
    pub inspected: bool,
}

/// State bag owned by one scenario, created after the session is acquired
/// and destroyed after teardown.
pub struct ScenarioContext {
    pub(crate) session: Session,
    pub(crate) manager: Arc<ConnectionManager>,
    pub(crate) schema: SchemaManager,
    pub(crate) seeder: DataSeeder,
    pub(crate) scope: TransactionScope,
    pub(crate) monitor: PerformanceMonitor,
    pub(crate) config: Arc<HarnessConfig>,
    entities: HashMap<String, RowSet>,
    timers: HashMap<String, Duration>,
    remembered: HashMap<String, Value>,
    metrics: Vec<PerformanceMetric>,
    outcomes: Vec<StepOutcome>,
    concurrency: Option<ConcurrencySummary>,
    current_step: String,
}

impl ScenarioContext {
    pub(crate) fn new(
        session: Session,
        manager: Arc<ConnectionManager>,
        schema: SchemaManager,
        seeder: DataSeeder,
        scope: TransactionScope,
        monitor: PerformanceMonitor,
        config: Arc<HarnessConfig>,
    ) -> Self {
        Self {
            session,
            manager,
            schema,
            seeder,
            scope,
            monitor,
            config,
            entities: HashMap::new(),
            timers: HashMap::new(),
            remembered: HashMap::new(),
            metrics: Vec::new(),
            outcomes: Vec::new(),
            concurrency: None,
            current_step: String::new(),
        }
    }

    // ===== Components =====

    /// The scenario's session.
    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Dialect of the target database.
    pub fn dialect(&self) -> Dialect {
        self.schema.dialect()
    }

    /// Shared connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// DDL and introspection.
    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    /// Fixture and bulk inserts.
    pub fn seeder(&self) -> &DataSeeder {
        &self.seeder
    }

    /// Timing and thresholds.
    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Run configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Isolation boundary.
    pub fn scope(&self) -> &TransactionScope {
        &self.scope
    }

    // ===== Transactions =====

    /// Opens a nested boundary inside the scenario scope.
    pub async fn savepoint(&mut self) -> Result<()> {
        self.scope.savepoint(&mut self.session).await
    }

    /// Undoes the innermost nested boundary, or the whole scope when none is
    /// open.
    pub async fn rollback(&mut self) -> Result<()> {
        if self.scope.savepoint_depth() > 0 {
            self.scope.rollback_to_savepoint(&mut self.session).await
        } else {
            self.scope.rollback(&mut self.session).await
        }
    }

    /// Keeps the innermost nested boundary, or commits the scope when none is
    /// open.
    pub async fn commit(&mut self) -> Result<()> {
        if self.scope.savepoint_depth() > 0 {
            self.scope.release_savepoint(&mut self.session).await
        } else {
            self.scope.commit(&mut self.session).await
        }
    }

    // ===== Outcomes =====

    pub(crate) fn set_step(&mut self, text: &str) {
        self.current_step = text.to_string();
    }

    /// Text of the step being executed.
    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    /// Records the result of a database call made by the current step.
    pub fn record(&mut self, result: Result<Outcome>) {
        debug!(step = %self.current_step, ok = result.is_ok(), "outcome recorded");
        self.outcomes.push(StepOutcome {
            step: self.current_step.clone(),
            result,
            inspected: false,
        });
    }

    /// Most recent outcome, marked as inspected.
    pub fn inspect(&mut self) -> Result<&StepOutcome> {
        let outcome = self.outcomes.last_mut().ok_or_else(|| {
            HarnessError::ProtocolViolation("no database operation has been recorded yet".into())
        })?;
        outcome.inspected = true;
        Ok(outcome)
    }

    /// Most recent outcome, which must be a success.
    pub fn expect_success(&mut self) -> Result<Outcome> {
        let outcome = self.inspect()?;
        match &outcome.result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(HarnessError::mismatch(
                format!("\"{}\" to succeed", outcome.step),
                format!("{}: {}", e.kind(), e),
            )),
        }
    }

    /// Most recent outcome, which must be a failure.
    pub fn expect_failure(&mut self) -> Result<HarnessError> {
        let outcome = self.inspect()?;
        match &outcome.result {
            Err(e) => Ok(e.clone()),
            Ok(value) => Err(HarnessError::mismatch(
                format!("\"{}\" to fail", outcome.step),
                format!("success ({:?})", value),
            )),
        }
    }

    /// Failed outcomes no step looked at.
    pub fn uninspected_failures(&self) -> Vec<&StepOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err() && !o.inspected)
            .collect()
    }

    // ===== Entities and values =====

    /// Stores the last-known rows of a logical entity.
    pub fn remember_rows(&mut self, entity: &str, rows: RowSet) {
        self.entities.insert(entity.to_string(), rows);
    }

    /// Last-known rows of `entity`.
    pub fn rows(&self, entity: &str) -> Result<&RowSet> {
        self.entities
            .get(entity)
            .ok_or_else(|| HarnessError::ProtocolViolation(format!("no {} has been retrieved yet", entity)))
    }

    /// Stores a named value for a later step.
    pub fn remember(&mut self, key: &str, value: impl Into<Value>) {
        self.remembered.insert(key.to_string(), value.into());
    }

    /// Value stored by [`Self::remember`].
    pub fn recall(&self, key: &str) -> Result<&Value> {
        self.remembered
            .get(key)
            .ok_or_else(|| HarnessError::ProtocolViolation(format!("nothing remembered under {}", key)))
    }

    // ===== Measurements =====

    /// Keeps a metric and exposes its elapsed time as a named timer.
    pub fn record_metric(&mut self, metric: PerformanceMetric) {
        self.timers.insert(metric.label.clone(), metric.elapsed);
        self.metrics.push(metric);
    }

    /// Elapsed time of the named timer.
    pub fn elapsed(&self, label: &str) -> Result<Duration> {
        self.timers
            .get(label)
            .copied()
            .ok_or_else(|| HarnessError::ProtocolViolation(format!("no timing recorded for {}", label)))
    }

    /// Most recent metric.
    pub fn last_metric(&self) -> Result<&PerformanceMetric> {
        self.metrics
            .last()
            .ok_or_else(|| HarnessError::ProtocolViolation("no operation has been timed yet".into()))
    }

    /// Every metric recorded so far.
    pub fn metrics(&self) -> &[PerformanceMetric] {
        &self.metrics
    }

    pub(crate) fn take_metrics(&mut self) -> Vec<PerformanceMetric> {
        std::mem::take(&mut self.metrics)
    }

    /// Merges a concurrency batch into the scenario's summary.
    pub fn record_concurrency(&mut self, summary: ConcurrencySummary) {
        match &mut self.concurrency {
            Some(existing) => existing.merge(&summary),
            None => self.concurrency = Some(summary),
        }
    }

    /// Concurrency summary of the scenario.
    pub fn concurrency(&self) -> Result<&ConcurrencySummary> {
        self.concurrency
            .as_ref()
            .ok_or_else(|| HarnessError::ProtocolViolation("no concurrent operations have run".into()))
    }

    pub(crate) fn take_concurrency(&mut self) -> Option<ConcurrencySummary> {
        self.concurrency.take()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::locks::TableLocks;
    use crate::schema::SchemaSnapshot;
    use crate::transaction::TeardownStrategy;
    use crate::ErrorKind;
    use tempfile::TempDir;

    /// Context over a fresh SQLite file with an open rollback scope.
    pub(crate) async fn context(tmp: &TempDir, strategy: TeardownStrategy) -> ScenarioContext {
        let mut config = HarnessConfig::default();
        config.database = DatabaseConfig {
            database: tmp.path().join("ctx.db").display().to_string(),
            pool_size: 4,
            ..DatabaseConfig::default()
        };
        let manager = Arc::new(ConnectionManager::connect(&config.database).await.unwrap());
        let schema = SchemaManager::new(manager.dialect(), TableLocks::new());
        let seeder = DataSeeder::new(schema.clone(), 100, 500);
        let mut session = manager.acquire().await.unwrap();
        seeder.seed_baseline(&mut session).await.unwrap();
        let baseline: Arc<SchemaSnapshot> = Arc::new(schema.snapshot(&mut session).await.unwrap());
        let mut scope = TransactionScope::new(strategy, schema.clone(), baseline);
        scope.begin(&mut session).await.unwrap();
        let monitor = PerformanceMonitor::new(config.performance.clone(), config.run.operation_timeout())
            .with_pool(manager.clone());
        ScenarioContext::new(session, manager, schema, seeder, scope, monitor, Arc::new(config))
    }

    pub(crate) async fn finish(mut ctx: ScenarioContext) {
        let manager = ctx.manager.clone();
        ctx.scope.teardown(&manager, &mut ctx.session).await.unwrap();
        manager.release(&mut ctx.session).await.unwrap();
    }

    #[tokio::test]
    async fn test_outcome_inspection() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&tmp, TeardownStrategy::Rollback).await;

        assert_eq!(ctx.inspect().unwrap_err().kind(), ErrorKind::ProtocolViolation);

        ctx.set_step("I create a duplicate user");
        ctx.record(Err(HarnessError::UniqueViolation("users.username".into())));
        assert_eq!(ctx.uninspected_failures().len(), 1);

        let err = ctx.expect_failure().unwrap();
        assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);
        assert!(ctx.uninspected_failures().is_empty());

        let err = ctx.expect_success().unwrap_err();
        assert!(err.to_string().contains("I create a duplicate user"));

        ctx.record(Ok(Outcome::Affected(1)));
        assert_eq!(ctx.expect_success().unwrap(), Outcome::Affected(1));
        finish(ctx).await;
    }

    #[tokio::test]
    async fn test_nested_rollback_keeps_outer_work() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&tmp, TeardownStrategy::Rollback).await;

        ctx.session()
            .execute("UPDATE users SET email = 'outer@example.com' WHERE username = 'john_doe'")
            .await
            .unwrap();
        ctx.savepoint().await.unwrap();
        ctx.session()
            .execute("UPDATE users SET email = 'inner@example.com' WHERE username = 'john_doe'")
            .await
            .unwrap();
        ctx.rollback().await.unwrap();

        let rows = ctx
            .session()
            .query("SELECT email FROM users WHERE username = 'john_doe'", &[])
            .await
            .unwrap();
        assert_eq!(rows.scalar(), Some(&Value::Text("outer@example.com".into())));
        assert_eq!(ctx.scope().savepoint_depth(), 0);
        finish(ctx).await;
    }

    #[tokio::test]
    async fn test_timers_and_remembered_values() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&tmp, TeardownStrategy::Rollback).await;

        assert!(ctx.elapsed("bulk").is_err());
        let (result, metric) = ctx.monitor().time("bulk", async { Ok(()) }).await;
        result.unwrap();
        ctx.record_metric(metric);
        assert!(ctx.elapsed("bulk").is_ok());
        assert_eq!(ctx.metrics().len(), 1);

        ctx.remember("email", "john@example.com");
        assert_eq!(ctx.recall("email").unwrap(), &Value::Text("john@example.com".into()));
        finish(ctx).await;
    }
}
