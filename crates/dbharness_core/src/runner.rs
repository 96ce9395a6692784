//! Scenario scheduling, isolation and reporting.
//!
//! A [`Harness`] owns the connection pool, the step registry and the
//! baseline snapshot. Each run resolves every step up front, then executes
//! rollback-strategy scenarios on `run.workers` parallel sessions followed by
//! restore-strategy scenarios one at a time.

use crate::config::HarnessConfig;
use crate::connection::ConnectionManager;
use crate::context::ScenarioContext;
use crate::error::{ErrorKind, HarnessError, Result};
use crate::locks::TableLocks;
use crate::perf::{as_secs, ConcurrencySummary, PerformanceMetric, PerformanceMonitor};
use crate::registry::{ResolvedStep, StepRegistry};
use crate::scenario::{Feature, Scenario};
use crate::schema::{SchemaManager, SchemaSnapshot};
use crate::seeder::DataSeeder;
use crate::tags::TagExpression;
use crate::transaction::{TeardownStrategy, TransactionScope};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Tag forcing the restore strategy.
pub const RESTORE_TAG: &str = "@restore";

/// Which scenarios to run and how.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Only scenarios of this feature (case-insensitive).
    pub feature: Option<String>,
    /// Tag expression scenarios must satisfy.
    pub tags: TagExpression,
    /// Case-insensitive substring of the scenario name.
    pub name: Option<String>,
    /// Resolve and report without executing.
    pub dry_run: bool,
    /// Overrides `run.scenario_timeout_s`.
    pub timeout: Option<Duration>,
    /// Skip the remaining scenarios after the first failure.
    pub stop_on_failure: bool,
}

impl RunFilter {
    /// True if `scenario` is selected.
    pub fn matches(&self, scenario: &Scenario) -> bool {
        if let Some(feature) = &self.feature {
            match scenario.feature() {
                Some(name) if name.eq_ignore_ascii_case(feature) => {}
                _ => return false,
            }
        }
        if let Some(name) = &self.name {
            if !scenario
                .qualified_name()
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        self.tags.matches(scenario.tags())
    }
}

/// A scenario whose steps are all bound.
#[derive(Debug, Clone)]
pub struct PlannedScenario {
    /// The scenario as declared (background included).
    pub scenario: Scenario,
    /// One resolved step per scenario step.
    pub steps: Vec<ResolvedStep>,
    /// Isolation chosen for it.
    pub strategy: TeardownStrategy,
}

/// Final state of a scenario or step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl ScenarioStatus {
    /// Passed or skipped.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

/// One executed (or skipped) step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Keyword and text, e.g. `When I delete the user`.
    pub text: String,
    pub status: ScenarioStatus,
    #[serde(serialize_with = "as_secs", rename = "elapsed_s")]
    pub elapsed: Duration,
}

/// Why a scenario failed.
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    /// Step text the failure is attributed to.
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
    /// Rendered expectation, for assertion failures.
    pub expected: Option<String>,
    /// Rendered observation, for assertion failures.
    pub actual: Option<String>,
    pub suggestion: Option<String>,
}

impl StepFailure {
    fn new(step: &str, error: &HarnessError) -> Self {
        let (expected, actual) = match error {
            HarnessError::AssertionFailed { expected, actual } => {
                (Some(expected.clone()), Some(actual.clone()))
            }
            _ => (None, None),
        };
        Self {
            step: step.to_string(),
            kind: error.kind(),
            message: error.to_string(),
            expected,
            actual,
            suggestion: error.recovery_suggestion().map(str::to_string),
        }
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub feature: Option<String>,
    pub name: String,
    pub tags: Vec<String>,
    pub strategy: TeardownStrategy,
    pub status: ScenarioStatus,
    pub steps: Vec<StepReport>,
    pub failure: Option<StepFailure>,
    /// Teardown problem, reported even when the steps passed.
    pub teardown_error: Option<String>,
    pub metrics: Vec<PerformanceMetric>,
    pub concurrency: Option<ConcurrencySummary>,
    #[serde(serialize_with = "as_secs", rename = "elapsed_s")]
    pub elapsed: Duration,
}

impl ScenarioReport {
    fn skipped(planned: &PlannedScenario) -> Self {
        Self {
            feature: planned.scenario.feature().map(str::to_string),
            name: planned.scenario.name().to_string(),
            tags: planned.scenario.tags().to_vec(),
            strategy: planned.strategy,
            status: ScenarioStatus::Skipped,
            steps: planned
                .steps
                .iter()
                .map(|s| StepReport {
                    text: s.step.to_string(),
                    status: ScenarioStatus::Skipped,
                    elapsed: Duration::ZERO,
                })
                .collect(),
            failure: None,
            teardown_error: None,
            metrics: Vec::new(),
            concurrency: None,
            elapsed: Duration::ZERO,
        }
    }

    /// `Feature: Scenario`.
    pub fn qualified_name(&self) -> String {
        match &self.feature {
            Some(feature) => format!("{}: {}", feature, self.name),
            None => self.name.clone(),
        }
    }
}

/// Counts over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dialect: String,
    pub profile: String,
    pub dry_run: bool,
    pub scenarios: Vec<ScenarioReport>,
    /// Set when a fatal error stopped the run early.
    pub aborted: Option<String>,
}

impl RunReport {
    /// Per-status counts.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.scenarios.len(),
            ..RunSummary::default()
        };
        for report in &self.scenarios {
            match report.status {
                ScenarioStatus::Passed => summary.passed += 1,
                ScenarioStatus::Failed => summary.failed += 1,
                ScenarioStatus::TimedOut => summary.timed_out += 1,
                ScenarioStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    /// True when nothing failed and the run was not aborted.
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.scenarios.iter().all(|s| s.status.is_ok())
    }

    /// Wall time of the run.
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }

    /// Metrics of every scenario, in report order.
    pub fn metrics(&self) -> impl Iterator<Item = (&ScenarioReport, &PerformanceMetric)> {
        self.scenarios
            .iter()
            .flat_map(|s| s.metrics.iter().map(move |m| (s, m)))
    }
}

/// Shared state of one run's scenario tasks.
struct RunState {
    timeout: Option<Duration>,
    stop_on_failure: bool,
    abort: AtomicBool,
    reason: std::sync::Mutex<Option<String>>,
}

impl RunState {
    /// Skips every scenario not yet started. The first reason wins.
    fn stop(&self, reason: String) {
        self.abort.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason);
        }
    }
}

/// Connected test runtime.
#[derive(Debug)]
pub struct Harness {
    config: Arc<HarnessConfig>,
    manager: Arc<ConnectionManager>,
    registry: Arc<StepRegistry>,
    schema: SchemaManager,
    seeder: DataSeeder,
    baseline: Arc<SchemaSnapshot>,
}

impl Harness {
    /// Validates the configuration, connects, seeds the baseline when
    /// configured and snapshots it. Any failure here is fatal.
    pub async fn connect(config: HarnessConfig, registry: StepRegistry) -> Result<Self> {
        config.validate()?;
        let manager = Arc::new(ConnectionManager::connect(&config.database).await?);
        let schema = SchemaManager::new(manager.dialect(), TableLocks::new());
        let seeder = DataSeeder::new(
            schema.clone(),
            config.performance.bulk_batch_threshold,
            config.performance.bulk_batch_size,
        );

        let mut session = manager.acquire().await?;
        let baseline = async {
            if config.data.load_test_data {
                let seeded = seeder.seed_baseline(&mut session).await?;
                info!(?seeded, "baseline seeded");
            }
            schema.snapshot(&mut session).await
        }
        .await;
        manager.release(&mut session).await?;
        let baseline = baseline?;
        info!(
            dialect = %manager.dialect(),
            tables = baseline.table_names().len(),
            "harness connected"
        );

        Ok(Self {
            config: Arc::new(config),
            manager,
            registry: Arc::new(registry),
            schema,
            seeder,
            baseline: Arc::new(baseline),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Snapshot every scenario is torn down to.
    pub fn baseline(&self) -> &SchemaSnapshot {
        &self.baseline
    }

    /// Selects scenarios and binds all their steps. Fails with the first
    /// unbound or ambiguous step before anything runs.
    pub fn plan(&self, features: &[Feature], filter: &RunFilter) -> Result<Vec<PlannedScenario>> {
        plan(&self.registry, &self.schema, features, filter)
    }

    /// Plans and runs.
    pub async fn run(&self, features: &[Feature], filter: &RunFilter) -> Result<RunReport> {
        self.run_with_progress(features, filter, |_| {}).await
    }

    /// Plans and runs, calling `on_done` as each scenario finishes.
    pub async fn run_with_progress<F>(&self, features: &[Feature], filter: &RunFilter, on_done: F) -> Result<RunReport>
    where
        F: Fn(&ScenarioReport) + Sync,
    {
        let planned = self.plan(features, filter)?;
        Ok(self.execute(planned, filter, on_done).await)
    }

    /// Runs an already bound plan.
    pub async fn execute<F>(&self, planned: Vec<PlannedScenario>, filter: &RunFilter, on_done: F) -> RunReport
    where
        F: Fn(&ScenarioReport) + Sync,
    {
        let started_at = Utc::now();
        let mut report = RunReport {
            started_at,
            finished_at: started_at,
            dialect: self.manager.dialect().to_string(),
            profile: self.config.run.profile.to_string(),
            dry_run: filter.dry_run,
            scenarios: Vec::with_capacity(planned.len()),
            aborted: None,
        };

        if filter.dry_run {
            for p in &planned {
                let skipped = ScenarioReport::skipped(p);
                on_done(&skipped);
                report.scenarios.push(skipped);
            }
            report.finished_at = Utc::now();
            return report;
        }

        let timeout = filter.timeout.or_else(|| self.config.run.scenario_timeout());
        let workers = self.config.run.workers.max(1);
        let state = RunState {
            timeout,
            stop_on_failure: filter.stop_on_failure,
            abort: AtomicBool::new(false),
            reason: std::sync::Mutex::new(None),
        };

        let (serial, parallel): (Vec<_>, Vec<_>) = planned
            .iter()
            .enumerate()
            .partition(|(_, p)| p.strategy == TeardownStrategy::Restore);
        info!(
            parallel = parallel.len(),
            serial = serial.len(),
            workers,
            "run started"
        );

        let mut results: Vec<(usize, ScenarioReport)> = stream::iter(parallel)
            .map(|(i, p)| self.run_guarded(i, p, &state, &on_done))
            .buffer_unordered(workers)
            .collect()
            .await;
        for (i, p) in serial {
            results.push(self.run_guarded(i, p, &state, &on_done).await);
        }
        results.sort_by_key(|(i, _)| *i);

        report.scenarios = results.into_iter().map(|(_, r)| r).collect();
        report.aborted = state.reason.into_inner().ok().flatten();
        report.finished_at = Utc::now();
        let summary = report.summary();
        info!(
            passed = summary.passed,
            failed = summary.failed,
            timed_out = summary.timed_out,
            skipped = summary.skipped,
            "run finished"
        );
        report
    }

    /// Runs one scenario unless the run was stopped, and stops the run on a
    /// fatal error or, with `stop_on_failure`, on any failure.
    async fn run_guarded<F>(
        &self,
        index: usize,
        planned: &PlannedScenario,
        state: &RunState,
        on_done: &F,
    ) -> (usize, ScenarioReport)
    where
        F: Fn(&ScenarioReport) + Sync,
    {
        let report = if state.abort.load(Ordering::SeqCst) {
            ScenarioReport::skipped(planned)
        } else {
            match self.run_scenario(planned, state.timeout).await {
                Ok(report) => {
                    if state.stop_on_failure && !report.status.is_ok() {
                        info!(scenario = %report.qualified_name(), "stopping after failure");
                        state.stop(format!("stopped after failure of {}", report.qualified_name()));
                    }
                    report
                }
                Err((report, e)) => {
                    warn!(error = %e, "fatal error, aborting run");
                    state.stop(e.to_string());
                    report
                }
            }
        };
        on_done(&report);
        (index, report)
    }

    /// Runs one scenario with guaranteed teardown. The error half carries a
    /// fatal error together with the report it produced.
    async fn run_scenario(
        &self,
        planned: &PlannedScenario,
        timeout: Option<Duration>,
    ) -> std::result::Result<ScenarioReport, (ScenarioReport, HarnessError)> {
        let clock = Instant::now();
        let mut report = ScenarioReport::skipped(planned);
        let name = planned.scenario.qualified_name();
        info!(scenario = %name, strategy = %planned.strategy, "scenario started");

        let session = match self.manager.acquire().await {
            Ok(session) => session,
            // No session within the acquire timeout means the database is
            // unreachable or the pool is wedged; neither recovers mid-run.
            Err(e @ HarnessError::PoolExhausted { .. }) => {
                let error = HarnessError::Connection(format!("cannot acquire a session: {}", e));
                return self.finish_early(report, "acquire a session", error);
            }
            Err(e) => return self.finish_early(report, "acquire a session", e),
        };
        let monitor = PerformanceMonitor::new(self.config.performance.clone(), self.config.run.operation_timeout())
            .with_pool(self.manager.clone());
        let scope = TransactionScope::new(planned.strategy, self.schema.clone(), self.baseline.clone());
        let mut ctx = ScenarioContext::new(
            session,
            self.manager.clone(),
            self.schema.clone(),
            self.seeder.clone(),
            scope,
            monitor,
            self.config.clone(),
        );

        let mut timed_out = false;
        let failure = match ctx.scope.begin(&mut ctx.session).await {
            Err(e) => Some(("begin scenario scope".to_string(), e)),
            Ok(()) => {
                let body = run_steps(&mut ctx, &planned.steps, &mut report.steps);
                let outcome = match timeout {
                    Some(limit) => {
                        let bounded = tokio::time::timeout(limit, body).await;
                        bounded.unwrap_or_else(|_| {
                            timed_out = true;
                            Err((
                                ctx.current_step().to_string(),
                                HarnessError::Timeout {
                                    operation: format!("scenario {}", name),
                                    after: limit,
                                },
                            ))
                        })
                    }
                    None => body.await,
                };
                if timed_out {
                    // The interrupted statement may still be running.
                    ctx.manager.discard(&mut ctx.session);
                }
                outcome.err().or_else(|| unchecked_failure(&ctx))
            }
        };

        let manager = ctx.manager.clone();
        let teardown = ctx.scope.teardown(&manager, &mut ctx.session).await;
        if !ctx.session.is_released() {
            if let Err(e) = manager.release(&mut ctx.session).await {
                warn!(scenario = %name, error = %e, "release after teardown failed");
            }
        }
        report.metrics = ctx.take_metrics();
        report.concurrency = ctx.take_concurrency();
        report.elapsed = clock.elapsed();

        report.status = if timed_out {
            ScenarioStatus::TimedOut
        } else if failure.is_some() {
            ScenarioStatus::Failed
        } else {
            ScenarioStatus::Passed
        };
        let mut fatal = None;
        if let Some((step, error)) = failure {
            if error.is_fatal() {
                fatal = Some(error.clone());
            }
            report.failure = Some(StepFailure::new(&step, &error));
        }
        if let Err(e) = teardown {
            warn!(scenario = %name, error = %e, "teardown failed");
            report.teardown_error = Some(e.to_string());
            if report.status == ScenarioStatus::Passed {
                report.status = ScenarioStatus::Failed;
            }
            if e.is_fatal() {
                fatal.get_or_insert(e);
            }
        }

        info!(
            scenario = %name,
            status = ?report.status,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scenario finished"
        );
        match fatal {
            Some(e) => Err((report, e)),
            None => Ok(report),
        }
    }

    fn finish_early(
        &self,
        mut report: ScenarioReport,
        what: &str,
        error: HarnessError,
    ) -> std::result::Result<ScenarioReport, (ScenarioReport, HarnessError)> {
        warn!(scenario = %report.qualified_name(), error = %error, "could not {}", what);
        report.status = ScenarioStatus::Failed;
        report.failure = Some(StepFailure::new(what, &error));
        if error.is_fatal() {
            Err((report, error))
        } else {
            Ok(report)
        }
    }

    /// Drops the baseline tables when `data.cleanup_after_tests` is set, then
    /// closes the pool.
    pub async fn shutdown(self) -> Result<()> {
        let result = if self.config.data.cleanup_after_tests {
            let mut session = self.manager.acquire().await?;
            let dropped = self.seeder.drop_baseline(&mut session).await;
            self.manager.release(&mut session).await?;
            dropped
        } else {
            Ok(())
        };
        self.manager.close().await;
        result
    }
}

/// Executes steps in order, stopping at the first failure. Remaining steps
/// stay reported as skipped.
async fn run_steps(
    ctx: &mut ScenarioContext,
    steps: &[ResolvedStep],
    reports: &mut [StepReport],
) -> std::result::Result<(), (String, HarnessError)> {
    for (resolved, report) in steps.iter().zip(reports.iter_mut()) {
        let text = resolved.step.to_string();
        ctx.set_step(&resolved.step.text);
        let clock = Instant::now();
        let result = resolved.run(ctx).await;
        report.elapsed = clock.elapsed();
        match result {
            Ok(()) => report.status = ScenarioStatus::Passed,
            Err(e) => {
                report.status = ScenarioStatus::Failed;
                return Err((text, e));
            }
        }
    }
    Ok(())
}

/// First failed outcome no Then step looked at, as an assertion failure.
fn unchecked_failure(ctx: &ScenarioContext) -> Option<(String, HarnessError)> {
    let unseen = ctx.uninspected_failures().into_iter().next()?;
    let error = unseen.result.as_ref().err()?;
    Some((
        unseen.step.clone(),
        HarnessError::mismatch(
            format!("\"{}\" to succeed or be checked", unseen.step),
            format!("{}: {}", error.kind(), error),
        ),
    ))
}

fn plan(
    registry: &StepRegistry,
    schema: &SchemaManager,
    features: &[Feature],
    filter: &RunFilter,
) -> Result<Vec<PlannedScenario>> {
    let mut planned = Vec::new();
    for feature in features {
        for scenario in feature.scenarios() {
            if !filter.matches(&scenario) {
                continue;
            }
            let steps = scenario
                .steps()
                .iter()
                .map(|step| registry.resolve(step))
                .collect::<Result<Vec<_>>>()?;
            let strategy = strategy_for(schema, &scenario, &steps);
            planned.push(PlannedScenario {
                scenario,
                steps,
                strategy,
            });
        }
    }
    Ok(planned)
}

/// Restore when tagged, when any step commits, works across sessions, or
/// issues DDL the dialect cannot roll back.
fn strategy_for(schema: &SchemaManager, scenario: &Scenario, steps: &[ResolvedStep]) -> TeardownStrategy {
    let needs_restore = scenario.has_tag(RESTORE_TAG)
        || steps.iter().any(|s| {
            s.traits.commits
                || s.traits.cross_session
                || s.traits.ddl.map(|op| !schema.is_transactional(op)).unwrap_or(false)
        });
    if needs_restore {
        TeardownStrategy::Restore
    } else {
        TeardownStrategy::Rollback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::dialect::Dialect;
    use crate::features;
    use crate::registry::StepArgs;
    use futures::future::BoxFuture;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.database = DatabaseConfig {
            database: tmp.path().join("runner.db").display().to_string(),
            pool_size: 6,
            ..DatabaseConfig::default()
        };
        config.data.cleanup_after_tests = false;
        config
    }

    fn pause<'a>(_ctx: &'a mut ScenarioContext, args: StepArgs) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(args.int("ms")? as u64)).await;
            Ok(())
        })
    }

    fn registry_with_pause() -> StepRegistry {
        let mut registry = StepRegistry::standard().unwrap();
        registry.step("I wait for {ms:d} milliseconds", pause).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_smoke_features_pass() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let filter = RunFilter {
            tags: "@smoke".parse().unwrap(),
            ..RunFilter::default()
        };
        let report = harness.run(&features::catalogue(), &filter).await.unwrap();
        for scenario in &report.scenarios {
            assert_eq!(
                scenario.status,
                ScenarioStatus::Passed,
                "{}: {:?}",
                scenario.qualified_name(),
                scenario.failure
            );
        }
        assert!(report.summary().total >= 4);
        assert!(report.is_success());
        harness.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scenarios_do_not_leak_into_each_other() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let feature = Feature::new("Isolation")
            .scenario(
                Scenario::new("first")
                    .when("I create a new user with username \"leaky\" and email \"leaky@example.com\"")
                    .then("the user should be created successfully")
                    .and("the user count should be 4"),
            )
            .scenario(
                Scenario::new("committed")
                    .when("I start a transaction")
                    .and("I create a new user with username \"kept\" and email \"kept@example.com\"")
                    .and("I commit the transaction")
                    .then("the user count should be 4"),
            )
            .scenario(Scenario::new("second").then("the user count should be 3"));
        let report = harness.run(&[feature.clone()], &RunFilter::default()).await.unwrap();
        assert_eq!(report.summary().passed, 3, "{:?}", report.scenarios);
        assert_eq!(report.scenarios[0].strategy, TeardownStrategy::Rollback);
        assert_eq!(report.scenarios[1].strategy, TeardownStrategy::Restore);

        // A second run starts from the same baseline after the committed scenario.
        let again = harness.run(&[feature], &RunFilter::default()).await.unwrap();
        assert!(again.is_success(), "{:?}", again.scenarios);
    }

    #[tokio::test]
    async fn test_unbound_step_fails_before_running() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let feature = Feature::new("Broken").scenario(
            Scenario::new("typo")
                .when("I create a new user with username \"x\" and email \"x@example.com\"")
                .then("the usr should be created"),
        );
        let err = harness.run(&[feature], &RunFilter::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoBinding);
    }

    #[tokio::test]
    async fn test_unchecked_failure_fails_scenario() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let feature = Feature::new("Unchecked").scenario(
            Scenario::new("duplicate without a check")
                .when("I try to create a user with duplicate username \"john_doe\""),
        );
        let report = harness.run(&[feature], &RunFilter::default()).await.unwrap();
        let scenario = &report.scenarios[0];
        assert_eq!(scenario.status, ScenarioStatus::Failed);
        let failure = scenario.failure.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::AssertionFailed);
        assert!(failure.actual.as_deref().unwrap().contains("UniqueConstraintViolation"));
    }

    #[tokio::test]
    async fn test_failed_step_skips_the_rest() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let feature = Feature::new("Failing").scenario(
            Scenario::new("wrong count")
                .then("the user count should be 99")
                .and("the user count should be 3"),
        );
        let report = harness.run(&[feature], &RunFilter::default()).await.unwrap();
        let scenario = &report.scenarios[0];
        assert_eq!(scenario.steps[0].status, ScenarioStatus::Failed);
        assert_eq!(scenario.steps[1].status, ScenarioStatus::Skipped);
        let failure = scenario.failure.as_ref().unwrap();
        assert_eq!(failure.expected.as_deref(), Some("users to have 99 rows"));
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_scenario_timeout_still_tears_down() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), registry_with_pause()).await.unwrap();
        let feature = Feature::new("Slow")
            .scenario(
                Scenario::new("sleeper")
                    .when("I create a new user with username \"sleepy\" and email \"sleepy@example.com\"")
                    .then("the user should be created successfully")
                    .when("I wait for 2000 milliseconds"),
            )
            .scenario(Scenario::new("after").then("the user count should be 3"));
        let filter = RunFilter {
            timeout: Some(Duration::from_millis(300)),
            ..RunFilter::default()
        };
        let report = harness.run(&[feature], &filter).await.unwrap();
        assert_eq!(report.scenarios[0].status, ScenarioStatus::TimedOut);
        assert_eq!(report.scenarios[0].failure.as_ref().unwrap().kind, ErrorKind::Timeout);
        assert_eq!(report.scenarios[1].status, ScenarioStatus::Passed);
    }

    #[tokio::test]
    async fn test_stop_on_failure_skips_remaining() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let feature = Feature::new("Stops")
            .scenario(Scenario::new("broken").then("the user count should be 99"))
            .scenario(Scenario::new("never run").then("the user count should be 3"));
        let filter = RunFilter {
            stop_on_failure: true,
            ..RunFilter::default()
        };
        let report = harness.run(&[feature], &filter).await.unwrap();
        assert_eq!(report.scenarios[0].status, ScenarioStatus::Failed);
        assert_eq!(report.scenarios[1].status, ScenarioStatus::Skipped);
        assert!(report.aborted.as_deref().unwrap().contains("broken"));
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_unavailable_session_aborts_run() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = config(&tmp);
        cfg.database.pool_size = 1;
        cfg.database.acquire_timeout_s = 0.3;
        let harness = Harness::connect(cfg, StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let mut held = harness.manager().acquire().await.unwrap();

        let feature = Feature::new("Starved")
            .scenario(Scenario::new("first").then("the user count should be 3"))
            .scenario(Scenario::new("second").then("the user count should be 3"));
        let report = harness.run(&[feature], &RunFilter::default()).await.unwrap();
        assert_eq!(report.scenarios[0].status, ScenarioStatus::Failed);
        assert_eq!(report.scenarios[0].failure.as_ref().unwrap().kind, ErrorKind::Connection);
        assert_eq!(report.scenarios[1].status, ScenarioStatus::Skipped);
        assert!(report.aborted.is_some());

        harness.manager().release(&mut held).await.unwrap();
    }

    #[tokio::test]
    async fn test_dry_run_and_filters() {
        let tmp = TempDir::new().unwrap();
        let harness = Harness::connect(config(&tmp), StepRegistry::standard().unwrap())
            .await
            .unwrap();
        let filter = RunFilter {
            feature: Some("schema changes".into()),
            name: Some("index".into()),
            dry_run: true,
            ..RunFilter::default()
        };
        let report = harness.run(&features::catalogue(), &filter).await.unwrap();
        assert_eq!(report.summary().total, 1);
        assert_eq!(report.summary().skipped, 1);
        assert!(report.scenarios[0].steps.iter().all(|s| s.status == ScenarioStatus::Skipped));
        assert!(report.is_success());
    }

    #[test]
    fn test_strategy_selection() {
        let registry = StepRegistry::standard().unwrap();
        let sqlite = SchemaManager::new(Dialect::Sqlite, TableLocks::new());
        let mysql = SchemaManager::new(Dialect::Mysql, TableLocks::new());
        let resolve = |scenario: &Scenario| {
            scenario
                .steps()
                .iter()
                .map(|s| registry.resolve(s).unwrap())
                .collect::<Vec<_>>()
        };

        let ddl = Scenario::new("ddl").when("I drop table \"orders\"");
        assert_eq!(strategy_for(&sqlite, &ddl, &resolve(&ddl)), TeardownStrategy::Rollback);
        assert_eq!(strategy_for(&mysql, &ddl, &resolve(&ddl)), TeardownStrategy::Restore);

        let concurrent = Scenario::new("c")
            .when("5 concurrent read operations and 2 concurrent write operations are performed");
        assert_eq!(
            strategy_for(&sqlite, &concurrent, &resolve(&concurrent)),
            TeardownStrategy::Restore
        );

        let tagged = Scenario::new("t").tag("@restore").then("the user count should be 3");
        assert_eq!(strategy_for(&sqlite, &tagged, &resolve(&tagged)), TeardownStrategy::Restore);
    }
}
