use super::database;
use anyhow::{bail, Context, Result};
use dbharness_core::{ErrorKind, Harness, RunReport, ScenarioReport, ScenarioStatus, TeardownStrategy};

/// Declarative checks on a finished run and the database it left behind.
#[derive(Debug, Clone)]
pub enum Expectation {
    // Run outcome
    AllPassed,
    Total(usize),
    Status { scenario: String, status: ScenarioStatus },
    FailedWith { scenario: String, kind: ErrorKind },
    Strategy { scenario: String, strategy: TeardownStrategy },
    StepSkipped { scenario: String, step: usize },

    // Measurements
    MetricRecorded { scenario: String, label: String },
    NoContention { scenario: String },

    // Database state after teardown
    RowCount { table: String, count: i64 },
    TableAbsent(String),
}

impl Expectation {
    /// Evaluates the expectation.
    pub async fn check(&self, harness: &Harness, report: &RunReport) -> Result<()> {
        match self {
            Self::AllPassed => {
                let failed: Vec<String> = report
                    .scenarios
                    .iter()
                    .filter(|s| s.status != ScenarioStatus::Passed)
                    .map(|s| format!("{} ({:?}): {:?}", s.qualified_name(), s.status, s.failure))
                    .collect();
                if !failed.is_empty() {
                    bail!("scenarios did not pass:\n  {}", failed.join("\n  "));
                }
            }
            Self::Total(n) => {
                if report.scenarios.len() != *n {
                    bail!("expected {} scenarios, ran {}", n, report.scenarios.len());
                }
            }
            Self::Status { scenario, status } => {
                let found = find(report, scenario)?;
                if found.status != *status {
                    bail!(
                        "{} is {:?}, expected {:?} ({:?})",
                        scenario,
                        found.status,
                        status,
                        found.failure
                    );
                }
            }
            Self::FailedWith { scenario, kind } => {
                let found = find(report, scenario)?;
                match &found.failure {
                    Some(failure) if failure.kind == *kind => {}
                    other => bail!("{} failure is {:?}, expected {}", scenario, other, kind),
                }
            }
            Self::Strategy { scenario, strategy } => {
                let found = find(report, scenario)?;
                if found.strategy != *strategy {
                    bail!("{} ran with {}, expected {}", scenario, found.strategy, strategy);
                }
            }
            Self::StepSkipped { scenario, step } => {
                let found = find(report, scenario)?;
                let status = found
                    .steps
                    .get(*step)
                    .with_context(|| format!("{} has no step {}", scenario, step))?
                    .status;
                if status != ScenarioStatus::Skipped {
                    bail!("step {} of {} is {:?}", step, scenario, status);
                }
            }
            Self::MetricRecorded { scenario, label } => {
                let found = find(report, scenario)?;
                if !found.metrics.iter().any(|m| &m.label == label) {
                    bail!("{} recorded no '{}' metric", scenario, label);
                }
            }
            Self::NoContention { scenario } => {
                let found = find(report, scenario)?;
                let summary = found
                    .concurrency
                    .as_ref()
                    .with_context(|| format!("{} ran no concurrent batch", scenario))?;
                if summary.lock_conflicts > 0 || summary.pool_exhaustions > 0 {
                    bail!("{} saw contention: {:?}", scenario, summary);
                }
            }
            Self::RowCount { table, count } => {
                let actual = database::count(harness, table).await?;
                if actual != *count {
                    bail!("{} has {} rows, expected {}", table, actual, count);
                }
            }
            Self::TableAbsent(table) => {
                if database::table_exists(harness, table).await? {
                    bail!("table {} survived teardown", table);
                }
            }
        }
        Ok(())
    }
}

fn find<'a>(report: &'a RunReport, scenario: &str) -> Result<&'a ScenarioReport> {
    report
        .scenarios
        .iter()
        .find(|s| s.name == scenario)
        .with_context(|| format!("no scenario named {:?} in the report", scenario))
}
