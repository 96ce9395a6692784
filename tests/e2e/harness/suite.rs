use super::database::TestDatabase;
use super::expectations::Expectation;
use anyhow::{Context, Result};
use dbharness_core::{
    features, ErrorKind, Feature, HarnessConfig, RunFilter, RunReport, ScenarioStatus,
    StepRegistry, TeardownStrategy,
};
use std::time::Duration;

/// Fluent DSL for an end-to-end run against a fresh database.
pub struct Suite {
    name: String,
    features: Vec<Feature>,
    filter: RunFilter,
    registry: Option<StepRegistry>,
    config: Vec<Box<dyn FnOnce(&mut HarnessConfig) + Send>>,
    expectations: Vec<Expectation>,
}

impl Suite {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            features: Vec::new(),
            filter: RunFilter::default(),
            registry: None,
            config: Vec::new(),
            expectations: Vec::new(),
        }
    }

    // ===== Input =====

    /// Adds a feature.
    pub fn feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    /// Adds the built-in catalogue.
    pub fn catalogue(mut self) -> Self {
        self.features.extend(features::catalogue());
        self
    }

    /// Uses `registry` instead of the standard library.
    pub fn registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adjusts the harness configuration.
    pub fn configure(mut self, f: impl FnOnce(&mut HarnessConfig) + Send + 'static) -> Self {
        self.config.push(Box::new(f));
        self
    }

    /// Runs scenarios on `n` parallel sessions.
    pub fn workers(self, n: usize) -> Self {
        self.configure(move |c| c.run.workers = n)
    }

    // ===== Filter =====

    pub fn tags(mut self, expression: &str) -> Self {
        self.filter.tags = expression.parse().expect("valid tag expression");
        self
    }

    pub fn only_feature(mut self, feature: &str) -> Self {
        self.filter.feature = Some(feature.to_string());
        self
    }

    pub fn named(mut self, pattern: &str) -> Self {
        self.filter.name = Some(pattern.to_string());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.filter.dry_run = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.filter.timeout = Some(timeout);
        self
    }

    // ===== Expectations =====

    pub fn expect_all_passed(mut self) -> Self {
        self.expectations.push(Expectation::AllPassed);
        self
    }

    pub fn expect_total(mut self, n: usize) -> Self {
        self.expectations.push(Expectation::Total(n));
        self
    }

    pub fn expect_status(mut self, scenario: &str, status: ScenarioStatus) -> Self {
        self.expectations.push(Expectation::Status {
            scenario: scenario.to_string(),
            status,
        });
        self
    }

    pub fn expect_passed(self, scenario: &str) -> Self {
        self.expect_status(scenario, ScenarioStatus::Passed)
    }

    pub fn expect_failed_with(mut self, scenario: &str, kind: ErrorKind) -> Self {
        self.expectations.push(Expectation::FailedWith {
            scenario: scenario.to_string(),
            kind,
        });
        self
    }

    pub fn expect_strategy(mut self, scenario: &str, strategy: TeardownStrategy) -> Self {
        self.expectations.push(Expectation::Strategy {
            scenario: scenario.to_string(),
            strategy,
        });
        self
    }

    pub fn expect_step_skipped(mut self, scenario: &str, step: usize) -> Self {
        self.expectations.push(Expectation::StepSkipped {
            scenario: scenario.to_string(),
            step,
        });
        self
    }

    pub fn expect_metric(mut self, scenario: &str, label: &str) -> Self {
        self.expectations.push(Expectation::MetricRecorded {
            scenario: scenario.to_string(),
            label: label.to_string(),
        });
        self
    }

    pub fn expect_no_contention(mut self, scenario: &str) -> Self {
        self.expectations.push(Expectation::NoContention {
            scenario: scenario.to_string(),
        });
        self
    }

    pub fn expect_rows(mut self, table: &str, count: i64) -> Self {
        self.expectations.push(Expectation::RowCount {
            table: table.to_string(),
            count,
        });
        self
    }

    pub fn expect_table_absent(mut self, table: &str) -> Self {
        self.expectations.push(Expectation::TableAbsent(table.to_string()));
        self
    }

    // ===== Execution =====

    /// Connects, runs, checks every expectation and shuts down.
    pub async fn run(self) -> Result<RunReport> {
        let mut db = TestDatabase::new()?;
        for f in self.config {
            db.configure(f);
        }
        let registry = match self.registry {
            Some(registry) => registry,
            None => StepRegistry::standard()?,
        };
        let harness = db.connect(registry).await?;

        let report = harness
            .run(&self.features, &self.filter)
            .await
            .with_context(|| format!("suite {} could not run", self.name))?;
        for expectation in &self.expectations {
            expectation
                .check(&harness, &report)
                .await
                .with_context(|| format!("suite {}: {:?}", self.name, expectation))?;
        }
        harness.shutdown().await?;
        Ok(report)
    }
}
