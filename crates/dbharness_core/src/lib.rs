//! dbharness core library
//!
//! A scenario-driven database test harness runtime, providing:
//! - Pooled sessions against SQLite, PostgreSQL or MySQL
//! - DDL, fixture seeding and schema introspection
//! - Per-scenario isolation (rollback or snapshot restore)
//! - Timing, resource sampling and concurrency summaries
//! - A step registry binding scenario text to handlers
//!
//! # Quick Start
//!
//! ```no_run
//! use dbharness_core::{features, Harness, HarnessConfig, RunFilter, StepRegistry};
//!
//! # async fn demo() -> dbharness_core::Result<()> {
//! let config = HarnessConfig::default();
//! let harness = Harness::connect(config, StepRegistry::standard()?).await?;
//! let report = harness.run(&features::catalogue(), &RunFilter::default()).await?;
//! assert!(report.summary().failed == 0);
//! harness.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Writing scenarios
//!
//! ```
//! use dbharness_core::{DataTable, Scenario};
//!
//! let scenario = Scenario::new("Insert a record")
//!     .tag("@dml")
//!     .given("the database is initialized")
//!     .given_table(
//!         "a table \"test_users\" exists with columns",
//!         DataTable::new(["name", "type", "constraints"])
//!             .row(["id", "INTEGER", "PRIMARY KEY"])
//!             .row(["name", "VARCHAR(100)", "NOT NULL"])
//!             .row(["email", "VARCHAR(100)", "UNIQUE"])
//!             .row(["age", "INTEGER", ""]),
//!     )
//!     .when("I insert a user named \"John Doe\" with email \"john@example.com\" and age 30")
//!     .then("the table \"test_users\" should have 1 record");
//! assert_eq!(scenario.steps().len(), 4);
//! ```

mod assertions;
mod config;
mod connection;
mod context;
mod dialect;
mod error;
pub mod features;
mod locks;
mod perf;
mod registry;
mod runner;
mod scenario;
mod schema;
mod seeder;
pub mod steps;
mod tags;
mod transaction;
mod translate;
mod types;

pub use assertions::{
    assert_column_set, assert_error, assert_field, assert_fields, assert_monotonic,
    assert_row_count, assert_set_equal, assert_structure, values_equal, StructureExpectation,
};
pub use config::{
    DataConfig, DatabaseConfig, HarnessConfig, PerformanceConfig, Profile, ReportConfig,
    ReportFormat, RunConfig, CONFIG_FILE,
};
pub use connection::{ConnectionManager, PoolStats, Session};
pub use context::{ScenarioContext, StepOutcome};
pub use dialect::Dialect;
pub use error::{ErrorKind, HarnessError, Result};
pub use locks::TableLocks;
pub use perf::{ConcurrencySummary, PerformanceMetric, PerformanceMonitor};
pub use registry::{ArgValue, ResolvedStep, StepArgs, StepDefinition, StepHandler, StepRegistry, StepTraits};
pub use runner::{
    Harness, PlannedScenario, RunFilter, RunReport, RunSummary, ScenarioReport, ScenarioStatus,
    StepFailure, StepReport, RESTORE_TAG,
};
pub use scenario::{DataTable, Feature, Scenario, Step, StepKeyword};
pub use schema::{DdlOperation, SchemaManager, SchemaSnapshot};
pub use seeder::{
    BaselineSummary, BulkReport, DataSeeder, Generator, ProductGenerator, UserGenerator,
    BASELINE_TABLES,
};
pub use tags::TagExpression;
pub use transaction::{ScopeState, TeardownStrategy, TransactionScope};
pub use translate::translate;
pub use types::*;
