//! Harness configuration: file, named profiles and environment overrides.

use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "dbharness.toml";

/// Comprehensive configuration for a harness run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HarnessConfig {
    /// Target database and pool.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Scheduling and timeouts.
    #[serde(default)]
    pub run: RunConfig,

    /// Performance budgets and workload sizes.
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Baseline fixture handling.
    #[serde(default)]
    pub data: DataConfig,

    /// Report output.
    #[serde(default)]
    pub report: ReportConfig,
}

impl HarnessConfig {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("failed to read config: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| HarnessError::Config(format!("failed to parse config: {}", e)))
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| HarnessError::Config(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    /// Resolves the effective configuration.
    ///
    /// An explicit profile wins over the file; otherwise the file is used when
    /// present, falling back to the `TEST_ENV` profile (default `local`).
    /// Environment variables are applied last, then the result is validated.
    pub fn resolve(file: Option<&Path>, profile: Option<Profile>) -> Result<Self> {
        Self::resolve_with_driver(file, profile, None)
    }

    /// [`Self::resolve`] with a driver override that beats both the file and
    /// `DB_DRIVER`.
    pub fn resolve_with_driver(file: Option<&Path>, profile: Option<Profile>, driver: Option<Dialect>) -> Result<Self> {
        let mut config = match (profile, file) {
            (Some(profile), _) => profile.defaults(),
            (None, Some(path)) if path.exists() => Self::load(path)?,
            (None, _) => {
                let profile = match env_value::<Profile>("TEST_ENV")? {
                    Some(p) => p,
                    None => Profile::Local,
                };
                profile.defaults()
            }
        };
        config.apply_env()?;
        if let Some(driver) = driver {
            config.database.driver = driver;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `DB_*` and related environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        let db = &mut self.database;
        if let Some(v) = env_value::<Dialect>("DB_DRIVER")? {
            db.driver = v;
        }
        if let Some(v) = env_value::<String>("DB_HOST")? {
            db.host = v;
        }
        if let Some(v) = env_value::<u16>("DB_PORT")? {
            db.port = v;
        }
        if let Some(v) = env_value::<String>("DB_NAME")? {
            db.database = v;
        }
        if let Some(v) = env_value::<String>("DB_USER")? {
            db.username = v;
        }
        if let Some(v) = env_value::<String>("DB_PASSWORD")? {
            db.password = v;
        }
        if let Some(v) = env_value::<String>("DATABASE_URL")? {
            db.url = Some(v);
        }
        if let Some(v) = env_value::<u32>("DB_POOL_SIZE")? {
            db.pool_size = v;
        }
        if let Some(v) = env_value::<f64>("DB_POOL_TIMEOUT")? {
            db.acquire_timeout_s = v;
        }
        if let Some(v) = env_value::<f64>("TIMEOUT_SECONDS")? {
            self.run.operation_timeout_s = v;
        }
        if let Some(v) = env_value::<f64>("PERFORMANCE_THRESHOLD")? {
            self.performance.default_threshold_s = v;
        }
        if let Some(v) = env_value::<usize>("BULK_OPERATION_COUNT")? {
            self.performance.bulk_operation_count = v;
        }
        if let Some(v) = env_value::<usize>("CONCURRENT_OPERATIONS")? {
            self.performance.concurrent_operations = v;
        }
        Ok(())
    }

    /// Rejects values that would make the run meaningless.
    pub fn validate(&self) -> Result<()> {
        let db = &self.database;
        if db.pool_size == 0 {
            return Err(HarnessError::Config("database.pool_size must be >= 1".into()));
        }
        for (name, value) in [
            ("database.acquire_timeout_s", db.acquire_timeout_s),
            ("database.statement_timeout_s", db.statement_timeout_s),
            ("run.operation_timeout_s", self.run.operation_timeout_s),
            ("performance.default_threshold_s", self.performance.default_threshold_s),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(HarnessError::Config(format!("{} must be > 0", name)));
            }
        }
        if let Some(t) = self.run.scenario_timeout_s {
            if !(t.is_finite() && t > 0.0) {
                return Err(HarnessError::Config("run.scenario_timeout_s must be > 0".into()));
            }
        }
        if self.run.workers == 0 {
            return Err(HarnessError::Config("run.workers must be >= 1".into()));
        }
        if self.performance.bulk_batch_size == 0 {
            return Err(HarnessError::Config(
                "performance.bulk_batch_size must be >= 1".into(),
            ));
        }
        if db.driver != Dialect::Sqlite && db.url.is_none() && db.host.is_empty() {
            return Err(HarnessError::Config(format!(
                "database.host is required for {}",
                db.driver
            )));
        }
        Ok(())
    }
}

/// Target database and pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Engine dialect (sqlite, postgresql, mysql).
    pub driver: Dialect,
    /// Server host (ignored for SQLite).
    pub host: String,
    /// Server port (ignored for SQLite).
    pub port: u16,
    /// Database name; for SQLite, the file stem or a path.
    pub database: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Full connection URL, overriding the fields above.
    pub url: Option<String>,
    /// Maximum concurrent sessions (default: 20).
    pub pool_size: u32,
    /// Maximum wait for a pooled session in seconds (default: 30).
    pub acquire_timeout_s: f64,
    /// Maximum duration of one SQL statement in seconds (default: 30).
    pub statement_timeout_s: f64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: Dialect::Sqlite,
            host: "localhost".to_string(),
            port: 5432,
            database: "test_db".to_string(),
            username: "test_user".to_string(),
            password: "test_password".to_string(),
            url: None,
            pool_size: 20,
            acquire_timeout_s: 30.0,
            statement_timeout_s: 30.0,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL for the configured driver.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match self.driver {
            Dialect::Sqlite => {
                let path = if self.database.ends_with(".db") || self.database.contains('/') {
                    self.database.clone()
                } else {
                    format!("{}.db", self.database)
                };
                format!("sqlite://{}?mode=rwc", path)
            }
            Dialect::Postgresql => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.database
            ),
            Dialect::Mysql => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.username, self.password, self.host, self.port, self.database
            ),
        }
    }

    /// Connection URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let url = self.connection_url();
        if self.password.is_empty() {
            return url;
        }
        url.replace(&format!(":{}@", self.password), ":***@")
    }

    /// Acquire timeout as a Duration.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.acquire_timeout_s)
    }

    /// Statement timeout as a Duration.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.statement_timeout_s)
    }
}

/// Scheduling and timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Profile these settings came from.
    pub profile: Profile,
    /// Scenarios executed in parallel (default: 1).
    pub workers: usize,
    /// Hard timeout for timed operations in seconds (default: 30).
    pub operation_timeout_s: f64,
    /// Optional timeout for a whole scenario body in seconds.
    pub scenario_timeout_s: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Local,
            workers: 1,
            operation_timeout_s: 30.0,
            scenario_timeout_s: None,
        }
    }
}

impl RunConfig {
    /// Operation timeout as a Duration.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.operation_timeout_s)
    }

    /// Scenario timeout as a Duration.
    pub fn scenario_timeout(&self) -> Option<Duration> {
        self.scenario_timeout_s.map(Duration::from_secs_f64)
    }
}

/// Performance budgets and workload sizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Threshold used when a label has no entry in `thresholds` (default: 5).
    pub default_threshold_s: f64,
    /// Per-operation thresholds in seconds, keyed by metric label.
    pub thresholds: BTreeMap<String, f64>,
    /// Row count for bulk scenarios (default: 1000).
    pub bulk_operation_count: usize,
    /// Parallel tasks for concurrency scenarios (default: 50).
    pub concurrent_operations: usize,
    /// Row count above which bulk inserts use multi-row statements (default: 10).
    pub bulk_batch_threshold: usize,
    /// Rows per multi-row statement (default: 200).
    pub bulk_batch_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            default_threshold_s: 5.0,
            thresholds: BTreeMap::new(),
            bulk_operation_count: 1000,
            concurrent_operations: 50,
            bulk_batch_threshold: 10,
            bulk_batch_size: 200,
        }
    }
}

impl PerformanceConfig {
    /// Threshold for a metric label.
    pub fn threshold_for(&self, label: &str) -> Duration {
        let secs = self
            .thresholds
            .get(label)
            .copied()
            .unwrap_or(self.default_threshold_s);
        Duration::from_secs_f64(secs)
    }
}

/// Baseline fixture handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    /// Seed users/products/orders before the run (default: true).
    pub load_test_data: bool,
    /// Drop the baseline tables after the run (default: true).
    pub cleanup_after_tests: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            load_test_data: true,
            cleanup_after_tests: true,
        }
    }
}

/// Report output configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    /// Output format.
    pub format: ReportFormat,
    /// Directory for file reports.
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: ReportFormat::Pretty,
            output_dir: PathBuf::from("reports"),
        }
    }
}

/// Report formats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Human-readable console summary.
    #[default]
    Pretty,
    /// JSON document.
    Json,
    /// JUnit XML.
    Junit,
    /// Standalone HTML page.
    Html,
}

impl FromStr for ReportFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "junit" | "xml" => Ok(Self::Junit),
            "html" => Ok(Self::Html),
            other => Err(HarnessError::Config(format!("unknown report format: {}", other))),
        }
    }
}

/// Named environment profiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Developer machine, SQLite.
    #[default]
    Local,
    /// CI runner, SQLite.
    Ci,
    /// Shared PostgreSQL staging server.
    Staging,
    /// Production-like PostgreSQL server.
    Production,
}

impl Profile {
    /// Configuration defaults for this profile.
    pub fn defaults(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.run.profile = *self;
        let (threshold, bulk, concurrent) = match self {
            Profile::Local => {
                config.database.database = "local_test_db".into();
                (10.0, 100, 10)
            }
            Profile::Ci => {
                config.database.database = "ci_test_db".into();
                (15.0, 500, 25)
            }
            Profile::Staging => {
                config.database.driver = Dialect::Postgresql;
                config.database.host = "staging-db.example.com".into();
                config.database.database = "staging_test_db".into();
                (5.0, 1000, 50)
            }
            Profile::Production => {
                config.database.driver = Dialect::Postgresql;
                config.database.host = "prod-db.example.com".into();
                config.database.database = "prod_test_db".into();
                (2.0, 2000, 100)
            }
        };
        config.performance.default_threshold_s = threshold;
        config.performance.bulk_operation_count = bulk;
        config.performance.concurrent_operations = concurrent;
        config
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Profile::Local => "local",
            Profile::Ci => "ci",
            Profile::Staging => "staging",
            Profile::Production => "production",
        };
        f.write_str(name)
    }
}

impl FromStr for Profile {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "ci" => Ok(Self::Ci),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(HarnessError::Config(format!("unknown profile: {}", other))),
        }
    }
}

/// Parses an environment variable, ignoring trailing `# comments`.
fn env_value<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => {
            let clean = raw.split('#').next().unwrap_or("").trim();
            if clean.is_empty() {
                return Ok(None);
            }
            clean
                .parse::<T>()
                .map(Some)
                .map_err(|e| HarnessError::Config(format!("{}={:?}: {}", key, clean, e)))
        }
        Err(_) => Ok(None),
    }
}
