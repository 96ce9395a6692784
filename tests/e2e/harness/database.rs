use anyhow::{Context, Result};
use dbharness_core::{
    DatabaseConfig, Harness, HarnessConfig, SchemaManager, StepRegistry, TableLocks,
};
use tempfile::TempDir;

/// A throwaway SQLite database and the configuration pointing at it.
pub struct TestDatabase {
    dir: TempDir,
    config: HarnessConfig,
}

impl TestDatabase {
    /// Fresh database with workloads sized for tests.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp directory")?;
        let mut config = HarnessConfig::default();
        config.database = DatabaseConfig {
            database: dir.path().join("e2e.db").display().to_string(),
            pool_size: 8,
            acquire_timeout_s: 10.0,
            ..DatabaseConfig::default()
        };
        config.performance.bulk_operation_count = 200;
        config.performance.concurrent_operations = 20;
        config.performance.default_threshold_s = 20.0;
        config.data.cleanup_after_tests = false;
        Ok(Self { dir, config })
    }

    /// Configuration handed to the harness.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Adjusts the configuration before connecting.
    pub fn configure(&mut self, f: impl FnOnce(&mut HarnessConfig)) {
        f(&mut self.config);
    }

    /// Connects a harness with `registry`.
    pub async fn connect(&self, registry: StepRegistry) -> Result<Harness> {
        Harness::connect(self.config.clone(), registry)
            .await
            .context("Failed to connect harness")
    }
}

/// Row count of `table`, read on a fresh session.
pub async fn count(harness: &Harness, table: &str) -> Result<i64> {
    let manager = harness.manager();
    let mut session = manager.acquire().await?;
    let sql = format!("SELECT COUNT(*) FROM {}", manager.dialect().quote(table));
    let counted = session.scalar_i64(&sql, &[]).await;
    manager.release(&mut session).await?;
    Ok(counted?)
}

/// True if `table` exists.
pub async fn table_exists(harness: &Harness, table: &str) -> Result<bool> {
    let manager = harness.manager();
    let mut session = manager.acquire().await?;
    let schema = SchemaManager::new(manager.dialect(), TableLocks::new());
    let exists = schema.table_exists(&mut session, table).await;
    manager.release(&mut session).await?;
    Ok(exists?)
}
