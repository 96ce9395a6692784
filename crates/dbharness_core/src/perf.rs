//! Operation timing, resource sampling and concurrency summaries.

use crate::config::PerformanceConfig;
use crate::connection::{ConnectionManager, Session};
use crate::error::{ErrorKind, HarnessError, Result};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub(crate) fn as_secs<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// One timed operation. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetric {
    /// Operation label.
    pub label: String,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end.
    pub ended_at: DateTime<Utc>,
    /// Monotonic elapsed time.
    #[serde(serialize_with = "as_secs", rename = "elapsed_s")]
    pub elapsed: Duration,
    /// Resident memory growth in KiB, where the platform reports it.
    pub memory_delta_kb: Option<i64>,
    /// Sessions leased from the pool when the operation finished.
    pub pool_in_use: Option<u32>,
}

/// Aggregate outcome of a batch of concurrent operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConcurrencySummary {
    /// Operations started.
    pub attempted: usize,
    /// Operations that succeeded.
    pub succeeded: usize,
    /// Operations that failed.
    pub failed: usize,
    /// Failures of kind `LockConflict`.
    pub lock_conflicts: usize,
    /// Failures of kind `PoolExhausted`.
    pub pool_exhaustions: usize,
    /// Failures of kind `Timeout`.
    pub timeouts: usize,
    /// Wall time of the whole batch.
    #[serde(serialize_with = "as_secs", rename = "wall_time_s")]
    pub wall_time: Duration,
    /// Failure count per error kind.
    pub failures_by_kind: BTreeMap<String, usize>,
}

impl ConcurrencySummary {
    fn record(&mut self, outcome: &Result<()>) {
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(e) => {
                self.failed += 1;
                match e.kind() {
                    ErrorKind::LockConflict => self.lock_conflicts += 1,
                    ErrorKind::PoolExhausted => self.pool_exhaustions += 1,
                    ErrorKind::Timeout => self.timeouts += 1,
                    _ => {}
                }
                *self.failures_by_kind.entry(e.kind().to_string()).or_default() += 1;
            }
        }
    }

    /// True when no operation failed with a lock conflict.
    pub fn deadlock_free(&self) -> bool {
        self.lock_conflicts == 0
    }

    /// Merges another batch that ran alongside this one.
    pub fn merge(&mut self, other: &ConcurrencySummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.lock_conflicts += other.lock_conflicts;
        self.pool_exhaustions += other.pool_exhaustions;
        self.timeouts += other.timeouts;
        self.wall_time = self.wall_time.max(other.wall_time);
        for (kind, n) in &other.failures_by_kind {
            *self.failures_by_kind.entry(kind.clone()).or_default() += n;
        }
    }
}

/// Times operations and evaluates them against configured budgets.
#[derive(Debug, Clone)]
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    operation_timeout: Duration,
    manager: Option<Arc<ConnectionManager>>,
}

impl PerformanceMonitor {
    /// Monitor bound to `config`; every timed operation is cut off after
    /// `operation_timeout`.
    pub fn new(config: PerformanceConfig, operation_timeout: Duration) -> Self {
        Self {
            config,
            operation_timeout,
            manager: None,
        }
    }

    /// Samples pool usage from `manager` on every measurement.
    pub fn with_pool(mut self, manager: Arc<ConnectionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Hard limit applied by [`Self::time`].
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Budget for `label`: its configured threshold or the default.
    pub fn threshold_for(&self, label: &str) -> Duration {
        self.config.threshold_for(label)
    }

    /// Runs `op`, measuring wall clock, memory and pool usage.
    ///
    /// The operation is abandoned after the operation timeout and the result
    /// is a `Timeout` error; the metric is recorded either way.
    pub async fn time<T, F>(&self, label: &str, op: F) -> (Result<T>, PerformanceMetric)
    where
        F: Future<Output = Result<T>>,
    {
        let started_at = Utc::now();
        let memory_before = resident_kb();
        let clock = Instant::now();

        let result = match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::Timeout {
                operation: label.to_string(),
                after: self.operation_timeout,
            }),
        };

        let elapsed = clock.elapsed();
        let metric = PerformanceMetric {
            label: label.to_string(),
            started_at,
            ended_at: Utc::now(),
            elapsed,
            memory_delta_kb: match (memory_before, resident_kb()) {
                (Some(before), Some(after)) => Some(after - before),
                _ => None,
            },
            pool_in_use: self.manager.as_ref().map(|m| m.stats().leased),
        };
        debug!(label, elapsed_ms = elapsed.as_millis() as u64, ok = result.is_ok(), "timed");
        (result, metric)
    }

    /// Fails `PerformanceThresholdExceeded` when `metric` took longer than `max`.
    pub fn assert_within(&self, metric: &PerformanceMetric, max: Duration) -> Result<()> {
        if metric.elapsed > max {
            warn!(label = %metric.label, elapsed_ms = metric.elapsed.as_millis() as u64, "threshold exceeded");
            return Err(HarnessError::ThresholdExceeded {
                label: metric.label.clone(),
                actual: metric.elapsed,
                expected: max,
            });
        }
        Ok(())
    }

    /// [`Self::assert_within`] against the configured budget for the label.
    pub fn check_threshold(&self, metric: &PerformanceMetric) -> Result<()> {
        self.assert_within(metric, self.threshold_for(&metric.label))
    }

    /// Runs `count` operations with at most `parallelism` in flight, each on
    /// its own pooled session.
    ///
    /// `op` receives the operation index and a leased session and hands the
    /// session back with its result so it can be released. Acquisition
    /// failures count as failed operations.
    pub async fn run_concurrent<F, Fut>(
        &self,
        manager: Arc<ConnectionManager>,
        count: usize,
        parallelism: usize,
        op: F,
    ) -> ConcurrencySummary
    where
        F: Fn(usize, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (Session, Result<()>)> + Send + 'static,
    {
        let started = Instant::now();
        let permits = Arc::new(Semaphore::new(parallelism.max(1)));
        let op = Arc::new(op);
        let timeout = self.operation_timeout;
        let mut tasks = JoinSet::new();

        for index in 0..count {
            let permits = permits.clone();
            let manager = manager.clone();
            let op = op.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let session = manager.acquire().await?;
                match tokio::time::timeout(timeout, op(index, session)).await {
                    Ok((mut session, result)) => {
                        manager.release(&mut session).await?;
                        result
                    }
                    Err(_) => Err(HarnessError::Timeout {
                        operation: format!("concurrent operation {}", index),
                        after: timeout,
                    }),
                }
            });
        }

        let mut summary = ConcurrencySummary {
            attempted: count,
            ..ConcurrencySummary::default()
        };
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(HarnessError::ProtocolViolation(format!("concurrent task failed: {}", e)))
            });
            summary.record(&outcome);
        }
        summary.wall_time = started.elapsed();
        debug!(?summary, "concurrent batch finished");
        summary
    }
}

/// Resident set size in KiB from `/proc/self/statm`.
fn resident_kb() -> Option<i64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: i64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use tempfile::TempDir;

    fn monitor() -> PerformanceMonitor {
        PerformanceMonitor::new(PerformanceConfig::default(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_time_records_metric() {
        let (result, metric) = monitor()
            .time("sleep", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(metric.label, "sleep");
        assert!(metric.elapsed >= Duration::from_millis(20));
        assert!(metric.ended_at >= metric.started_at);
    }

    #[tokio::test]
    async fn test_time_enforces_hard_timeout() {
        let (result, metric) = monitor()
            .time("stuck", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
        assert!(metric.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_assert_within() {
        let monitor = monitor();
        let metric = PerformanceMetric {
            label: "bulk insert".into(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            elapsed: Duration::from_millis(1500),
            memory_delta_kb: None,
            pool_in_use: None,
        };
        assert!(monitor.assert_within(&metric, Duration::from_secs(2)).is_ok());
        let err = monitor.assert_within(&metric, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PerformanceThresholdExceeded);
        assert!(err.to_string().contains("1.500s"));
    }

    #[tokio::test]
    async fn test_run_concurrent_counts_outcomes() {
        let tmp = TempDir::new().unwrap();
        let config = DatabaseConfig {
            database: tmp.path().join("perf.db").display().to_string(),
            pool_size: 4,
            ..DatabaseConfig::default()
        };
        let manager = Arc::new(ConnectionManager::connect(&config).await.unwrap());

        let summary = monitor()
            .run_concurrent(manager.clone(), 12, 4, |i, mut session| async move {
                let result = if i % 4 == 0 {
                    session.query("SELECT * FROM missing_table", &[]).await.map(|_| ())
                } else {
                    session.query("SELECT 1", &[]).await.map(|_| ())
                };
                (session, result)
            })
            .await;

        assert_eq!(summary.attempted, 12);
        assert_eq!(summary.succeeded, 9);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.failures_by_kind.get("NotFound"), Some(&3));
        assert!(summary.deadlock_free());
    }
}
