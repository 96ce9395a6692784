//! Pooled sessions against the target database.

use crate::config::DatabaseConfig;
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::translate::translate;
use crate::types::{Row, RowSet, Value};
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, AnyPool, Column, Executor, Row as _, Statement, ValueRef};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// SQLite busy timeout applied to every connection.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Owner of the connection pool.
///
/// Built once per run and shared through an `Arc`; physical connections are
/// opened lazily up to `pool_size`.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    pool: AnyPool,
    dialect: Dialect,
    pool_size: u32,
    acquire_timeout: Duration,
    statement_timeout: Duration,
    url: String,
}

/// Point-in-time pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured maximum.
    pub max_size: u32,
    /// Physical connections currently open.
    pub size: u32,
    /// Open connections not leased.
    pub idle: u32,
    /// Connections leased to sessions.
    pub leased: u32,
}

impl ConnectionManager {
    /// Creates the pool without connecting.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let dialect = config.driver;
        let url = config.connection_url();
        let pool = AnyPoolOptions::new()
            .max_connections(config.pool_size)
            .min_connections(0)
            .acquire_timeout(config.acquire_timeout())
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if dialect == Dialect::Sqlite {
                        let pragmas = format!(
                            "PRAGMA journal_mode = WAL; PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON;",
                            SQLITE_BUSY_TIMEOUT_MS
                        );
                        conn.execute(sqlx::raw_sql(&pragmas)).await?;
                    }
                    Ok(())
                })
            })
            .connect_lazy(&url)
            .map_err(|e| HarnessError::Config(format!("invalid connection url: {}", e)))?;

        Ok(Self {
            pool,
            dialect,
            pool_size: config.pool_size,
            acquire_timeout: config.acquire_timeout(),
            statement_timeout: config.statement_timeout(),
            url: config.redacted_url(),
        })
    }

    /// Creates the pool and verifies the database is reachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let manager = Self::new(config)?;
        manager.verify().await?;
        Ok(manager)
    }

    /// Opens one connection and runs a trivial query.
    ///
    /// Any failure is reported as a fatal `Connection` error.
    pub async fn verify(&self) -> Result<()> {
        let mut session = self.acquire().await.map_err(|e| match e {
            HarnessError::Config(msg) => HarnessError::Config(msg),
            other => HarnessError::Connection(format!("{}: {}", self.url, other)),
        })?;
        let result = session.query("SELECT 1", &[]).await;
        self.release(&mut session).await?;
        result
            .map(|_| ())
            .map_err(|e| HarnessError::Connection(format!("{}: {}", self.url, e)))?;
        info!(url = %self.url, driver = %self.dialect, "database reachable");
        Ok(())
    }

    /// Engine dialect of the pool.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Redacted connection URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Leases a session, waiting up to the acquire timeout.
    pub async fn acquire(&self) -> Result<Session> {
        let started = Instant::now();
        match self.pool.acquire().await {
            Ok(conn) => {
                let session = Session {
                    id: Uuid::new_v4(),
                    conn: Some(conn),
                    dialect: self.dialect,
                    statement_timeout: self.statement_timeout,
                    in_transaction: false,
                    poisoned: false,
                };
                debug!(session = %session.id, waited_ms = started.elapsed().as_millis() as u64, "session acquired");
                Ok(session)
            }
            Err(sqlx::Error::PoolTimedOut) => Err(HarnessError::PoolExhausted {
                waited: started.elapsed().max(self.acquire_timeout),
                pool_size: self.pool_size,
            }),
            Err(e) => Err(translate(e, self.dialect)),
        }
    }

    /// Returns a session to the pool.
    ///
    /// An open transaction is rolled back first. Releasing the same session
    /// twice is a `ProtocolViolation` and has no other effect.
    pub async fn release(&self, session: &mut Session) -> Result<()> {
        if session.conn.is_none() {
            return Err(HarnessError::ProtocolViolation(format!(
                "session {} released twice",
                session.id
            )));
        }
        if session.poisoned {
            self.discard(session);
            return Ok(());
        }
        if session.in_transaction {
            if let Err(e) = session.rollback().await {
                warn!(session = %session.id, error = %e, "rollback on release failed, discarding connection");
                self.discard(session);
                return Ok(());
            }
        }
        session.conn.take();
        debug!(session = %session.id, "session released");
        Ok(())
    }

    /// Closes a session's connection instead of returning it to the pool.
    ///
    /// Used after a statement timed out mid-flight; the server discards any
    /// open transaction when the connection goes away.
    pub fn discard(&self, session: &mut Session) {
        if let Some(conn) = session.conn.take() {
            drop(conn.detach());
            warn!(session = %session.id, "session connection discarded");
        }
    }

    /// Current pool usage.
    pub fn stats(&self) -> PoolStats {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;
        PoolStats {
            max_size: self.pool_size,
            size,
            idle,
            leased: size.saturating_sub(idle),
        }
    }

    /// Drains and closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("connection pool closed");
    }
}

/// Leased database session.
///
/// Every statement is bounded by the statement timeout and every driver error
/// is translated before it leaves the session.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    conn: Option<PoolConnection<Any>>,
    dialect: Dialect,
    statement_timeout: Duration,
    in_transaction: bool,
    poisoned: bool,
}

/// Atomic section opened by [`Session::open_atomic`].
#[derive(Debug)]
pub(crate) enum AtomicGuard {
    /// Nested inside an open transaction.
    Savepoint(String),
    /// Top-level transaction opened for the section.
    Transaction,
}

impl Session {
    /// Session identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Dialect of the underlying connection.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// True once released.
    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// True while an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// True after a statement timed out on this session.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Marks the connection unusable.
    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    fn conn(&mut self) -> Result<&mut AnyConnection> {
        if self.poisoned {
            return Err(HarnessError::ProtocolViolation(format!(
                "session {} is unusable after a timed out statement",
                self.id
            )));
        }
        let id = self.id;
        self.conn
            .as_deref_mut()
            .ok_or_else(|| HarnessError::ProtocolViolation(format!("session {} used after release", id)))
    }

    /// Executes a statement without parameters.
    pub fn execute<'s>(&'s mut self, sql: &'s str) -> BoxFuture<'s, Result<u64>> {
        Box::pin(async move {
            debug!(session = %self.id, sql, "execute");
            let timeout = self.statement_timeout;
            let conn = self.conn()?;
            let outcome = tokio::time::timeout(timeout, conn.execute(sqlx::raw_sql(sql))).await;
            self.settle(sql, outcome).map(|r| r.rows_affected())
        })
    }

    /// Executes a parameterized statement.
    pub fn execute_with<'s>(&'s mut self, sql: &'s str, params: &'s [Value]) -> BoxFuture<'s, Result<u64>> {
        Box::pin(async move {
            debug!(session = %self.id, sql, params = params.len(), "execute");
            let timeout = self.statement_timeout;
            let conn = self.conn()?;
            let query = bind_all(sqlx::query(sql), params);
            let outcome = tokio::time::timeout(timeout, query.execute(&mut *conn)).await;
            self.settle(sql, outcome).map(|r| r.rows_affected())
        })
    }

    /// Runs a query and decodes every row.
    ///
    /// Column names come from the first row, or from the prepared statement
    /// when the result is empty.
    pub fn query<'s>(&'s mut self, sql: &'s str, params: &'s [Value]) -> BoxFuture<'s, Result<RowSet>> {
        Box::pin(async move {
            debug!(session = %self.id, sql, params = params.len(), "query");
            let timeout = self.statement_timeout;
            let conn = self.conn()?;
            let query = bind_all(sqlx::query(sql), params);
            let outcome = tokio::time::timeout(timeout, query.fetch_all(&mut *conn)).await;
            let rows = self.settle(sql, outcome)?;

            let columns = match rows.first() {
                Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
                None => self.describe_columns(sql).await?,
            };
            Ok(RowSet {
                columns,
                rows: rows.iter().map(decode_row).collect(),
            })
        })
    }

    /// Result column names of `sql` without running it.
    pub fn describe_columns<'s>(&'s mut self, sql: &'s str) -> BoxFuture<'s, Result<Vec<String>>> {
        Box::pin(async move {
            let timeout = self.statement_timeout;
            let conn = self.conn()?;
            let outcome = tokio::time::timeout(timeout, (&mut *conn).prepare(sql)).await;
            let statement = self.settle(sql, outcome)?;
            Ok(statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect())
        })
    }

    /// Runs a query returning one integer, e.g. `SELECT COUNT(*) ...`.
    pub async fn scalar_i64(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        let rows = self.query(sql, params).await?;
        rows.scalar()
            .and_then(Value::as_i64)
            .ok_or_else(|| HarnessError::DataTypeMismatch(format!("expected an integer from: {}", sql)))
    }

    /// Opens an explicit transaction.
    pub async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(HarnessError::AlreadyActive);
        }
        let sql = self.dialect.begin_sql();
        self.execute(sql).await?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commits the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Rolls back the open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        let result = self.execute("ROLLBACK").await;
        self.in_transaction = false;
        result.map(|_| ())
    }

    /// Creates a named savepoint.
    pub async fn savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&format!("SAVEPOINT {}", name)).await.map(|_| ())
    }

    /// Undoes everything since `name`, keeping the savepoint.
    pub async fn rollback_to(&mut self, name: &str) -> Result<()> {
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .await
            .map(|_| ())
    }

    /// Forgets `name`, keeping its effects in the enclosing transaction.
    pub async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.execute(&format!("RELEASE SAVEPOINT {}", name))
            .await
            .map(|_| ())
    }

    /// Opens an all-or-nothing section: a savepoint inside an open
    /// transaction, a transaction otherwise.
    pub(crate) async fn open_atomic(&mut self) -> Result<AtomicGuard> {
        if self.in_transaction {
            let name = savepoint_name("batch");
            self.savepoint(&name).await?;
            Ok(AtomicGuard::Savepoint(name))
        } else {
            self.begin().await?;
            Ok(AtomicGuard::Transaction)
        }
    }

    /// Closes a section opened by [`Session::open_atomic`].
    pub(crate) async fn close_atomic(&mut self, guard: AtomicGuard, success: bool) -> Result<()> {
        match (guard, success) {
            (AtomicGuard::Savepoint(name), true) => self.release_savepoint(&name).await,
            (AtomicGuard::Savepoint(name), false) => {
                self.rollback_to(&name).await?;
                self.release_savepoint(&name).await
            }
            (AtomicGuard::Transaction, true) => self.commit().await,
            (AtomicGuard::Transaction, false) => self.rollback().await,
        }
    }

    fn settle<T>(
        &mut self,
        sql: &str,
        outcome: std::result::Result<std::result::Result<T, sqlx::Error>, tokio::time::error::Elapsed>,
    ) -> Result<T> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(translate(e, self.dialect)),
            Err(_) => {
                self.poisoned = true;
                Err(HarnessError::Timeout {
                    operation: abbreviate(sql),
                    after: self.statement_timeout,
                })
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.conn.is_some() && !std::thread::panicking() {
            warn!(session = %self.id, "session dropped without release");
        }
    }
}

/// Unique savepoint identifier.
pub(crate) fn savepoint_name(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

fn abbreviate(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 80 {
        let cut: String = flat.chars().take(77).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for value in params {
        query = match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
            Value::Bytes(b) => query.bind(b.clone()),
        };
    }
    query
}

fn decode_row(row: &AnyRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        out.push(column.name(), decode_value(row, i));
    }
    out
}

fn decode_value(row: &AnyRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(_) => return Value::Null,
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Value::Int(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Value::Float(v);
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return Value::Float(v as f64);
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Value::Bool(v);
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Value::Text(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return match String::from_utf8(v) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        };
    }
    Value::Null
}
