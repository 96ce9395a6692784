//! Per-scenario isolation boundary.

use crate::connection::{savepoint_name, ConnectionManager, Session};
use crate::error::{HarnessError, Result};
use crate::schema::{SchemaManager, SchemaSnapshot};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a [`TransactionScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScopeState {
    /// Not yet begun.
    Idle,
    /// Begun, not yet terminated.
    Active,
    /// Terminated by commit.
    Committed,
    /// Terminated by rollback.
    RolledBack,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        })
    }
}

/// How a scenario's effects are undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TeardownStrategy {
    /// Everything runs inside one transaction that is rolled back.
    Rollback,
    /// Statements autocommit; the baseline snapshot is restored afterwards.
    Restore,
}

impl fmt::Display for TeardownStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rollback => "rollback",
            Self::Restore => "restore",
        })
    }
}

#[derive(Debug)]
enum Mark {
    /// Named savepoint inside an open transaction.
    Savepoint(String),
    /// Transaction opened because none was active.
    Transaction,
}

/// Isolation boundary owned by one scenario.
///
/// `Idle -> Active -> {Committed, RolledBack}`. Repeating the terminal call
/// that ended the scope is a no-op; the opposite call is an
/// `InvalidTransition`.
#[derive(Debug)]
pub struct TransactionScope {
    state: ScopeState,
    strategy: TeardownStrategy,
    marks: Vec<Mark>,
    schema: SchemaManager,
    baseline: Arc<SchemaSnapshot>,
}

impl TransactionScope {
    /// Creates an idle scope that tears down to `baseline`.
    pub fn new(strategy: TeardownStrategy, schema: SchemaManager, baseline: Arc<SchemaSnapshot>) -> Self {
        Self {
            state: ScopeState::Idle,
            strategy,
            marks: Vec::new(),
            schema,
            baseline,
        }
    }

    /// Current state.
    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// Teardown strategy chosen for the scenario.
    pub fn strategy(&self) -> TeardownStrategy {
        self.strategy
    }

    /// Open savepoints (including a transaction opened by [`Self::savepoint`]).
    pub fn savepoint_depth(&self) -> usize {
        self.marks.len()
    }

    fn transition(&self, to: &str) -> HarnessError {
        HarnessError::InvalidTransition {
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// Idle -> Active. Opens the scenario transaction under the rollback
    /// strategy.
    pub async fn begin(&mut self, session: &mut Session) -> Result<()> {
        if self.state != ScopeState::Idle {
            return Err(HarnessError::AlreadyActive);
        }
        if self.strategy == TeardownStrategy::Rollback {
            session.begin().await?;
        }
        self.state = ScopeState::Active;
        debug!(strategy = %self.strategy, "scope begun");
        Ok(())
    }

    /// Active -> Committed.
    pub async fn commit(&mut self, session: &mut Session) -> Result<()> {
        match self.state {
            ScopeState::Committed => Ok(()),
            ScopeState::Idle | ScopeState::RolledBack => Err(self.transition("committed")),
            ScopeState::Active => {
                if session.in_transaction() {
                    session.commit().await?;
                }
                self.marks.clear();
                self.state = ScopeState::Committed;
                info!("scope committed");
                Ok(())
            }
        }
    }

    /// Active -> RolledBack.
    pub async fn rollback(&mut self, session: &mut Session) -> Result<()> {
        match self.state {
            ScopeState::RolledBack => Ok(()),
            ScopeState::Idle | ScopeState::Committed => Err(self.transition("rolled back")),
            ScopeState::Active => {
                self.marks.clear();
                self.state = ScopeState::RolledBack;
                if session.in_transaction() {
                    session.rollback().await?;
                }
                info!("scope rolled back");
                Ok(())
            }
        }
    }

    /// Opens a nested boundary. Without an open transaction (restore
    /// strategy) a transaction is started instead of a savepoint.
    pub async fn savepoint(&mut self, session: &mut Session) -> Result<()> {
        if self.state != ScopeState::Active {
            return Err(self.transition("savepoint"));
        }
        if session.in_transaction() {
            let name = savepoint_name("sp");
            session.savepoint(&name).await?;
            debug!(savepoint = %name, "savepoint created");
            self.marks.push(Mark::Savepoint(name));
        } else {
            session.begin().await?;
            debug!("transaction opened for savepoint");
            self.marks.push(Mark::Transaction);
        }
        Ok(())
    }

    /// Undoes everything since the innermost savepoint and closes it. The
    /// outer scope stays active.
    pub async fn rollback_to_savepoint(&mut self, session: &mut Session) -> Result<()> {
        match self.marks.pop() {
            Some(Mark::Savepoint(name)) => {
                session.rollback_to(&name).await?;
                session.release_savepoint(&name).await
            }
            Some(Mark::Transaction) => session.rollback().await,
            None => Err(self.transition("savepoint rollback")),
        }
    }

    /// Keeps everything since the innermost savepoint and closes it.
    pub async fn release_savepoint(&mut self, session: &mut Session) -> Result<()> {
        match self.marks.pop() {
            Some(Mark::Savepoint(name)) => session.release_savepoint(&name).await,
            Some(Mark::Transaction) => session.commit().await,
            None => Err(self.transition("savepoint release")),
        }
    }

    /// Undoes the scenario and checks the database matches the baseline.
    ///
    /// Always safe to call: a timed out session is discarded and replaced
    /// by a fresh one before restoring. When rollback leaves a residue the
    /// baseline is restored as well; a residue after restore is reported as
    /// `AssertionFailed` listing what leaked.
    pub async fn teardown(&mut self, manager: &ConnectionManager, session: &mut Session) -> Result<()> {
        let mut restore = self.strategy == TeardownStrategy::Restore || self.state == ScopeState::Committed;

        if session.is_poisoned() || session.is_released() {
            manager.discard(session);
            *session = manager.acquire().await?;
            restore = true;
        } else if session.in_transaction() {
            if let Err(e) = session.rollback().await {
                warn!(error = %e, "rollback during teardown failed");
                restore = true;
            }
        }
        self.marks.clear();
        if self.state == ScopeState::Active {
            self.state = ScopeState::RolledBack;
        }

        if restore {
            self.schema.restore(session, &self.baseline).await?;
        }
        let mut after = self.schema.snapshot(session).await?;
        if after.fingerprint != self.baseline.fingerprint && !restore {
            warn!(changes = ?self.baseline.diff(&after), "rollback left changes behind, restoring");
            self.schema.restore(session, &self.baseline).await?;
            after = self.schema.snapshot(session).await?;
        }
        if after.fingerprint != self.baseline.fingerprint {
            let changes = self.baseline.diff(&after);
            return Err(HarnessError::mismatch(
                "database state equal to the run baseline",
                if changes.is_empty() {
                    "a different fingerprint".to_string()
                } else {
                    changes.join("; ")
                },
            ));
        }
        debug!(strategy = %self.strategy, "teardown verified");
        Ok(())
    }
}
