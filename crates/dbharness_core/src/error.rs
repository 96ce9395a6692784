//! Error types for harness operations.
//!
//! Every failure a scenario can observe is a [`HarnessError`], and every
//! `HarnessError` belongs to exactly one [`ErrorKind`] of the taxonomy.
//! Raw driver errors never leave the session/schema/seeder boundary; they are
//! translated by [`crate::translate`] first.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Normalized error taxonomy that scenarios assert against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Table, index, view or column is already present.
    AlreadyExists,
    /// Table, index, view, column or row is missing.
    NotFound,
    /// Drop blocked by dependent objects.
    DependencyExists,
    /// Foreign key reference to a missing row.
    ReferentialIntegrityError,
    /// Duplicate value in a unique or primary key column.
    UniqueConstraintViolation,
    /// CHECK constraint rejected the row.
    CheckConstraintViolation,
    /// NULL written to a NOT NULL column.
    NotNullViolation,
    /// Value incompatible with the column type.
    DataTypeMismatch,
    /// No pooled session became available in time.
    PoolExhausted,
    /// Timed operation exceeded its threshold.
    PerformanceThresholdExceeded,
    /// Transaction misuse (commit after rollback and similar).
    InvalidTransition,
    /// `begin` on a scope that is already active.
    AlreadyActive,
    /// Harness misuse, e.g. releasing a session twice.
    ProtocolViolation,
    /// Deadlock, lock wait timeout or busy database.
    LockConflict,
    /// Operation exceeded its hard timeout.
    Timeout,
    /// Step text has no (or more than one) registered handler.
    NoBinding,
    /// Scenario expectation did not hold.
    AssertionFailed,
    /// Configuration is invalid. Aborts the run.
    Configuration,
    /// Target database is unreachable. Aborts the run.
    Connection,
    /// Driver error with no taxonomy match.
    Unclassified,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 20] = [
        ErrorKind::AlreadyExists,
        ErrorKind::NotFound,
        ErrorKind::DependencyExists,
        ErrorKind::ReferentialIntegrityError,
        ErrorKind::UniqueConstraintViolation,
        ErrorKind::CheckConstraintViolation,
        ErrorKind::NotNullViolation,
        ErrorKind::DataTypeMismatch,
        ErrorKind::PoolExhausted,
        ErrorKind::PerformanceThresholdExceeded,
        ErrorKind::InvalidTransition,
        ErrorKind::AlreadyActive,
        ErrorKind::ProtocolViolation,
        ErrorKind::LockConflict,
        ErrorKind::Timeout,
        ErrorKind::NoBinding,
        ErrorKind::AssertionFailed,
        ErrorKind::Configuration,
        ErrorKind::Connection,
        ErrorKind::Unclassified,
    ];

    /// Canonical name, as written in scenario text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "AlreadyExists",
            Self::NotFound => "NotFound",
            Self::DependencyExists => "DependencyExists",
            Self::ReferentialIntegrityError => "ReferentialIntegrityError",
            Self::UniqueConstraintViolation => "UniqueConstraintViolation",
            Self::CheckConstraintViolation => "CheckConstraintViolation",
            Self::NotNullViolation => "NotNullViolation",
            Self::DataTypeMismatch => "DataTypeMismatch",
            Self::PoolExhausted => "PoolExhausted",
            Self::PerformanceThresholdExceeded => "PerformanceThresholdExceeded",
            Self::InvalidTransition => "InvalidTransition",
            Self::AlreadyActive => "AlreadyActive",
            Self::ProtocolViolation => "ProtocolViolation",
            Self::LockConflict => "LockConflict",
            Self::Timeout => "Timeout",
            Self::NoBinding => "NoBinding",
            Self::AssertionFailed => "AssertionFailed",
            Self::Configuration => "Configuration",
            Self::Connection => "Connection",
            Self::Unclassified => "Unclassified",
        }
    }

    /// True for constraint violations raised by the engine on write.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::ReferentialIntegrityError
                | Self::UniqueConstraintViolation
                | Self::CheckConstraintViolation
                | Self::NotNullViolation
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = HarnessError;

    /// Accepts the canonical name or a lowercase phrase such as
    /// "unique constraint violation" or "foreign key".
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if let Some(kind) = Self::ALL
            .iter()
            .find(|k| k.as_str().to_ascii_lowercase() == normalized)
        {
            return Ok(*kind);
        }

        let kind = match normalized.as_str() {
            "unique" | "uniqueconstraint" | "duplicate" | "primarykey" => {
                Self::UniqueConstraintViolation
            }
            "foreignkey" | "foreignkeyviolation" | "referentialintegrity" => {
                Self::ReferentialIntegrityError
            }
            "check" | "checkconstraint" => Self::CheckConstraintViolation,
            "notnull" | "notnullconstraint" => Self::NotNullViolation,
            "datatype" | "typemismatch" => Self::DataTypeMismatch,
            "deadlock" | "locktimeout" => Self::LockConflict,
            "constraintviolation" => {
                return Err(HarnessError::Config(
                    "ambiguous error kind 'constraint violation'; name the constraint".into(),
                ))
            }
            _ => return Err(HarnessError::Config(format!("unknown error kind: {}", s))),
        };
        Ok(kind)
    }
}

/// Core error type for harness operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// Object is already present.
    #[error("{object} already exists")]
    AlreadyExists {
        /// Description of the object, e.g. `table users`
        object: String,
    },

    /// Object is missing.
    #[error("{object} not found")]
    NotFound {
        /// Description of the object
        object: String,
    },

    /// Drop blocked by dependents.
    #[error("cannot drop {object}: referenced by {}", dependents.join(", "))]
    DependencyExists {
        /// Object being dropped
        object: String,
        /// Objects that still depend on it
        dependents: Vec<String>,
    },

    /// Foreign key violation.
    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// Unique or primary key violation.
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    /// CHECK constraint violation.
    #[error("check constraint violation: {0}")]
    CheckViolation(String),

    /// NOT NULL violation.
    #[error("not null violation: {0}")]
    NotNullViolation(String),

    /// Value incompatible with the column type.
    #[error("data type mismatch: {0}")]
    DataTypeMismatch(String),

    /// Pool exhausted beyond the acquire timeout.
    #[error("connection pool exhausted: no session within {:.1}s (pool size {pool_size})", waited.as_secs_f64())]
    PoolExhausted {
        /// How long the caller waited
        waited: Duration,
        /// Configured maximum sessions
        pool_size: u32,
    },

    /// Timed operation over budget.
    #[error("{label} took {:.3}s, expected <= {:.3}s", actual.as_secs_f64(), expected.as_secs_f64())]
    ThresholdExceeded {
        /// Operation label
        label: String,
        /// Measured duration
        actual: Duration,
        /// Allowed duration
        expected: Duration,
    },

    /// Transaction state machine misuse.
    #[error("invalid transaction transition from {from} to {to}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Scope already active.
    #[error("transaction scope already active")]
    AlreadyActive,

    /// Harness misuse.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Deadlock or lock wait.
    #[error("lock conflict: {0}")]
    LockConflict(String),

    /// Hard timeout.
    #[error("{operation} timed out after {:.1}s", after.as_secs_f64())]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured limit
        after: Duration,
    },

    /// No handler or several handlers match the step text.
    #[error("no binding for step: {step}{}", if candidates.is_empty() { String::new() } else { format!(" (ambiguous: {})", candidates.join(" | ")) })]
    NoBinding {
        /// Step text as written
        step: String,
        /// Patterns that matched when ambiguous
        candidates: Vec<String>,
    },

    /// Expectation mismatch.
    #[error("expected {expected}, got {actual}")]
    AssertionFailed {
        /// Rendered expectation
        expected: String,
        /// Rendered observation
        actual: String,
    },

    /// Configuration error (loading, parsing, invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Cannot reach the database.
    #[error("connection error: {0}")]
    Connection(String),

    /// Untranslatable driver error.
    #[error("database error{}: {message}", code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
    Database {
        /// Driver-specific code, if any
        code: Option<String>,
        /// Driver message
        message: String,
    },
}

impl HarnessError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DependencyExists { .. } => ErrorKind::DependencyExists,
            Self::ReferentialIntegrity(_) => ErrorKind::ReferentialIntegrityError,
            Self::UniqueViolation(_) => ErrorKind::UniqueConstraintViolation,
            Self::CheckViolation(_) => ErrorKind::CheckConstraintViolation,
            Self::NotNullViolation(_) => ErrorKind::NotNullViolation,
            Self::DataTypeMismatch(_) => ErrorKind::DataTypeMismatch,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::ThresholdExceeded { .. } => ErrorKind::PerformanceThresholdExceeded,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::AlreadyActive => ErrorKind::AlreadyActive,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::LockConflict(_) => ErrorKind::LockConflict,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NoBinding { .. } => ErrorKind::NoBinding,
            Self::AssertionFailed { .. } => ErrorKind::AssertionFailed,
            Self::Config(_) => ErrorKind::Configuration,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Database { .. } => ErrorKind::Unclassified,
        }
    }

    /// Errors that abort the whole run rather than the current scenario.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::Connection)
    }

    /// Shorthand for an assertion mismatch.
    pub fn mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::AssertionFailed {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Returns a user-friendly recovery suggestion for the error, if available.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::PoolExhausted { .. } => Some(
                "Raise database.pool_size or database.acquire_timeout_s, or lower the number of concurrent operations.",
            ),
            Self::ThresholdExceeded { .. } => Some(
                "Thresholds are environment dependent; adjust performance.thresholds for this profile.",
            ),
            Self::LockConflict(_) => Some(
                "Another session holds a lock on the table. Scenarios mixing concurrency and writes should be tagged @restore.",
            ),
            Self::NoBinding { .. } => {
                Some("Run 'dbharness list --steps' to see every registered step pattern.")
            }
            Self::Config(_) => Some("Check dbharness.toml and the DB_* environment variables."),
            Self::Connection(_) => {
                Some("Verify the database is running and reachable with 'dbharness check'.")
            }
            Self::ProtocolViolation(_) => {
                Some("A session or scope was used after it was closed; this is a harness bug.")
            }
            _ => None,
        }
    }
}

/// Convenience Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_accepts_phrases() {
        assert_eq!(
            "unique constraint violation".parse::<ErrorKind>().unwrap(),
            ErrorKind::UniqueConstraintViolation
        );
        assert_eq!(
            "ReferentialIntegrityError".parse::<ErrorKind>().unwrap(),
            ErrorKind::ReferentialIntegrityError
        );
        assert_eq!(
            "foreign key".parse::<ErrorKind>().unwrap(),
            ErrorKind::ReferentialIntegrityError
        );
        assert_eq!(
            "NOT NULL".parse::<ErrorKind>().unwrap(),
            ErrorKind::NotNullViolation
        );
        assert!("constraint violation".parse::<ErrorKind>().is_err());
        assert!("bogus".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_every_kind_round_trips_through_its_name() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_fatal_errors() {
        assert!(HarnessError::Config("bad".into()).is_fatal());
        assert!(HarnessError::Connection("refused".into()).is_fatal());
        assert!(!HarnessError::UniqueViolation("dup".into()).is_fatal());
    }

    #[test]
    fn test_threshold_message_carries_actual_and_expected() {
        let err = HarnessError::ThresholdExceeded {
            label: "bulk_insert".into(),
            actual: Duration::from_millis(2500),
            expected: Duration::from_secs(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("2.500s"));
        assert!(msg.contains("2.000s"));
        assert_eq!(err.kind(), ErrorKind::PerformanceThresholdExceeded);
    }
}
