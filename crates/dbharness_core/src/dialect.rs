//! SQL dialect differences between the supported engines.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite 3 (file or shared memory).
    #[default]
    Sqlite,
    /// PostgreSQL.
    #[serde(alias = "postgres")]
    Postgresql,
    /// MySQL / MariaDB.
    Mysql,
}

impl Dialect {
    /// Lowercase driver name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
        }
    }

    /// Whether DDL participates in the enclosing transaction.
    ///
    /// MySQL commits implicitly before and after every DDL statement, so a
    /// rollback cannot undo it.
    pub fn transactional_ddl(&self) -> bool {
        !matches!(self, Self::Mysql)
    }

    /// Bind placeholder for the 1-based parameter `n`.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Postgresql => format!("${}", n),
            Self::Sqlite | Self::Mysql => "?".to_string(),
        }
    }

    /// Comma-separated placeholders `start..start+count` (1-based).
    pub fn placeholders(&self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|n| self.placeholder(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Quotes an identifier.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            Self::Mysql => format!("`{}`", ident.replace('`', "``")),
            Self::Sqlite | Self::Postgresql => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Column type of an auto-incrementing integer primary key.
    pub fn serial_primary_key(&self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgresql => "SERIAL PRIMARY KEY",
            Self::Mysql => "INTEGER PRIMARY KEY AUTO_INCREMENT",
        }
    }

    /// Statement opening an explicit transaction.
    pub fn begin_sql(&self) -> &'static str {
        match self {
            Self::Mysql => "START TRANSACTION",
            Self::Sqlite | Self::Postgresql => "BEGIN",
        }
    }

    /// Statement switching foreign key enforcement for the session, where
    /// the engine supports it.
    pub fn foreign_key_checks_sql(&self, enabled: bool) -> Option<&'static str> {
        match (self, enabled) {
            (Self::Mysql, true) => Some("SET FOREIGN_KEY_CHECKS = 1"),
            (Self::Mysql, false) => Some("SET FOREIGN_KEY_CHECKS = 0"),
            (Self::Sqlite, true) => Some("PRAGMA foreign_keys = ON"),
            (Self::Sqlite, false) => Some("PRAGMA foreign_keys = OFF"),
            (Self::Postgresql, _) => None,
        }
    }

    /// Statements emptying `table` and resetting its identity counter.
    ///
    /// SQLite has no TRUNCATE; an unqualified DELETE on a table without
    /// triggers takes its truncate path, and the counter lives in
    /// `sqlite_sequence`.
    pub fn truncate_sql(&self, table: &str) -> Vec<String> {
        match self {
            Self::Sqlite => vec![format!("DELETE FROM {}", self.quote(table))],
            Self::Postgresql => vec![format!(
                "TRUNCATE TABLE {} RESTART IDENTITY",
                self.quote(table)
            )],
            Self::Mysql => vec![format!("TRUNCATE TABLE {}", self.quote(table))],
        }
    }

    /// Statement dropping an index.
    pub fn drop_index_sql(&self, index: &str, table: Option<&str>) -> String {
        match (self, table) {
            (Self::Mysql, Some(table)) => {
                format!("DROP INDEX {} ON {}", self.quote(index), self.quote(table))
            }
            _ => format!("DROP INDEX {}", self.quote(index)),
        }
    }

    /// Statement renaming a table.
    pub fn rename_table_sql(&self, from: &str, to: &str) -> String {
        match self {
            Self::Mysql => format!("RENAME TABLE {} TO {}", self.quote(from), self.quote(to)),
            Self::Sqlite | Self::Postgresql => {
                format!("ALTER TABLE {} RENAME TO {}", self.quote(from), self.quote(to))
            }
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgresql" | "postgres" | "pg" => Ok(Self::Postgresql),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            other => Err(HarnessError::Config(format!(
                "unsupported database driver: {}",
                other
            ))),
        }
    }
}
