//! Translation of driver errors into the harness taxonomy.
//!
//! Classification prefers the driver's own constraint kind, then the
//! engine-specific error code, then well-known message fragments.

use crate::dialect::Dialect;
use crate::error::HarnessError;
use sqlx::error::{DatabaseError, ErrorKind as SqlxErrorKind};

/// Translates any sqlx error.
pub fn translate(err: sqlx::Error, dialect: Dialect) -> HarnessError {
    match err {
        sqlx::Error::Database(db) => translate_database(db.as_ref(), dialect),
        sqlx::Error::PoolTimedOut => HarnessError::PoolExhausted {
            waited: std::time::Duration::ZERO,
            pool_size: 0,
        },
        sqlx::Error::PoolClosed => HarnessError::Connection("connection pool is closed".into()),
        sqlx::Error::Io(e) => HarnessError::Connection(e.to_string()),
        sqlx::Error::Tls(e) => HarnessError::Connection(format!("TLS: {}", e)),
        sqlx::Error::Configuration(e) => HarnessError::Config(e.to_string()),
        sqlx::Error::RowNotFound => HarnessError::NotFound {
            object: "row".into(),
        },
        sqlx::Error::ColumnNotFound(column) => HarnessError::NotFound {
            object: format!("column {}", column),
        },
        e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::TypeNotFound { .. }) => {
            HarnessError::DataTypeMismatch(e.to_string())
        }
        other => HarnessError::Database {
            code: None,
            message: other.to_string(),
        },
    }
}

fn translate_database(db: &dyn DatabaseError, dialect: Dialect) -> HarnessError {
    let message = db.message().to_string();
    let code = db.code().map(|c| c.into_owned());

    match db.kind() {
        SqlxErrorKind::UniqueViolation => return HarnessError::UniqueViolation(message),
        SqlxErrorKind::ForeignKeyViolation => return HarnessError::ReferentialIntegrity(message),
        SqlxErrorKind::NotNullViolation => return HarnessError::NotNullViolation(message),
        SqlxErrorKind::CheckViolation => return HarnessError::CheckViolation(message),
        _ => {}
    }

    let classified = match dialect {
        Dialect::Sqlite => classify_sqlite(code.as_deref(), &message),
        Dialect::Postgresql => classify_postgres(code.as_deref(), &message),
        Dialect::Mysql => {
            let number = db
                .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                .map(|e| e.number());
            classify_mysql(number, &message)
        }
    };

    classified.unwrap_or(HarnessError::Database { code, message })
}

/// SQLite extended result codes and messages.
pub(crate) fn classify_sqlite(code: Option<&str>, message: &str) -> Option<HarnessError> {
    let msg = message.to_string();
    let by_code = match code {
        Some("2067") | Some("1555") => Some(HarnessError::UniqueViolation(msg.clone())),
        Some("787") => Some(HarnessError::ReferentialIntegrity(msg.clone())),
        Some("1299") => Some(HarnessError::NotNullViolation(msg.clone())),
        Some("275") => Some(HarnessError::CheckViolation(msg.clone())),
        Some("3091") | Some("20") => Some(HarnessError::DataTypeMismatch(msg.clone())),
        Some("5") | Some("6") | Some("261") | Some("262") | Some("517") => {
            Some(HarnessError::LockConflict(msg.clone()))
        }
        _ => None,
    };
    by_code.or_else(|| classify_message(message))
}

/// PostgreSQL SQLSTATE codes.
pub(crate) fn classify_postgres(code: Option<&str>, message: &str) -> Option<HarnessError> {
    let msg = message.to_string();
    let by_code = match code? {
        "23505" => HarnessError::UniqueViolation(msg),
        "23503" => HarnessError::ReferentialIntegrity(msg),
        "23502" => HarnessError::NotNullViolation(msg),
        "23514" => HarnessError::CheckViolation(msg),
        "42P07" | "42710" | "42701" => HarnessError::AlreadyExists { object: msg },
        "42P01" | "42703" | "42704" => HarnessError::NotFound { object: msg },
        "2BP01" => HarnessError::DependencyExists {
            object: msg,
            dependents: Vec::new(),
        },
        "40P01" | "55P03" | "40001" => HarnessError::LockConflict(msg),
        "42804" | "22P02" | "22003" | "22001" | "22007" | "22008" => {
            HarnessError::DataTypeMismatch(msg)
        }
        "57014" => HarnessError::Timeout {
            operation: msg,
            after: std::time::Duration::ZERO,
        },
        _ => return classify_message(message),
    };
    Some(by_code)
}

/// MySQL server error numbers.
pub(crate) fn classify_mysql(number: Option<u16>, message: &str) -> Option<HarnessError> {
    let msg = message.to_string();
    let by_number = match number? {
        1062 | 1586 => HarnessError::UniqueViolation(msg),
        1216 | 1452 => HarnessError::ReferentialIntegrity(msg),
        1217 | 1451 | 3730 => HarnessError::DependencyExists {
            object: msg,
            dependents: Vec::new(),
        },
        1048 | 1364 => HarnessError::NotNullViolation(msg),
        3819 => HarnessError::CheckViolation(msg),
        1050 | 1060 | 1061 => HarnessError::AlreadyExists { object: msg },
        1051 | 1054 | 1091 | 1146 => HarnessError::NotFound { object: msg },
        1205 | 1213 => HarnessError::LockConflict(msg),
        1264 | 1292 | 1366 | 1406 => HarnessError::DataTypeMismatch(msg),
        _ => return classify_message(message),
    };
    Some(by_number)
}

/// Message fragments shared by engines that report generic codes.
fn classify_message(message: &str) -> Option<HarnessError> {
    let lower = message.to_ascii_lowercase();
    let msg = message.to_string();
    let err = if lower.contains("already exists") || lower.contains("duplicate column") {
        HarnessError::AlreadyExists { object: msg }
    } else if lower.contains("no such table")
        || lower.contains("no such column")
        || lower.contains("no such index")
        || lower.contains("no such view")
        || lower.contains("does not exist")
    {
        HarnessError::NotFound { object: msg }
    } else if lower.contains("unique constraint") || lower.contains("duplicate entry") {
        HarnessError::UniqueViolation(msg)
    } else if lower.contains("foreign key") {
        HarnessError::ReferentialIntegrity(msg)
    } else if lower.contains("not null") || lower.contains("cannot be null") {
        HarnessError::NotNullViolation(msg)
    } else if lower.contains("check constraint") {
        HarnessError::CheckViolation(msg)
    } else if lower.contains("datatype mismatch") || lower.contains("cannot store") {
        HarnessError::DataTypeMismatch(msg)
    } else if lower.contains("database is locked")
        || lower.contains("deadlock")
        || lower.contains("lock wait timeout")
    {
        HarnessError::LockConflict(msg)
    } else {
        return None;
    };
    Some(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn kind(err: Option<HarnessError>) -> Option<ErrorKind> {
        err.map(|e| e.kind())
    }

    #[test]
    fn test_sqlite_extended_codes() {
        assert_eq!(
            kind(classify_sqlite(Some("2067"), "UNIQUE constraint failed: users.email")),
            Some(ErrorKind::UniqueConstraintViolation)
        );
        assert_eq!(
            kind(classify_sqlite(Some("787"), "FOREIGN KEY constraint failed")),
            Some(ErrorKind::ReferentialIntegrityError)
        );
        assert_eq!(
            kind(classify_sqlite(Some("1299"), "NOT NULL constraint failed: t.name")),
            Some(ErrorKind::NotNullViolation)
        );
        assert_eq!(
            kind(classify_sqlite(Some("5"), "database is locked")),
            Some(ErrorKind::LockConflict)
        );
    }

    #[test]
    fn test_sqlite_generic_messages() {
        assert_eq!(
            kind(classify_sqlite(Some("1"), "table users already exists")),
            Some(ErrorKind::AlreadyExists)
        );
        assert_eq!(
            kind(classify_sqlite(Some("1"), "no such table: ghosts")),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(
            kind(classify_sqlite(Some("1"), "duplicate column name: age")),
            Some(ErrorKind::AlreadyExists)
        );
        assert_eq!(kind(classify_sqlite(Some("1"), "near \"SELEC\": syntax error")), None);
    }

    #[test]
    fn test_postgres_sqlstate() {
        assert_eq!(
            kind(classify_postgres(Some("2BP01"), "cannot drop table users")),
            Some(ErrorKind::DependencyExists)
        );
        assert_eq!(
            kind(classify_postgres(Some("40P01"), "deadlock detected")),
            Some(ErrorKind::LockConflict)
        );
        assert_eq!(
            kind(classify_postgres(Some("22P02"), "invalid input syntax for type integer")),
            Some(ErrorKind::DataTypeMismatch)
        );
    }

    #[test]
    fn test_mysql_numbers() {
        assert_eq!(
            kind(classify_mysql(Some(1452), "Cannot add or update a child row")),
            Some(ErrorKind::ReferentialIntegrityError)
        );
        assert_eq!(
            kind(classify_mysql(Some(1213), "Deadlock found")),
            Some(ErrorKind::LockConflict)
        );
        assert_eq!(kind(classify_mysql(None, "anything")), None);
    }
}
