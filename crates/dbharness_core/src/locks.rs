//! Per-table read/write locks serializing DDL against in-flight DML.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Registry of table locks shared by every session of a run.
///
/// DML holds a table's read lock for the duration of one statement; DDL
/// holds the write lock, so a structural change never interleaves with a
/// statement touching the same table.
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    tables: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl TableLocks {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, table: &str) -> Arc<RwLock<()>> {
        let key = table.to_ascii_lowercase();
        let mut tables = match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tables.entry(key).or_default().clone()
    }

    /// Shared lock for a DML statement.
    pub async fn read(&self, table: &str) -> OwnedRwLockReadGuard<()> {
        self.entry(table).read_owned().await
    }

    /// Exclusive lock for a DDL statement.
    pub async fn write(&self, table: &str) -> OwnedRwLockWriteGuard<()> {
        self.entry(table).write_owned().await
    }

    /// Exclusive locks on several tables, taken in name order.
    pub async fn write_many(&self, tables: &[String]) -> Vec<OwnedRwLockWriteGuard<()>> {
        let mut names: Vec<String> = tables.iter().map(|t| t.to_ascii_lowercase()).collect();
        names.sort();
        names.dedup();

        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            guards.push(self.write(&name).await);
        }
        guards
    }

    /// Number of tables seen so far.
    pub fn len(&self) -> usize {
        match self.tables.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// True if no table was locked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_readers_share_writers_exclude() {
        let locks = TableLocks::new();
        let r1 = locks.read("users").await;
        let r2 = locks.read("USERS").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.write("users")).await;
        assert!(blocked.is_err());

        drop(r1);
        drop(r2);
        let w = tokio::time::timeout(Duration::from_millis(50), locks.write("users")).await;
        assert!(w.is_ok());
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let locks = TableLocks::new();
        let _w = locks.write("orders").await;
        let r = tokio::time::timeout(Duration::from_millis(50), locks.read("users")).await;
        assert!(r.is_ok());
    }

    #[tokio::test]
    async fn test_write_many_dedups() {
        let locks = TableLocks::new();
        let guards = locks
            .write_many(&["b".into(), "a".into(), "B".into()])
            .await;
        assert_eq!(guards.len(), 2);
    }
}
