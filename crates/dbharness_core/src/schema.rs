//! DDL operations, catalog introspection and schema snapshots.

use crate::connection::Session;
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::locks::TableLocks;
use crate::types::{
    AlterChange, ColumnDef, Constraint, ForeignKeyDescriptor, IndexDescriptor, Row, RowSet,
    SchemaDescriptor, TableConstraint, TableDef, Value,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Tables larger than this are fingerprinted by row count only and are not
/// reloaded on restore.
const SNAPSHOT_ROW_LIMIT: i64 = 10_000;

/// DDL operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DdlOperation {
    /// CREATE TABLE
    CreateTable,
    /// ALTER TABLE
    AlterTable,
    /// DROP TABLE
    DropTable,
    /// CREATE INDEX
    CreateIndex,
    /// DROP INDEX
    DropIndex,
    /// TRUNCATE (or the engine's equivalent)
    Truncate,
    /// CREATE VIEW
    CreateView,
    /// DROP VIEW
    DropView,
}

impl DdlOperation {
    /// Whether a rollback of the enclosing transaction undoes this operation.
    pub fn is_transactional(&self, dialect: Dialect) -> bool {
        dialect.transactional_ddl()
    }
}

/// Point-in-time copy of the catalog and of small tables' contents.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SchemaSnapshot {
    /// Descriptors by table name.
    pub tables: BTreeMap<String, SchemaDescriptor>,
    /// CREATE TABLE statements reported by the engine, when available.
    pub definitions: BTreeMap<String, String>,
    /// CREATE INDEX statements for secondary indexes.
    pub index_definitions: BTreeMap<String, String>,
    /// CREATE VIEW statements by view name.
    pub views: BTreeMap<String, String>,
    /// Row count per table.
    pub row_counts: BTreeMap<String, i64>,
    /// Full contents of tables under the snapshot row limit.
    #[serde(skip)]
    pub data: BTreeMap<String, RowSet>,
    /// BLAKE3 digest over descriptors, view names, row counts and data.
    pub fingerprint: String,
}

impl SchemaSnapshot {
    fn seal(mut self) -> Self {
        let views: Vec<&String> = self.views.keys().collect();
        let parts = [
            serde_json::to_string(&self.tables),
            serde_json::to_string(&views),
            serde_json::to_string(&self.row_counts),
            serde_json::to_string(&self.data),
        ];
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part.unwrap_or_default().as_bytes());
            hasher.update(&[0]);
        }
        self.fingerprint = hasher.finalize().to_hex().to_string();
        self
    }

    /// Table names in the snapshot.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }

    /// Human-readable list of what differs from `other`.
    pub fn diff(&self, other: &SchemaSnapshot) -> Vec<String> {
        let mut changes = Vec::new();
        for name in self.tables.keys() {
            match other.tables.get(name) {
                None => changes.push(format!("table {} missing", name)),
                Some(desc) if desc != &self.tables[name] => {
                    changes.push(format!("table {} definition changed", name))
                }
                _ => {}
            }
        }
        for name in other.tables.keys() {
            if !self.tables.contains_key(name) {
                changes.push(format!("table {} added", name));
            }
        }
        for (name, count) in &self.row_counts {
            if let Some(other_count) = other.row_counts.get(name) {
                if other_count != count {
                    changes.push(format!("table {} has {} rows, expected {}", name, other_count, count));
                } else if self.data.get(name) != other.data.get(name) {
                    changes.push(format!("table {} contents changed", name));
                }
            }
        }
        let views: BTreeSet<_> = self.views.keys().collect();
        let other_views: BTreeSet<_> = other.views.keys().collect();
        for name in views.symmetric_difference(&other_views) {
            changes.push(format!("view {} differs", name));
        }
        changes
    }
}

/// DDL and introspection against one dialect.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    dialect: Dialect,
    locks: TableLocks,
}

impl SchemaManager {
    /// Creates a manager sharing the run's lock registry.
    pub fn new(dialect: Dialect, locks: TableLocks) -> Self {
        Self { dialect, locks }
    }

    /// Dialect DDL is generated for.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Lock registry shared with the seeder.
    pub fn locks(&self) -> &TableLocks {
        &self.locks
    }

    /// Whether `op` is undone by a rollback on this dialect.
    pub fn is_transactional(&self, op: DdlOperation) -> bool {
        op.is_transactional(self.dialect)
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    // ===== DDL =====

    /// Creates a table.
    ///
    /// Fails `AlreadyExists` when the table is present, unless the definition
    /// sets `if_not_exists`.
    pub async fn create_table(&self, session: &mut Session, def: &TableDef) -> Result<SchemaDescriptor> {
        def.validate()?;
        let _guard = self.locks.write(&def.name).await;

        if self.table_exists(session, &def.name).await? {
            if def.if_not_exists {
                return self.describe(session, &def.name).await;
            }
            return Err(HarnessError::AlreadyExists {
                object: format!("table {}", def.name),
            });
        }
        session.execute(&def.to_sql(self.dialect)).await?;
        info!(table = %def.name, "table created");
        self.describe(session, &def.name).await
    }

    /// Applies one structural change.
    pub async fn alter_table(
        &self,
        session: &mut Session,
        table: &str,
        change: &AlterChange,
    ) -> Result<SchemaDescriptor> {
        let _guard = self.locks.write(table).await;
        let desc = self.describe(session, table).await?;

        let renamed_to = match change {
            AlterChange::AddColumn(column) => {
                if desc.column(&column.name).is_some() {
                    return Err(HarnessError::AlreadyExists {
                        object: format!("column {}.{}", table, column.name),
                    });
                }
                session
                    .execute(&format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        self.q(table),
                        column.to_sql(self.dialect)
                    ))
                    .await?;
                None
            }
            AlterChange::DropColumn(column) => {
                if desc.column(column).is_none() {
                    return Err(HarnessError::NotFound {
                        object: format!("column {}.{}", table, column),
                    });
                }
                session
                    .execute(&format!(
                        "ALTER TABLE {} DROP COLUMN {}",
                        self.q(table),
                        self.q(column)
                    ))
                    .await?;
                None
            }
            AlterChange::AddConstraint(constraint) => {
                self.add_constraint(session, &desc, constraint).await?;
                None
            }
            AlterChange::Rename(new_name) => {
                if self.table_exists(session, new_name).await? {
                    return Err(HarnessError::AlreadyExists {
                        object: format!("table {}", new_name),
                    });
                }
                session
                    .execute(&self.dialect.rename_table_sql(table, new_name))
                    .await?;
                Some(new_name.clone())
            }
            AlterChange::RenameColumn { from, to } => {
                if desc.column(from).is_none() {
                    return Err(HarnessError::NotFound {
                        object: format!("column {}.{}", table, from),
                    });
                }
                if desc.column(to).is_some() {
                    return Err(HarnessError::AlreadyExists {
                        object: format!("column {}.{}", table, to),
                    });
                }
                session
                    .execute(&format!(
                        "ALTER TABLE {} RENAME COLUMN {} TO {}",
                        self.q(table),
                        self.q(from),
                        self.q(to)
                    ))
                    .await?;
                None
            }
        };

        debug!(table, change = ?change, "table altered");
        let target = renamed_to.as_deref().unwrap_or(table);
        self.describe(session, target).await
    }

    async fn add_constraint(
        &self,
        session: &mut Session,
        desc: &SchemaDescriptor,
        constraint: &TableConstraint,
    ) -> Result<()> {
        let table = &desc.table;
        if self.dialect != Dialect::Sqlite {
            return session
                .execute(&format!(
                    "ALTER TABLE {} ADD {}",
                    self.q(table),
                    constraint.to_sql(self.dialect)
                ))
                .await
                .map(|_| ());
        }

        // SQLite cannot add constraints in place.
        if let TableConstraint::Unique(columns) = constraint {
            let index = IndexDescriptor {
                name: format!("uq_{}_{}", table, columns.join("_")),
                table: table.clone(),
                columns: columns.clone(),
                unique: true,
            };
            return session.execute(&self.index_sql(&index)).await.map(|_| ());
        }
        let create_sql = self
            .create_statement(session, table)
            .await?
            .ok_or_else(|| HarnessError::NotFound {
                object: format!("table {}", table),
            })?;
        let open = create_sql.find('(').ok_or_else(|| {
            HarnessError::Database {
                code: None,
                message: format!("unexpected table definition: {}", create_sql),
            }
        })?;
        let close = create_sql.rfind(')').unwrap_or(create_sql.len());
        let rebuilt_name = format!("{}__rebuild", table);
        let rebuilt_sql = format!(
            "CREATE TABLE {} {}, {}{}",
            self.q(&rebuilt_name),
            &create_sql[open..close],
            constraint.to_sql(self.dialect),
            &create_sql[close..]
        );
        let columns = desc
            .columns
            .iter()
            .map(|c| self.q(&c.name))
            .collect::<Vec<_>>()
            .join(", ");

        session.execute(&rebuilt_sql).await?;
        session
            .execute(&format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                self.q(&rebuilt_name),
                columns,
                columns,
                self.q(table)
            ))
            .await?;
        session.execute(&format!("DROP TABLE {}", self.q(table))).await?;
        session
            .execute(&self.dialect.rename_table_sql(&rebuilt_name, table))
            .await?;
        for index in &desc.indexes {
            if index.name.starts_with("sqlite_autoindex") {
                continue;
            }
            session.execute(&self.index_sql(index)).await?;
        }
        Ok(())
    }

    /// Drops a table.
    ///
    /// Without `cascade`, fails `DependencyExists` while other tables hold
    /// foreign keys to it. With `cascade`, dependents are dropped first,
    /// children before parents.
    pub async fn drop_table(&self, session: &mut Session, table: &str, cascade: bool) -> Result<Vec<String>> {
        if !self.table_exists(session, table).await? {
            return Err(HarnessError::NotFound {
                object: format!("table {}", table),
            });
        }

        let descriptors = self.describe_all(session).await?;
        let direct = dependents_of(table, &descriptors);
        if !direct.is_empty() && !cascade {
            return Err(HarnessError::DependencyExists {
                object: format!("table {}", table),
                dependents: direct,
            });
        }

        let mut closure = vec![table.to_string()];
        let mut frontier = vec![table.to_string()];
        while let Some(current) = frontier.pop() {
            for child in dependents_of(&current, &descriptors) {
                if !closure.iter().any(|t| t.eq_ignore_ascii_case(&child)) {
                    closure.push(child.clone());
                    frontier.push(child);
                }
            }
        }

        let mut order = parents_first(&closure, &descriptors);
        order.reverse();
        let _guards = self.locks.write_many(&order).await;
        for name in &order {
            session.execute(&format!("DROP TABLE {}", self.q(name))).await?;
            info!(table = %name, "table dropped");
        }
        Ok(order)
    }

    /// Creates an index.
    pub async fn create_index(
        &self,
        session: &mut Session,
        name: &str,
        table: &str,
        columns: &[String],
        unique: bool,
    ) -> Result<SchemaDescriptor> {
        let _guard = self.locks.write(table).await;
        let desc = self.describe(session, table).await?;
        if columns.is_empty() {
            return Err(HarnessError::Config(format!("index {} has no columns", name)));
        }
        for column in columns {
            if desc.column(column).is_none() {
                return Err(HarnessError::NotFound {
                    object: format!("column {}.{}", table, column),
                });
            }
        }
        if self.find_index(session, name).await?.is_some() {
            return Err(HarnessError::AlreadyExists {
                object: format!("index {}", name),
            });
        }

        let index = IndexDescriptor {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.to_vec(),
            unique,
        };
        session.execute(&self.index_sql(&index)).await?;
        debug!(index = name, table, "index created");
        self.describe(session, table).await
    }

    /// Drops an index by name.
    pub async fn drop_index(&self, session: &mut Session, name: &str) -> Result<()> {
        let index = self
            .find_index(session, name)
            .await?
            .ok_or_else(|| HarnessError::NotFound {
                object: format!("index {}", name),
            })?;
        let _guard = self.locks.write(&index.table).await;
        session
            .execute(&self.dialect.drop_index_sql(name, Some(&index.table)))
            .await?;
        debug!(index = name, "index dropped");
        Ok(())
    }

    /// Empties a table and resets its identity counter.
    pub async fn truncate(&self, session: &mut Session, table: &str) -> Result<SchemaDescriptor> {
        self.truncate_many(session, &[table.to_string()]).await?;
        self.describe(session, table).await
    }

    /// Empties several tables in the given order (children first).
    ///
    /// Uses the engine's bulk path: TRUNCATE on PostgreSQL and MySQL, an
    /// unqualified DELETE plus a `sqlite_sequence` reset on SQLite.
    pub async fn truncate_many(&self, session: &mut Session, tables: &[String]) -> Result<()> {
        for table in tables {
            if !self.table_exists(session, table).await? {
                return Err(HarnessError::NotFound {
                    object: format!("table {}", table),
                });
            }
        }
        let _guards = self.locks.write_many(tables).await;

        match self.dialect {
            Dialect::Postgresql => {
                let list = tables.iter().map(|t| self.q(t)).collect::<Vec<_>>().join(", ");
                session
                    .execute(&format!("TRUNCATE TABLE {} RESTART IDENTITY", list))
                    .await?;
            }
            Dialect::Mysql => {
                self.disable_foreign_keys(session).await?;
                let mut result = Ok(());
                for sql in tables.iter().flat_map(|t| self.dialect.truncate_sql(t)) {
                    if let Err(e) = session.execute(&sql).await {
                        result = Err(e);
                        break;
                    }
                }
                self.enable_foreign_keys(session).await?;
                result?;
            }
            Dialect::Sqlite => {
                for table in tables {
                    for sql in self.dialect.truncate_sql(table) {
                        session.execute(&sql).await?;
                    }
                }
                self.reset_sqlite_sequences(session, tables).await?;
            }
        }
        debug!(tables = ?tables, "truncated");
        Ok(())
    }

    async fn reset_sqlite_sequences(&self, session: &mut Session, tables: &[String]) -> Result<()> {
        let has_sequence = session
            .scalar_i64(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
                &[],
            )
            .await?
            > 0;
        if has_sequence {
            for table in tables {
                session
                    .execute_with(
                        "DELETE FROM sqlite_sequence WHERE name = ?",
                        &[Value::Text(table.clone())],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Creates a view.
    pub async fn create_view(&self, session: &mut Session, name: &str, query: &str) -> Result<()> {
        if self.table_exists(session, name).await? || self.view_exists(session, name).await? {
            return Err(HarnessError::AlreadyExists {
                object: format!("view {}", name),
            });
        }
        session
            .execute(&format!("CREATE VIEW {} AS {}", self.q(name), query))
            .await?;
        debug!(view = name, "view created");
        Ok(())
    }

    /// Drops a view.
    pub async fn drop_view(&self, session: &mut Session, name: &str) -> Result<()> {
        if !self.view_exists(session, name).await? {
            return Err(HarnessError::NotFound {
                object: format!("view {}", name),
            });
        }
        session.execute(&format!("DROP VIEW {}", self.q(name))).await?;
        debug!(view = name, "view dropped");
        Ok(())
    }

    fn index_sql(&self, index: &IndexDescriptor) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.q(&index.name),
            self.q(&index.table),
            index
                .columns
                .iter()
                .map(|c| self.q(c))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }

    // ===== Introspection =====

    /// Base tables in name order.
    pub async fn list_tables(&self, session: &mut Session) -> Result<Vec<String>> {
        let sql = match self.dialect {
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Dialect::Postgresql => {
                "SELECT table_name::text AS name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY table_name"
            }
            Dialect::Mysql => {
                "SELECT table_name AS name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name"
            }
        };
        Ok(strings(&session.query(sql, &[]).await?, "name"))
    }

    /// Views in name order.
    pub async fn list_views(&self, session: &mut Session) -> Result<Vec<String>> {
        Ok(self.view_definitions(session).await?.into_keys().collect())
    }

    /// Secondary indexes, optionally restricted to one table.
    pub async fn list_indexes(&self, session: &mut Session, table: Option<&str>) -> Result<Vec<IndexDescriptor>> {
        let tables = match table {
            Some(t) => vec![t.to_string()],
            None => self.list_tables(session).await?,
        };
        let mut indexes = Vec::new();
        for t in tables {
            indexes.extend(self.describe(session, &t).await?.indexes);
        }
        indexes.sort();
        Ok(indexes)
    }

    async fn find_index(&self, session: &mut Session, name: &str) -> Result<Option<IndexDescriptor>> {
        Ok(self
            .list_indexes(session, None)
            .await?
            .into_iter()
            .find(|i| i.name.eq_ignore_ascii_case(name)))
    }

    /// True if a base table named `table` exists.
    pub async fn table_exists(&self, session: &mut Session, table: &str) -> Result<bool> {
        Ok(self
            .list_tables(session)
            .await?
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table)))
    }

    /// True if a view named `name` exists.
    pub async fn view_exists(&self, session: &mut Session, name: &str) -> Result<bool> {
        Ok(self
            .list_views(session)
            .await?
            .iter()
            .any(|v| v.eq_ignore_ascii_case(name)))
    }

    /// Tables holding foreign keys to `table`.
    pub async fn dependents(&self, session: &mut Session, table: &str) -> Result<Vec<String>> {
        let descriptors = self.describe_all(session).await?;
        Ok(dependents_of(table, &descriptors))
    }

    /// Current definition of `table`; `NotFound` if absent.
    pub async fn describe(&self, session: &mut Session, table: &str) -> Result<SchemaDescriptor> {
        let desc = match self.dialect {
            Dialect::Sqlite => self.describe_sqlite(session, table).await?,
            Dialect::Postgresql => self.describe_postgres(session, table).await?,
            Dialect::Mysql => self.describe_mysql(session, table).await?,
        };
        if desc.columns.is_empty() {
            return Err(HarnessError::NotFound {
                object: format!("table {}", table),
            });
        }
        Ok(desc)
    }

    async fn describe_all(&self, session: &mut Session) -> Result<BTreeMap<String, SchemaDescriptor>> {
        let mut all = BTreeMap::new();
        for table in self.list_tables(session).await? {
            let desc = self.describe(session, &table).await?;
            all.insert(table, desc);
        }
        Ok(all)
    }

    async fn describe_sqlite(&self, session: &mut Session, table: &str) -> Result<SchemaDescriptor> {
        let info = session
            .query(&format!("PRAGMA table_info({})", self.q(table)), &[])
            .await?;
        let create_sql = self.create_statement(session, table).await?.unwrap_or_default();
        let autoincrement = create_sql.to_ascii_uppercase().contains("AUTOINCREMENT");
        let pk_count = info
            .rows
            .iter()
            .filter(|r| int(r, "pk") > 0)
            .count();

        let mut columns: Vec<ColumnDef> = info
            .rows
            .iter()
            .map(|r| {
                let mut column = ColumnDef::new(&text(r, "name"), &text(r, "type"));
                if int(r, "pk") > 0 {
                    column = column.with(Constraint::PrimaryKey {
                        autoincrement: autoincrement && pk_count == 1,
                    });
                } else if int(r, "notnull") == 1 {
                    column = column.with(Constraint::NotNull);
                }
                if let Some(default) = r.get("dflt_value").filter(|v| !v.is_null()) {
                    column = column.with(Constraint::Default(raw(default)));
                }
                column
            })
            .collect();

        let mut indexes = Vec::new();
        let list = session
            .query(&format!("PRAGMA index_list({})", self.q(table)), &[])
            .await?;
        for entry in &list.rows {
            let origin = text(entry, "origin");
            if origin == "pk" {
                continue;
            }
            let name = text(entry, "name");
            let info = session
                .query(&format!("PRAGMA index_info({})", self.q(&name)), &[])
                .await?;
            let index_columns = strings(&info, "name");
            let unique = int(entry, "unique") == 1;
            if origin == "u" && index_columns.len() == 1 {
                mark(&mut columns, &index_columns[0], Constraint::Unique);
            }
            indexes.push(IndexDescriptor {
                name,
                table: table.to_string(),
                columns: index_columns,
                unique,
            });
        }
        indexes.sort();

        let fk_rows = session
            .query(&format!("PRAGMA foreign_key_list({})", self.q(table)), &[])
            .await?;
        let mut grouped: BTreeMap<i64, ForeignKeyDescriptor> = BTreeMap::new();
        for r in &fk_rows.rows {
            let fk = grouped.entry(int(r, "id")).or_insert_with(|| ForeignKeyDescriptor {
                columns: Vec::new(),
                ref_table: text(r, "table"),
                ref_columns: Vec::new(),
            });
            fk.columns.push(text(r, "from"));
            fk.ref_columns.push(text(r, "to"));
        }
        let foreign_keys = finish_foreign_keys(grouped.into_values().collect(), &mut columns);

        Ok(SchemaDescriptor {
            table: table.to_string(),
            columns,
            indexes,
            foreign_keys,
        })
    }

    async fn describe_postgres(&self, session: &mut Session, table: &str) -> Result<SchemaDescriptor> {
        let name = [Value::Text(table.to_string())];
        let column_rows = session
            .query(
                "SELECT column_name::text AS name, \
                        CASE WHEN character_maximum_length IS NOT NULL \
                             THEN data_type::text || '(' || character_maximum_length::text || ')' \
                             ELSE data_type::text END AS data_type, \
                        is_nullable::text AS nullable, column_default::text AS dflt \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position",
                &name,
            )
            .await?;
        let key_rows = session
            .query(
                "SELECT tc.constraint_type::text AS kind, tc.constraint_name::text AS cname, \
                        kcu.column_name::text AS col \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema AND tc.table_name = kcu.table_name \
                 WHERE tc.table_schema = current_schema() AND tc.table_name = $1 \
                   AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE') \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &name,
            )
            .await?;
        let fk_rows = session
            .query(
                "SELECT tc.constraint_name::text AS cname, kcu.column_name::text AS col, \
                        ccu.table_name::text AS ref_table, ccu.column_name::text AS ref_col \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
                 JOIN information_schema.constraint_column_usage ccu \
                   ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
                 WHERE tc.constraint_type = 'FOREIGN KEY' \
                   AND tc.table_schema = current_schema() AND tc.table_name = $1 \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &name,
            )
            .await?;
        let index_rows = session
            .query(
                "SELECT i.relname::text AS name, ix.indisunique AS is_unique, a.attname::text AS col \
                 FROM pg_class t \
                 JOIN pg_namespace n ON n.oid = t.relnamespace \
                 JOIN pg_index ix ON t.oid = ix.indrelid \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
                 WHERE t.relname = $1 AND n.nspname = current_schema() AND NOT ix.indisprimary \
                 ORDER BY i.relname, array_position(ix.indkey::int2[], a.attnum)",
                &name,
            )
            .await?;

        let primary: Vec<String> = key_rows
            .rows
            .iter()
            .filter(|r| text(r, "kind") == "PRIMARY KEY")
            .map(|r| text(r, "col"))
            .collect();
        let mut unique_groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for r in key_rows.rows.iter().filter(|r| text(r, "kind") == "UNIQUE") {
            unique_groups.entry(text(r, "cname")).or_default().push(text(r, "col"));
        }

        let mut columns: Vec<ColumnDef> = column_rows
            .rows
            .iter()
            .map(|r| {
                let name = text(r, "name");
                let default = r.get("dflt").filter(|v| !v.is_null()).map(raw);
                let serial = default.as_deref().map(|d| d.starts_with("nextval(")).unwrap_or(false);
                let mut column = ColumnDef::new(&name, &text(r, "data_type"));
                if primary.iter().any(|p| p == &name) {
                    column = column.with(Constraint::PrimaryKey {
                        autoincrement: serial && primary.len() == 1,
                    });
                } else if text(r, "nullable") == "NO" {
                    column = column.with(Constraint::NotNull);
                }
                if let Some(default) = default.filter(|_| !serial) {
                    column = column.with(Constraint::Default(default));
                }
                column
            })
            .collect();
        for cols in unique_groups.values().filter(|c| c.len() == 1) {
            mark(&mut columns, &cols[0], Constraint::Unique);
        }

        let mut grouped: BTreeMap<String, ForeignKeyDescriptor> = BTreeMap::new();
        for r in &fk_rows.rows {
            let fk = grouped.entry(text(r, "cname")).or_insert_with(|| ForeignKeyDescriptor {
                columns: Vec::new(),
                ref_table: text(r, "ref_table"),
                ref_columns: Vec::new(),
            });
            let col = text(r, "col");
            let ref_col = text(r, "ref_col");
            if !fk.columns.contains(&col) {
                fk.columns.push(col);
            }
            if !fk.ref_columns.contains(&ref_col) {
                fk.ref_columns.push(ref_col);
            }
        }
        let foreign_keys = finish_foreign_keys(grouped.into_values().collect(), &mut columns);

        Ok(SchemaDescriptor {
            table: table.to_string(),
            columns,
            indexes: group_indexes(table, &index_rows),
            foreign_keys,
        })
    }

    async fn describe_mysql(&self, session: &mut Session, table: &str) -> Result<SchemaDescriptor> {
        let name = [Value::Text(table.to_string())];
        let column_rows = session
            .query(
                "SELECT column_name AS name, column_type AS data_type, is_nullable AS nullable, \
                        column_default AS dflt, column_key AS ckey, extra AS extra \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position",
                &name,
            )
            .await?;
        let index_rows = session
            .query(
                "SELECT index_name AS name, (non_unique = 0) AS is_unique, column_name AS col \
                 FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() AND table_name = ? AND index_name <> 'PRIMARY' \
                 ORDER BY index_name, seq_in_index",
                &name,
            )
            .await?;
        let fk_rows = session
            .query(
                "SELECT constraint_name AS cname, column_name AS col, \
                        referenced_table_name AS ref_table, referenced_column_name AS ref_col \
                 FROM information_schema.key_column_usage \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                   AND referenced_table_name IS NOT NULL \
                 ORDER BY constraint_name, ordinal_position",
                &name,
            )
            .await?;

        let pk_count = column_rows.rows.iter().filter(|r| text(r, "ckey") == "PRI").count();
        let mut columns: Vec<ColumnDef> = column_rows
            .rows
            .iter()
            .map(|r| {
                let mut column = ColumnDef::new(&text(r, "name"), &text(r, "data_type"));
                let key = text(r, "ckey");
                if key == "PRI" {
                    column = column.with(Constraint::PrimaryKey {
                        autoincrement: pk_count == 1 && text(r, "extra").contains("auto_increment"),
                    });
                } else if text(r, "nullable") == "NO" {
                    column = column.with(Constraint::NotNull);
                }
                if key == "UNI" {
                    column = column.with(Constraint::Unique);
                }
                if let Some(default) = r.get("dflt").filter(|v| !v.is_null()) {
                    column = column.with(Constraint::Default(raw(default)));
                }
                column
            })
            .collect();

        let mut grouped: BTreeMap<String, ForeignKeyDescriptor> = BTreeMap::new();
        for r in &fk_rows.rows {
            let fk = grouped.entry(text(r, "cname")).or_insert_with(|| ForeignKeyDescriptor {
                columns: Vec::new(),
                ref_table: text(r, "ref_table"),
                ref_columns: Vec::new(),
            });
            fk.columns.push(text(r, "col"));
            fk.ref_columns.push(text(r, "ref_col"));
        }
        let foreign_keys = finish_foreign_keys(grouped.into_values().collect(), &mut columns);

        Ok(SchemaDescriptor {
            table: table.to_string(),
            columns,
            indexes: group_indexes(table, &index_rows),
            foreign_keys,
        })
    }

    /// CREATE TABLE statement as stored by the engine.
    ///
    /// PostgreSQL keeps no such text; `None` is returned there.
    pub async fn create_statement(&self, session: &mut Session, table: &str) -> Result<Option<String>> {
        match self.dialect {
            Dialect::Sqlite => {
                let rows = session
                    .query(
                        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
                        &[Value::Text(table.to_string())],
                    )
                    .await?;
                Ok(rows.scalar().filter(|v| !v.is_null()).map(raw))
            }
            Dialect::Mysql => {
                let rows = session
                    .query(&format!("SHOW CREATE TABLE {}", self.q(table)), &[])
                    .await?;
                Ok(rows.first().and_then(|r| r.values().nth(1)).map(raw))
            }
            Dialect::Postgresql => Ok(None),
        }
    }

    async fn view_definitions(&self, session: &mut Session) -> Result<BTreeMap<String, String>> {
        let rows = match self.dialect {
            Dialect::Sqlite => {
                session
                    .query("SELECT name, sql AS definition FROM sqlite_master WHERE type = 'view' ORDER BY name", &[])
                    .await?
            }
            Dialect::Postgresql => {
                session
                    .query(
                        "SELECT table_name::text AS name, view_definition::text AS definition \
                         FROM information_schema.views WHERE table_schema = current_schema() ORDER BY table_name",
                        &[],
                    )
                    .await?
            }
            Dialect::Mysql => {
                session
                    .query(
                        "SELECT table_name AS name, view_definition AS definition \
                         FROM information_schema.views WHERE table_schema = DATABASE() ORDER BY table_name",
                        &[],
                    )
                    .await?
            }
        };
        let mut views = BTreeMap::new();
        for r in &rows.rows {
            let name = text(r, "name");
            let definition = text(r, "definition");
            let statement = if self.dialect == Dialect::Sqlite {
                definition
            } else {
                format!("CREATE VIEW {} AS {}", self.q(&name), definition.trim_end_matches(';'))
            };
            views.insert(name, statement);
        }
        Ok(views)
    }

    async fn index_definitions(
        &self,
        session: &mut Session,
        tables: &BTreeMap<String, SchemaDescriptor>,
    ) -> Result<BTreeMap<String, String>> {
        let mut definitions = BTreeMap::new();
        if self.dialect == Dialect::Sqlite {
            let rows = session
                .query(
                    "SELECT name, sql FROM sqlite_master WHERE type = 'index' AND sql IS NOT NULL",
                    &[],
                )
                .await?;
            for r in &rows.rows {
                definitions.insert(text(r, "name"), text(r, "sql"));
            }
        } else {
            for desc in tables.values() {
                for index in &desc.indexes {
                    definitions.insert(index.name.clone(), self.index_sql(index));
                }
            }
        }
        Ok(definitions)
    }

    // ===== Snapshots =====

    /// Captures the catalog, row counts and small tables' contents.
    pub async fn snapshot(&self, session: &mut Session) -> Result<SchemaSnapshot> {
        let tables = self.describe_all(session).await?;
        let mut snapshot = SchemaSnapshot {
            index_definitions: self.index_definitions(session, &tables).await?,
            views: self.view_definitions(session).await?,
            ..SchemaSnapshot::default()
        };

        for (name, desc) in &tables {
            if let Some(sql) = self.create_statement(session, name).await? {
                snapshot.definitions.insert(name.clone(), sql);
            }
            let count = session
                .scalar_i64(&format!("SELECT COUNT(*) FROM {}", self.q(name)), &[])
                .await?;
            snapshot.row_counts.insert(name.clone(), count);
            if count <= SNAPSHOT_ROW_LIMIT {
                let order = desc
                    .primary_key()
                    .first()
                    .map(|c| self.q(c))
                    .unwrap_or_else(|| "1".to_string());
                let rows = session
                    .query(&format!("SELECT * FROM {} ORDER BY {}", self.q(name), order), &[])
                    .await?;
                snapshot.data.insert(name.clone(), rows);
            }
        }
        snapshot.tables = tables;
        Ok(snapshot.seal())
    }

    /// Brings the database back to `snapshot`.
    ///
    /// Drops tables that are new or changed (plus everything referencing
    /// them), recreates the snapshot's tables, indexes and views, and reloads
    /// the captured rows with identity counters reset.
    pub async fn restore(&self, session: &mut Session, snapshot: &SchemaSnapshot) -> Result<()> {
        if session.in_transaction() {
            session.rollback().await?;
        }
        let current = self.describe_all(session).await?;
        let table_names: Vec<String> = current.keys().cloned().collect();
        let _guards = self.locks.write_many(&table_names).await;

        for view in self.view_definitions(session).await?.keys() {
            session.execute(&format!("DROP VIEW {}", self.q(view))).await?;
        }

        // Tables to drop: unknown to the snapshot or structurally different,
        // closed over everything that references them.
        let mut doomed: Vec<String> = current
            .iter()
            .filter(|(name, desc)| snapshot.tables.get(*name) != Some(*desc))
            .map(|(name, _)| name.clone())
            .collect();
        let mut frontier = doomed.clone();
        while let Some(table) = frontier.pop() {
            for child in dependents_of(&table, &current) {
                if !doomed.contains(&child) {
                    doomed.push(child.clone());
                    frontier.push(child);
                }
            }
        }
        let mut drop_order = parents_first(&doomed, &current);
        drop_order.reverse();
        for table in &drop_order {
            session.execute(&format!("DROP TABLE {}", self.q(table))).await?;
        }

        let snapshot_names: Vec<String> = snapshot.tables.keys().cloned().collect();
        let create_order = parents_first(&snapshot_names, &snapshot.tables);
        for table in &create_order {
            if current.contains_key(table) && !doomed.contains(table) {
                continue;
            }
            let sql = match snapshot.definitions.get(table) {
                Some(sql) => sql.clone(),
                None => snapshot.tables[table].to_table_def().to_sql(self.dialect),
            };
            session.execute(&sql).await?;
            let existing: Vec<String> = self
                .describe(session, table)
                .await?
                .indexes
                .into_iter()
                .map(|i| i.name)
                .collect();
            for index in &snapshot.tables[table].indexes {
                if existing.iter().any(|e| e.eq_ignore_ascii_case(&index.name)) {
                    continue;
                }
                let sql = snapshot
                    .index_definitions
                    .get(&index.name)
                    .cloned()
                    .unwrap_or_else(|| self.index_sql(index));
                session.execute(&sql).await?;
            }
            info!(table = %table, "table recreated");
        }

        self.reload_data(session, snapshot, &create_order).await?;

        for statement in snapshot.views.values() {
            session.execute(statement).await?;
        }
        Ok(())
    }

    async fn reload_data(
        &self,
        session: &mut Session,
        snapshot: &SchemaSnapshot,
        parents_first_order: &[String],
    ) -> Result<()> {
        let reloadable: Vec<String> = parents_first_order
            .iter()
            .filter(|t| snapshot.data.contains_key(*t))
            .cloned()
            .collect();

        self.disable_foreign_keys(session).await?;
        let result = self.reload_rows(session, snapshot, &reloadable).await;
        self.enable_foreign_keys(session).await?;
        result
    }

    /// Replaces the contents of `reloadable` (parents first) with the
    /// snapshot rows.
    async fn reload_rows(&self, session: &mut Session, snapshot: &SchemaSnapshot, reloadable: &[String]) -> Result<()> {
        for table in reloadable.iter().rev() {
            session.execute(&format!("DELETE FROM {}", self.q(table))).await?;
        }
        if self.dialect == Dialect::Sqlite {
            let children_first: Vec<String> = reloadable.iter().rev().cloned().collect();
            self.reset_sqlite_sequences(session, &children_first).await?;
        }

        for table in reloadable {
            let rows = &snapshot.data[table];
            for row in &rows.rows {
                let (sql, params) = insert_statement(self.dialect, table, row);
                session.execute_with(&sql, &params).await?;
            }
            self.reset_identity(session, &snapshot.tables[table]).await?;
        }
        Ok(())
    }

    async fn disable_foreign_keys(&self, session: &mut Session) -> Result<()> {
        match self.dialect.foreign_key_checks_sql(false) {
            Some(sql) => session.execute(sql).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Turns enforcement back on. A session that cannot be restored is
    /// poisoned so it is discarded instead of returning to the pool.
    async fn enable_foreign_keys(&self, session: &mut Session) -> Result<()> {
        let Some(sql) = self.dialect.foreign_key_checks_sql(true) else {
            return Ok(());
        };
        if let Err(e) = session.execute(sql).await {
            warn!(session = %session.id(), error = %e, "foreign key checks not restored");
            session.poison();
            return Err(e);
        }
        Ok(())
    }

    /// Aligns an auto-increment counter with the table's current maximum.
    pub(crate) async fn reset_identity(&self, session: &mut Session, desc: &SchemaDescriptor) -> Result<()> {
        let serial = desc.columns.iter().find(|c| {
            c.constraints
                .contains(&Constraint::PrimaryKey { autoincrement: true })
        });
        let Some(column) = serial else {
            return Ok(());
        };
        match self.dialect {
            Dialect::Postgresql => {
                let sql = format!(
                    "SELECT setval(pg_get_serial_sequence($1, $2), COALESCE((SELECT MAX({col}) FROM {tbl}), 0) + 1, false)",
                    col = self.q(&column.name),
                    tbl = self.q(&desc.table)
                );
                session
                    .query(
                        &sql,
                        &[Value::Text(desc.table.clone()), Value::Text(column.name.clone())],
                    )
                    .await?;
            }
            Dialect::Mysql => {
                session
                    .execute(&format!("ALTER TABLE {} AUTO_INCREMENT = 1", self.q(&desc.table)))
                    .await?;
            }
            Dialect::Sqlite => {}
        }
        Ok(())
    }
}

/// INSERT for one row; NULLs are inlined so no untyped parameter is bound.
pub(crate) fn insert_statement(dialect: Dialect, table: &str, row: &Row) -> (String, Vec<Value>) {
    let mut params = Vec::new();
    let (values, _) = render_values(dialect, row.values(), &mut params);
    let columns = row
        .columns()
        .map(|c| dialect.quote(c))
        .collect::<Vec<_>>()
        .join(", ");
    (
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            dialect.quote(table),
            columns,
            values
        ),
        params,
    )
}

/// Renders a VALUES tuple body, appending bound parameters to `params`.
pub(crate) fn render_values<'a>(
    dialect: Dialect,
    values: impl Iterator<Item = &'a Value>,
    params: &mut Vec<Value>,
) -> (String, usize) {
    let mut parts = Vec::new();
    for value in values {
        if value.is_null() {
            parts.push("NULL".to_string());
        } else {
            params.push(value.clone());
            parts.push(dialect.placeholder(params.len()));
        }
    }
    let count = parts.len();
    (parts.join(", "), count)
}

/// Tables (other than `table`) with a foreign key referencing `table`.
fn dependents_of(table: &str, descriptors: &BTreeMap<String, SchemaDescriptor>) -> Vec<String> {
    descriptors
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case(table))
        .filter(|(_, desc)| {
            desc.foreign_keys
                .iter()
                .any(|fk| fk.ref_table.eq_ignore_ascii_case(table))
        })
        .map(|(name, _)| name.clone())
        .collect()
}

/// Orders `tables` so referenced tables precede the tables referencing them.
/// Cycles are broken in name order.
fn parents_first(tables: &[String], descriptors: &BTreeMap<String, SchemaDescriptor>) -> Vec<String> {
    let mut remaining: Vec<String> = tables.to_vec();
    remaining.sort();
    remaining.dedup();
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let ready: Vec<String> = remaining
            .iter()
            .filter(|t| {
                descriptors
                    .get(*t)
                    .map(|d| {
                        d.foreign_keys.iter().all(|fk| {
                            fk.ref_table.eq_ignore_ascii_case(t)
                                || !remaining.iter().any(|r| r.eq_ignore_ascii_case(&fk.ref_table))
                        })
                    })
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        if ready.is_empty() {
            warn!(tables = ?remaining, "foreign key cycle, using name order");
            ordered.append(&mut remaining);
            break;
        }
        remaining.retain(|t| !ready.contains(t));
        ordered.extend(ready);
    }
    ordered
}

fn finish_foreign_keys(
    mut foreign_keys: Vec<ForeignKeyDescriptor>,
    columns: &mut [ColumnDef],
) -> Vec<ForeignKeyDescriptor> {
    for fk in &foreign_keys {
        if fk.columns.len() == 1 && fk.ref_columns.len() == 1 {
            mark(
                columns,
                &fk.columns[0],
                Constraint::ForeignKey {
                    table: fk.ref_table.clone(),
                    column: fk.ref_columns[0].clone(),
                },
            );
        }
    }
    foreign_keys.sort();
    foreign_keys
}

fn group_indexes(table: &str, rows: &RowSet) -> Vec<IndexDescriptor> {
    let mut grouped: BTreeMap<String, IndexDescriptor> = BTreeMap::new();
    for r in &rows.rows {
        let name = text(r, "name");
        let unique = r
            .get("is_unique")
            .and_then(Value::as_i64)
            .map(|v| v != 0)
            .unwrap_or(false);
        grouped
            .entry(name.clone())
            .or_insert_with(|| IndexDescriptor {
                name,
                table: table.to_string(),
                columns: Vec::new(),
                unique,
            })
            .columns
            .push(text(r, "col"));
    }
    grouped.into_values().collect()
}

fn mark(columns: &mut [ColumnDef], name: &str, constraint: Constraint) {
    if let Some(column) = columns.iter_mut().find(|c| c.name.eq_ignore_ascii_case(name)) {
        if !column.constraints.contains(&constraint) {
            column.constraints.push(constraint);
        }
    }
}

fn raw(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        other => other.to_string(),
    }
}

fn text(row: &Row, column: &str) -> String {
    row.get(column).map(raw).unwrap_or_default()
}

fn int(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(Value::as_i64).unwrap_or(0)
}

fn strings(rows: &RowSet, column: &str) -> Vec<String> {
    rows.rows.iter().map(|r| text(r, column)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::connection::ConnectionManager;
    use crate::ErrorKind;
    use tempfile::TempDir;

    async fn setup(tmp: &TempDir) -> (ConnectionManager, SchemaManager, Session) {
        let config = DatabaseConfig {
            database: tmp.path().join("schema.db").display().to_string(),
            pool_size: 2,
            ..DatabaseConfig::default()
        };
        let manager = ConnectionManager::connect(&config).await.unwrap();
        let session = manager.acquire().await.unwrap();
        (manager, SchemaManager::new(Dialect::Sqlite, TableLocks::new()), session)
    }

    fn employees() -> TableDef {
        TableDef::new("test_employees")
            .column(ColumnDef::parse("id", "INTEGER", "PRIMARY KEY AUTOINCREMENT").unwrap())
            .column(ColumnDef::parse("name", "VARCHAR(100)", "NOT NULL").unwrap())
            .column(ColumnDef::parse("email", "VARCHAR(150)", "UNIQUE NOT NULL").unwrap())
    }

    #[tokio::test]
    async fn test_create_and_describe() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;

        let desc = schema.create_table(&mut session, &employees()).await.unwrap();
        assert_eq!(desc.column_count(), 3);
        assert_eq!(desc.primary_key(), vec!["id"]);
        assert!(desc.is_unique("email"));
        assert!(desc.is_not_null("name"));

        let err = schema.create_table(&mut session, &employees()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        schema
            .create_table(&mut session, &employees().if_not_exists())
            .await
            .unwrap();

        manager.release(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_alter_table_errors() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;
        schema.create_table(&mut session, &employees()).await.unwrap();

        let err = schema
            .alter_table(
                &mut session,
                "test_employees",
                &AlterChange::AddColumn(ColumnDef::new("email", "TEXT")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = schema
            .alter_table(&mut session, "test_employees", &AlterChange::DropColumn("ghost".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = schema
            .alter_table(&mut session, "ghosts", &AlterChange::Rename("spirits".into()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let desc = schema
            .alter_table(
                &mut session,
                "test_employees",
                &AlterChange::AddColumn(ColumnDef::parse("age", "INTEGER", "DEFAULT 0").unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(desc.column_count(), 4);

        manager.release(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_table_respects_dependents() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;
        schema.create_table(&mut session, &employees()).await.unwrap();
        let reviews = TableDef::new("reviews")
            .column(ColumnDef::parse("id", "INTEGER", "PRIMARY KEY").unwrap())
            .column(ColumnDef::parse("employee_id", "INTEGER", "REFERENCES test_employees(id)").unwrap());
        schema.create_table(&mut session, &reviews).await.unwrap();

        let err = schema
            .drop_table(&mut session, "test_employees", false)
            .await
            .unwrap_err();
        match &err {
            HarnessError::DependencyExists { dependents, .. } => {
                assert_eq!(dependents, &vec!["reviews".to_string()])
            }
            other => panic!("expected DependencyExists, got {:?}", other),
        }

        let dropped = schema
            .drop_table(&mut session, "test_employees", true)
            .await
            .unwrap();
        assert_eq!(dropped, vec!["reviews".to_string(), "test_employees".to_string()]);
        assert!(schema.list_tables(&mut session).await.unwrap().is_empty());

        manager.release(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_truncate_resets_autoincrement() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;
        schema.create_table(&mut session, &employees()).await.unwrap();
        for i in 0..3 {
            session
                .execute(&format!(
                    "INSERT INTO test_employees (name, email) VALUES ('e{i}', 'e{i}@x.com')"
                ))
                .await
                .unwrap();
        }
        let before = schema.describe(&mut session, "test_employees").await.unwrap();
        let after = schema.truncate(&mut session, "test_employees").await.unwrap();
        assert_eq!(before, after);

        session
            .execute("INSERT INTO test_employees (name, email) VALUES ('new', 'new@x.com')")
            .await
            .unwrap();
        let id = session
            .scalar_i64("SELECT id FROM test_employees", &[])
            .await
            .unwrap();
        assert_eq!(id, 1);

        manager.release(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_indexes_and_views() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;
        schema.create_table(&mut session, &employees()).await.unwrap();

        let desc = schema
            .create_index(&mut session, "idx_emp_name", "test_employees", &["name".into()], false)
            .await
            .unwrap();
        assert!(desc.indexes.iter().any(|i| i.name == "idx_emp_name"));
        let err = schema
            .create_index(&mut session, "idx_emp_name", "test_employees", &["name".into()], false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        schema.drop_index(&mut session, "idx_emp_name").await.unwrap();
        let err = schema.drop_index(&mut session, "idx_emp_name").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        schema
            .create_view(&mut session, "emp_names", "SELECT name FROM test_employees")
            .await
            .unwrap();
        assert_eq!(schema.list_views(&mut session).await.unwrap(), vec!["emp_names"]);
        schema.drop_view(&mut session, "emp_names").await.unwrap();
        let err = schema.drop_view(&mut session, "emp_names").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        manager.release(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_unique_constraint_on_sqlite() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;
        schema.create_table(&mut session, &employees()).await.unwrap();

        let desc = schema
            .alter_table(
                &mut session,
                "test_employees",
                &AlterChange::AddConstraint(TableConstraint::Unique(vec!["name".into()])),
            )
            .await
            .unwrap();
        assert!(desc.is_unique("name"));

        let desc = schema
            .alter_table(
                &mut session,
                "test_employees",
                &AlterChange::AddConstraint(TableConstraint::Check("length(name) > 0".into())),
            )
            .await
            .unwrap();
        assert!(desc.is_unique("name"));
        let err = session
            .execute("INSERT INTO test_employees (name, email) VALUES ('', 'a@b.c')")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CheckConstraintViolation);

        manager.release(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;
        schema.create_table(&mut session, &employees()).await.unwrap();
        session
            .execute("INSERT INTO test_employees (name, email) VALUES ('Ann', 'ann@x.com')")
            .await
            .unwrap();
        let baseline = schema.snapshot(&mut session).await.unwrap();

        session
            .execute("INSERT INTO test_employees (name, email) VALUES ('Bob', 'bob@x.com')")
            .await
            .unwrap();
        schema
            .alter_table(
                &mut session,
                "test_employees",
                &AlterChange::AddColumn(ColumnDef::new("age", "INTEGER")),
            )
            .await
            .unwrap();
        schema
            .create_table(&mut session, &TableDef::new("scratch").column(ColumnDef::new("x", "INTEGER")))
            .await
            .unwrap();
        let dirty = schema.snapshot(&mut session).await.unwrap();
        assert_ne!(dirty.fingerprint, baseline.fingerprint);
        assert!(!baseline.diff(&dirty).is_empty());

        schema.restore(&mut session, &baseline).await.unwrap();
        let restored = schema.snapshot(&mut session).await.unwrap();
        assert_eq!(restored.fingerprint, baseline.fingerprint);

        session
            .execute("INSERT INTO test_employees (name, email) VALUES ('Cy', 'cy@x.com')")
            .await
            .unwrap();
        let id = session
            .scalar_i64("SELECT id FROM test_employees WHERE name = 'Cy'", &[])
            .await
            .unwrap();
        assert_eq!(id, 2);

        manager.release(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_reload_restores_foreign_keys() {
        let tmp = TempDir::new().unwrap();
        let (manager, schema, mut session) = setup(&tmp).await;
        schema.create_table(&mut session, &employees()).await.unwrap();
        session
            .execute("INSERT INTO test_employees (name, email) VALUES ('Ann', 'ann@x.com')")
            .await
            .unwrap();
        let mut broken = schema.snapshot(&mut session).await.unwrap();
        let rows = broken.data.get_mut("test_employees").unwrap();
        let duplicate = rows.rows[0].clone();
        rows.rows.push(duplicate);

        let err = schema.restore(&mut session, &broken).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UniqueConstraintViolation);
        assert!(!session.is_poisoned());
        let enforced = session.scalar_i64("PRAGMA foreign_keys", &[]).await.unwrap();
        assert_eq!(enforced, 1);

        manager.release(&mut session).await.unwrap();
    }

    #[test]
    fn test_parents_first_ordering() {
        let mut descriptors = BTreeMap::new();
        let child = SchemaDescriptor {
            table: "orders".into(),
            columns: vec![ColumnDef::new("user_id", "INTEGER")],
            indexes: vec![],
            foreign_keys: vec![ForeignKeyDescriptor {
                columns: vec!["user_id".into()],
                ref_table: "users".into(),
                ref_columns: vec!["id".into()],
            }],
        };
        let parent = SchemaDescriptor {
            table: "users".into(),
            columns: vec![ColumnDef::new("id", "INTEGER")],
            indexes: vec![],
            foreign_keys: vec![],
        };
        descriptors.insert("orders".to_string(), child);
        descriptors.insert("users".to_string(), parent);

        let order = parents_first(&["orders".into(), "users".into()], &descriptors);
        assert_eq!(order, vec!["users".to_string(), "orders".to_string()]);
        assert_eq!(dependents_of("users", &descriptors), vec!["orders".to_string()]);
    }

    #[test]
    fn test_insert_statement_inlines_nulls() {
        let row = Row::new().with("name", "x").with("age", Value::Null).with("n", 3);
        let (sql, params) = insert_statement(Dialect::Postgresql, "t", &row);
        assert_eq!(sql, "INSERT INTO \"t\" (\"name\", \"age\", \"n\") VALUES ($1, NULL, $2)");
        assert_eq!(params, vec![Value::Text("x".into()), Value::Int(3)]);
    }
}
