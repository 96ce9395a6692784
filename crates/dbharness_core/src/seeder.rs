//! Baseline fixtures, checked inserts and bulk synthetic data.

use crate::connection::Session;
use crate::dialect::Dialect;
use crate::error::{HarnessError, Result};
use crate::locks::TableLocks;
use crate::schema::{insert_statement, render_values, SchemaManager};
use crate::types::{ColumnDef, Row, SchemaDescriptor, TableConstraint, TableDef, Value};
use chrono::{SecondsFormat, Utc};
use rand::distr::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Baseline tables, parents first.
pub const BASELINE_TABLES: [&str; 3] = ["users", "products", "orders"];

/// Upper bound on bound parameters per statement, below every engine's limit.
const MAX_PARAMS_PER_STATEMENT: usize = 30_000;

/// Row counts written by [`DataSeeder::seed_baseline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BaselineSummary {
    /// Users inserted.
    pub users: u64,
    /// Products inserted.
    pub products: u64,
    /// Orders inserted.
    pub orders: u64,
}

/// Outcome of [`DataSeeder::bulk_insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    /// Rows written.
    pub rows: u64,
    /// INSERT statements issued.
    pub statements: usize,
    /// Whether multi-row statements were used.
    pub batched: bool,
}

/// Source of synthetic rows.
pub trait Generator: Send {
    /// Produces the row at position `index` of the batch.
    fn generate(&mut self, index: usize) -> Row;
}

impl<F> Generator for F
where
    F: FnMut(usize) -> Row + Send,
{
    fn generate(&mut self, index: usize) -> Row {
        self(index)
    }
}

/// Random users with unique usernames and emails.
#[derive(Debug)]
pub struct UserGenerator {
    rng: StdRng,
    prefix: String,
}

impl UserGenerator {
    /// Generator seeded from the thread RNG.
    pub fn new(prefix: &str) -> Self {
        Self::seeded(prefix, rand::random())
    }

    /// Deterministic generator.
    pub fn seeded(prefix: &str, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            prefix: prefix.to_string(),
        }
    }
}

impl Generator for UserGenerator {
    fn generate(&mut self, index: usize) -> Row {
        let tag: String = (&mut self.rng)
            .sample_iter(Alphanumeric)
            .take(6)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        let username = format!("{}_{}_{}", self.prefix, index, tag);
        Row::new()
            .with("username", username.as_str())
            .with("email", format!("{}@example.com", username))
            .with("created_at", timestamp())
            .with("is_active", 1)
    }
}

const PRODUCT_WORDS: [&str; 8] = [
    "Widget", "Gadget", "Cable", "Lamp", "Chair", "Monitor", "Keyboard", "Notebook",
];
const PRODUCT_CATEGORIES: [&str; 4] = ["Electronics", "Books", "Home", "Office"];

/// Random products with prices in [1.00, 1000.00).
#[derive(Debug)]
pub struct ProductGenerator {
    rng: StdRng,
}

impl ProductGenerator {
    /// Generator seeded from the thread RNG.
    pub fn new() -> Self {
        Self::seeded(rand::random())
    }

    /// Deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for ProductGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for ProductGenerator {
    fn generate(&mut self, index: usize) -> Row {
        let word = PRODUCT_WORDS[self.rng.random_range(0..PRODUCT_WORDS.len())];
        let category = PRODUCT_CATEGORIES[self.rng.random_range(0..PRODUCT_CATEGORIES.len())];
        let cents: i64 = self.rng.random_range(100..100_000);
        Row::new()
            .with("name", format!("{} {}", word, index))
            .with("price", cents as f64 / 100.0)
            .with("category", category)
            .with("in_stock", self.rng.random_range(0..100i64))
            .with("created_at", timestamp())
    }
}

pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fixture and record writer.
#[derive(Debug, Clone)]
pub struct DataSeeder {
    dialect: Dialect,
    locks: TableLocks,
    schema: SchemaManager,
    batch_threshold: usize,
    batch_size: usize,
}

impl DataSeeder {
    /// Creates a seeder. `bulk_insert` uses multi-row statements above
    /// `batch_threshold` rows, at most `batch_size` rows per statement.
    pub fn new(schema: SchemaManager, batch_threshold: usize, batch_size: usize) -> Self {
        Self {
            dialect: schema.dialect(),
            locks: schema.locks().clone(),
            schema,
            batch_threshold,
            batch_size: batch_size.max(1),
        }
    }

    /// Baseline table definitions for the dialect, parents first.
    pub fn baseline_tables(&self) -> Vec<TableDef> {
        let id = ColumnDef::new("id", "INTEGER").with(crate::types::Constraint::PrimaryKey {
            autoincrement: true,
        });
        let parse = |name: &str, ty: &str, constraints: &str| {
            ColumnDef::parse(name, ty, constraints).unwrap_or_else(|_| ColumnDef::new(name, ty))
        };
        vec![
            TableDef::new("users")
                .column(id.clone())
                .column(parse("username", "VARCHAR(50)", "UNIQUE NOT NULL"))
                .column(parse("email", "VARCHAR(100)", "UNIQUE NOT NULL"))
                .column(ColumnDef::new("created_at", "VARCHAR(40)"))
                .column(parse("is_active", "INTEGER", "DEFAULT 1")),
            TableDef::new("products")
                .column(id.clone())
                .column(parse("name", "VARCHAR(100)", "NOT NULL"))
                .column(parse("price", "DOUBLE PRECISION", "NOT NULL"))
                .column(ColumnDef::new("category", "VARCHAR(50)"))
                .column(parse("in_stock", "INTEGER", "DEFAULT 0"))
                .column(ColumnDef::new("created_at", "VARCHAR(40)")),
            TableDef::new("orders")
                .column(id)
                .column(parse("user_id", "INTEGER", "NOT NULL"))
                .column(parse("product_id", "INTEGER", "NOT NULL"))
                .column(parse("quantity", "INTEGER", "NOT NULL"))
                .column(parse("total_amount", "DOUBLE PRECISION", "NOT NULL"))
                .column(ColumnDef::new("order_date", "VARCHAR(40)"))
                .column(parse("status", "VARCHAR(20)", "DEFAULT 'pending'"))
                .constraint(TableConstraint::ForeignKey {
                    columns: vec!["user_id".into()],
                    ref_table: "users".into(),
                    ref_columns: vec!["id".into()],
                })
                .constraint(TableConstraint::ForeignKey {
                    columns: vec!["product_id".into()],
                    ref_table: "products".into(),
                    ref_columns: vec!["id".into()],
                }),
        ]
    }

    /// Creates the baseline tables when missing and loads the canonical rows.
    ///
    /// Existing baseline rows are cleared first, so seeding twice leaves
    /// exactly one copy of the fixtures.
    pub async fn seed_baseline(&self, session: &mut Session) -> Result<BaselineSummary> {
        for def in self.baseline_tables() {
            self.schema.create_table(session, &def.if_not_exists()).await?;
        }
        self.clear_baseline(session).await?;

        let now = timestamp();
        let users: Vec<Row> = [
            ("john_doe", "john@example.com"),
            ("jane_smith", "jane@example.com"),
            ("bob_wilson", "bob@example.com"),
        ]
        .iter()
        .map(|(username, email)| {
            Row::new()
                .with("username", *username)
                .with("email", *email)
                .with("created_at", now.as_str())
                .with("is_active", 1)
        })
        .collect();
        let products: Vec<Row> = [
            ("Laptop", 999.99, "Electronics", 10),
            ("Mouse", 25.99, "Electronics", 50),
            ("Book", 12.99, "Books", 30),
        ]
        .iter()
        .map(|(name, price, category, stock)| {
            Row::new()
                .with("name", *name)
                .with("price", *price)
                .with("category", *category)
                .with("in_stock", *stock)
                .with("created_at", now.as_str())
        })
        .collect();

        let user_count = self.insert(session, "users", &users).await?;
        let product_count = self.insert(session, "products", &products).await?;
        let user_ids = self.ids(session, "users").await?;
        let product_ids = self.ids(session, "products").await?;

        let orders: Vec<Row> = [(0usize, 0usize, 1i64, 999.99), (1, 1, 2, 51.98), (2, 2, 3, 38.97)]
            .iter()
            .filter_map(|(u, p, quantity, total)| {
                Some(
                    Row::new()
                        .with("user_id", *user_ids.get(*u)?)
                        .with("product_id", *product_ids.get(*p)?)
                        .with("quantity", *quantity)
                        .with("total_amount", *total)
                        .with("order_date", now.as_str())
                        .with("status", "pending"),
                )
            })
            .collect();
        let order_count = self.insert(session, "orders", &orders).await?;

        let summary = BaselineSummary {
            users: user_count,
            products: product_count,
            orders: order_count,
        };
        info!(?summary, "baseline seeded");
        Ok(summary)
    }

    async fn ids(&self, session: &mut Session, table: &str) -> Result<Vec<i64>> {
        let rows = session
            .query(&format!("SELECT id FROM {} ORDER BY id", self.dialect.quote(table)), &[])
            .await?;
        Ok(rows.column("id").into_iter().filter_map(Value::as_i64).collect())
    }

    /// Empties the baseline tables that exist, children first.
    pub async fn clear_baseline(&self, session: &mut Session) -> Result<()> {
        let mut present = Vec::new();
        for table in BASELINE_TABLES.iter().rev() {
            if self.schema.table_exists(session, table).await? {
                present.push(table.to_string());
            }
        }
        if present.is_empty() {
            return Ok(());
        }
        self.schema.truncate_many(session, &present).await
    }

    /// Drops the baseline tables, children first.
    pub async fn drop_baseline(&self, session: &mut Session) -> Result<()> {
        for table in BASELINE_TABLES.iter().rev() {
            if self.schema.table_exists(session, table).await? {
                self.schema.drop_table(session, table, true).await?;
            }
        }
        Ok(())
    }

    /// Empties one table and resets its identity counter.
    pub async fn clear(&self, session: &mut Session, table: &str) -> Result<()> {
        self.schema.truncate_many(session, &[table.to_string()]).await
    }

    /// Number of rows in `table`.
    pub async fn count(&self, session: &mut Session, table: &str) -> Result<i64> {
        let _guard = self.locks.read(table).await;
        session
            .scalar_i64(&format!("SELECT COUNT(*) FROM {}", self.dialect.quote(table)), &[])
            .await
    }

    /// Inserts `rows` as one all-or-nothing batch.
    ///
    /// Inside an open transaction the batch is wrapped in a savepoint, so a
    /// failing row undoes the rows before it and nothing else.
    pub async fn insert(&self, session: &mut Session, table: &str, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let desc = self.schema.describe(session, table).await?;
        check_columns(&desc, rows)?;
        self.check_references(session, &desc, rows).await?;

        let _guard = self.locks.read(table).await;
        let atomic = session.open_atomic().await?;
        let mut result = Ok(0);
        for row in rows {
            let (sql, params) = insert_statement(self.dialect, table, row);
            match session.execute_with(&sql, &params).await {
                Ok(n) => result = result.map(|total| total + n),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let closed = session.close_atomic(atomic, result.is_ok()).await;
        let inserted = result?;
        closed?;
        debug!(table, rows = inserted, "inserted");
        Ok(inserted)
    }

    /// Inserts `count` generated rows.
    ///
    /// Above the batch threshold rows go out as multi-row INSERTs chunked by
    /// the batch size; the whole call is still one atomic batch.
    pub async fn bulk_insert(
        &self,
        session: &mut Session,
        table: &str,
        count: usize,
        generator: &mut dyn Generator,
    ) -> Result<BulkReport> {
        let rows: Vec<Row> = (0..count).map(|i| generator.generate(i)).collect();
        if count <= self.batch_threshold {
            let inserted = self.insert(session, table, &rows).await?;
            return Ok(BulkReport {
                rows: inserted,
                statements: count,
                batched: false,
            });
        }

        let desc = self.schema.describe(session, table).await?;
        check_columns(&desc, &rows)?;
        let columns: Vec<String> = rows[0].columns().map(str::to_string).collect();
        if let Some(bad) = rows.iter().position(|r| {
            r.len() != columns.len() || !r.columns().zip(&columns).all(|(a, b)| a.eq_ignore_ascii_case(b))
        }) {
            return Err(HarnessError::Config(format!(
                "generated row {} has different columns than row 0",
                bad
            )));
        }
        self.check_references(session, &desc, &rows).await?;

        let chunk_size = self
            .batch_size
            .min((MAX_PARAMS_PER_STATEMENT / columns.len().max(1)).max(1));
        let column_list = columns
            .iter()
            .map(|c| self.dialect.quote(c))
            .collect::<Vec<_>>()
            .join(", ");

        let _guard = self.locks.read(table).await;
        let atomic = session.open_atomic().await?;
        let mut result: Result<u64> = Ok(0);
        let mut statements = 0;
        for chunk in rows.chunks(chunk_size) {
            let mut params = Vec::new();
            let tuples: Vec<String> = chunk
                .iter()
                .map(|row| format!("({})", render_values(self.dialect, row.values(), &mut params).0))
                .collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                self.dialect.quote(table),
                column_list,
                tuples.join(", ")
            );
            statements += 1;
            match session.execute_with(&sql, &params).await {
                Ok(n) => result = result.map(|total| total + n),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let closed = session.close_atomic(atomic, result.is_ok()).await;
        let inserted = result?;
        closed?;
        debug!(table, rows = inserted, statements, "bulk inserted");
        Ok(BulkReport {
            rows: inserted,
            statements,
            batched: true,
        })
    }

    /// Rejects rows whose foreign key values have no referenced row.
    async fn check_references(&self, session: &mut Session, desc: &SchemaDescriptor, rows: &[Row]) -> Result<()> {
        for fk in &desc.foreign_keys {
            if fk.columns.len() != 1 || fk.ref_table.eq_ignore_ascii_case(&desc.table) {
                continue;
            }
            let column = &fk.columns[0];
            let ref_column = &fk.ref_columns[0];
            let mut wanted: Vec<Value> = Vec::new();
            let mut seen = BTreeSet::new();
            for value in rows.iter().filter_map(|r| r.get(column)) {
                if !value.is_null() && seen.insert(value_key(value)) {
                    wanted.push(value.clone());
                }
            }
            if wanted.is_empty() {
                continue;
            }

            let _guard = self.locks.read(&fk.ref_table).await;
            let mut found = BTreeSet::new();
            for chunk in wanted.chunks(500) {
                let sql = format!(
                    "SELECT {col} FROM {tbl} WHERE {col} IN ({})",
                    self.dialect.placeholders(1, chunk.len()),
                    col = self.dialect.quote(ref_column),
                    tbl = self.dialect.quote(&fk.ref_table),
                );
                let existing = session.query(&sql, chunk).await?;
                found.extend(existing.rows.iter().filter_map(|r| r.values().next()).map(value_key));
            }
            if let Some(missing) = wanted.iter().find(|v| !found.contains(&value_key(v))) {
                return Err(HarnessError::ReferentialIntegrity(format!(
                    "{}.{} = {} has no matching row in {}.{}",
                    desc.table, column, missing, fk.ref_table, ref_column
                )));
            }
        }
        Ok(())
    }
}

fn check_columns(desc: &SchemaDescriptor, rows: &[Row]) -> Result<()> {
    for row in rows {
        for column in row.columns() {
            if desc.column(column).is_none() {
                return Err(HarnessError::NotFound {
                    object: format!("column {}.{}", desc.table, column),
                });
            }
        }
    }
    Ok(())
}

fn value_key(value: &Value) -> String {
    match value {
        Value::Text(s) => match s.trim().parse::<i64>() {
            Ok(i) => i.to_string(),
            Err(_) => s.clone(),
        },
        other => match other.as_i64() {
            Some(i) => i.to_string(),
            None => other.to_string(),
        },
    }
}
