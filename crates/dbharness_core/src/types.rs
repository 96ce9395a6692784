//! Core data types: cell values, rows, and schema descriptions.

use crate::error::{HarnessError, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Dynamically typed cell value decoded from any driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// Any integer type.
    Int(i64),
    /// Any floating point or decimal type.
    Float(f64),
    /// Character data.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Parses a scenario literal.
    ///
    /// `null`, `true` and `false` are keywords (case-insensitive); integers and
    /// decimals become numbers unless they carry a leading zero; everything
    /// else is text. Surrounding single quotes force text.
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
            return Value::Text(trimmed[1..trimmed.len() - 1].to_string());
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "null" => return Value::Null,
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        let digits = trimmed.trim_start_matches('-');
        let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
        if !leading_zero {
            if let Ok(i) = trimmed.parse::<i64>() {
                return Value::Int(i);
            }
            if trimmed.contains('.') {
                if let Ok(f) = trimmed.parse::<f64>() {
                    return Value::Float(f);
                }
            }
        }
        Value::Text(trimmed.to_string())
    }

    /// True for NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view, coercing bools, integral floats and numeric text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Floating point view, coercing integers and numeric text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the variant, for mismatch messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One record: ordered (column, value) pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: appends a field.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    /// Appends a field, replacing an existing one with the same name.
    pub fn push(&mut self, column: &str, value: impl Into<Value>) {
        let value = value.into();
        match self
            .fields
            .iter_mut()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
        {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column.to_string(), value)),
        }
    }

    /// Field value by column name (case-insensitive).
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    /// Values in column order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    /// (column, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (column, value) in &self.fields {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Result of a query.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RowSet {
    /// Column names as returned by the driver.
    pub columns: Vec<String>,
    /// Rows in driver order.
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// All values of one column.
    pub fn column(&self, name: &str) -> Vec<&Value> {
        self.rows.iter().filter_map(|r| r.get(name)).collect()
    }

    /// Single scalar of a one-row result.
    pub fn scalar(&self) -> Option<&Value> {
        self.first().and_then(|r| r.values().next())
    }
}

/// Column-level constraint. The set is closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constraint {
    /// PRIMARY KEY (optionally auto-incrementing).
    PrimaryKey {
        /// Engine-generated values.
        autoincrement: bool,
    },
    /// UNIQUE.
    Unique,
    /// NOT NULL.
    NotNull,
    /// CHECK (expr).
    Check(String),
    /// REFERENCES table(column).
    ForeignKey {
        /// Referenced table.
        table: String,
        /// Referenced column.
        column: String,
    },
    /// DEFAULT expr.
    Default(String),
}

impl Constraint {
    fn to_sql(&self, dialect: crate::Dialect) -> String {
        match self {
            Constraint::PrimaryKey { autoincrement: true } => match dialect {
                crate::Dialect::Sqlite => "PRIMARY KEY AUTOINCREMENT".to_string(),
                crate::Dialect::Mysql => "PRIMARY KEY AUTO_INCREMENT".to_string(),
                crate::Dialect::Postgresql => "PRIMARY KEY".to_string(),
            },
            Constraint::PrimaryKey { autoincrement: false } => "PRIMARY KEY".to_string(),
            Constraint::Unique => "UNIQUE".to_string(),
            Constraint::NotNull => "NOT NULL".to_string(),
            Constraint::Check(expr) => format!("CHECK ({})", expr),
            Constraint::ForeignKey { table, column } => {
                format!("REFERENCES {}({})", dialect.quote(table), dialect.quote(column))
            }
            Constraint::Default(expr) => format!("DEFAULT {}", expr),
        }
    }
}

/// Column definition and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type, as written.
    pub data_type: String,
    /// Constraint set.
    pub constraints: Vec<Constraint>,
}

impl ColumnDef {
    /// Column without constraints.
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            constraints: Vec::new(),
        }
    }

    /// Builder: adds a constraint.
    pub fn with(mut self, constraint: Constraint) -> Self {
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
        self
    }

    /// Parses a textual constraint list such as
    /// `PRIMARY KEY`, `UNIQUE NOT NULL`, `DEFAULT 0`, `CHECK (age >= 0)`
    /// or `REFERENCES users(id)`.
    pub fn parse(name: &str, data_type: &str, constraints: &str) -> Result<Self> {
        let mut column = Self::new(name, data_type);
        for constraint in parse_constraints(constraints)? {
            column = column.with(constraint);
        }
        Ok(column)
    }

    /// True if the column carries `constraint` (ignoring payloads for
    /// CHECK, DEFAULT and FOREIGN KEY).
    pub fn has(&self, kind: &Constraint) -> bool {
        self.constraints.iter().any(|c| {
            std::mem::discriminant(c) == std::mem::discriminant(kind)
        })
    }

    /// True if part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.has(&Constraint::PrimaryKey { autoincrement: false })
    }

    /// Column definition clause.
    pub fn to_sql(&self, dialect: crate::Dialect) -> String {
        let autoincrement = self
            .constraints
            .contains(&Constraint::PrimaryKey { autoincrement: true });
        let data_type = if autoincrement && dialect == crate::Dialect::Postgresql {
            "SERIAL".to_string()
        } else {
            self.data_type.clone()
        };

        let mut sql = format!("{} {}", dialect.quote(&self.name), data_type);
        let mut ordered = self.constraints.clone();
        ordered.sort();
        for constraint in &ordered {
            // InnoDB parses and ignores column-level REFERENCES.
            if dialect == crate::Dialect::Mysql && matches!(constraint, Constraint::ForeignKey { .. }) {
                continue;
            }
            sql.push(' ');
            sql.push_str(&constraint.to_sql(dialect));
        }
        sql
    }
}

/// Constraint spanning one or more columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableConstraint {
    /// Composite primary key.
    PrimaryKey(Vec<String>),
    /// Composite unique key.
    Unique(Vec<String>),
    /// Table-level CHECK.
    Check(String),
    /// FOREIGN KEY (columns) REFERENCES table(columns).
    ForeignKey {
        /// Referencing columns.
        columns: Vec<String>,
        /// Referenced table.
        ref_table: String,
        /// Referenced columns.
        ref_columns: Vec<String>,
    },
}

impl TableConstraint {
    /// Constraint clause.
    pub fn to_sql(&self, dialect: crate::Dialect) -> String {
        let list = |cols: &[String]| {
            cols.iter()
                .map(|c| dialect.quote(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            TableConstraint::PrimaryKey(cols) => format!("PRIMARY KEY ({})", list(cols)),
            TableConstraint::Unique(cols) => format!("UNIQUE ({})", list(cols)),
            TableConstraint::Check(expr) => format!("CHECK ({})", expr),
            TableConstraint::ForeignKey {
                columns,
                ref_table,
                ref_columns,
            } => format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                list(columns),
                dialect.quote(ref_table),
                list(ref_columns)
            ),
        }
    }
}

/// Full definition for `create_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns in order.
    pub columns: Vec<ColumnDef>,
    /// Table-level constraints.
    pub constraints: Vec<TableConstraint>,
    /// Succeed silently when the table is already present.
    pub if_not_exists: bool,
}

impl TableDef {
    /// Empty definition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            constraints: Vec::new(),
            if_not_exists: false,
        }
    }

    /// Builder: appends a column.
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Builder: appends a table constraint.
    pub fn constraint(mut self, constraint: TableConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Builder: tolerate an existing table.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Rejects duplicate column names.
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(HarnessError::Config(format!(
                "table {} has no columns",
                self.name
            )));
        }
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(HarnessError::AlreadyExists {
                    object: format!("column {}.{}", self.name, column.name),
                });
            }
        }
        Ok(())
    }

    /// Tables referenced by foreign keys.
    pub fn referenced_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self
            .columns
            .iter()
            .flat_map(|c| c.constraints.iter())
            .filter_map(|c| match c {
                Constraint::ForeignKey { table, .. } => Some(table.clone()),
                _ => None,
            })
            .chain(self.constraints.iter().filter_map(|c| match c {
                TableConstraint::ForeignKey { ref_table, .. } => Some(ref_table.clone()),
                _ => None,
            }))
            .collect();
        tables.sort();
        tables.dedup();
        tables
    }

    /// CREATE TABLE statement.
    pub fn to_sql(&self, dialect: crate::Dialect) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(|c| c.to_sql(dialect)).collect();
        if dialect == crate::Dialect::Mysql {
            for column in &self.columns {
                for constraint in &column.constraints {
                    if let Constraint::ForeignKey { table, column: ref_column } = constraint {
                        parts.push(
                            TableConstraint::ForeignKey {
                                columns: vec![column.name.clone()],
                                ref_table: table.clone(),
                                ref_columns: vec![ref_column.clone()],
                            }
                            .to_sql(dialect),
                        );
                    }
                }
            }
        }
        parts.extend(self.constraints.iter().map(|c| c.to_sql(dialect)));
        format!(
            "CREATE TABLE {}{} ({})",
            if self.if_not_exists { "IF NOT EXISTS " } else { "" },
            dialect.quote(&self.name),
            parts.join(", ")
        )
    }
}

/// Structural change for `alter_table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterChange {
    /// ADD COLUMN.
    AddColumn(ColumnDef),
    /// DROP COLUMN.
    DropColumn(String),
    /// ADD CONSTRAINT.
    AddConstraint(TableConstraint),
    /// RENAME TO.
    Rename(String),
    /// RENAME COLUMN.
    RenameColumn {
        /// Old name.
        from: String,
        /// New name.
        to: String,
    },
}

/// Index as found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed columns in key order.
    pub columns: Vec<String>,
    /// UNIQUE index.
    pub unique: bool,
}

/// Foreign key as found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub ref_table: String,
    /// Referenced columns.
    pub ref_columns: Vec<String>,
}

/// Snapshot of one table's definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    /// Table name.
    pub table: String,
    /// Columns with declared types and constraints.
    pub columns: Vec<ColumnDef>,
    /// Secondary indexes (including those backing UNIQUE constraints).
    pub indexes: Vec<IndexDescriptor>,
    /// Outgoing foreign keys.
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl SchemaDescriptor {
    /// Column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary key columns.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// True if `column` alone is unique (constraint or single-column unique index).
    pub fn is_unique(&self, column: &str) -> bool {
        let constrained = self
            .column(column)
            .map(|c| c.has(&Constraint::Unique))
            .unwrap_or(false);
        let indexed = self.indexes.iter().any(|i| {
            i.unique && i.columns.len() == 1 && i.columns[0].eq_ignore_ascii_case(column)
        });
        constrained || indexed
    }

    /// True if `column` rejects NULL.
    pub fn is_not_null(&self, column: &str) -> bool {
        self.column(column)
            .map(|c| c.has(&Constraint::NotNull) || c.is_primary_key())
            .unwrap_or(false)
    }

    /// Foreign key declared on `column`, if any.
    pub fn foreign_key_on(&self, column: &str) -> Option<&ForeignKeyDescriptor> {
        self.foreign_keys.iter().find(|fk| {
            fk.columns.len() == 1 && fk.columns[0].eq_ignore_ascii_case(column)
        })
    }

    /// Rebuilds a definition able to recreate this table.
    pub fn to_table_def(&self) -> TableDef {
        let mut def = TableDef::new(&self.table);
        def.columns = self.columns.clone();
        let primary_key: Vec<String> = self.primary_key().iter().map(|c| c.to_string()).collect();
        if primary_key.len() > 1 {
            for column in &mut def.columns {
                column
                    .constraints
                    .retain(|c| !matches!(c, Constraint::PrimaryKey { .. }));
            }
            def.constraints.push(TableConstraint::PrimaryKey(primary_key));
        }
        for fk in &self.foreign_keys {
            let declared_inline = fk.columns.len() == 1
                && self
                    .column(&fk.columns[0])
                    .map(|c| c.has(&Constraint::ForeignKey { table: String::new(), column: String::new() }))
                    .unwrap_or(false);
            if !declared_inline {
                def.constraints.push(TableConstraint::ForeignKey {
                    columns: fk.columns.clone(),
                    ref_table: fk.ref_table.clone(),
                    ref_columns: fk.ref_columns.clone(),
                });
            }
        }
        def
    }
}

/// Successful result of a DDL/DML call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Outcome {
    /// Rows affected by a write.
    Affected(u64),
    /// Rows returned by a query.
    Rows(RowSet),
    /// Definition after a structural change.
    Schema(SchemaDescriptor),
    /// Statement with no interesting result.
    Done,
}

impl Outcome {
    /// Affected-row count, if this was a write.
    pub fn affected(&self) -> Option<u64> {
        match self {
            Outcome::Affected(n) => Some(*n),
            _ => None,
        }
    }
}

/// Splits a constraint list into constraints.
fn parse_constraints(input: &str) -> Result<Vec<Constraint>> {
    let mut constraints = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let upper = rest.to_ascii_uppercase();
        if let Some(after) = strip_keyword(rest, &upper, "PRIMARY KEY") {
            let after_upper = after.trim_start().to_ascii_uppercase();
            let (auto, remaining) = if let Some(r) = strip_keyword(after.trim_start(), &after_upper, "AUTOINCREMENT") {
                (true, r)
            } else if let Some(r) = strip_keyword(after.trim_start(), &after_upper, "AUTO_INCREMENT") {
                (true, r)
            } else {
                (false, after)
            };
            constraints.push(Constraint::PrimaryKey { autoincrement: auto });
            rest = remaining.trim_start();
        } else if let Some(after) = strip_keyword(rest, &upper, "UNIQUE") {
            constraints.push(Constraint::Unique);
            rest = after.trim_start();
        } else if let Some(after) = strip_keyword(rest, &upper, "NOT NULL") {
            constraints.push(Constraint::NotNull);
            rest = after.trim_start();
        } else if let Some(after) = strip_keyword(rest, &upper, "NULL") {
            rest = after.trim_start();
        } else if let Some(after) = strip_keyword(rest, &upper, "CHECK") {
            let (expr, remaining) = take_parenthesized(after.trim_start())?;
            constraints.push(Constraint::Check(expr));
            rest = remaining.trim_start();
        } else if let Some(after) = strip_keyword(rest, &upper, "DEFAULT") {
            let (expr, remaining) = take_default_expr(after.trim_start())?;
            constraints.push(Constraint::Default(expr));
            rest = remaining.trim_start();
        } else if let Some(after) = strip_keyword(rest, &upper, "FOREIGN KEY") {
            rest = after.trim_start();
        } else if let Some(after) = strip_keyword(rest, &upper, "REFERENCES") {
            let after = after.trim_start();
            let open = after.find('(').ok_or_else(|| {
                HarnessError::Config(format!("REFERENCES without column list: {}", input))
            })?;
            let table = after[..open].trim().to_string();
            let (column, remaining) = take_parenthesized(&after[open..])?;
            constraints.push(Constraint::ForeignKey {
                table,
                column: column.trim().to_string(),
            });
            rest = remaining.trim_start();
        } else {
            return Err(HarnessError::Config(format!(
                "unsupported column constraint near '{}'",
                rest
            )));
        }
    }
    Ok(constraints)
}

/// Strips `keyword` when it is a whole word at the start of `text`.
fn strip_keyword<'a>(text: &'a str, upper: &str, keyword: &str) -> Option<&'a str> {
    if !upper.starts_with(keyword) {
        return None;
    }
    let tail = &text[keyword.len()..];
    match tail.chars().next() {
        None => Some(tail),
        Some(c) if !c.is_ascii_alphanumeric() && c != '_' => Some(tail),
        _ => None,
    }
}

/// Takes a balanced `( ... )` group, returning the inner text.
fn take_parenthesized(text: &str) -> Result<(String, &str)> {
    if !text.starts_with('(') {
        return Err(HarnessError::Config(format!("expected '(' near '{}'", text)));
    }
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((text[1..i].trim().to_string(), &text[i + 1..]));
                }
            }
            _ => {}
        }
    }
    Err(HarnessError::Config(format!("unbalanced parentheses in '{}'", text)))
}

/// Takes a DEFAULT expression: a parenthesized group, a quoted string or one word.
fn take_default_expr(text: &str) -> Result<(String, &str)> {
    if text.starts_with('(') {
        let (inner, rest) = take_parenthesized(text)?;
        return Ok((format!("({})", inner), rest));
    }
    if let Some(body) = text.strip_prefix('\'') {
        let end = body
            .find('\'')
            .ok_or_else(|| HarnessError::Config(format!("unterminated string in '{}'", text)))?;
        return Ok((format!("'{}'", &body[..end]), &body[end + 1..]));
    }
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    Ok((text[..end].to_string(), &text[end..]))
}
