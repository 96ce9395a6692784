//! Pure evaluation of expectations against captured results.
//!
//! Every function returns `Ok(())` or a single `AssertionFailed` carrying the
//! rendered expectation and observation.

use crate::error::{ErrorKind, HarnessError, Result};
use crate::types::{Row, RowSet, SchemaDescriptor, Value};
use std::cmp::Ordering;
use std::fmt::Debug;

const RELATIVE_TOLERANCE: f64 = 1e-6;

/// Type-aware equality.
///
/// Numbers compare with a relative tolerance, bools equal 0/1, numeric
/// strings equal the number they spell, NULL only equals NULL.
pub fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => match (numeric(expected), numeric(actual)) {
            (Some(e), Some(a)) => (e - a).abs() <= RELATIVE_TOLERANCE * e.abs().max(1.0),
            _ => false,
        },
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Text(s) => {
            let trimmed = s.trim();
            match trimmed.to_ascii_lowercase().as_str() {
                "true" => Some(1.0),
                "false" => Some(0.0),
                _ => trimmed.parse().ok(),
            }
        }
        other => other.as_f64(),
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Row count equality.
pub fn assert_row_count(what: &str, expected: u64, actual: u64) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            format!("{} to have {} rows", what, expected),
            format!("{} rows", actual),
        ))
    }
}

/// One field of `row` equals `expected`.
pub fn assert_field(row: &Row, column: &str, expected: &Value) -> Result<()> {
    match row.get(column) {
        None => Err(HarnessError::mismatch(
            format!("column {}", column),
            format!("columns [{}]", row.columns().collect::<Vec<_>>().join(", ")),
        )),
        Some(actual) if values_equal(expected, actual) => Ok(()),
        Some(actual) => Err(HarnessError::mismatch(
            format!("{} = {}", column, expected),
            format!("{} = {}", column, actual),
        )),
    }
}

/// Every field of `expected` matches the same column of `row`.
pub fn assert_fields(row: &Row, expected: &Row) -> Result<()> {
    for (column, value) in expected.iter() {
        assert_field(row, column, value)?;
    }
    Ok(())
}

/// `result` failed with `kind`, and its message contains `contains` when given.
pub fn assert_error<T: Debug>(result: &Result<T>, kind: ErrorKind, contains: Option<&str>) -> Result<()> {
    match result {
        Ok(value) => Err(HarnessError::mismatch(
            format!("failure of kind {}", kind),
            format!("success ({:?})", value),
        )),
        Err(e) if e.kind() != kind => Err(HarnessError::mismatch(
            format!("failure of kind {}", kind),
            format!("{}: {}", e.kind(), e),
        )),
        Err(e) => match contains {
            Some(text) if !e.to_string().to_lowercase().contains(&text.to_lowercase()) => {
                Err(HarnessError::mismatch(
                    format!("error message containing \"{}\"", text),
                    e.to_string(),
                ))
            }
            _ => Ok(()),
        },
    }
}

/// Rows are ordered by `key`, ascending or descending (ties allowed).
pub fn assert_monotonic(rows: &RowSet, key: &str, descending: bool) -> Result<()> {
    let values = rows.column(key);
    if values.len() != rows.len() {
        return Err(HarnessError::mismatch(
            format!("column {} in every row", key),
            format!("{} of {} rows", values.len(), rows.len()),
        ));
    }
    for (i, pair) in values.windows(2).enumerate() {
        let ordering = compare(pair[0], pair[1]);
        let broken = if descending {
            ordering == Ordering::Less
        } else {
            ordering == Ordering::Greater
        };
        if broken {
            return Err(HarnessError::mismatch(
                format!(
                    "rows ordered by {} {}",
                    key,
                    if descending { "descending" } else { "ascending" }
                ),
                format!("row {} has {} before row {} with {}", i, pair[0], i + 1, pair[1]),
            ));
        }
    }
    Ok(())
}

/// Same rows in any order (multiset equality on the expected columns).
///
/// Expected rows may name different column subsets, so rows are paired by
/// maximum bipartite matching rather than first fit.
pub fn assert_set_equal(expected: &[Row], actual: &RowSet) -> Result<()> {
    if expected.len() != actual.len() {
        return Err(HarnessError::mismatch(
            format!("{} rows", expected.len()),
            format!("{} rows", actual.len()),
        ));
    }
    let candidates: Vec<Vec<usize>> = expected
        .iter()
        .map(|want| {
            actual
                .rows
                .iter()
                .enumerate()
                .filter(|(_, got)| {
                    want.iter()
                        .all(|(c, v)| got.get(c).map(|g| values_equal(v, g)).unwrap_or(false))
                })
                .map(|(j, _)| j)
                .collect()
        })
        .collect();

    let mut owner: Vec<Option<usize>> = vec![None; actual.len()];
    for (i, want) in expected.iter().enumerate() {
        let mut seen = vec![false; actual.len()];
        if !augment(i, &candidates, &mut owner, &mut seen) {
            let unmatched: Vec<String> = actual
                .rows
                .iter()
                .zip(&owner)
                .filter(|(_, o)| o.is_none())
                .map(|(r, _)| render(r))
                .collect();
            return Err(HarnessError::mismatch(
                format!("a row matching {}", render(want)),
                format!("no such row among {}", unmatched.join(", ")),
            ));
        }
    }
    Ok(())
}

/// Finds an actual row for expected row `i`, reassigning earlier pairs along
/// an augmenting path when needed.
fn augment(i: usize, candidates: &[Vec<usize>], owner: &mut [Option<usize>], seen: &mut [bool]) -> bool {
    for &j in &candidates[i] {
        if seen[j] {
            continue;
        }
        seen[j] = true;
        if owner[j].map_or(true, |k| augment(k, candidates, owner, seen)) {
            owner[j] = Some(i);
            return true;
        }
    }
    false
}

fn render(row: &Row) -> String {
    let fields: Vec<String> = row.iter().map(|(c, v)| format!("{}={}", c, v)).collect();
    format!("{{{}}}", fields.join(", "))
}

/// Result columns are exactly `expected` (any order, case-insensitive).
pub fn assert_column_set(rows: &RowSet, expected: &[&str]) -> Result<()> {
    let mut want: Vec<String> = expected.iter().map(|c| c.trim().to_ascii_lowercase()).collect();
    let mut got: Vec<String> = rows.columns.iter().map(|c| c.to_ascii_lowercase()).collect();
    want.sort();
    got.sort();
    if want == got {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            format!("columns [{}]", want.join(", ")),
            format!("columns [{}]", got.join(", ")),
        ))
    }
}

/// Table structure expectation for [`assert_structure`]. Unset fields are
/// not checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructureExpectation {
    /// Exact number of columns.
    pub column_count: Option<usize>,
    /// Exact primary key columns, in order.
    pub primary_key: Option<Vec<String>>,
    /// Columns that must be unique.
    pub unique: Vec<String>,
    /// Columns that must reject NULL.
    pub not_null: Vec<String>,
    /// Columns that must carry a foreign key.
    pub foreign_keys: Vec<String>,
}

impl StructureExpectation {
    /// Builder: exact column count.
    pub fn columns(mut self, count: usize) -> Self {
        self.column_count = Some(count);
        self
    }

    /// Builder: primary key columns.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Builder: unique column.
    pub fn unique(mut self, column: &str) -> Self {
        self.unique.push(column.to_string());
        self
    }

    /// Builder: NOT NULL column.
    pub fn not_null(mut self, column: &str) -> Self {
        self.not_null.push(column.to_string());
        self
    }

    /// Builder: foreign key column.
    pub fn foreign_key(mut self, column: &str) -> Self {
        self.foreign_keys.push(column.to_string());
        self
    }
}

/// Checks `desc` against every set field of `expected`.
pub fn assert_structure(desc: &SchemaDescriptor, expected: &StructureExpectation) -> Result<()> {
    if let Some(count) = expected.column_count {
        if desc.column_count() != count {
            return Err(HarnessError::mismatch(
                format!("{} to have {} columns", desc.table, count),
                format!("{} columns [{}]", desc.column_count(), desc.column_names().join(", ")),
            ));
        }
    }
    if let Some(pk) = &expected.primary_key {
        let actual = desc.primary_key();
        let matches = pk.len() == actual.len()
            && pk.iter().zip(&actual).all(|(a, b)| a.eq_ignore_ascii_case(b));
        if !matches {
            return Err(HarnessError::mismatch(
                format!("primary key on {} ({})", desc.table, pk.join(", ")),
                format!("primary key ({})", actual.join(", ")),
            ));
        }
    }
    for column in &expected.unique {
        require_column(desc, column)?;
        if !desc.is_unique(column) {
            return Err(HarnessError::mismatch(
                format!("unique constraint on {}.{}", desc.table, column),
                "no unique constraint or unique index",
            ));
        }
    }
    for column in &expected.not_null {
        require_column(desc, column)?;
        if !desc.is_not_null(column) {
            return Err(HarnessError::mismatch(
                format!("{}.{} NOT NULL", desc.table, column),
                "nullable column",
            ));
        }
    }
    for column in &expected.foreign_keys {
        require_column(desc, column)?;
        if desc.foreign_key_on(column).is_none() {
            return Err(HarnessError::mismatch(
                format!("foreign key on {}.{}", desc.table, column),
                "no foreign key",
            ));
        }
    }
    Ok(())
}

fn require_column(desc: &SchemaDescriptor, column: &str) -> Result<()> {
    if desc.column(column).is_some() {
        Ok(())
    } else {
        Err(HarnessError::mismatch(
            format!("column {}.{}", desc.table, column),
            format!("columns [{}]", desc.column_names().join(", ")),
        ))
    }
}
