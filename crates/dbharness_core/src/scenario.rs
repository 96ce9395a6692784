//! Fluent builder for features and scenarios.
//!
//! Scenarios are lists of textual Given/When/Then steps, optionally carrying
//! a data table. The text is bound to handlers by the
//! [`StepRegistry`](crate::StepRegistry).

use crate::types::{Row, Value};
use serde::Serialize;
use std::fmt;

/// Step keyword. `And`/`But` take the keyword of the step before them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepKeyword {
    /// Precondition.
    Given,
    /// Action.
    When,
    /// Expectation.
    Then,
}

impl fmt::Display for StepKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Given => "Given",
            Self::When => "When",
            Self::Then => "Then",
        })
    }
}

/// Tabular step argument: a header row and data rows of text cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DataTable {
    /// Table with the given header row.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a data row. Missing cells read as empty strings.
    pub fn row<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cells: Vec<String> = cells.into_iter().map(Into::into).collect();
        cells.resize(self.headers.len().max(cells.len()), String::new());
        self.rows.push(cells);
        self
    }

    /// Header cells.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Data rows.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if there are no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell of data row `row` under `header` (case-insensitive).
    pub fn cell(&self, row: usize, header: &str) -> Option<&str> {
        let column = self
            .headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(header))?;
        self.rows.get(row)?.get(column).map(String::as_str)
    }

    /// Each data row as a record keyed by header, cells parsed as literals.
    pub fn records(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|cells| {
                self.headers
                    .iter()
                    .zip(cells)
                    .fold(Row::new(), |row, (h, c)| row.with(h, Value::parse_literal(c)))
            })
            .collect()
    }

    /// A two-column `name | value` table folded into a single record.
    pub fn pairs(&self) -> Row {
        self.rows
            .iter()
            .filter(|cells| cells.len() >= 2)
            .fold(Row::new(), |row, cells| {
                row.with(cells[0].trim(), Value::parse_literal(&cells[1]))
            })
    }
}

/// One step of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    /// Effective keyword.
    pub keyword: StepKeyword,
    /// Step text as written.
    pub text: String,
    /// Optional table argument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<DataTable>,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.keyword, self.text)
    }
}

/// A named, tagged list of steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    name: String,
    feature: Option<String>,
    tags: Vec<String>,
    steps: Vec<Step>,
}

impl Scenario {
    /// Empty scenario.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            feature: None,
            tags: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Adds a tag; the leading `@` is optional.
    pub fn tag(mut self, tag: &str) -> Self {
        let tag = normalize_tag(tag);
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    fn push(mut self, keyword: StepKeyword, text: &str, table: Option<DataTable>) -> Self {
        self.steps.push(Step {
            keyword,
            text: text.trim().to_string(),
            table,
        });
        self
    }

    fn last_keyword(&self) -> StepKeyword {
        self.steps
            .last()
            .map(|s| s.keyword)
            .unwrap_or(StepKeyword::Given)
    }

    // ===== Steps =====

    /// Given step.
    pub fn given(self, text: &str) -> Self {
        self.push(StepKeyword::Given, text, None)
    }

    /// When step.
    pub fn when(self, text: &str) -> Self {
        self.push(StepKeyword::When, text, None)
    }

    /// Then step.
    pub fn then(self, text: &str) -> Self {
        self.push(StepKeyword::Then, text, None)
    }

    /// Continues with the previous step's keyword.
    pub fn and(self, text: &str) -> Self {
        let keyword = self.last_keyword();
        self.push(keyword, text, None)
    }

    /// Given step with a table.
    pub fn given_table(self, text: &str, table: DataTable) -> Self {
        self.push(StepKeyword::Given, text, Some(table))
    }

    /// When step with a table.
    pub fn when_table(self, text: &str, table: DataTable) -> Self {
        self.push(StepKeyword::When, text, Some(table))
    }

    /// Then step with a table.
    pub fn then_table(self, text: &str, table: DataTable) -> Self {
        self.push(StepKeyword::Then, text, Some(table))
    }

    /// And step with a table.
    pub fn and_table(self, text: &str, table: DataTable) -> Self {
        let keyword = self.last_keyword();
        self.push(keyword, text, Some(table))
    }

    // ===== Accessors =====

    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning feature, once added to one.
    pub fn feature(&self) -> Option<&str> {
        self.feature.as_deref()
    }

    /// Tags, including those inherited from the feature.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// True if tagged with `tag` (with or without `@`).
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = normalize_tag(tag);
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(&tag))
    }

    /// Steps, background first.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// `Feature: Scenario`, or the bare name outside a feature.
    pub fn qualified_name(&self) -> String {
        match &self.feature {
            Some(feature) => format!("{}: {}", feature, self.name),
            None => self.name.clone(),
        }
    }
}

fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.starts_with('@') {
        tag.to_string()
    } else {
        format!("@{}", tag)
    }
}

/// A named group of scenarios sharing tags and background steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feature {
    name: String,
    description: String,
    tags: Vec<String>,
    background: Vec<Step>,
    scenarios: Vec<Scenario>,
}

impl Feature {
    /// Empty feature.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            tags: Vec::new(),
            background: Vec::new(),
            scenarios: Vec::new(),
        }
    }

    /// Free-text description.
    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.trim().to_string();
        self
    }

    /// Tag inherited by every scenario.
    pub fn tag(mut self, tag: &str) -> Self {
        let tag = normalize_tag(tag);
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Steps run before every scenario, taken from `steps`.
    pub fn background(mut self, steps: Scenario) -> Self {
        self.background = steps.steps;
        self
    }

    /// Adds a scenario.
    pub fn scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Feature name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Feature-level tags.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Scenarios as written, without background or inherited tags.
    pub fn declared(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Runnable scenarios: feature tags inherited, background prepended.
    pub fn scenarios(&self) -> Vec<Scenario> {
        self.scenarios
            .iter()
            .map(|s| {
                let mut tags = self.tags.clone();
                for tag in &s.tags {
                    if !tags.contains(tag) {
                        tags.push(tag.clone());
                    }
                }
                Scenario {
                    name: s.name.clone(),
                    feature: Some(self.name.clone()),
                    tags,
                    steps: self.background.iter().chain(&s.steps).cloned().collect(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_inherits_keyword() {
        let scenario = Scenario::new("s")
            .given("a")
            .and("b")
            .when("c")
            .then("d")
            .and("e");
        let keywords: Vec<StepKeyword> = scenario.steps().iter().map(|s| s.keyword).collect();
        assert_eq!(
            keywords,
            vec![
                StepKeyword::Given,
                StepKeyword::Given,
                StepKeyword::When,
                StepKeyword::Then,
                StepKeyword::Then
            ]
        );
        assert_eq!(scenario.steps()[4].to_string(), "Then e");
    }

    #[test]
    fn test_feature_inherits_tags_and_background() {
        let feature = Feature::new("DDL")
            .tag("ddl")
            .background(Scenario::new("background").given("the database is connected"))
            .scenario(Scenario::new("create").tag("@smoke").tag("@ddl").when("x"));

        let scenarios = feature.scenarios();
        assert_eq!(scenarios.len(), 1);
        let s = &scenarios[0];
        assert_eq!(s.tags(), &["@ddl".to_string(), "@smoke".to_string()]);
        assert_eq!(s.steps().len(), 2);
        assert_eq!(s.steps()[0].text, "the database is connected");
        assert_eq!(s.qualified_name(), "DDL: create");
        assert!(s.has_tag("smoke"));
        assert_eq!(feature.declared()[0].steps().len(), 1);
    }

    #[test]
    fn test_data_table_records_and_pairs() {
        let table = DataTable::new(["name", "email", "age"])
            .row(["John Doe", "john@example.com", "30"])
            .row(["Jane", "jane@example.com"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, "AGE"), Some(""));

        let records = table.records();
        assert_eq!(records[0].get("age"), Some(&Value::Int(30)));
        assert_eq!(records[0].get("name"), Some(&Value::Text("John Doe".into())));

        let pairs = DataTable::new(["column", "value"])
            .row(["name", "John Doe"])
            .row(["salary", "50000.00"])
            .pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.get("salary"), Some(&Value::Float(50000.0)));
    }
}
