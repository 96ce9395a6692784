//! Tag filter expressions.
//!
//! One expression is a comma-separated list of tags, any of which may match
//! (`@ddl,@dml`). A tag prefixed with `~` matches scenarios without it
//! (`~@slow` or `not @slow`). Clauses joined with ` and `, or given as
//! separate expressions, must all match.

use crate::error::{HarnessError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    tag: String,
    negated: bool,
}

impl Term {
    fn matches(&self, tags: &[String]) -> bool {
        let present = tags.iter().any(|t| t.eq_ignore_ascii_case(&self.tag));
        present != self.negated
    }
}

/// Conjunction of disjunctions of (possibly negated) tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagExpression {
    clauses: Vec<Vec<Term>>,
}

impl TagExpression {
    /// Expression matching every scenario.
    pub fn all() -> Self {
        Self::default()
    }

    /// ANDs several expressions, as given by repeated `--tags` flags.
    pub fn parse_all<S: AsRef<str>>(expressions: &[S]) -> Result<Self> {
        let mut combined = Self::default();
        for expression in expressions {
            let parsed: TagExpression = expression.as_ref().parse()?;
            combined.clauses.extend(parsed.clauses);
        }
        Ok(combined)
    }

    /// True when the expression has no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluates against a scenario's effective tags.
    pub fn matches(&self, tags: &[String]) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.iter().any(|term| term.matches(tags)))
    }
}

impl FromStr for TagExpression {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut clauses = Vec::new();
        for part in s.split(" and ") {
            let mut clause = Vec::new();
            for raw in part.split(',') {
                let mut term = raw.trim();
                let mut negated = false;
                if let Some(rest) = term.strip_prefix('~') {
                    negated = true;
                    term = rest.trim();
                } else if let Some(rest) = term.strip_prefix("not ") {
                    negated = true;
                    term = rest.trim();
                }
                let name = term.trim_start_matches('@');
                if name.is_empty() || name.contains(char::is_whitespace) {
                    return Err(HarnessError::Config(format!("invalid tag expression: {:?}", s)));
                }
                clause.push(Term {
                    tag: format!("@{}", name),
                    negated,
                });
            }
            clauses.push(clause);
        }
        Ok(Self { clauses })
    }
}

impl fmt::Display for TagExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| {
                clause
                    .iter()
                    .map(|t| format!("{}{}", if t.negated { "~" } else { "" }, t.tag))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        f.write_str(&clauses.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_or_within_expression() {
        let expr: TagExpression = "@ddl,@dml".parse().unwrap();
        assert!(expr.matches(&tags(&["@ddl"])));
        assert!(expr.matches(&tags(&["@dml", "@smoke"])));
        assert!(!expr.matches(&tags(&["@transactions"])));
    }

    #[test]
    fn test_negation_and_conjunction() {
        let expr = TagExpression::parse_all(&["@ddl", "~@slow"]).unwrap();
        assert!(expr.matches(&tags(&["@ddl"])));
        assert!(!expr.matches(&tags(&["@ddl", "@slow"])));
        assert!(!expr.matches(&tags(&["@dml"])));

        let not: TagExpression = "not @performance".parse().unwrap();
        assert!(not.matches(&tags(&[])));
        assert_eq!(not.to_string(), "~@performance");
    }

    #[test]
    fn test_and_keyword() {
        let expr: TagExpression = "@smoke and not @slow".parse().unwrap();
        assert!(expr.matches(&tags(&["@smoke"])));
        assert!(!expr.matches(&tags(&["@smoke", "@slow"])));
        assert!(!expr.matches(&tags(&["@ddl"])));
        assert_eq!(expr.to_string(), "@smoke and ~@slow");
    }

    #[test]
    fn test_empty_matches_everything() {
        assert!(TagExpression::all().matches(&tags(&[])));
        let expr: TagExpression = "  ".parse().unwrap();
        assert!(expr.is_empty());
    }

    #[test]
    fn test_invalid_expression() {
        assert!("@a,,@b".parse::<TagExpression>().is_err());
        assert!("~".parse::<TagExpression>().is_err());
    }

    #[test]
    fn test_tag_without_at_sign() {
        let expr: TagExpression = "smoke".parse().unwrap();
        assert!(expr.matches(&tags(&["@SMOKE"])));
    }
}
