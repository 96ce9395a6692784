//! Step pattern registry.
//!
//! Patterns are literal text with typed placeholders: `{name}` captures any
//! text, `{name:d}` an integer, `{name:f}` a decimal number. Matching is
//! anchored at both ends and insensitive to runs of whitespace. A step text
//! must match exactly one pattern.

use crate::context::ScenarioContext;
use crate::error::{HarnessError, Result};
use crate::scenario::{DataTable, Step};
use crate::schema::DdlOperation;
use futures::future::BoxFuture;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Handler bound to a step pattern.
pub type StepHandler = for<'a> fn(&'a mut ScenarioContext, StepArgs) -> BoxFuture<'a, Result<()>>;

/// Captured placeholder value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ArgValue {
    /// `{name}`
    Text(String),
    /// `{name:d}`
    Int(i64),
    /// `{name:f}`
    Float(f64),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
        }
    }
}

/// Arguments passed to a handler: captured placeholders plus the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepArgs {
    values: Vec<(String, ArgValue)>,
    table: Option<DataTable>,
}

impl StepArgs {
    /// Arguments from explicit values, for calling handlers directly.
    pub fn new(values: Vec<(String, ArgValue)>, table: Option<DataTable>) -> Self {
        Self { values, table }
    }

    /// Raw captured value.
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    fn missing(name: &str) -> HarnessError {
        HarnessError::ProtocolViolation(format!("step argument {} was not captured", name))
    }

    /// Text argument. Numeric captures are rendered back to text.
    pub fn text(&self, name: &str) -> Result<String> {
        self.get(name)
            .map(|v| v.to_string())
            .ok_or_else(|| Self::missing(name))
    }

    /// Integer argument.
    pub fn int(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(ArgValue::Int(i)) => Ok(*i),
            Some(ArgValue::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| HarnessError::DataTypeMismatch(format!("{} is not an integer: {}", name, s))),
            Some(ArgValue::Float(x)) => Err(HarnessError::DataTypeMismatch(format!(
                "{} is not an integer: {}",
                name, x
            ))),
            None => Err(Self::missing(name)),
        }
    }

    /// Non-negative integer argument, as a count.
    pub fn count(&self, name: &str) -> Result<usize> {
        let n = self.int(name)?;
        usize::try_from(n)
            .map_err(|_| HarnessError::DataTypeMismatch(format!("{} must not be negative: {}", name, n)))
    }

    /// Decimal argument. Integer captures widen.
    pub fn float(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(ArgValue::Float(x)) => Ok(*x),
            Some(ArgValue::Int(i)) => Ok(*i as f64),
            Some(ArgValue::Text(s)) => s
                .trim()
                .parse()
                .map_err(|_| HarnessError::DataTypeMismatch(format!("{} is not a number: {}", name, s))),
            None => Err(Self::missing(name)),
        }
    }

    /// The step's data table.
    pub fn table(&self) -> Result<&DataTable> {
        self.table
            .as_ref()
            .ok_or_else(|| HarnessError::ProtocolViolation("step requires a data table".into()))
    }
}

/// What a step does to the database, for teardown strategy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepTraits {
    /// DDL issued by the step.
    pub ddl: Option<DdlOperation>,
    /// Work done on sessions other than the scenario's own.
    pub cross_session: bool,
    /// Commits the scenario's transaction.
    pub commits: bool,
}

impl StepTraits {
    /// Plain step.
    pub const NONE: StepTraits = StepTraits {
        ddl: None,
        cross_session: false,
        commits: false,
    };

    /// Step issuing `op`.
    pub const fn ddl(op: DdlOperation) -> Self {
        StepTraits {
            ddl: Some(op),
            cross_session: false,
            commits: false,
        }
    }

    /// Step using other sessions.
    pub const fn cross_session() -> Self {
        StepTraits {
            ddl: None,
            cross_session: true,
            commits: false,
        }
    }

    /// Step committing work.
    pub const fn commits() -> Self {
        StepTraits {
            ddl: None,
            cross_session: false,
            commits: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Text,
    Int,
    Float,
}

/// A compiled pattern and its handler.
#[derive(Clone)]
pub struct StepDefinition {
    pattern: String,
    regex: Regex,
    captures: Vec<(String, Capture)>,
    handler: StepHandler,
    traits: StepTraits,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("pattern", &self.pattern)
            .field("traits", &self.traits)
            .finish()
    }
}

impl StepDefinition {
    /// Compiles `pattern`.
    pub fn new(pattern: &str, traits: StepTraits, handler: StepHandler) -> Result<Self> {
        let pattern = normalize(pattern);
        let placeholder = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?::([df]))?\}")
            .map_err(|e| HarnessError::Config(e.to_string()))?;

        let mut source = String::from("^");
        let mut captures = Vec::new();
        let mut last = 0;
        for caps in placeholder.captures_iter(&pattern) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            source.push_str(&regex::escape(&pattern[last..whole.start()]));
            let kind = match caps.get(2).map(|m| m.as_str()) {
                Some("d") => Capture::Int,
                Some("f") => Capture::Float,
                _ => Capture::Text,
            };
            if captures.iter().any(|(n, _)| n == name.as_str()) {
                return Err(HarnessError::Config(format!(
                    "placeholder {{{}}} appears twice in step pattern: {}",
                    name.as_str(),
                    pattern
                )));
            }
            source.push_str(match kind {
                Capture::Int => r"(-?\d+)",
                Capture::Float => r"(-?\d+(?:\.\d+)?)",
                Capture::Text => r"(.+?)",
            });
            captures.push((name.as_str().to_string(), kind));
            last = whole.end();
        }
        source.push_str(&regex::escape(&pattern[last..]));
        source.push('$');

        let regex = Regex::new(&source)
            .map_err(|e| HarnessError::Config(format!("invalid step pattern {:?}: {}", pattern, e)))?;
        Ok(Self {
            pattern,
            regex,
            captures,
            handler,
            traits,
        })
    }

    /// Pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Declared traits.
    pub fn traits(&self) -> StepTraits {
        self.traits
    }

    fn capture(&self, text: &str) -> Option<Vec<(String, ArgValue)>> {
        let caps = self.regex.captures(text)?;
        let mut values = Vec::with_capacity(self.captures.len());
        for (i, (name, kind)) in self.captures.iter().enumerate() {
            let raw = caps.get(i + 1)?.as_str();
            let value = match kind {
                Capture::Text => ArgValue::Text(raw.to_string()),
                Capture::Int => ArgValue::Int(raw.parse().ok()?),
                Capture::Float => ArgValue::Float(raw.parse().ok()?),
            };
            values.push((name.clone(), value));
        }
        Some(values)
    }
}

/// A step bound to its handler, ready to run.
#[derive(Debug, Clone)]
pub struct ResolvedStep {
    /// The step as written.
    pub step: Step,
    /// Pattern it matched.
    pub pattern: String,
    /// Traits of the matched definition.
    pub traits: StepTraits,
    /// Captured arguments.
    pub args: StepArgs,
    handler: StepHandler,
}

impl ResolvedStep {
    /// Runs the handler against `ctx`.
    pub fn run<'a>(&self, ctx: &'a mut ScenarioContext) -> BoxFuture<'a, Result<()>> {
        (self.handler)(ctx, self.args.clone())
    }
}

/// Table of step definitions, built once before any scenario runs.
#[derive(Debug, Clone, Default)]
pub struct StepRegistry {
    definitions: Vec<StepDefinition>,
}

impl StepRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the standard step library.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        crate::steps::register_all(&mut registry)?;
        Ok(registry)
    }

    /// Registers a plain step.
    pub fn step(&mut self, pattern: &str, handler: StepHandler) -> Result<()> {
        self.step_with(pattern, StepTraits::NONE, handler)
    }

    /// Registers a step with traits. Duplicate patterns are rejected.
    pub fn step_with(&mut self, pattern: &str, traits: StepTraits, handler: StepHandler) -> Result<()> {
        let definition = StepDefinition::new(pattern, traits, handler)?;
        if self.definitions.iter().any(|d| d.pattern == definition.pattern) {
            return Err(HarnessError::Config(format!(
                "step pattern registered twice: {}",
                definition.pattern
            )));
        }
        self.definitions.push(definition);
        Ok(())
    }

    /// Registered definitions in registration order.
    pub fn definitions(&self) -> &[StepDefinition] {
        &self.definitions
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Binds `step` to exactly one definition.
    pub fn resolve(&self, step: &Step) -> Result<ResolvedStep> {
        let text = normalize(&step.text);
        let mut matches: Vec<(&StepDefinition, Vec<(String, ArgValue)>)> = self
            .definitions
            .iter()
            .filter_map(|d| d.capture(&text).map(|values| (d, values)))
            .collect();

        match matches.len() {
            1 => {
                let (definition, values) = matches.remove(0);
                Ok(ResolvedStep {
                    step: step.clone(),
                    pattern: definition.pattern.clone(),
                    traits: definition.traits,
                    args: StepArgs::new(values, step.table.clone()),
                    handler: definition.handler,
                })
            }
            _ => Err(HarnessError::NoBinding {
                step: step.text.clone(),
                candidates: matches.iter().map(|(d, _)| d.pattern.clone()).collect(),
            }),
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{Scenario, StepKeyword};
    use crate::ErrorKind;

    fn noop<'a>(_ctx: &'a mut ScenarioContext, _args: StepArgs) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn step(text: &str) -> Step {
        Step {
            keyword: StepKeyword::When,
            text: text.to_string(),
            table: None,
        }
    }

    #[test]
    fn test_typed_placeholders() {
        let mut registry = StepRegistry::new();
        registry
            .step("I place an order for {quantity:d} units of \"{product}\"", noop)
            .unwrap();
        registry
            .step("the order total should be {total:f}", noop)
            .unwrap();

        let resolved = registry
            .resolve(&step("I place an order for 2 units of \"Mouse\""))
            .unwrap();
        assert_eq!(resolved.args.int("quantity").unwrap(), 2);
        assert_eq!(resolved.args.text("product").unwrap(), "Mouse");

        let resolved = registry.resolve(&step("the order total should be 51.98")).unwrap();
        assert_eq!(resolved.args.float("total").unwrap(), 51.98);
        let resolved = registry.resolve(&step("the order total should be 52")).unwrap();
        assert_eq!(resolved.args.float("total").unwrap(), 52.0);
    }

    #[test]
    fn test_matching_is_anchored_and_whitespace_insensitive() {
        let mut registry = StepRegistry::new();
        registry.step("the database is connected", noop).unwrap();

        assert!(registry.resolve(&step("  the   database is\tconnected ")).is_ok());
        let err = registry
            .resolve(&step("the database is connected again"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoBinding);
    }

    #[test]
    fn test_ambiguous_binding_lists_candidates() {
        let mut registry = StepRegistry::new();
        registry.step("I delete {what}", noop).unwrap();
        registry.step("I delete user \"{name}\"", noop).unwrap();

        match registry.resolve(&step("I delete user \"bob\"")).unwrap_err() {
            HarnessError::NoBinding { candidates, .. } => assert_eq!(candidates.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_integer_placeholder_rejects_text() {
        let mut registry = StepRegistry::new();
        registry.step("there are {count:d} users", noop).unwrap();
        assert!(registry.resolve(&step("there are many users")).is_err());
        assert!(registry.resolve(&step("there are 99999999999999999999 users")).is_err());
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let mut registry = StepRegistry::new();
        registry.step("a  step", noop).unwrap();
        assert_eq!(
            registry.step("a step", noop).unwrap_err().kind(),
            ErrorKind::Configuration
        );
        assert!(registry.step("{x} and {x}", noop).is_err());
    }

    #[test]
    fn test_traits_and_table_travel_with_binding() {
        let mut registry = StepRegistry::new();
        registry
            .step_with("I drop table \"{table}\"", StepTraits::ddl(DdlOperation::DropTable), noop)
            .unwrap();
        registry.step("I insert the following records", noop).unwrap();

        let resolved = registry.resolve(&step("I drop table \"t\"")).unwrap();
        assert_eq!(resolved.traits.ddl, Some(DdlOperation::DropTable));

        let scenario = Scenario::new("s").when_table(
            "I insert the following records",
            DataTable::new(["name"]).row(["a"]),
        );
        let resolved = registry.resolve(&scenario.steps()[0]).unwrap();
        assert_eq!(resolved.args.table().unwrap().len(), 1);
        assert!(registry.resolve(&step("I drop table \"t\"")).unwrap().args.table().is_err());
    }

    #[test]
    fn test_standard_library_compiles() {
        let registry = StepRegistry::standard().unwrap();
        assert!(registry.len() > 50);
    }
}
