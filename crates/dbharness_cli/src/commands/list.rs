//! Listing of features, scenarios and step patterns.

use super::explain;
use anyhow::Result;
use console::style;
use dbharness_core::{features, RunFilter, StepRegistry, StepTraits, TagExpression};

/// Prints the catalogue, or the registered step patterns with `steps`.
pub fn run(steps: bool, feature: Option<&str>, tags: &[String]) -> Result<()> {
    if steps {
        return list_steps();
    }

    let filter = RunFilter {
        feature: feature.map(str::to_string),
        tags: TagExpression::parse_all(tags).map_err(explain)?,
        ..RunFilter::default()
    };

    let mut total = 0;
    for feature in features::catalogue() {
        let scenarios: Vec<_> = feature
            .scenarios()
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        if scenarios.is_empty() {
            continue;
        }
        println!("{} {}", style("Feature:").bold(), style(feature.name()).cyan());
        for scenario in &scenarios {
            println!(
                "  {} {}",
                scenario.name(),
                style(scenario.tags().join(" ")).dim()
            );
        }
        total += scenarios.len();
    }
    println!();
    println!("{} scenarios", style(total).bold());
    Ok(())
}

fn list_steps() -> Result<()> {
    let registry = StepRegistry::standard().map_err(explain)?;
    for definition in registry.definitions() {
        let marks = traits_label(definition.traits());
        if marks.is_empty() {
            println!("  {}", definition.pattern());
        } else {
            println!("  {} {}", definition.pattern(), style(marks).dim());
        }
    }
    println!();
    println!("{} step patterns", style(registry.len()).bold());
    Ok(())
}

fn traits_label(traits: StepTraits) -> String {
    let mut marks = Vec::new();
    if let Some(op) = traits.ddl {
        marks.push(format!("ddl:{:?}", op));
    }
    if traits.cross_session {
        marks.push("cross-session".to_string());
    }
    if traits.commits {
        marks.push("commits".to_string());
    }
    if marks.is_empty() {
        String::new()
    } else {
        format!("[{}]", marks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbharness_core::DdlOperation;

    #[test]
    fn test_traits_label() {
        assert_eq!(traits_label(StepTraits::NONE), "");
        assert_eq!(traits_label(StepTraits::commits()), "[commits]");
        assert_eq!(
            traits_label(StepTraits::ddl(DdlOperation::DropTable)),
            "[ddl:DropTable]"
        );
    }
}
