//! CLI commands.

pub mod check;
pub mod config;
pub mod list;
pub mod run;

use anyhow::{Context, Result};
use console::style;
use dbharness_core::{Dialect, HarnessConfig, HarnessError, Profile};
use std::path::Path;

/// Resolves the effective configuration for a command.
pub fn load_config(path: &Path, profile: Option<Profile>, driver: Option<Dialect>) -> Result<HarnessConfig> {
    HarnessConfig::resolve_with_driver(Some(path), profile, driver)
        .map_err(explain)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// Prints the recovery hint for `error`, if any, and converts it.
pub fn explain(error: HarnessError) -> anyhow::Error {
    if let Some(hint) = error.recovery_suggestion() {
        eprintln!("{} {}", style("hint:").yellow().bold(), hint);
    }
    anyhow::Error::new(error)
}
