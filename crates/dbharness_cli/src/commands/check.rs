//! Environment health check.

use super::load_config;
use anyhow::Result;
use console::style;
use dbharness_core::{features, ConnectionManager, Dialect, Profile, SchemaManager, StepRegistry, TableLocks};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// Checks configuration, connectivity and step bindings. Returns whether
/// everything is usable.
pub async fn run(config_path: &Path, profile: Option<Profile>, driver: Option<Dialect>) -> Result<bool> {
    let mut healthy = true;

    let config = match load_config(config_path, profile, driver) {
        Ok(config) => {
            ok("configuration", &format!("profile {}", config.run.profile));
            config
        }
        Err(e) => {
            fail("configuration", &format!("{:#}", e));
            return Ok(false);
        }
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Connecting to {}...", config.database.redacted_url()));
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    let connected = ConnectionManager::connect(&config.database).await;
    spinner.finish_and_clear();

    match connected {
        Ok(manager) => {
            ok(
                "connection",
                &format!("{} ({})", manager.dialect(), config.database.redacted_url()),
            );
            let schema = SchemaManager::new(manager.dialect(), TableLocks::new());
            match manager.acquire().await {
                Ok(mut session) => {
                    match schema.list_tables(&mut session).await {
                        Ok(tables) => ok("catalog", &format!("{} tables", tables.len())),
                        Err(e) => {
                            fail("catalog", &e.to_string());
                            healthy = false;
                        }
                    }
                    manager.release(&mut session).await.ok();
                }
                Err(e) => {
                    fail("session", &e.to_string());
                    healthy = false;
                }
            }
            let stats = manager.stats();
            ok("pool", &format!("max {} sessions", stats.max_size));
            manager.close().await;
        }
        Err(e) => {
            fail("connection", &e.to_string());
            if let Some(hint) = e.recovery_suggestion() {
                println!("    {}", style(hint).dim());
            }
            healthy = false;
        }
    }

    match StepRegistry::standard() {
        Ok(registry) => {
            let mut unbound = Vec::new();
            let mut steps = 0;
            for feature in features::catalogue() {
                for scenario in feature.scenarios() {
                    for step in scenario.steps() {
                        steps += 1;
                        if let Err(e) = registry.resolve(step) {
                            unbound.push(e.to_string());
                        }
                    }
                }
            }
            if unbound.is_empty() {
                ok(
                    "bindings",
                    &format!("{} steps bound to {} patterns", steps, registry.len()),
                );
            } else {
                fail("bindings", &format!("{} unbound steps", unbound.len()));
                for e in unbound {
                    println!("    {}", style(e).dim());
                }
                healthy = false;
            }
        }
        Err(e) => {
            fail("bindings", &e.to_string());
            healthy = false;
        }
    }

    Ok(healthy)
}

fn ok(what: &str, detail: &str) {
    println!("{} {:<14} {}", style("✓").green(), what, detail);
}

fn fail(what: &str, detail: &str) {
    println!("{} {:<14} {}", style("✗").red(), what, style(detail).red());
}
