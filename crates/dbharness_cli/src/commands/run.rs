//! Scenario run command.

use super::{explain, load_config};
use crate::report;
use anyhow::{Context, Result};
use console::style;
use dbharness_core::{
    features, Dialect, Harness, Profile, ReportFormat, RunFilter, ScenarioStatus, StepRegistry,
    TagExpression,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options of `dbharness run`.
pub struct RunArgs {
    pub feature: Option<String>,
    pub tags: Vec<String>,
    pub name: Option<String>,
    pub dry_run: bool,
    pub stop_on_failure: bool,
    pub timeout: Option<f64>,
    pub driver: Option<Dialect>,
    pub format: Option<ReportFormat>,
    pub output: Option<PathBuf>,
}

impl RunArgs {
    fn filter(&self) -> Result<RunFilter> {
        let timeout = match self.timeout {
            Some(s) if s.is_finite() && s > 0.0 => Some(Duration::from_secs_f64(s)),
            Some(s) => anyhow::bail!("--timeout must be a positive number of seconds, got {}", s),
            None => None,
        };
        Ok(RunFilter {
            feature: self.feature.clone(),
            tags: TagExpression::parse_all(&self.tags).map_err(explain)?,
            name: self.name.clone(),
            dry_run: self.dry_run,
            timeout,
            stop_on_failure: self.stop_on_failure,
        })
    }
}

/// Runs the selected scenarios. Returns whether every scenario passed.
pub async fn run(config_path: &Path, profile: Option<Profile>, args: RunArgs) -> Result<bool> {
    let config = load_config(config_path, profile, args.driver)?;
    let format = args.format.unwrap_or(config.report.format);
    let filter = args.filter()?;

    let registry = StepRegistry::standard().map_err(explain)?;
    let harness = Harness::connect(config, registry)
        .await
        .map_err(explain)
        .context("failed to start the harness")?;

    let catalogue = features::catalogue();
    let planned = match harness.plan(&catalogue, &filter) {
        Ok(planned) => planned,
        Err(e) => {
            harness.shutdown().await.ok();
            return Err(explain(e));
        }
    };
    if planned.is_empty() {
        println!("{}", style("No scenarios match the filter.").yellow());
        harness.shutdown().await.map_err(explain)?;
        return Ok(true);
    }

    let pb = ProgressBar::new(planned.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = harness
        .execute(planned, &filter, |scenario| {
            match scenario.status {
                ScenarioStatus::Failed | ScenarioStatus::TimedOut => pb.println(format!(
                    "{} {}",
                    style("✗").red(),
                    scenario.qualified_name()
                )),
                _ => {}
            }
            pb.set_message(scenario.name.clone());
            pb.inc(1);
        })
        .await;
    pb.finish_and_clear();

    harness
        .shutdown()
        .await
        .map_err(explain)
        .context("failed to clean up after the run")?;

    report::emit(&report, format, args.output.as_deref())?;
    if let Some(path) = &args.output {
        println!("{}", report::summary_line(&report));
        println!("Report written to {}", style(path.display()).cyan());
    }
    if let Some(reason) = &report.aborted {
        eprintln!("{} run aborted: {}", style("error:").red().bold(), reason);
    }
    Ok(report.is_success())
}
