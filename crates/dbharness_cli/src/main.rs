//! dbharness CLI - run database test scenarios from the command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use dbharness_core::{Dialect, Profile, ReportFormat, CONFIG_FILE};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod report;

#[derive(Parser)]
#[command(name = "dbharness")]
#[command(about = "Scenario-driven database test harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE, env = "DBHARNESS_CONFIG")]
    config: PathBuf,
    /// Named profile (local, ci, staging, production); overrides the file
    #[arg(short, long, global = true)]
    profile: Option<Profile>,
    /// Database driver (sqlite, postgresql, mysql); overrides profile and DB_DRIVER
    #[arg(long, global = true)]
    db_driver: Option<Dialect>,
    /// Log lifecycle events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scenarios
    Run {
        /// Only scenarios of this feature
        #[arg(long)]
        feature: Option<String>,
        /// Tag expression, e.g. "@smoke and not @slow" (repeatable, all must match)
        #[arg(short, long = "tags")]
        tags: Vec<String>,
        /// Only scenarios whose name contains this text
        #[arg(short, long)]
        name: Option<String>,
        /// Bind every step and report without touching the database
        #[arg(long)]
        dry_run: bool,
        /// Skip the remaining scenarios after the first failure
        #[arg(long)]
        stop_on_failure: bool,
        /// Per-scenario timeout in seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// Report format (pretty, json, junit, html)
        #[arg(short, long)]
        format: Option<ReportFormat>,
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List features and scenarios
    List {
        /// Show registered step patterns instead
        #[arg(long)]
        steps: bool,
        /// Only scenarios of this feature
        #[arg(long)]
        feature: Option<String>,
        /// Tag expression (repeatable)
        #[arg(short, long = "tags")]
        tags: Vec<String>,
    },
    /// Verify configuration, connectivity and step bindings
    Check,
    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a configuration file with profile defaults
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_path();
    match cli.command {
        Commands::Run {
            feature,
            tags,
            name,
            dry_run,
            stop_on_failure,
            timeout,
            format,
            output,
        } => {
            let args = commands::run::RunArgs {
                feature,
                tags,
                name,
                dry_run,
                stop_on_failure,
                timeout,
                driver: cli.db_driver,
                format,
                output,
            };
            let passed = commands::run::run(config, cli.profile, args).await?;
            Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::List {
            steps,
            feature,
            tags,
        } => {
            commands::list::run(steps, feature.as_deref(), &tags)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let healthy = commands::check::run(config, cli.profile, cli.db_driver).await?;
            Ok(if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => commands::config::show(config, cli.profile, cli.db_driver)?,
                ConfigCommands::Init { force } => commands::config::init(config, cli.profile, force)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
