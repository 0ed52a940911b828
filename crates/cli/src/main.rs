//! taskweave CLI: replays scripted oracles against the orchestration engine.
//!
//! Commands:
//! - `run`: Run a goal in direct, plan, or reflexion mode
//! - `validate-plan`: Check a script's plan without running it
//! - `config`: Show, locate, or validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod script;
mod tools;

#[derive(Parser)]
#[command(
    name = "taskweave",
    about = "taskweave: agent task orchestration",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a goal against a scripted oracle
    Run {
        /// Execution mode
        #[arg(short, long, value_enum, default_value_t = commands::run::Mode::Direct)]
        mode: commands::run::Mode,

        /// JSON script with plan, decisions, and reflections
        #[arg(short, long)]
        script: PathBuf,

        /// The goal to accomplish
        #[arg(short, long)]
        goal: String,

        /// Reflexion mode: an attempt succeeds only if its result contains this text
        #[arg(long)]
        expect: Option<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the plan in a script
    ValidatePlan {
        /// JSON script with a plan
        #[arg(short, long)]
        script: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            mode,
            script,
            goal,
            expect,
            json,
        } => commands::run::run(mode, &script, &goal, expect, json).await?,
        Commands::ValidatePlan { script } => commands::validate_plan::run(&script).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
