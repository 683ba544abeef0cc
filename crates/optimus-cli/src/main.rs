//! optimus: local coding agent
//!
//! Turns a goal into a plan of skill invocations, runs it, and remembers
//! what happened for the next run.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "optimus")]
#[command(about = "Local coding agent with planning, skills and memory", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to optimus.toml (default: search current directory and parents)
    #[arg(short, long, global = true, env = "OPTIMUS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the agent on a goal
    Run {
        /// The goal to achieve
        #[arg(required = true)]
        goal: Vec<String>,
    },

    /// List registered skills
    Skills,

    /// Inspect or clear memory
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Show model, memory and skill status
    Status,

    /// Write a template optimus.toml in the current directory
    Init,
}

#[derive(Debug, Subcommand)]
enum MemoryAction {
    /// Show entries recorded for a goal
    Show {
        goal: Vec<String>,

        /// Only the most recent N entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Remove every entry for a goal
    Clear { goal: Vec<String> },
    /// Show entry and goal counts
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Run { goal } => {
            if !commands::run(config, &goal.join(" ")).await? {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Skills => commands::skills(config).await,
        Commands::Memory { action } => match action {
            MemoryAction::Show { goal, limit } => {
                commands::memory_show(config, &goal.join(" "), limit)
            }
            MemoryAction::Clear { goal } => commands::memory_clear(config, &goal.join(" ")),
            MemoryAction::Stats => commands::memory_stats(config),
        },
        Commands::Status => commands::status(config).await,
        Commands::Init => commands::init(&std::env::current_dir()?),
    }
}
