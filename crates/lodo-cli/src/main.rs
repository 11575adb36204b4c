//! lodo CLI
//!
//! Command-line interface for lodo - a local-first task list that keeps
//! working offline and syncs pending changes in the background.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lodo_core::{Config, NoopWake, Store, TaskId};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "lodo")]
#[command(about = "lodo - Local-first offline task list")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        /// Task text
        text: String,
    },
    /// List all tasks
    #[command(alias = "ls")]
    List,
    /// Edit a task's text
    Edit {
        /// Task ID
        id: TaskId,
        /// New task text
        text: String,
    },
    /// Delete a task
    #[command(alias = "rm")]
    Delete {
        /// Task ID
        id: TaskId,
    },
    /// Deliver pending changes to the sync server
    Sync,
    /// Show storage and sync status
    Status,
    /// Delete all tasks and pending changes (debug/reset)
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, sync_url, sync_enabled, max_retries)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(&output),
            Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, &output),
        };
    }

    let config = Config::load()?;

    // Degrade to a non-persistent store rather than refusing to run
    let store = Arc::new(Store::open_or_memory(config, Arc::new(NoopWake))?);
    if !store.is_persistent() && !output.is_quiet() {
        eprintln!("⚠ Persistent storage unavailable - changes will be lost on exit");
    }

    match cli.command {
        Commands::Add { text } => commands::task::add(&store, text, &output),
        Commands::List => commands::task::list(&store, &output),
        Commands::Edit { id, text } => commands::task::edit(&store, id, text, &output),
        Commands::Delete { id } => commands::task::delete(&store, id, &output),
        Commands::Sync => commands::sync::run(&store, &output).await,
        Commands::Status => commands::status::show(&store, &output),
        Commands::Clear { force } => commands::task::clear(&store, force, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}
