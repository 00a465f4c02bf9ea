//! Lodestar CLI - local control plane for AI agent and workflow executions.
//!
//! One persistent daemon per machine; `apply` deploys proto-manifested
//! resources, `run` drives an execution to completion and streams its
//! events.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use anyhow::Result;
use clap::{Parser, Subcommand};

mod client;
mod commands;
mod worker_main;

use commands::{apply, run, server};

/// Lodestar - local agent & workflow control plane
#[derive(Parser)]
#[command(name = "lodestar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the control plane daemon
    Server {
        #[command(subcommand)]
        command: Option<ServerCommands>,
    },

    /// Apply a project manifest to the control plane
    Apply {
        /// Path to the manifest file
        #[arg(short = 'f', long, default_value = apply::DEFAULT_MANIFEST)]
        file: String,
    },

    /// Run an agent or workflow by name or id
    Run {
        /// Resource name, slug, or id; auto-selected when only one exists
        name: Option<String>,

        /// Initial message for agent executions
        #[arg(short, long, default_value = "Hello")]
        message: String,
    },
}

#[derive(Subcommand)]
enum ServerCommands {
    /// Start the daemon in the background
    Start,
    /// Stop the daemon
    Stop,
    /// Restart the daemon
    Restart,
    /// Show daemon and component status
    Status,
    /// Run the daemon in the foreground (used by `server start`)
    #[command(hide = true)]
    Foreground,
}

fn main() -> Result<()> {
    // Internal worker mode must route straight to the worker entrypoint,
    // before any command parsing: the worker is spawned with exactly one
    // internal argument and a parser in the way means it exits silently.
    if std::env::args().nth(1).as_deref() == Some("__worker") {
        return worker_main::run();
    }

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let _ = lodestar_core::setup_logging(&lodestar_core::LogConfig::new(filter));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        match cli.command {
            Commands::Server { command } => match command.unwrap_or(ServerCommands::Start) {
                ServerCommands::Start => server::start().await,
                ServerCommands::Stop => server::stop().await,
                ServerCommands::Restart => server::restart().await,
                ServerCommands::Status => server::status().await,
                ServerCommands::Foreground => server::foreground().await,
            },
            Commands::Apply { file } => apply::execute(&file).await,
            Commands::Run { name, message } => run::execute(name.as_deref(), &message).await,
        }
    })
}
