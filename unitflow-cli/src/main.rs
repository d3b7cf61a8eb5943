//! Unitflow CLI - command-line front end for the worker-unit lifecycle
//! manager.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{register, status, unregister, update};

#[derive(Debug, Parser)]
#[command(name = "unitflow", version, about = "Manage installable worker units")]
struct Cli {
    /// Path to the content store database.
    #[arg(long, global = true, default_value = "unitflow.db")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch a unit and register it for a scope
    Register {
        /// Scope the unit controls
        scope: String,
        /// URL of the unit's content
        url: String,
        /// HTTP timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Conditionally re-fetch a scope's current unit
    Update {
        /// Scope to check
        scope: String,
        /// HTTP timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Remove a scope's registration
    Unregister {
        /// Scope to remove
        scope: String,
        /// Also delete the units the registration references
        #[arg(long)]
        purge: bool,
    },
    /// Show a registration's slots
    Status {
        /// Scope to inspect
        scope: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Register {
            scope,
            url,
            timeout,
        } => {
            register::run(register::RegisterArgs {
                store: cli.store,
                scope,
                url,
                timeout,
            })
            .await
        }
        Command::Update { scope, timeout } => {
            update::run(update::UpdateArgs {
                store: cli.store,
                scope,
                timeout,
            })
            .await
        }
        Command::Unregister { scope, purge } => {
            unregister::run(unregister::UnregisterArgs {
                store: cli.store,
                scope,
                purge,
            })
            .await
        }
        Command::Status { scope } => {
            status::run(status::StatusArgs {
                store: cli.store,
                scope,
            })
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
