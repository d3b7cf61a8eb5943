//! Register command - fetch a unit and install it for a scope.

use std::path::PathBuf;

use unitflow::ManagerConfig;

use super::common::build_manager;
use crate::error::CliError;

/// Arguments for the register command.
pub struct RegisterArgs {
    pub store: PathBuf,
    pub scope: String,
    pub url: String,
    pub timeout: u64,
}

/// Run the register command.
pub async fn run(args: RegisterArgs) -> Result<(), CliError> {
    let manager = build_manager(args.store, args.timeout, ManagerConfig::default())?;
    manager.register(&args.scope, &args.url).await?;

    println!("Registered {} for scope {}", args.url, args.scope);
    if let Some(status) = manager.describe(&args.scope).await? {
        super::status::print_status(&status);
    }
    Ok(())
}
