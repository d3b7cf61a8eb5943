//! Update command - conditionally re-fetch a scope's current unit.

use std::path::PathBuf;

use unitflow::{LifecycleError, ManagerConfig};

use super::common::build_manager;
use crate::error::CliError;

/// Arguments for the update command.
pub struct UpdateArgs {
    pub store: PathBuf,
    pub scope: String,
    pub timeout: u64,
}

/// Run the update command.
pub async fn run(args: UpdateArgs) -> Result<(), CliError> {
    let manager = build_manager(args.store, args.timeout, ManagerConfig::default())?;

    match manager.update(&args.scope).await {
        Ok(()) => {
            println!("Update check complete for scope {}", args.scope);
            if let Some(status) = manager.describe(&args.scope).await? {
                super::status::print_status(&status);
            }
            Ok(())
        }
        Err(LifecycleError::UnknownScope(scope)) => {
            Err(CliError::Usage(format!("no registration for scope {scope}")))
        }
        Err(e) => Err(e.into()),
    }
}
