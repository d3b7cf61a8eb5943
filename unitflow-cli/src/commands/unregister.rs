//! Unregister command - remove a scope's registration.

use std::path::PathBuf;

use unitflow::{ManagerConfig, UnregisterPolicy};

use super::common::build_manager;
use crate::error::CliError;

/// Arguments for the unregister command.
pub struct UnregisterArgs {
    pub store: PathBuf,
    pub scope: String,
    pub purge: bool,
}

/// Run the unregister command.
pub async fn run(args: UnregisterArgs) -> Result<(), CliError> {
    let policy = if args.purge {
        UnregisterPolicy::PurgeUnits
    } else {
        UnregisterPolicy::RetainUnits
    };
    let config = ManagerConfig::default().with_unregister_policy(policy);
    let manager = build_manager(args.store, 30, config)?;

    manager.unregister(&args.scope).await?;
    if args.purge {
        println!("Unregistered scope {} and purged its units", args.scope);
    } else {
        println!("Unregistered scope {}", args.scope);
    }
    Ok(())
}
