//! Status command - show a registration's slots.

use std::path::PathBuf;

use unitflow::lifecycle::RegistrationStatus;
use unitflow::ManagerConfig;

use super::common::build_manager;
use crate::error::CliError;

/// Arguments for the status command.
pub struct StatusArgs {
    pub store: PathBuf,
    pub scope: String,
}

/// Run the status command.
pub async fn run(args: StatusArgs) -> Result<(), CliError> {
    let manager = build_manager(args.store, 30, ManagerConfig::default())?;

    match manager.describe(&args.scope).await? {
        Some(status) => {
            print_status(&status);
            Ok(())
        }
        None => Err(CliError::Usage(format!(
            "no registration for scope {}",
            args.scope
        ))),
    }
}

/// Print one registration's slots.
pub fn print_status(status: &RegistrationStatus) {
    println!("Registration {} ({})", status.id, status.scope);
    if status.slots.is_empty() {
        println!("  (no units)");
        return;
    }
    for view in &status.slots {
        let hash = view.content_hash.as_deref().unwrap_or("-");
        println!(
            "  {:<10} {}  state={}  sha256={}",
            view.slot, view.unit_id, view.state, hash
        );
    }
}
