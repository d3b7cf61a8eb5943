//! Shared construction for CLI commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use unitflow::dispatch::NullDispatcher;
use unitflow::fetch::HttpFetcher;
use unitflow::{ContentStore, LifecycleManager, ManagerConfig};

use crate::error::CliError;

/// Build a lifecycle manager over the store at `store_path`.
///
/// The CLI has no execution engine attached, so lifecycle events resolve
/// immediately through the null dispatcher.
pub fn build_manager(
    store_path: PathBuf,
    timeout_secs: u64,
    config: ManagerConfig,
) -> Result<LifecycleManager, CliError> {
    let store = Arc::new(ContentStore::open(&store_path)?);
    let config = config.with_fetch_timeout(Duration::from_secs(timeout_secs));
    let fetcher =
        HttpFetcher::with_timeout(config.fetch_timeout)?.with_stream_capacity(config.stream_capacity);
    Ok(
        LifecycleManager::new(store, Arc::new(fetcher), Arc::new(NullDispatcher))
            .with_config(config),
    )
}
