//! CLI error type.

use thiserror::Error;

use unitflow::fetch::FetchError;
use unitflow::store::StoreError;
use unitflow::LifecycleError;

/// Errors surfaced to the terminal with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Usage(String),
}
