//! Top-level error taxonomy for lifecycle operations.

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::fetch::FetchError;
use crate::store::StoreError;
use crate::stream::StreamError;

/// Errors surfaced by `register`, `update`, and `unregister`.
///
/// There is no partial-success shape: an operation either commits its
/// final state or rejects with one of these, leaving the registration's
/// observable slots as they were before the call.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// `update` was called with neither an active nor a waiting unit.
    #[error("no active or waiting unit to update against")]
    NoUpdateTarget,

    /// Transport failure, or a non-OK response to a registration fetch.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Non-2xx (and non-304) response to a conditional update fetch.
    #[error("unexpected response status {status}")]
    NonOkResponse { status: u16 },

    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The dedup comparison unit's row is absent or already redundant.
    #[error("comparison target is missing or redundant")]
    ComparisonTargetMissing,

    /// A lifecycle event handler rejected.
    #[error(transparent)]
    EventHandler(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// No registration exists for the scope.
    #[error("no registration for scope {0}")]
    UnknownScope(String),
}

impl From<FetchError> for LifecycleError {
    fn from(err: FetchError) -> Self {
        Self::FetchFailed(err.to_string())
    }
}
