//! Lifecycle event dispatch seam.
//!
//! Installed units react to `install` and `activate` events through an
//! execution engine outside this crate. The orchestration layer only needs
//! a future that resolves once the unit's handler and any extended work it
//! registered complete, plus the skip-waiting signal the handler may raise
//! during install.

use thiserror::Error;

use crate::unit::UnitRecord;
use crate::BoxFuture;

/// Lifecycle event kinds dispatched to a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Install,
    Activate,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed handler plus its extended work.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedWork {
    /// The unit requested immediate activation during install.
    pub skip_waiting: bool,
}

/// A rejected handler or failed extended work.
#[derive(Debug, Clone, Error)]
#[error("event handler failed: {0}")]
pub struct DispatchError(pub String);

/// Runs a unit's lifecycle event handlers.
///
/// The returned future resolves when the handler and all extended work it
/// registered complete, or fails if the handler throws.
pub trait LifecycleDispatcher: Send + Sync {
    fn dispatch(
        &self,
        unit: &UnitRecord,
        kind: EventKind,
    ) -> BoxFuture<'_, Result<ExtendedWork, DispatchError>>;
}

/// Dispatcher for units with no handlers registered; every event resolves
/// immediately with no extended work.
pub struct NullDispatcher;

impl LifecycleDispatcher for NullDispatcher {
    fn dispatch(
        &self,
        _unit: &UnitRecord,
        _kind: EventKind,
    ) -> BoxFuture<'_, Result<ExtendedWork, DispatchError>> {
        Box::pin(async { Ok(ExtendedWork::default()) })
    }
}

/// Sink for externally observable registration changes.
///
/// Invoked after unregister (and other listener-visible transitions) so
/// collaborators outside this core can react.
pub trait ChangeListener: Send + Sync {
    fn notify(&self, scope: &str);
}

/// Listener that ignores every notification.
pub struct NullListener;

impl ChangeListener for NullListener {
    fn notify(&self, _scope: &str) {}
}
