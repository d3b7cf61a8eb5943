//! Configuration for the lifecycle manager.

use std::time::Duration;

use crate::fetch::{DEFAULT_BODY_STREAM_CAPACITY, DEFAULT_FETCH_TIMEOUT};

/// What happens to the units a registration references when it is
/// unregistered.
///
/// The slot rows point at unit rows that can outlive the registration;
/// whether they should is a deployment decision, so it is explicit here
/// rather than implicit in the unregister path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnregisterPolicy {
    /// Leave unit rows in place; they remain reachable through pinned
    /// registration lookups and by id.
    #[default]
    RetainUnits,
    /// Destroy runtime resources and delete the referenced unit rows.
    PurgeUnits,
}

/// Tuning knobs for [`super::LifecycleManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// HTTP request timeout used when the manager builds its own fetcher.
    pub fetch_timeout: Duration,

    /// Chunk capacity of response-body streams.
    pub stream_capacity: usize,

    /// Treatment of referenced units on unregister.
    pub unregister_policy: UnregisterPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            stream_capacity: DEFAULT_BODY_STREAM_CAPACITY,
            unregister_policy: UnregisterPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the body stream capacity.
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity.max(1);
        self
    }

    /// Set the unregister policy.
    pub fn with_unregister_policy(mut self, policy: UnregisterPolicy) -> Self {
        self.unregister_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_fetch_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
        assert_eq!(config.stream_capacity, DEFAULT_BODY_STREAM_CAPACITY);
        assert_eq!(config.unregister_policy, UnregisterPolicy::RetainUnits);
    }

    #[test]
    fn test_builders() {
        let config = ManagerConfig::default()
            .with_fetch_timeout(Duration::from_secs(5))
            .with_stream_capacity(0)
            .with_unregister_policy(UnregisterPolicy::PurgeUnits);
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.stream_capacity, 1, "capacity clamps to at least 1");
        assert_eq!(config.unregister_policy, UnregisterPolicy::PurgeUnits);
    }
}
