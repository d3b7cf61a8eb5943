//! Process-wide identity registry for live registrations.
//!
//! The registry maps a scope to a weak handle on its live [`Registration`]
//! object. While any owner holds a strong `Arc`, every lookup for that
//! scope returns the identical instance; the registry itself keeps nothing
//! alive. Once the last owner drops its `Arc` the entry is dead and may be
//! evicted at will - a later lookup constructs a fresh object from the
//! store.
//!
//! Lookups pinned to a specific registration id bypass the cache: they
//! exist to fetch one particular historical generation and must not alias
//! the live object for the scope.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{Registration, SlotKind};
use crate::store::{ContentStore, StoreError};
use crate::unit::{UnitId, UnitRecord};

/// Scope-keyed identity cache of live [`Registration`] objects.
#[derive(Default)]
pub struct RegistrationRegistry {
    inner: Mutex<HashMap<String, Weak<Registration>>>,
}

impl RegistrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a registration, materializing from the store on a miss.
    ///
    /// Returns `None` when no row exists for the scope (or, with
    /// `pinned_id`, no row with that exact id).
    pub async fn get(
        &self,
        store: &ContentStore,
        scope: &str,
        pinned_id: Option<&str>,
    ) -> Result<Option<Arc<Registration>>, StoreError> {
        if pinned_id.is_none() {
            if let Some(live) = self.lookup_live(scope) {
                return Ok(Some(live));
            }
        }

        let scope_owned = scope.to_string();
        let pinned = pinned_id.map(str::to_string);
        let loaded = store
            .with_conn(move |conn| {
                let Some(row) =
                    ContentStore::select_registration(conn, &scope_owned, pinned.as_deref())?
                else {
                    return Ok(None);
                };
                // Materialize the slot references in the same context.
                let mut units: Vec<UnitRecord> = Vec::new();
                for kind in SlotKind::ALL {
                    if let Some(unit_id) = row.slot_id(kind) {
                        let id = UnitId::from_string(unit_id);
                        if let Some(unit) = ContentStore::select_unit(conn, &id)? {
                            units.push(unit);
                        }
                    }
                }
                Ok(Some((row, units)))
            })
            .await?;

        let Some((row, units)) = loaded else {
            return Ok(None);
        };
        let fresh = Arc::new(Registration::from_row(row, units));

        if pinned_id.is_some() {
            // Historical fetch; never cached.
            return Ok(Some(fresh));
        }

        let mut map = self.inner.lock();
        // Another task may have materialized the same scope while we were
        // loading; the first live instance wins.
        if let Some(existing) = map.get(scope).and_then(Weak::upgrade) {
            return Ok(Some(existing));
        }
        map.insert(scope.to_string(), Arc::downgrade(&fresh));
        debug!(scope, "registration materialized from store");
        Ok(Some(fresh))
    }

    /// Insert a fresh registration row and register the live object.
    pub async fn create(
        &self,
        store: &ContentStore,
        scope: &str,
    ) -> Result<Arc<Registration>, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let scope_owned = scope.to_string();
        let id_for_insert = id.clone();
        store
            .with_conn(move |conn| {
                ContentStore::insert_registration(conn, &id_for_insert, &scope_owned)
            })
            .await?;

        let registration = Arc::new(Registration::new(id, scope));
        self.inner
            .lock()
            .insert(scope.to_string(), Arc::downgrade(&registration));
        debug!(scope, "registration created");
        Ok(registration)
    }

    /// Existing live/stored registration for the scope, or a new one.
    pub async fn get_or_create(
        &self,
        store: &ContentStore,
        scope: &str,
    ) -> Result<Arc<Registration>, StoreError> {
        if let Some(existing) = self.get(store, scope, None).await? {
            return Ok(existing);
        }
        self.create(store, scope).await
    }

    /// Drop the cache entry for a scope (on unregister).
    pub fn evict(&self, scope: &str) {
        self.inner.lock().remove(scope);
    }

    /// Number of live entries, pruning dead ones.
    pub fn live_count(&self) -> usize {
        let mut map = self.inner.lock();
        map.retain(|_, weak| weak.strong_count() > 0);
        map.len()
    }

    fn lookup_live(&self, scope: &str) -> Option<Arc<Registration>> {
        let mut map = self.inner.lock();
        match map.get(scope).and_then(Weak::upgrade) {
            Some(live) => Some(live),
            None => {
                // Prune the dead entry so the map does not grow unbounded.
                map.remove(scope);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_scope_returns_identical_instance_while_held() {
        let store = ContentStore::open_in_memory().unwrap();
        let registry = RegistrationRegistry::new();

        let first = registry
            .get_or_create(&store, "https://app.example/")
            .await
            .unwrap();
        let second = registry
            .get(&store, "https://app.example/", None)
            .await
            .unwrap()
            .expect("registration exists");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_registration_is_reloaded_from_store() {
        let store = ContentStore::open_in_memory().unwrap();
        let registry = RegistrationRegistry::new();

        let id = {
            let live = registry
                .get_or_create(&store, "https://app.example/")
                .await
                .unwrap();
            live.id().to_string()
        };
        // No strong owner remains; the cache must not keep it alive.
        assert_eq!(registry.live_count(), 0);

        let reloaded = registry
            .get(&store, "https://app.example/", None)
            .await
            .unwrap()
            .expect("row still in store");
        assert_eq!(reloaded.id(), id);
    }

    #[tokio::test]
    async fn test_pinned_lookup_bypasses_cache() {
        let store = ContentStore::open_in_memory().unwrap();
        let registry = RegistrationRegistry::new();

        let live = registry
            .get_or_create(&store, "https://app.example/")
            .await
            .unwrap();
        let pinned = registry
            .get(&store, "https://app.example/", Some(live.id()))
            .await
            .unwrap()
            .expect("pinned row");
        assert_eq!(pinned.id(), live.id());
        assert!(!Arc::ptr_eq(&live, &pinned));

        let missing = registry
            .get(&store, "https://app.example/", Some("other-id"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_unknown_scope_is_none() {
        let store = ContentStore::open_in_memory().unwrap();
        let registry = RegistrationRegistry::new();
        let result = registry
            .get(&store, "https://nowhere.example/", None)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
