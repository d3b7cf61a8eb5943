//! Lifecycle orchestration: register, update, install, activate,
//! unregister.
//!
//! Each top-level operation is a linear chain of async steps - fetch,
//! stream-ingest, dedup check, state transitions, event dispatch - with
//! early `?` returns and an explicit compensation block on the failure
//! path. Store-mutating steps run inside the store's serialized context,
//! so the multi-step "insert → hash-compare → mutate-state" sequences
//! never race with each other.
//!
//! # State machine
//!
//! ```text
//! downloading → installing → installed → activating → activated
//!        \           \            \           \
//!         `-----------`------------`-----------`---→ redundant
//! ```
//!
//! Slot assignment follows [`SlotKind::for_state`]; placing a unit into an
//! occupied slot demotes the displaced unit to redundant in memory and in
//! the store before the new occupant is recorded.

mod config;

pub use config::{ManagerConfig, UnregisterPolicy};

use std::sync::Arc;

use rusqlite::TransactionBehavior;
use tracing::{debug, info, warn};

use crate::dispatch::{ChangeListener, EventKind, ExtendedWork, LifecycleDispatcher, NullListener};
use crate::error::LifecycleError;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::registration::{Registration, RegistrationRegistry, SlotKind};
use crate::store::{ContentStore, StoreError};
use crate::unit::{InstallState, UnitId, UnitRecord};

/// Outcome of the dedup comparison inside `process_response`.
enum Dedup {
    /// New content is byte-identical to the comparison unit.
    Duplicate,
    /// New content differs; proceed to install.
    Distinct,
    /// The comparison unit's row is gone or already redundant.
    TargetGone,
}

/// Summary of one occupied slot, for status display.
#[derive(Debug, Clone)]
pub struct SlotView {
    pub slot: SlotKind,
    pub unit_id: String,
    pub url: String,
    pub state: InstallState,
    pub content_hash: Option<String>,
}

/// Snapshot of a registration's observable state.
#[derive(Debug, Clone)]
pub struct RegistrationStatus {
    pub id: String,
    pub scope: String,
    pub slots: Vec<SlotView>,
}

/// Orchestrates the persistent lifecycle of installable worker units.
///
/// Owns the content store, the collaborator seams, and the process-wide
/// registration registry. Multiple top-level operations may run
/// concurrently; all store mutations funnel through the store's
/// serialized context.
pub struct LifecycleManager {
    store: Arc<ContentStore>,
    fetcher: Arc<dyn Fetcher>,
    dispatcher: Arc<dyn LifecycleDispatcher>,
    listener: Arc<dyn ChangeListener>,
    registry: RegistrationRegistry,
    config: ManagerConfig,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<ContentStore>,
        fetcher: Arc<dyn Fetcher>,
        dispatcher: Arc<dyn LifecycleDispatcher>,
    ) -> Self {
        Self {
            store,
            fetcher,
            dispatcher,
            listener: Arc::new(NullListener),
            registry: RegistrationRegistry::new(),
            config: ManagerConfig::default(),
        }
    }

    /// Install a change-notification sink.
    pub fn with_listener(mut self, listener: Arc<dyn ChangeListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn registry(&self) -> &RegistrationRegistry {
        &self.registry
    }

    /// Register (or re-register) a unit for a scope.
    ///
    /// Fetches `url` unconditionally and runs the full install pipeline
    /// with no dedup comparison target.
    pub async fn register(&self, scope: &str, url: &str) -> Result<(), LifecycleError> {
        let registration = self.registry.get_or_create(&self.store, scope).await?;
        info!(scope, url, "registering unit");

        let response = self.fetcher.fetch(FetchRequest::new(url)).await?;
        if !response.is_ok() {
            return Err(LifecycleError::FetchFailed(format!(
                "unexpected status {}",
                response.status
            )));
        }
        self.process_response(&registration, url, response, None)
            .await
    }

    /// Check the registration's current unit for new content.
    ///
    /// The active unit, else the waiting unit, is the comparison target;
    /// its stored `ETag`/`Last-Modified` headers become the conditional
    /// validators. A 304 response terminates successfully with no state
    /// change.
    pub async fn update(&self, scope: &str) -> Result<(), LifecycleError> {
        let registration = self
            .registry
            .get(&self.store, scope, None)
            .await?
            .ok_or_else(|| LifecycleError::UnknownScope(scope.to_string()))?;

        let target = registration
            .with_slots(|slots| {
                slots
                    .get(SlotKind::Active)
                    .cloned()
                    .or_else(|| slots.get(SlotKind::Waiting).cloned())
            })
            .ok_or(LifecycleError::NoUpdateTarget)?;

        // The stored copy of the target's headers drives the conditional
        // request.
        let stored = self
            .store
            .with_conn(|conn| ContentStore::select_unit(conn, &target.id))
            .await?
            .ok_or_else(|| StoreError::MissingUnit(target.id.to_string()))?;

        let url = target.url.clone();
        let request = FetchRequest::conditional(&url, &stored.headers);
        let response = self.fetcher.fetch(request).await?;

        if response.is_not_modified() {
            debug!(scope, "unit not modified");
            return Ok(());
        }
        if !response.is_ok() {
            return Err(LifecycleError::NonOkResponse {
                status: response.status,
            });
        }
        self.process_response(&registration, &url, response, Some(target))
            .await
    }

    /// Remove the registration for a scope.
    ///
    /// Deletes the row, marks the live object unregistered, evicts it
    /// from the registry, and notifies change listeners. Referenced unit
    /// rows are retained or purged per [`UnregisterPolicy`].
    pub async fn unregister(&self, scope: &str) -> Result<(), LifecycleError> {
        let registration = self
            .registry
            .get(&self.store, scope, None)
            .await?
            .ok_or_else(|| LifecycleError::UnknownScope(scope.to_string()))?;

        let purge = self.config.unregister_policy == UnregisterPolicy::PurgeUnits;
        let unit_ids: Vec<UnitId> = if purge {
            registration.with_slots(|slots| {
                SlotKind::ALL
                    .iter()
                    .filter_map(|kind| slots.get(*kind).map(|u| u.id.clone()))
                    .collect()
            })
        } else {
            Vec::new()
        };

        self.store
            .with_conn(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                for id in &unit_ids {
                    ContentStore::delete_unit(&tx, id)?;
                }
                ContentStore::delete_registration(&tx, registration.id())?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        registration.mark_unregistered();
        if purge {
            registration.with_slots_mut(|slots| {
                for kind in SlotKind::ALL {
                    if let Some(mut unit) = slots.take(kind) {
                        unit.destroy();
                    }
                }
            });
        }
        self.registry.evict(scope);
        self.listener.notify(scope);
        info!(scope, purge, "registration removed");
        Ok(())
    }

    /// Snapshot a registration's slots for display.
    pub async fn describe(
        &self,
        scope: &str,
    ) -> Result<Option<RegistrationStatus>, LifecycleError> {
        let Some(registration) = self.registry.get(&self.store, scope, None).await? else {
            return Ok(None);
        };
        let slots = registration.with_slots(|slots| {
            SlotKind::ALL
                .iter()
                .filter_map(|kind| {
                    slots.get(*kind).map(|unit| SlotView {
                        slot: *kind,
                        unit_id: unit.id.to_string(),
                        url: unit.url.clone(),
                        state: unit.state,
                        content_hash: unit.content_hash.map(|h| h.to_hex()),
                    })
                })
                .collect()
        });
        Ok(Some(RegistrationStatus {
            id: registration.id().to_string(),
            scope: registration.scope().to_string(),
            slots,
        }))
    }

    /// Ingest a fetched body and drive it through install/activate.
    ///
    /// With a comparison unit, byte-identical content is a designed no-op:
    /// the transient row is deleted and no lifecycle event fires. Any
    /// install/activate failure triggers the compensation block before the
    /// primary error is re-raised.
    async fn process_response(
        &self,
        registration: &Arc<Registration>,
        url: &str,
        response: FetchResponse,
        compare: Option<UnitRecord>,
    ) -> Result<(), LifecycleError> {
        // 1. Stream the body into a new units row.
        let mut unit = UnitRecord::new(url, registration.scope(), response.headers);
        let hash = self.store.ingest_body(&unit, response.body).await?;
        unit.content_hash = Some(hash);

        // 2. Dedup against the comparison unit's stored hash.
        if let Some(compare) = &compare {
            let outcome = self
                .store
                .with_conn(|conn| {
                    let stored = ContentStore::select_unit(conn, &compare.id)?
                        .filter(|u| u.state != InstallState::Redundant);
                    match stored {
                        None => {
                            ContentStore::delete_unit(conn, &unit.id)?;
                            Ok(Dedup::TargetGone)
                        }
                        Some(target) if target.content_hash == Some(hash) => {
                            ContentStore::delete_unit(conn, &unit.id)?;
                            Ok(Dedup::Duplicate)
                        }
                        Some(_) => Ok(Dedup::Distinct),
                    }
                })
                .await?;
            match outcome {
                Dedup::Duplicate => {
                    debug!(scope = registration.scope(), %hash, "byte-identical duplicate, skipping install");
                    return Ok(());
                }
                Dedup::TargetGone => return Err(LifecycleError::ComparisonTargetMissing),
                Dedup::Distinct => {}
            }
        }

        // 3. Install, then activate when allowed.
        match self.install_and_maybe_activate(registration, &mut unit).await {
            Ok(()) => Ok(()),
            Err(primary) => {
                // 4. Compensate: the failed unit leaves every slot and is
                // persisted redundant. A secondary failure here is logged,
                // never allowed to mask the primary error.
                unit.destroy();
                registration.with_slots_mut(|slots| {
                    slots.clear_unit(&unit.id);
                });
                let compensation = self
                    .store
                    .with_conn(|conn| {
                        let tx =
                            conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                        ContentStore::update_unit_state(&tx, &unit.id, InstallState::Redundant)?;
                        ContentStore::clear_unit_from_slots(&tx, registration.id(), &unit.id)?;
                        tx.commit()?;
                        Ok(())
                    })
                    .await;
                if let Err(error) = compensation {
                    warn!(%error, unit = %unit.id, "compensating write failed after lifecycle error");
                }
                Err(primary)
            }
        }
    }

    async fn install_and_maybe_activate(
        &self,
        registration: &Registration,
        unit: &mut UnitRecord,
    ) -> Result<(), LifecycleError> {
        let work = self.install(registration, unit).await?;
        let no_active =
            registration.with_slots(|slots| slots.get(SlotKind::Active).is_none());
        if work.skip_waiting || no_active {
            self.activate(registration, unit).await?;
        }
        Ok(())
    }

    /// Move a unit through installing → installed, dispatching the install
    /// event in between and waiting for its extended work.
    async fn install(
        &self,
        registration: &Registration,
        unit: &mut UnitRecord,
    ) -> Result<ExtendedWork, LifecycleError> {
        self.update_state(registration, unit, InstallState::Installing)
            .await?;
        debug!(unit = %unit.id, "dispatching install event");
        let work = self.dispatcher.dispatch(unit, EventKind::Install).await?;
        self.update_state(registration, unit, InstallState::Installed)
            .await?;
        Ok(work)
    }

    /// Move a unit through activating → activated.
    ///
    /// On dispatch failure the previous active unit is fully restored, in
    /// memory and in the store, before the error is re-raised; the failed
    /// unit's own demotion is the caller's compensation.
    async fn activate(
        &self,
        registration: &Registration,
        unit: &mut UnitRecord,
    ) -> Result<(), LifecycleError> {
        let previous =
            registration.with_slots(|slots| slots.get(SlotKind::Active).cloned());
        self.update_state(registration, unit, InstallState::Activating)
            .await?;
        debug!(unit = %unit.id, "dispatching activate event");
        match self.dispatcher.dispatch(unit, EventKind::Activate).await {
            Ok(_work) => {
                self.update_state(registration, unit, InstallState::Activated)
                    .await?;
                Ok(())
            }
            Err(error) => {
                self.restore_active(registration, unit, previous).await;
                Err(error.into())
            }
        }
    }

    /// Persist a unit's new state and assign it to the matching slot,
    /// demoting any displaced different-identity occupant to redundant in
    /// the store and in memory. Store writes commit before the in-memory
    /// projection is updated.
    async fn update_state(
        &self,
        registration: &Registration,
        unit: &mut UnitRecord,
        new_state: InstallState,
    ) -> Result<(), LifecycleError> {
        let Some(slot) = SlotKind::for_state(new_state) else {
            // Downloading occupies no slot; persist the state only.
            self.store
                .with_conn(|conn| ContentStore::update_unit_state(conn, &unit.id, new_state))
                .await?;
            unit.state = new_state;
            return Ok(());
        };

        let displaced_id = registration.with_slots(|slots| {
            slots
                .get(slot)
                .map(|u| u.id.clone())
                .filter(|id| *id != unit.id)
        });

        self.store
            .with_conn(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if let Some(displaced) = &displaced_id {
                    ContentStore::update_unit_state(&tx, displaced, InstallState::Redundant)?;
                    ContentStore::update_registration_slot(
                        &tx,
                        registration.id(),
                        SlotKind::Redundant,
                        Some(displaced),
                    )?;
                }
                ContentStore::update_unit_state(&tx, &unit.id, new_state)?;
                ContentStore::clear_unit_from_slots(&tx, registration.id(), &unit.id)?;
                ContentStore::update_registration_slot(
                    &tx,
                    registration.id(),
                    slot,
                    Some(&unit.id),
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        unit.state = new_state;
        registration.with_slots_mut(|slots| {
            if let Some(displaced) = &displaced_id {
                if let Some(mut demoted) = slots.clear_unit(displaced) {
                    demoted.state = InstallState::Redundant;
                    slots.set(SlotKind::Redundant, demoted);
                }
            }
            slots.clear_unit(&unit.id);
            slots.set(slot, unit.clone());
        });
        debug!(unit = %unit.id, state = %new_state, slot = %slot, "unit state advanced");
        Ok(())
    }

    /// Roll the active slot back to its pre-activation snapshot, restoring
    /// both the in-memory reference and the persisted columns.
    async fn restore_active(
        &self,
        registration: &Registration,
        failed: &UnitRecord,
        previous: Option<UnitRecord>,
    ) {
        registration.with_slots_mut(|slots| {
            slots.clear_unit(&failed.id);
            if let Some(prev) = &previous {
                slots.clear_unit(&prev.id);
                let mut restored = prev.clone();
                restored.state = InstallState::Activated;
                slots.set(SlotKind::Active, restored);
            }
        });

        let result = self
            .store
            .with_conn(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                match &previous {
                    Some(prev) => {
                        ContentStore::update_unit_state(&tx, &prev.id, InstallState::Activated)?;
                        ContentStore::clear_unit_from_slots(&tx, registration.id(), &prev.id)?;
                        ContentStore::update_registration_slot(
                            &tx,
                            registration.id(),
                            SlotKind::Active,
                            Some(&prev.id),
                        )?;
                    }
                    None => {
                        ContentStore::update_registration_slot(
                            &tx,
                            registration.id(),
                            SlotKind::Active,
                            None,
                        )?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await;
        if let Err(error) = result {
            warn!(%error, "activation rollback write failed");
        }
    }
}
