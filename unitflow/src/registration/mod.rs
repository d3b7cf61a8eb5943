//! Registration: the durable binding from a scope to its unit slots.
//!
//! A registration owns four mutually exclusive slots (`installing`,
//! `waiting`, `active`, `redundant`), each holding at most one unit. Slot
//! assignment is table-driven: [`SlotKind::for_state`] maps an install
//! state to its slot, and a single displacement routine handles eviction,
//! so there is exactly one place where "placing a unit demotes the prior
//! occupant" lives.
//!
//! The in-memory object is a cached projection; the content store is the
//! source of truth. [`registry::RegistrationRegistry`] guarantees at most
//! one live object per scope while any owner holds it.

mod registry;

pub use registry::RegistrationRegistry;

use parking_lot::Mutex;

use crate::store::RegistrationRow;
use crate::unit::{InstallState, UnitId, UnitRecord};

/// The four reference slots of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Installing,
    Waiting,
    Active,
    Redundant,
}

impl SlotKind {
    pub const ALL: [SlotKind; 4] = [
        SlotKind::Installing,
        SlotKind::Waiting,
        SlotKind::Active,
        SlotKind::Redundant,
    ];

    /// Slot a unit belongs in once it reaches `state`.
    ///
    /// `Downloading` units occupy no slot yet.
    pub fn for_state(state: InstallState) -> Option<SlotKind> {
        match state {
            InstallState::Downloading => None,
            InstallState::Installing => Some(SlotKind::Installing),
            InstallState::Installed => Some(SlotKind::Waiting),
            InstallState::Activating | InstallState::Activated => Some(SlotKind::Active),
            InstallState::Redundant => Some(SlotKind::Redundant),
        }
    }

    /// Matching `registrations` column name.
    pub fn column(self) -> &'static str {
        match self {
            SlotKind::Installing => "installing",
            SlotKind::Waiting => "waiting",
            SlotKind::Active => "active",
            SlotKind::Redundant => "redundant",
        }
    }

    fn index(self) -> usize {
        match self {
            SlotKind::Installing => 0,
            SlotKind::Waiting => 1,
            SlotKind::Active => 2,
            SlotKind::Redundant => 3,
        }
    }
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Enum-indexed table of slot occupants.
#[derive(Debug, Default)]
pub struct Slots([Option<UnitRecord>; 4]);

impl Slots {
    pub fn get(&self, kind: SlotKind) -> Option<&UnitRecord> {
        self.0[kind.index()].as_ref()
    }

    /// Place a unit, returning the displaced different-identity occupant.
    ///
    /// Re-placing the same identity (by id) is not an eviction; the old
    /// copy is simply replaced with the updated one.
    pub fn set(&mut self, kind: SlotKind, unit: UnitRecord) -> Option<UnitRecord> {
        let slot = &mut self.0[kind.index()];
        let displaced = match slot.take() {
            Some(prior) if prior.id != unit.id => Some(prior),
            _ => None,
        };
        *slot = Some(unit);
        displaced
    }

    pub fn take(&mut self, kind: SlotKind) -> Option<UnitRecord> {
        self.0[kind.index()].take()
    }

    /// Remove `unit` from whichever slot currently holds it.
    pub fn clear_unit(&mut self, id: &UnitId) -> Option<UnitRecord> {
        for slot in &mut self.0 {
            if slot.as_ref().is_some_and(|u| u.id == *id) {
                return slot.take();
            }
        }
        None
    }

    /// Which slot holds `id`, if any.
    pub fn holding(&self, id: &UnitId) -> Option<SlotKind> {
        SlotKind::ALL
            .into_iter()
            .find(|kind| self.get(*kind).is_some_and(|u| u.id == *id))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

struct RegistrationState {
    slots: Slots,
    unregistered: bool,
}

/// Live registration object for one scope.
///
/// Shared as `Arc<Registration>`; the inner state is mutex-guarded and the
/// guard is never held across an await point.
pub struct Registration {
    id: String,
    scope: String,
    state: Mutex<RegistrationState>,
}

impl Registration {
    /// Create an empty registration (fresh row just inserted).
    pub fn new(id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: scope.into(),
            state: Mutex::new(RegistrationState {
                slots: Slots::default(),
                unregistered: false,
            }),
        }
    }

    /// Materialize from a stored row plus the units its slots reference.
    pub fn from_row(row: RegistrationRow, mut units: Vec<UnitRecord>) -> Self {
        let registration = Self::new(row.id.clone(), row.scope.clone());
        {
            let mut state = registration.state.lock();
            for kind in SlotKind::ALL {
                if let Some(unit_id) = row.slot_id(kind) {
                    if let Some(pos) = units.iter().position(|u| u.id.as_str() == unit_id) {
                        state.slots.set(kind, units.swap_remove(pos));
                    }
                }
            }
        }
        registration
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Read-only access to the slots.
    pub fn with_slots<T>(&self, body: impl FnOnce(&Slots) -> T) -> T {
        body(&self.state.lock().slots)
    }

    /// Mutable access to the slots.
    pub fn with_slots_mut<T>(&self, body: impl FnOnce(&mut Slots) -> T) -> T {
        body(&mut self.state.lock().slots)
    }

    pub fn is_unregistered(&self) -> bool {
        self.state.lock().unregistered
    }

    pub(crate) fn mark_unregistered(&self) {
        self.state.lock().unregistered = true;
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .field("unregistered", &state.unregistered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Headers;

    fn unit(scope: &str) -> UnitRecord {
        UnitRecord::new(format!("{scope}worker.js"), scope, Headers::new())
    }

    #[test]
    fn test_for_state_table() {
        assert_eq!(SlotKind::for_state(InstallState::Downloading), None);
        assert_eq!(
            SlotKind::for_state(InstallState::Installing),
            Some(SlotKind::Installing)
        );
        assert_eq!(
            SlotKind::for_state(InstallState::Installed),
            Some(SlotKind::Waiting)
        );
        assert_eq!(
            SlotKind::for_state(InstallState::Activating),
            Some(SlotKind::Active)
        );
        assert_eq!(
            SlotKind::for_state(InstallState::Activated),
            Some(SlotKind::Active)
        );
        assert_eq!(
            SlotKind::for_state(InstallState::Redundant),
            Some(SlotKind::Redundant)
        );
    }

    #[test]
    fn test_set_displaces_different_identity_only() {
        let mut slots = Slots::default();
        let first = unit("https://a/");
        let second = unit("https://a/");

        assert!(slots.set(SlotKind::Waiting, first.clone()).is_none());

        // Same identity re-placed: no displacement.
        let mut updated = first.clone();
        updated.state = InstallState::Installed;
        assert!(slots.set(SlotKind::Waiting, updated).is_none());

        // Different identity: prior occupant comes back out.
        let displaced = slots.set(SlotKind::Waiting, second.clone()).expect("displaced");
        assert_eq!(displaced.id, first.id);
        assert_eq!(slots.get(SlotKind::Waiting).map(|u| u.id.clone()), Some(second.id));
    }

    #[test]
    fn test_clear_unit_scans_all_slots() {
        let mut slots = Slots::default();
        let a = unit("https://a/");
        let b = unit("https://a/");
        slots.set(SlotKind::Active, a.clone());
        slots.set(SlotKind::Waiting, b.clone());

        assert_eq!(slots.holding(&b.id), Some(SlotKind::Waiting));
        let removed = slots.clear_unit(&b.id).expect("removed");
        assert_eq!(removed.id, b.id);
        assert_eq!(slots.holding(&b.id), None);
        assert_eq!(slots.holding(&a.id), Some(SlotKind::Active));
        assert!(slots.clear_unit(&b.id).is_none());
    }

    #[test]
    fn test_from_row_materializes_slots() {
        let mut active = unit("https://a/");
        active.state = InstallState::Activated;
        let mut waiting = unit("https://a/");
        waiting.state = InstallState::Installed;

        let row = crate::store::RegistrationRow {
            id: "reg-1".into(),
            scope: "https://a/".into(),
            active: Some(active.id.as_str().to_string()),
            waiting: Some(waiting.id.as_str().to_string()),
            installing: None,
            redundant: None,
        };
        let registration =
            Registration::from_row(row, vec![waiting.clone(), active.clone()]);

        registration.with_slots(|slots| {
            assert_eq!(slots.get(SlotKind::Active).map(|u| u.id.clone()), Some(active.id.clone()));
            assert_eq!(
                slots.get(SlotKind::Waiting).map(|u| u.id.clone()),
                Some(waiting.id.clone())
            );
            assert!(slots.get(SlotKind::Installing).is_none());
        });
        assert!(!registration.is_unregistered());
    }
}
