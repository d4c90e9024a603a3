//! Unit-identifier registry.
//!
//! Maps a stable unit number to the manager instance that owns it. Managers
//! reserve a unit at construction, bind themselves once started, and hand
//! the unit back when destroyed. The character-device switch resolves
//! incoming identifiers here and nowhere else.
//!
//! The registry holds [`Weak`] references, so a bound slot never keeps its
//! manager alive.

use std::sync::{Arc, Weak};

use crate::sync::{Mutex, lock};

/// Per-unit slot state.
enum Slot<T: ?Sized> {
    /// Available for assignment.
    Free,
    /// Assigned, but not yet (or no longer) bound to a live instance.
    Reserved,
    /// Bound to an instance.
    Bound(Weak<T>),
}

/// Growable table of unit slots.
pub struct DeviceRegistry<T: ?Sized> {
    slots: Mutex<Vec<Slot<T>>>,
    growth: usize,
}

impl<T: ?Sized> DeviceRegistry<T> {
    /// Creates an empty registry that grows by `growth` slots at a time.
    #[must_use]
    pub fn new(growth: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            growth: growth.max(1),
        }
    }

    /// Reserves the lowest free unit, growing the table when none is free.
    ///
    /// Returns `None` only if the table cannot grow.
    pub fn assign_id(&self) -> Option<u32> {
        let mut slots = lock(&self.slots);
        let index = match slots.iter().position(|s| matches!(s, Slot::Free)) {
            Some(index) => index,
            None => {
                let index = slots.len();
                slots.try_reserve(self.growth).ok()?;
                slots.extend((0..self.growth).map(|_| Slot::Free));
                log::debug!("DeviceRegistry: grew to {} slots", slots.len());
                index
            }
        };
        let unit = u32::try_from(index).ok()?;
        slots[index] = Slot::Reserved;
        Some(unit)
    }

    /// Binds (`Some`) or unbinds (`None`) an instance.
    ///
    /// Binding requires the slot to be reserved; unbinding requires it to be
    /// bound. Returns `false` when the slot is not in the required state.
    pub fn register(&self, unit: u32, instance: Option<&Arc<T>>) -> bool {
        let mut slots = lock(&self.slots);
        let Some(slot) = slot_index(unit).and_then(|i| slots.get_mut(i)) else {
            return false;
        };
        match instance {
            Some(instance) if matches!(slot, Slot::Reserved) => {
                *slot = Slot::Bound(Arc::downgrade(instance));
                true
            }
            None if matches!(slot, Slot::Bound(_)) => {
                *slot = Slot::Reserved;
                true
            }
            _ => false,
        }
    }

    /// Returns the live instance bound to `unit`, if any.
    pub fn resolve(&self, unit: u32) -> Option<Arc<T>> {
        let slots = lock(&self.slots);
        match slots.get(slot_index(unit)?)? {
            Slot::Bound(weak) => weak.upgrade(),
            _ => None,
        }
    }

    /// Returns a reserved unit to the free pool.
    ///
    /// Returns `false` if the slot was not reserved.
    pub fn release(&self, unit: u32) -> bool {
        let mut slots = lock(&self.slots);
        match slot_index(unit).and_then(|i| slots.get_mut(i)) {
            Some(slot) if matches!(slot, Slot::Reserved) => {
                *slot = Slot::Free;
                true
            }
            _ => false,
        }
    }

    /// Current table capacity in slots.
    pub fn capacity(&self) -> usize {
        lock(&self.slots).len()
    }
}

fn slot_index(unit: u32) -> Option<usize> {
    usize::try_from(unit).ok()
}
