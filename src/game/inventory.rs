//! Arrow Inventories
//!
//! Holders of arrows implement [`ArrowInventory`]. The bow holds one arrow on
//! its string; a [`Quiver`] stores several. Every add goes through the
//! arrow's own `nock`/`quiver` transition so ownership stays exclusive.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::angle::Angle;
use crate::core::vec2::FixedVec2;
use crate::game::arrow::{Arrow, ArrowId};
use crate::game::clock::Tick;
use crate::game::registry::ArrowRegistry;

/// Inventory identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InventoryId(pub u32);

/// Where the next added arrow is placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    /// Position
    pub position: FixedVec2,
    /// Rotation
    pub rotation: Angle,
}

/// Capability of anything that can hold arrows.
pub trait ArrowInventory {
    /// Identity used for arrow ownership.
    fn inventory_id(&self) -> InventoryId;

    /// Take custody of `arrow`. Checks capacity and cooldown first and rolls
    /// back if the arrow refuses the transition.
    fn try_add_arrow(&mut self, arrow: &mut Arrow, tick: Tick) -> bool;

    /// Arrow in `slot`, if any.
    fn arrow_at(&self, slot: usize) -> Option<ArrowId>;

    /// Give up the arrow in `slot`, clearing its ownership.
    fn remove_arrow(&mut self, slot: usize, arrows: &mut ArrowRegistry) -> Option<ArrowId>;

    /// Replace the content of `slot` without any transition; returns the old content.
    fn swap_arrow(&mut self, new_arrow: Option<ArrowId>, slot: usize) -> Option<ArrowId>;

    /// All held arrows.
    fn arrows(&self) -> Vec<ArrowId>;

    /// Placement for the next added arrow.
    fn next_arrow_anchor(&self) -> Anchor;
}

/// Multi-slot arrow storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiver {
    id: InventoryId,
    capacity: usize,
    slots: Vec<ArrowId>,
    position: FixedVec2,
}

impl Quiver {
    /// Empty quiver.
    pub fn new(id: InventoryId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            slots: Vec::with_capacity(capacity),
            position: FixedVec2::ZERO,
        }
    }

    /// Number of stored arrows.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the quiver is empty.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether no more arrows fit.
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Move with the wearer.
    pub fn set_position(&mut self, position: FixedVec2) {
        self.position = position;
    }

    /// Drop ids of arrows that no longer exist.
    pub fn retain_live(&mut self, arrows: &ArrowRegistry) {
        self.slots.retain(|id| arrows.contains(*id));
    }
}

impl ArrowInventory for Quiver {
    fn inventory_id(&self) -> InventoryId {
        self.id
    }

    fn try_add_arrow(&mut self, arrow: &mut Arrow, _tick: Tick) -> bool {
        if self.is_full() || self.slots.contains(&arrow.id()) {
            return false;
        }
        match arrow.quiver(self.id) {
            Ok(()) => {
                self.slots.push(arrow.id());
                true
            }
            Err(e) => {
                debug!(inventory = self.id.0, arrow = arrow.id().0, error = %e, "quiver refused arrow");
                false
            }
        }
    }

    fn arrow_at(&self, slot: usize) -> Option<ArrowId> {
        self.slots.get(slot).copied()
    }

    fn remove_arrow(&mut self, slot: usize, arrows: &mut ArrowRegistry) -> Option<ArrowId> {
        if slot >= self.slots.len() {
            return None;
        }
        let id = self.slots.remove(slot);
        if let Some(arrow) = arrows.get_mut(id) {
            if let Err(e) = arrow.remove_from_inventory(self.id) {
                debug!(inventory = self.id.0, arrow = id.0, error = %e, "quiver held arrow it did not own");
            }
        }
        Some(id)
    }

    fn swap_arrow(&mut self, new_arrow: Option<ArrowId>, slot: usize) -> Option<ArrowId> {
        match (slot < self.slots.len(), new_arrow) {
            (true, Some(new)) => Some(std::mem::replace(&mut self.slots[slot], new)),
            (true, None) => Some(self.slots.remove(slot)),
            (false, Some(new)) if !self.is_full() => {
                self.slots.push(new);
                None
            }
            _ => None,
        }
    }

    fn arrows(&self) -> Vec<ArrowId> {
        self.slots.clone()
    }

    fn next_arrow_anchor(&self) -> Anchor {
        Anchor {
            position: self.position,
            rotation: Angle::UP,
        }
    }
}
