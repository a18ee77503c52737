//! Arrow Collector
//!
//! Proximity pickup. Once per tick on the authority, each collector looks at
//! every live arrow in registry order and offers the claimable ones to its
//! inventories in priority order. The first inventory that accepts wins.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::fixed::{Fixed, from_int};
use crate::core::vec2::FixedVec2;
use crate::game::arrow::{ArrowId, ArrowState};
use crate::game::clock::Tick;
use crate::game::inventory::{ArrowInventory, InventoryId};
use crate::game::registry::ArrowRegistry;

/// Collector tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Pickup radius around the collector
    pub range: Fixed,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { range: from_int(2) }
    }
}

/// A successful pickup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Claim {
    /// Arrow picked up
    pub arrow: ArrowId,
    /// Inventory now holding it
    pub inventory: InventoryId,
}

/// Proximity scanner attached to an archer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collector {
    config: CollectorConfig,
    position: FixedVec2,
}

impl Collector {
    /// Collector at the origin.
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            position: FixedVec2::ZERO,
        }
    }

    /// Move with the wearer.
    pub fn set_position(&mut self, position: FixedVec2) {
        self.position = position;
    }

    /// Center of the scan.
    pub fn position(&self) -> FixedVec2 {
        self.position
    }

    /// Pickup radius.
    pub fn range(&self) -> Fixed {
        self.config.range
    }

    /// Whether an arrow at `position` is within reach.
    #[inline]
    pub fn in_range(&self, position: FixedVec2) -> bool {
        self.position.distance(position) <= self.config.range
    }

    /// One pass: offer every stuck, pickable arrow in range to `inventories`
    /// in order. Each arrow is claimed at most once.
    pub fn scan(
        &self,
        arrows: &mut ArrowRegistry,
        inventories: &mut [&mut dyn ArrowInventory],
        tick: Tick,
    ) -> Vec<Claim> {
        let candidates: Vec<ArrowId> = arrows
            .iter()
            .filter(|a| a.state() == ArrowState::Stuck && a.can_be_picked_up())
            .filter(|a| self.in_range(a.position()))
            .map(|a| a.id())
            .collect();

        let mut claims = Vec::new();
        for id in candidates {
            let Some(arrow) = arrows.get_mut(id) else {
                continue;
            };
            for inventory in inventories.iter_mut() {
                if inventory.try_add_arrow(arrow, tick) {
                    let claim = Claim { arrow: id, inventory: inventory.inventory_id() };
                    debug!(arrow = id.0, inventory = claim.inventory.0, tick, "arrow collected");
                    claims.push(claim);
                    break;
                }
            }
        }
        claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::core::fixed::FIXED_ONE;
    use crate::game::arrow::{ArrowConfig, ArrowKind};
    use crate::game::bow::{Bow, BowConfig};
    use crate::game::damageable::DamageableId;
    use crate::game::inventory::Quiver;
    use crate::game::physics::{ColliderId, ColliderKind, Contact};

    const SHOOTER: InventoryId = InventoryId(50);

    fn stick(registry: &mut ArrowRegistry, at: FixedVec2, kind: ColliderKind) -> ArrowId {
        let id = registry.spawn(ArrowKind::Normal, at);
        let arrow = registry.get_mut(id).expect("arrow");
        arrow.nock(SHOOTER).expect("nock");
        arrow.release(SHOOTER, at, FixedVec2::from_ints(5, 0), BTreeSet::new()).expect("release");
        let contact = Contact {
            collider: ColliderId(1),
            kind,
            relative_velocity: FixedVec2::from_ints(5, 0),
            target_mass: FIXED_ONE,
            collider_position: at,
        };
        arrow.on_contact_begin(&contact, &ArrowConfig::default()).expect("impact");
        id
    }

    #[test]
    fn test_scan_filters_state_range_and_pickup_gate() {
        let mut registry = ArrowRegistry::new();
        let near = stick(&mut registry, FixedVec2::from_ints(1, 0), ColliderKind::Surface);
        let far = stick(&mut registry, FixedVec2::from_ints(10, 0), ColliderKind::Surface);
        let in_body = stick(&mut registry, FixedVec2::ZERO, ColliderKind::Damageable(DamageableId(3)));
        let loose = registry.spawn(ArrowKind::Normal, FixedVec2::ZERO);

        let collector = Collector::new(CollectorConfig::default());
        let mut quiver = Quiver::new(InventoryId(2), 8);
        let claims = collector.scan(&mut registry, &mut [&mut quiver], 0);

        assert_eq!(claims, vec![Claim { arrow: near, inventory: InventoryId(2) }]);
        assert_eq!(quiver.arrows(), vec![near]);
        for id in [far, in_body] {
            assert_eq!(registry.get(id).map(|a| a.state()), Some(ArrowState::Stuck));
        }
        assert_eq!(registry.get(loose).map(|a| a.owner()), Some(None));
    }

    #[test]
    fn test_bow_first_then_quiver_in_registry_order() {
        let mut registry = ArrowRegistry::new();
        let first = stick(&mut registry, FixedVec2::ZERO, ColliderKind::Surface);
        let second = stick(&mut registry, FixedVec2::ZERO, ColliderKind::Surface);

        let collector = Collector::new(CollectorConfig::default());
        let mut bow = Bow::new(InventoryId(1), BowConfig::default());
        let mut quiver = Quiver::new(InventoryId(2), 8);
        let claims = collector.scan(&mut registry, &mut [&mut bow, &mut quiver], 0);

        assert_eq!(claims.len(), 2);
        assert_eq!(bow.slot(), Some(first));
        assert_eq!(quiver.arrows(), vec![second]);
        assert_eq!(registry.get(first).map(|a| a.state()), Some(ArrowState::Nock));
        assert_eq!(registry.get(second).map(|a| a.state()), Some(ArrowState::Quiver));
    }

    #[test]
    fn test_two_collectors_first_claim_wins() {
        let mut registry = ArrowRegistry::new();
        let id = stick(&mut registry, FixedVec2::ZERO, ColliderKind::Surface);

        let collector = Collector::new(CollectorConfig::default());
        let mut a = Quiver::new(InventoryId(1), 4);
        let mut b = Quiver::new(InventoryId(2), 4);
        assert_eq!(collector.scan(&mut registry, &mut [&mut a], 0).len(), 1);
        // Already held, no longer Stuck
        assert!(collector.scan(&mut registry, &mut [&mut b], 0).is_empty());
        assert_eq!(registry.get(id).and_then(|x| x.owner()), Some(InventoryId(1)));
    }

    #[test]
    fn test_full_inventories_leave_arrow_stuck() {
        let mut registry = ArrowRegistry::new();
        let id = stick(&mut registry, FixedVec2::ZERO, ColliderKind::Surface);
        let collector = Collector::new(CollectorConfig::default());
        let mut quiver = Quiver::new(InventoryId(2), 0);
        assert!(collector.scan(&mut registry, &mut [&mut quiver], 0).is_empty());
        assert_eq!(registry.get(id).map(|a| a.state()), Some(ArrowState::Stuck));
    }
}
