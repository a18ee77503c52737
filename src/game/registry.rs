//! Live Arrow Registry
//!
//! Arena of every live arrow, keyed by stable ids handed out in spawn order.
//! Iteration is in id order, which is also registry order for the collector.
//! Spawn and despawn happen on the authority; clients insert mirrors.

use std::collections::BTreeMap;
use tracing::debug;

use crate::core::hash::StateHasher;
use crate::core::vec2::FixedVec2;
use crate::game::arrow::{Arrow, ArrowId, ArrowKind, ArrowState, ArrowView};
use crate::game::physics::Aabb;

/// Arena of live arrows.
#[derive(Clone, Debug, Default)]
pub struct ArrowRegistry {
    arrows: BTreeMap<ArrowId, Arrow>,
    next_id: u32,
}

impl ArrowRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an unowned arrow in the Quiver state.
    pub fn spawn(&mut self, kind: ArrowKind, position: FixedVec2) -> ArrowId {
        let id = ArrowId(self.next_id);
        self.next_id += 1;
        self.arrows.insert(id, Arrow::new(id, kind, position));
        debug!(arrow = id.0, ?kind, "registry insert");
        id
    }

    /// Insert or update a mirror from an observed view.
    pub fn upsert_mirror(&mut self, view: &ArrowView) {
        match self.arrows.get_mut(&view.id) {
            Some(arrow) => arrow.sync(view),
            None => {
                self.arrows.insert(view.id, Arrow::from_view(view));
                self.next_id = self.next_id.max(view.id.0 + 1);
            }
        }
    }

    /// Remove an arrow.
    pub fn despawn(&mut self, id: ArrowId) -> Option<Arrow> {
        let arrow = self.arrows.remove(&id);
        if arrow.is_some() {
            debug!(arrow = id.0, "registry remove");
        }
        arrow
    }

    /// Despawn loose arrows (Flight or Stuck) outside `bounds`.
    pub fn despawn_out_of_bounds(&mut self, bounds: &Aabb) -> Vec<ArrowId> {
        let gone: Vec<ArrowId> = self
            .arrows
            .values()
            .filter(|a| matches!(a.state(), ArrowState::Flight | ArrowState::Stuck))
            .filter(|a| !bounds.contains(a.position()))
            .map(|a| a.id())
            .collect();
        for id in &gone {
            self.despawn(*id);
        }
        gone
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: ArrowId) -> bool {
        self.arrows.contains_key(&id)
    }

    /// Borrow an arrow.
    pub fn get(&self, id: ArrowId) -> Option<&Arrow> {
        self.arrows.get(&id)
    }

    /// Mutably borrow an arrow.
    pub fn get_mut(&mut self, id: ArrowId) -> Option<&mut Arrow> {
        self.arrows.get_mut(&id)
    }

    /// Arrows in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &Arrow> {
        self.arrows.values()
    }

    /// Mutable arrows in registry order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Arrow> {
        self.arrows.values_mut()
    }

    /// Live ids in registry order.
    pub fn ids(&self) -> Vec<ArrowId> {
        self.arrows.keys().copied().collect()
    }

    /// Number of live arrows.
    pub fn len(&self) -> usize {
        self.arrows.len()
    }

    /// Whether no arrows are live.
    pub fn is_empty(&self) -> bool {
        self.arrows.is_empty()
    }

    /// Hash every arrow in registry order.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.arrows.len() as u32);
        for arrow in self.arrows.values() {
            arrow.hash_into(hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::game::inventory::InventoryId;

    #[test]
    fn test_spawn_ids_are_monotonic() {
        let mut r = ArrowRegistry::new();
        let a = r.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        let b = r.spawn(ArrowKind::Poison, FixedVec2::ZERO);
        r.despawn(a);
        let c = r.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        assert!(a < b && b < c);
        assert_eq!(r.ids(), vec![b, c]);
        assert_eq!(r.get(b).map(|x| x.state()), Some(ArrowState::Quiver));
    }

    #[test]
    fn test_out_of_bounds_only_loose_arrows() {
        let mut r = ArrowRegistry::new();
        let bounds = Aabb::from_center(FixedVec2::ZERO, FixedVec2::from_ints(10, 10));
        let held = r.spawn(ArrowKind::Normal, FixedVec2::from_ints(50, 0));
        let loose = r.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        {
            let arrow = r.get_mut(loose).expect("loose");
            arrow.nock(InventoryId(1)).expect("nock");
            arrow
                .release(InventoryId(1), FixedVec2::from_ints(0, -20), FixedVec2::ZERO, BTreeSet::new())
                .expect("release");
        }

        assert_eq!(r.despawn_out_of_bounds(&bounds), vec![loose]);
        assert!(r.contains(held));
        assert!(!r.contains(loose));
    }

    #[test]
    fn test_mirror_upsert() {
        let mut server = ArrowRegistry::new();
        let id = server.spawn(ArrowKind::Poison, FixedVec2::from_ints(1, 2));
        let view = server.get(id).expect("arrow").view();

        let mut client = ArrowRegistry::new();
        client.upsert_mirror(&view);
        client.upsert_mirror(&view);
        assert_eq!(client.len(), 1);
        assert_eq!(client.get(id).map(|a| a.view()), Some(view));
    }
}
