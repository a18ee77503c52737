//! Physics Capabilities
//!
//! The rigid-body engine is an external collaborator. The simulation only
//! consumes two capabilities from it:
//!
//! - [`GroundQuery`]: raycasts for ground, grip and ramp checks
//! - contact begin/end events carrying collider identity and relative velocity
//!
//! [`Terrain`] and [`ContactTracker`] are small deterministic stand-ins for
//! both, used by the world, the demo and the tests.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::fixed::{Fixed, fixed_div, fixed_mul, FIXED_ONE};
use crate::core::vec2::FixedVec2;
use crate::game::damageable::DamageableId;

// =============================================================================
// COLLIDERS
// =============================================================================

/// Collider identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColliderId(pub u32);

/// What a collider is, as far as an arrow cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColliderKind {
    /// Static surface an arrow embeds in.
    Surface,
    /// Creature or target with health.
    Damageable(DamageableId),
    /// Anything else; never stops an arrow.
    Passive,
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aabb {
    /// Lower-left corner
    pub min: FixedVec2,
    /// Upper-right corner
    pub max: FixedVec2,
}

impl Aabb {
    /// Box from center and half extents.
    pub fn from_center(center: FixedVec2, half_extents: FixedVec2) -> Self {
        Self {
            min: center.sub(half_extents),
            max: center.add(half_extents),
        }
    }

    /// Center point.
    pub fn center(&self) -> FixedVec2 {
        FixedVec2::new(
            self.min.x.wrapping_add(self.max.x) >> 1,
            self.min.y.wrapping_add(self.max.y) >> 1,
        )
    }

    /// Half extents.
    pub fn half_extents(&self) -> FixedVec2 {
        FixedVec2::new(
            self.max.x.wrapping_sub(self.min.x) >> 1,
            self.max.y.wrapping_sub(self.min.y) >> 1,
        )
    }

    /// Point containment (inclusive).
    #[inline]
    pub fn contains(&self, p: FixedVec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Same box moved so its center is at `center`.
    pub fn recentered(&self, center: FixedVec2) -> Self {
        Self::from_center(center, self.half_extents())
    }
}

/// A collider the contact tracker tests arrows against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collider {
    /// Identity
    pub id: ColliderId,
    /// Kind
    pub kind: ColliderKind,
    /// Current bounds
    pub bounds: Aabb,
    /// Current velocity (for relative velocity on contact)
    pub velocity: FixedVec2,
    /// Mass used for knockback
    pub mass: Fixed,
}

impl Collider {
    /// Static surface collider.
    pub fn surface(id: ColliderId, bounds: Aabb) -> Self {
        Self {
            id,
            kind: ColliderKind::Surface,
            bounds,
            velocity: FixedVec2::ZERO,
            mass: 0,
        }
    }
}

/// Contact-begin data delivered to an arrow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contact {
    /// Collider touched
    pub collider: ColliderId,
    /// Its kind
    pub kind: ColliderKind,
    /// Arrow velocity minus collider velocity
    pub relative_velocity: FixedVec2,
    /// Collider mass (0 for immovable)
    pub target_mass: Fixed,
    /// Collider center when contact began
    pub collider_position: FixedVec2,
}

/// Contact event for one tracked body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContactEvent<K> {
    /// Body started touching a collider.
    Begin {
        /// Tracked body
        body: K,
        /// Contact data
        contact: Contact,
    },
    /// Body stopped touching a collider.
    End {
        /// Tracked body
        body: K,
        /// Collider released
        collider: ColliderId,
    },
}

/// Overlap tracker turning per-tick point/box tests into begin/end events.
#[derive(Clone, Debug)]
pub struct ContactTracker<K: Ord + Copy> {
    touching: BTreeSet<(K, ColliderId)>,
}

impl<K: Ord + Copy> Default for ContactTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Copy> ContactTracker<K> {
    /// Empty tracker.
    pub fn new() -> Self {
        Self { touching: BTreeSet::new() }
    }

    /// Test every body point against every collider.
    ///
    /// `bodies` yields (key, point, velocity). Events come out ordered by
    /// body key, then collider id; ends before begins for the same body.
    pub fn update<I>(&mut self, bodies: I, colliders: &[Collider]) -> Vec<ContactEvent<K>>
    where
        I: IntoIterator<Item = (K, FixedVec2, FixedVec2)>,
    {
        let mut now: BTreeSet<(K, ColliderId)> = BTreeSet::new();
        let mut begins = Vec::new();
        let mut seen_bodies = BTreeSet::new();

        for (body, point, velocity) in bodies {
            seen_bodies.insert(body);
            for collider in colliders {
                if !collider.bounds.contains(point) {
                    continue;
                }
                now.insert((body, collider.id));
                if !self.touching.contains(&(body, collider.id)) {
                    begins.push(ContactEvent::Begin {
                        body,
                        contact: Contact {
                            collider: collider.id,
                            kind: collider.kind,
                            relative_velocity: velocity.sub(collider.velocity),
                            target_mass: collider.mass,
                            collider_position: collider.bounds.center(),
                        },
                    });
                }
            }
        }

        let mut events: Vec<ContactEvent<K>> = self
            .touching
            .difference(&now)
            .filter(|(body, _)| seen_bodies.contains(body))
            .map(|&(body, collider)| ContactEvent::End { body, collider })
            .collect();
        events.extend(begins);

        // Bodies that disappeared just drop their contacts
        self.touching = now;
        events
    }

    /// Forget all contacts of a body.
    pub fn forget(&mut self, body: K) {
        self.touching.retain(|(b, _)| *b != body);
    }

    /// Number of live contacts.
    pub fn len(&self) -> usize {
        self.touching.len()
    }

    /// Whether no contacts are live.
    pub fn is_empty(&self) -> bool {
        self.touching.is_empty()
    }
}

// =============================================================================
// GROUND QUERIES
// =============================================================================

/// Raycast result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayHit {
    /// Hit point
    pub point: FixedVec2,
    /// Unit surface normal facing the ray origin
    pub normal: FixedVec2,
    /// Distance from origin along the ray
    pub distance: Fixed,
}

/// Raycast capability used by locomotion for ground, grip and ramp checks.
pub trait GroundQuery {
    /// Cast from `origin` along unit `direction` up to `max_distance`.
    fn raycast(&self, origin: FixedVec2, direction: FixedVec2, max_distance: Fixed) -> Option<RayHit>;
}

/// A terrain edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Start point
    pub a: FixedVec2,
    /// End point
    pub b: FixedVec2,
}

impl Segment {
    /// Segment between two points.
    pub const fn new(a: FixedVec2, b: FixedVec2) -> Self {
        Self { a, b }
    }

    fn raycast(&self, origin: FixedVec2, dir: FixedVec2, max_distance: Fixed) -> Option<RayHit> {
        let edge = self.b.sub(self.a);
        let denom = dir.cross(edge);
        if denom == 0 {
            return None; // parallel
        }
        let to_a = self.a.sub(origin);
        let t = fixed_div(to_a.cross(edge), denom);
        let u = fixed_div(to_a.cross(dir), denom);
        if t < 0 || t > max_distance || !(0..=FIXED_ONE).contains(&u) {
            return None;
        }

        let mut normal = edge.perpendicular().normalize();
        if normal.dot(dir) > 0 {
            normal = normal.negate();
        }
        Some(RayHit {
            point: origin.add(dir.scale(t)),
            normal,
            distance: t,
        })
    }
}

/// Static line-segment terrain.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Terrain {
    segments: Vec<Segment>,
}

impl Terrain {
    /// Terrain from segments.
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Flat floor at height `y` spanning `[min_x, max_x]`.
    pub fn flat(y: Fixed, min_x: Fixed, max_x: Fixed) -> Self {
        Self::new(vec![Segment::new(
            FixedVec2::new(min_x, y),
            FixedVec2::new(max_x, y),
        )])
    }

    /// Append a segment.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// All segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Surface colliders enclosing each segment, `thickness` deep.
    pub fn surface_colliders(&self, first_id: u32, thickness: Fixed) -> Vec<Collider> {
        self.segments
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let min = FixedVec2::new(s.a.x.min(s.b.x), s.a.y.min(s.b.y).wrapping_sub(thickness));
                let max = FixedVec2::new(s.a.x.max(s.b.x), s.a.y.max(s.b.y));
                Collider::surface(ColliderId(first_id + i as u32), Aabb { min, max })
            })
            .collect()
    }
}

impl GroundQuery for Terrain {
    fn raycast(&self, origin: FixedVec2, direction: FixedVec2, max_distance: Fixed) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for segment in &self.segments {
            if let Some(hit) = segment.raycast(origin, direction, max_distance) {
                // Strictly closer wins; ties keep the earlier segment
                if best.map_or(true, |b| hit.distance < b.distance) {
                    best = Some(hit);
                }
            }
        }
        best
    }
}

/// Relative-velocity knockback scaled by mass ratio.
///
/// `impulse = relative_velocity * (arrow_mass / target_mass) * scale`,
/// optionally limited to the incoming relative speed.
pub fn knockback_impulse(
    relative_velocity: FixedVec2,
    arrow_mass: Fixed,
    target_mass: Fixed,
    scale: Fixed,
    clamp_to_relative_speed: bool,
) -> FixedVec2 {
    if target_mass <= 0 {
        return FixedVec2::ZERO;
    }
    let ratio = fixed_div(arrow_mass, target_mass);
    let impulse = relative_velocity.scale(fixed_mul(ratio, scale));
    if clamp_to_relative_speed {
        impulse.clamp_length(relative_velocity.length())
    } else {
        impulse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{from_int, to_fixed};

    fn floor() -> Terrain {
        Terrain::flat(0, from_int(-10), from_int(10))
    }

    #[test]
    fn test_raycast_hits_floor() {
        let hit = floor()
            .raycast(FixedVec2::from_ints(2, 3), FixedVec2::DOWN, from_int(5))
            .expect("floor below");
        assert_eq!(hit.distance, from_int(3));
        assert_eq!(hit.point, FixedVec2::from_ints(2, 0));
        assert_eq!(hit.normal, FixedVec2::UP);
    }

    #[test]
    fn test_raycast_misses() {
        let t = floor();
        // Too short
        assert!(t.raycast(FixedVec2::from_ints(0, 3), FixedVec2::DOWN, from_int(2)).is_none());
        // Off the end
        assert!(t.raycast(FixedVec2::from_ints(20, 3), FixedVec2::DOWN, from_int(5)).is_none());
        // Pointing away
        assert!(t.raycast(FixedVec2::from_ints(0, 3), FixedVec2::UP, from_int(5)).is_none());
        // Parallel
        assert!(t.raycast(FixedVec2::from_ints(-20, 0), FixedVec2::RIGHT, from_int(50)).is_none());
    }

    #[test]
    fn test_raycast_picks_nearest() {
        let mut t = floor();
        t.push(Segment::new(FixedVec2::from_ints(-1, 2), FixedVec2::from_ints(1, 2)));
        let hit = t
            .raycast(FixedVec2::from_ints(0, 5), FixedVec2::DOWN, from_int(10))
            .expect("ledge below");
        assert_eq!(hit.distance, from_int(3));
    }

    #[test]
    fn test_slope_normal() {
        let t = Terrain::new(vec![Segment::new(
            FixedVec2::from_ints(0, 0),
            FixedVec2::from_ints(4, 4),
        )]);
        let hit = t
            .raycast(FixedVec2::from_ints(2, 5), FixedVec2::DOWN, from_int(10))
            .expect("slope below");
        // Normal of a 45° slope points up-left
        assert!(hit.normal.x < 0 && hit.normal.y > 0);
        assert!((hit.distance - from_int(3)).abs() < 16);
    }

    #[test]
    fn test_contact_tracker_begin_end() {
        let colliders = vec![Collider::surface(
            ColliderId(1),
            Aabb::from_center(FixedVec2::ZERO, FixedVec2::from_ints(1, 1)),
        )];
        let mut tracker: ContactTracker<u32> = ContactTracker::new();
        let v = FixedVec2::from_ints(5, 0);

        let events = tracker.update(vec![(7, FixedVec2::from_ints(-3, 0), v)], &colliders);
        assert!(events.is_empty());

        let events = tracker.update(vec![(7, FixedVec2::ZERO, v)], &colliders);
        assert_eq!(events.len(), 1);
        match events[0] {
            ContactEvent::Begin { body, contact } => {
                assert_eq!(body, 7);
                assert_eq!(contact.collider, ColliderId(1));
                assert_eq!(contact.relative_velocity, v);
            }
            _ => panic!("expected begin"),
        }

        // Staying inside is not a new contact
        assert!(tracker.update(vec![(7, FixedVec2::ZERO, v)], &colliders).is_empty());

        let events = tracker.update(vec![(7, FixedVec2::from_ints(3, 0), v)], &colliders);
        assert_eq!(events, vec![ContactEvent::End { body: 7, collider: ColliderId(1) }]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_knockback_clamp() {
        let rel = FixedVec2::from_ints(10, 0);
        // Light target: unclamped impulse exceeds the incoming speed
        let raw = knockback_impulse(rel, FIXED_ONE, to_fixed(0.5), FIXED_ONE, false);
        assert_eq!(raw, FixedVec2::from_ints(20, 0));

        let clamped = knockback_impulse(rel, FIXED_ONE, to_fixed(0.5), FIXED_ONE, true);
        assert!((clamped.x - from_int(10)).abs() < 64);

        // Immovable target
        assert_eq!(knockback_impulse(rel, FIXED_ONE, 0, FIXED_ONE, true), FixedVec2::ZERO);
    }
}
