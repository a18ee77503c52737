//! Arrow State Machine
//!
//! Every arrow is in exactly one of four states:
//!
//! ```text
//!                 Release (owner only)
//!        ┌──────┐ ───────────────────▶ ┌────────┐
//!        │ Nock │                      │ Flight │◀──┐ contact end
//!        └──────┘                      └────────┘   │ (attach parent)
//!          ▲  │ Quiver                     │ hit    │
//!     Nock │  ▼                            ▼        │
//!        ┌────────┐      Nock/Quiver   ┌───────┐ ───┘
//!        │ Quiver │◀────────────────── │ Stuck │
//!        └────────┘                    └───────┘
//! ```
//!
//! All mutators return `Result<(), ArrowError>`; a failed call leaves the
//! arrow untouched. Ownership is exclusive: a held arrow can only be
//! released, re-nocked or re-quivered by the inventory holding it.

use std::collections::BTreeSet;
use std::fmt;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::angle::{Angle, FULL_TURN};
use crate::core::fixed::{
    Fixed, FIXED_ONE, fixed_mul,
    ARROW_MASS, GRAVITY, NORMAL_ARROW_DAMAGE, POISON_ARROW_DAMAGE, POISON_DAMAGE_PER_TICK,
};
use crate::core::hash::StateHasher;
use crate::core::vec2::FixedVec2;
use crate::game::damageable::DamageableId;
use crate::game::inventory::InventoryId;
use crate::game::physics::{ColliderId, ColliderKind, Contact, knockback_impulse};

// =============================================================================
// IDENTIFIERS AND STATES
// =============================================================================

/// Stable arrow identity, assigned by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArrowId(pub u32);

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrowState {
    /// Moving freely under gravity.
    Flight,
    /// Embedded in a surface or creature.
    Stuck,
    /// Stored in an inventory.
    Quiver,
    /// On a bow string.
    Nock,
}

impl ArrowState {
    /// States an inventory may claim the arrow from.
    #[inline]
    pub fn is_claimable(self) -> bool {
        matches!(self, ArrowState::Stuck | ArrowState::Nock | ArrowState::Quiver)
    }

    fn as_u8(self) -> u8 {
        match self {
            ArrowState::Flight => 0,
            ArrowState::Stuck => 1,
            ArrowState::Quiver => 2,
            ArrowState::Nock => 3,
        }
    }
}

impl fmt::Display for ArrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Transition trigger, used in errors and observer events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrowEvent {
    /// Fired from a bow.
    Release,
    /// Claimed onto a bow string.
    Nock,
    /// Claimed into storage.
    Quiver,
    /// Struck a surface or damageable.
    Hit,
    /// Attach parent stopped touching.
    Detach,
}

impl fmt::Display for ArrowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Arrow operation errors. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArrowError {
    /// Event not allowed from the current state.
    #[error("cannot apply {event} to an arrow in state {from}")]
    InvalidTransition {
        /// State the arrow is in
        from: ArrowState,
        /// Rejected event
        event: ArrowEvent,
    },

    /// Caller is not the inventory holding the arrow.
    #[error("inventory {0:?} does not own this arrow")]
    NotOwner(InventoryId),
}

/// Arrow variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrowKind {
    /// Direct damage only.
    Normal,
    /// Direct damage plus damage over time.
    Poison,
}

// =============================================================================
// CONFIG
// =============================================================================

/// Knockback limiting policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnockbackPolicy {
    /// Scale applied after the mass ratio
    pub scale: Fixed,
    /// Limit the impulse to the incoming relative speed
    pub clamp_to_relative_speed: bool,
}

impl Default for KnockbackPolicy {
    fn default() -> Self {
        Self {
            scale: FIXED_ONE,
            clamp_to_relative_speed: true,
        }
    }
}

/// Arrow tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrowConfig {
    /// Arrow mass
    pub mass: Fixed,
    /// Gravity while in flight
    pub gravity: Fixed,
    /// Flight alignment rate: fraction per second of the remaining angle
    pub align_rate: Fixed,
    /// Flight alignment cap per tick, in angle units
    pub max_align_step: i32,
    /// Knockback policy
    pub knockback: KnockbackPolicy,
    /// Direct damage of a normal arrow
    pub normal_damage: Fixed,
    /// Direct damage of a poison arrow
    pub poison_damage: Fixed,
    /// Poison damage per tick
    pub poison_per_tick: Fixed,
    /// Poison duration
    pub poison_ticks: u32,
}

impl Default for ArrowConfig {
    fn default() -> Self {
        Self {
            mass: ARROW_MASS,
            gravity: GRAVITY,
            align_rate: 10 * FIXED_ONE,
            max_align_step: FULL_TURN / 16,
            knockback: KnockbackPolicy::default(),
            normal_damage: NORMAL_ARROW_DAMAGE,
            poison_damage: POISON_ARROW_DAMAGE,
            poison_per_tick: POISON_DAMAGE_PER_TICK,
            poison_ticks: 180,
        }
    }
}

// =============================================================================
// IMPACTS AND VIEWS
// =============================================================================

/// Where a stuck arrow is attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Parent collider
    pub collider: ColliderId,
    /// Arrow position minus parent center at impact
    pub offset: FixedVec2,
}

/// Damage produced by a hit on a damageable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageHit {
    /// Target
    pub target: DamageableId,
    /// Direct damage
    pub damage: Fixed,
    /// Velocity change for the target
    pub knockback: FixedVec2,
    /// Damage-over-time (per tick, ticks)
    pub poison: Option<(Fixed, u32)>,
}

/// Result of a contact that ended a flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impact {
    /// Arrow
    pub arrow: ArrowId,
    /// Collider struck
    pub collider: ColliderId,
    /// Damage to apply, for damageable hits
    pub hit: Option<DamageHit>,
}

/// Observable arrow state, mirrored to every participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrowView {
    /// Identity
    pub id: ArrowId,
    /// Variant
    pub kind: ArrowKind,
    /// State
    pub state: ArrowState,
    /// Position
    pub position: FixedVec2,
    /// Velocity
    pub velocity: FixedVec2,
    /// Rotation
    pub rotation: Angle,
    /// Holding inventory
    pub owner: Option<InventoryId>,
    /// Pickup gate
    pub can_be_picked_up: bool,
}

/// State change recorded for observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrowTransition {
    /// Previous state
    pub from: ArrowState,
    /// New state
    pub to: ArrowState,
    /// Trigger
    pub event: ArrowEvent,
}

// =============================================================================
// ARROW
// =============================================================================

/// A projectile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arrow {
    id: ArrowId,
    kind: ArrowKind,
    state: ArrowState,
    owner: Option<InventoryId>,
    ignored_colliders: BTreeSet<ColliderId>,
    can_be_picked_up: bool,
    position: FixedVec2,
    velocity: FixedVec2,
    rotation: Angle,
    physics_enabled: bool,
    attachment: Option<Attachment>,
    #[serde(skip)]
    transitions: Vec<ArrowTransition>,
}

impl Arrow {
    /// New unowned arrow in the Quiver state.
    pub fn new(id: ArrowId, kind: ArrowKind, position: FixedVec2) -> Self {
        Self {
            id,
            kind,
            state: ArrowState::Quiver,
            owner: None,
            ignored_colliders: BTreeSet::new(),
            can_be_picked_up: true,
            position,
            velocity: FixedVec2::ZERO,
            rotation: Angle::ZERO,
            physics_enabled: false,
            attachment: None,
            transitions: Vec::new(),
        }
    }

    /// Mirror built from an observed view.
    pub fn from_view(view: &ArrowView) -> Self {
        let mut arrow = Self::new(view.id, view.kind, view.position);
        arrow.sync(view);
        arrow
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Identity.
    pub fn id(&self) -> ArrowId { self.id }

    /// Variant.
    pub fn kind(&self) -> ArrowKind { self.kind }

    /// Current state.
    pub fn state(&self) -> ArrowState { self.state }

    /// Holding inventory.
    pub fn owner(&self) -> Option<InventoryId> { self.owner }

    /// Colliders excluded from hit detection.
    pub fn ignored_colliders(&self) -> &BTreeSet<ColliderId> { &self.ignored_colliders }

    /// Pickup gate.
    pub fn can_be_picked_up(&self) -> bool { self.can_be_picked_up }

    /// Position.
    pub fn position(&self) -> FixedVec2 { self.position }

    /// Velocity.
    pub fn velocity(&self) -> FixedVec2 { self.velocity }

    /// Rotation.
    pub fn rotation(&self) -> Angle { self.rotation }

    /// Whether physics integrates this arrow.
    pub fn physics_enabled(&self) -> bool { self.physics_enabled }

    /// Attach parent while stuck.
    pub fn attachment(&self) -> Option<Attachment> { self.attachment }

    /// Observable state.
    pub fn view(&self) -> ArrowView {
        ArrowView {
            id: self.id,
            kind: self.kind,
            state: self.state,
            position: self.position,
            velocity: self.velocity,
            rotation: self.rotation,
            owner: self.owner,
            can_be_picked_up: self.can_be_picked_up,
        }
    }

    /// Overwrite observable state from the authority.
    pub fn sync(&mut self, view: &ArrowView) {
        self.kind = view.kind;
        self.state = view.state;
        self.position = view.position;
        self.velocity = view.velocity;
        self.rotation = view.rotation;
        self.owner = view.owner;
        self.can_be_picked_up = view.can_be_picked_up;
        self.physics_enabled = view.state == ArrowState::Flight;
        if view.state != ArrowState::Stuck {
            self.attachment = None;
        }
    }

    /// Drain recorded transitions.
    pub fn take_transitions(&mut self) -> Vec<ArrowTransition> {
        std::mem::take(&mut self.transitions)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    fn switch_state(&mut self, next: ArrowState, event: ArrowEvent) {
        let from = self.state;

        // Exit
        if from == ArrowState::Stuck {
            self.attachment = None;
        }

        self.state = next;

        // Enter
        match next {
            ArrowState::Flight => {
                self.owner = None;
                self.physics_enabled = true;
            }
            ArrowState::Stuck => {
                self.physics_enabled = false;
                self.velocity = FixedVec2::ZERO;
            }
            ArrowState::Quiver | ArrowState::Nock => {
                self.physics_enabled = false;
                self.velocity = FixedVec2::ZERO;
                self.ignored_colliders.clear();
            }
        }

        debug!(arrow = self.id.0, %from, to = %next, %event, "arrow transition");
        self.transitions.push(ArrowTransition { from, to: next, event });
    }

    fn check_claim(&self, inventory: InventoryId, event: ArrowEvent) -> Result<(), ArrowError> {
        if !self.state.is_claimable() {
            return Err(ArrowError::InvalidTransition { from: self.state, event });
        }
        match self.owner {
            Some(owner) if owner != inventory => Err(ArrowError::NotOwner(inventory)),
            _ => Ok(()),
        }
    }

    /// Nock → Flight. Only the holding inventory may release.
    pub fn release(
        &mut self,
        by: InventoryId,
        position: FixedVec2,
        velocity: FixedVec2,
        ignore: BTreeSet<ColliderId>,
    ) -> Result<(), ArrowError> {
        if self.state != ArrowState::Nock {
            return Err(ArrowError::InvalidTransition {
                from: self.state,
                event: ArrowEvent::Release,
            });
        }
        if self.owner != Some(by) {
            return Err(ArrowError::NotOwner(by));
        }

        self.position = position;
        self.velocity = velocity;
        self.ignored_colliders = ignore;
        self.switch_state(ArrowState::Flight, ArrowEvent::Release);
        Ok(())
    }

    /// {Stuck, Nock, Quiver} → Nock, owned by `inventory`.
    pub fn nock(&mut self, inventory: InventoryId) -> Result<(), ArrowError> {
        self.check_claim(inventory, ArrowEvent::Nock)?;
        self.owner = Some(inventory);
        self.switch_state(ArrowState::Nock, ArrowEvent::Nock);
        Ok(())
    }

    /// {Stuck, Nock, Quiver} → Quiver, owned by `inventory`.
    pub fn quiver(&mut self, inventory: InventoryId) -> Result<(), ArrowError> {
        self.check_claim(inventory, ArrowEvent::Quiver)?;
        self.owner = Some(inventory);
        self.switch_state(ArrowState::Quiver, ArrowEvent::Quiver);
        Ok(())
    }

    /// Clear ownership if `inventory` is the owner.
    pub fn remove_from_inventory(&mut self, inventory: InventoryId) -> Result<(), ArrowError> {
        if self.owner != Some(inventory) {
            return Err(ArrowError::NotOwner(inventory));
        }
        self.owner = None;
        Ok(())
    }

    /// Handle a contact beginning. Authority only.
    ///
    /// Ends the flight on a surface or damageable that is not ignored.
    /// Returns the impact, with damage for damageable hits.
    pub fn on_contact_begin(&mut self, contact: &Contact, config: &ArrowConfig) -> Option<Impact> {
        if self.state != ArrowState::Flight || self.ignored_colliders.contains(&contact.collider) {
            return None;
        }

        let target = match contact.kind {
            ColliderKind::Surface => None,
            ColliderKind::Damageable(target) => Some(target),
            ColliderKind::Passive => return None,
        };

        self.attachment = Some(Attachment {
            collider: contact.collider,
            offset: self.position.sub(contact.collider_position),
        });
        self.switch_state(ArrowState::Stuck, ArrowEvent::Hit);

        let hit = target.map(|target| {
            self.can_be_picked_up = false;
            let (damage, poison) = match self.kind {
                ArrowKind::Normal => (config.normal_damage, None),
                ArrowKind::Poison => (
                    config.poison_damage,
                    Some((config.poison_per_tick, config.poison_ticks)),
                ),
            };
            DamageHit {
                target,
                damage,
                knockback: knockback_impulse(
                    contact.relative_velocity,
                    config.mass,
                    contact.target_mass,
                    config.knockback.scale,
                    config.knockback.clamp_to_relative_speed,
                ),
                poison,
            }
        });

        Some(Impact {
            arrow: self.id,
            collider: contact.collider,
            hit,
        })
    }

    /// Handle a contact ending. Stuck → Flight only for the attach parent.
    pub fn on_contact_end(&mut self, collider: ColliderId) -> bool {
        let attached_here = self.state == ArrowState::Stuck
            && self.attachment.map(|a| a.collider) == Some(collider);
        if attached_here {
            self.switch_state(ArrowState::Flight, ArrowEvent::Detach);
        }
        attached_here
    }

    // -------------------------------------------------------------------------
    // Per-tick updates
    // -------------------------------------------------------------------------

    /// Flight: integrate and turn the nose toward the velocity.
    pub fn update_flight(&mut self, dt: Fixed, config: &ArrowConfig) {
        if self.state != ArrowState::Flight {
            return;
        }
        if self.physics_enabled {
            self.velocity.y = self.velocity.y.wrapping_sub(fixed_mul(config.gravity, dt));
            self.position = self.position.add(self.velocity.scale(dt));
        }
        if !self.velocity.is_zero() {
            let target = Angle::of_vector(self.velocity);
            let fraction = fixed_mul(config.align_rate, dt);
            self.rotation = self.rotation.rotate_toward(target, fraction, config.max_align_step);
        }
    }

    /// Nock: pinned to the string anchor.
    pub fn pin_to(&mut self, anchor: FixedVec2, rotation: Angle) {
        if self.state == ArrowState::Nock {
            self.position = anchor;
            self.rotation = rotation;
        }
    }

    /// Stuck: follow the attach parent.
    pub fn follow_parent(&mut self, parent_center: FixedVec2) {
        if let (ArrowState::Stuck, Some(a)) = (self.state, self.attachment) {
            self.position = parent_center.add(a.offset);
        }
    }

    /// Hash into state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_u8(self.state.as_u8());
        hasher.update_opt_u64(self.owner.map(|o| o.0 as u64));
        hasher.update_bool(self.can_be_picked_up);
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_angle(self.rotation);
        hasher.update_u32(self.ignored_colliders.len() as u32);
        for c in &self.ignored_colliders {
            hasher.update_u32(c.0);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
