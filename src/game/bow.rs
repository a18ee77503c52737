//! Bow
//!
//! Predicted draw/aim/release controller with a single nock slot.
//!
//! Per tick, in order:
//! - cancel: progress back to zero, cooldown restarts
//! - draw held, cooldown elapsed, arrow nocked: progress grows by `dt / draw_time`
//! - otherwise, progress above zero with an arrow nocked: release
//!
//! Aim turns toward the input direction at `aim_speed`. Only the authority
//! turns a release into a flying arrow; replicas just clear the slot.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use tracing::{debug, trace};

use crate::core::angle::{Angle, HALF_TURN};
use crate::core::fixed::{
    Fixed, FIXED_ONE, fixed_clamp, fixed_div, fixed_lerp, fixed_mul, to_fixed,
    BOW_DRAW_TIME, BOW_VELOCITY,
};
use crate::core::hash::StateHasher;
use crate::core::vec2::FixedVec2;
use crate::game::arrow::{Arrow, ArrowId};
use crate::game::clock::Tick;
use crate::game::input::{DrawInput, LocalInput};
use crate::game::inventory::{Anchor, ArrowInventory, InventoryId};
use crate::game::physics::ColliderId;
use crate::game::predicted::{Predicted, SimContext};
use crate::game::registry::ArrowRegistry;

// =============================================================================
// CONFIG
// =============================================================================

/// Piecewise-linear map from draw progress to velocity fraction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawCurve {
    /// (progress, fraction) keys sorted by progress
    pub keys: Vec<(Fixed, Fixed)>,
}

impl DrawCurve {
    /// Curve from keys; sorts by progress.
    pub fn new(mut keys: Vec<(Fixed, Fixed)>) -> Self {
        keys.sort_by_key(|k| k.0);
        Self { keys }
    }

    /// Fraction at `progress`, clamped to the end keys.
    pub fn evaluate(&self, progress: Fixed) -> Fixed {
        let (first, last) = match (self.keys.first(), self.keys.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return progress,
        };
        if progress <= first.0 {
            return first.1;
        }
        if progress >= last.0 {
            return last.1;
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if progress <= b.0 {
                let span = b.0 - a.0;
                if span == 0 {
                    return b.1;
                }
                let t = fixed_div(progress - a.0, span);
                return fixed_lerp(a.1, b.1, t);
            }
        }
        last.1
    }
}

impl Default for DrawCurve {
    fn default() -> Self {
        Self::new(vec![
            (0, to_fixed(0.2)),
            (FIXED_ONE / 2, to_fixed(0.7)),
            (FIXED_ONE, FIXED_ONE),
        ])
    }
}

/// Bow tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BowConfig {
    /// Launch speed at full draw
    pub velocity: Fixed,
    /// Seconds to full draw
    pub draw_time: Fixed,
    /// Ticks after a cancel or release before drawing or nocking again
    pub cooldown_ticks: u32,
    /// Aim turn rate, fraction of the remaining angle per second
    pub aim_speed: Fixed,
    /// Progress to velocity fraction
    pub draw_curve: DrawCurve,
    /// Distance from the bow center to the nock point
    pub nock_offset: Fixed,
}

impl Default for BowConfig {
    fn default() -> Self {
        Self {
            velocity: BOW_VELOCITY,
            draw_time: BOW_DRAW_TIME,
            cooldown_ticks: 20,
            aim_speed: 20 * FIXED_ONE,
            draw_curve: DrawCurve::default(),
            nock_offset: to_fixed(0.5),
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Launch order left by an authoritative release, consumed by the world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseOrder {
    /// Arrow leaving the string
    pub arrow: ArrowId,
    /// Launch point
    pub position: FixedVec2,
    /// Launch velocity
    pub velocity: FixedVec2,
    /// Colliders the arrow must not hit
    pub ignore: BTreeSet<ColliderId>,
    /// Tick of the release
    pub tick: Tick,
}

/// Reconciled bow state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BowSnapshot {
    /// Draw progress in [0, 1]
    pub draw_progress: Fixed,
    /// Aim
    pub rotation: Angle,
    /// Tick of the last cancel or release
    pub last_cancel_or_release: Option<Tick>,
    /// Nocked arrow
    pub slot: Option<ArrowId>,
}

/// Single-slot bow.
#[derive(Clone, Debug)]
pub struct Bow {
    inventory_id: InventoryId,
    config: BowConfig,
    draw_progress: Fixed,
    last_cancel_or_release: Option<Tick>,
    rotation: Angle,
    slot: Option<ArrowId>,
    position: FixedVec2,
    ignored_colliders: BTreeSet<ColliderId>,
    pending_release: Option<ReleaseOrder>,
}

impl Bow {
    /// Empty, undrawn bow aiming right.
    pub fn new(inventory_id: InventoryId, config: BowConfig) -> Self {
        Self {
            inventory_id,
            config,
            draw_progress: 0,
            last_cancel_or_release: None,
            rotation: Angle::ZERO,
            slot: None,
            position: FixedVec2::ZERO,
            ignored_colliders: BTreeSet::new(),
            pending_release: None,
        }
    }

    /// Draw progress in [0, 1].
    pub fn draw_progress(&self) -> Fixed { self.draw_progress }

    /// Aim.
    pub fn rotation(&self) -> Angle { self.rotation }

    /// Nocked arrow.
    pub fn slot(&self) -> Option<ArrowId> { self.slot }

    /// Tick of the last cancel or release.
    pub fn last_cancel_or_release(&self) -> Option<Tick> { self.last_cancel_or_release }

    /// Tuning.
    pub fn config(&self) -> &BowConfig { &self.config }

    /// Move with the wielder.
    pub fn set_position(&mut self, position: FixedVec2) {
        self.position = position;
    }

    /// Colliders released arrows ignore (the wielder's own).
    pub fn set_ignored_colliders(&mut self, colliders: BTreeSet<ColliderId>) {
        self.ignored_colliders = colliders;
    }

    /// Take the pending launch order.
    pub fn take_release(&mut self) -> Option<ReleaseOrder> {
        self.pending_release.take()
    }

    /// Whether the cooldown since the last cancel/release has elapsed at `tick`.
    pub fn cooldown_elapsed(&self, tick: Tick) -> bool {
        self.last_cancel_or_release
            .map_or(true, |last| tick > last.wrapping_add(self.config.cooldown_ticks))
    }

    /// Launch velocity for the current progress and aim.
    pub fn launch_velocity(&self) -> FixedVec2 {
        let fraction = self.config.draw_curve.evaluate(self.draw_progress);
        self.rotation
            .to_unit_vector()
            .scale(fixed_mul(self.config.velocity, fraction))
    }

    fn release(&mut self, ctx: &SimContext<'_>) {
        let Some(arrow) = self.slot.take() else {
            return;
        };
        if ctx.is_authority && !ctx.is_replay {
            let order = ReleaseOrder {
                arrow,
                position: self.next_arrow_anchor().position,
                velocity: self.launch_velocity(),
                ignore: self.ignored_colliders.clone(),
                tick: ctx.tick,
            };
            debug!(inventory = self.inventory_id.0, arrow = arrow.0, tick = ctx.tick, "bow release");
            self.pending_release = Some(order);
        }
        self.draw_progress = 0;
        self.last_cancel_or_release = Some(ctx.tick);
    }

    /// Hash into state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.inventory_id.0);
        hasher.update_fixed(self.draw_progress);
        hasher.update_angle(self.rotation);
        hasher.update_opt_u64(self.last_cancel_or_release.map(u64::from));
        hasher.update_opt_u64(self.slot.map(|a| a.0 as u64));
    }
}

impl Predicted for Bow {
    type Input = DrawInput;
    type Snapshot = BowSnapshot;

    fn capture_input(&self, local: &LocalInput) -> DrawInput {
        local.draw()
    }

    fn neutral_input() -> DrawInput {
        DrawInput::NEUTRAL
    }

    fn simulate(&mut self, input: &DrawInput, ctx: &SimContext<'_>) {
        if input.is_neutral() {
            return;
        }

        let aim = input.aim();
        if !aim.is_zero() {
            let target = Angle::of_vector(aim);
            let fraction = fixed_mul(ctx.dt, self.config.aim_speed);
            self.rotation = self.rotation.rotate_toward(target, fraction, HALF_TURN);
        }

        if input.cancel() {
            self.draw_progress = 0;
            self.last_cancel_or_release = Some(ctx.tick);
        } else if input.draw() && self.cooldown_elapsed(ctx.tick) && self.slot.is_some() {
            let step = fixed_div(ctx.dt, self.config.draw_time);
            self.draw_progress = fixed_clamp(self.draw_progress.saturating_add(step), 0, FIXED_ONE);
            trace!(inventory = self.inventory_id.0, progress = self.draw_progress, "bow draw");
        } else if self.draw_progress > 0 && self.slot.is_some() {
            self.release(ctx);
        }
    }

    fn snapshot(&self) -> BowSnapshot {
        BowSnapshot {
            draw_progress: self.draw_progress,
            rotation: self.rotation,
            last_cancel_or_release: self.last_cancel_or_release,
            slot: self.slot,
        }
    }

    fn reconcile(&mut self, snapshot: &BowSnapshot) {
        self.draw_progress = snapshot.draw_progress;
        self.rotation = snapshot.rotation;
        self.last_cancel_or_release = snapshot.last_cancel_or_release;
        self.slot = snapshot.slot;
    }
}

impl ArrowInventory for Bow {
    fn inventory_id(&self) -> InventoryId {
        self.inventory_id
    }

    fn try_add_arrow(&mut self, arrow: &mut Arrow, tick: Tick) -> bool {
        if self.slot.is_some() || !self.cooldown_elapsed(tick) {
            return false;
        }
        self.slot = Some(arrow.id());
        match arrow.nock(self.inventory_id) {
            Ok(()) => {
                let anchor = self.next_arrow_anchor();
                arrow.pin_to(anchor.position, anchor.rotation);
                true
            }
            Err(e) => {
                debug!(inventory = self.inventory_id.0, arrow = arrow.id().0, error = %e, "bow refused arrow");
                self.slot = None;
                false
            }
        }
    }

    fn arrow_at(&self, slot: usize) -> Option<ArrowId> {
        if slot == 0 { self.slot } else { None }
    }

    fn remove_arrow(&mut self, slot: usize, arrows: &mut ArrowRegistry) -> Option<ArrowId> {
        if slot != 0 {
            return None;
        }
        let id = self.slot.take()?;
        if let Some(arrow) = arrows.get_mut(id) {
            if let Err(e) = arrow.remove_from_inventory(self.inventory_id) {
                debug!(inventory = self.inventory_id.0, arrow = id.0, error = %e, "bow held arrow it did not own");
            }
        }
        self.draw_progress = 0;
        Some(id)
    }

    fn swap_arrow(&mut self, new_arrow: Option<ArrowId>, slot: usize) -> Option<ArrowId> {
        if slot != 0 {
            return None;
        }
        std::mem::replace(&mut self.slot, new_arrow)
    }

    fn arrows(&self) -> Vec<ArrowId> {
        self.slot.into_iter().collect()
    }

    fn next_arrow_anchor(&self) -> Anchor {
        Anchor {
            position: self
                .position
                .add(self.rotation.to_unit_vector().scale(self.config.nock_offset)),
            rotation: self.rotation,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{from_int, TICK_DURATION};
    use crate::game::arrow::{ArrowConfig, ArrowKind, ArrowState};
    use crate::game::damageable::DamageableId;
    use crate::game::physics::{ColliderKind, Contact, Terrain};
    use proptest::prelude::*;

    const BOW: InventoryId = InventoryId(1);

    fn ctx(ground: &Terrain, tick: Tick, authority: bool, replay: bool) -> SimContext<'_> {
        SimContext { tick, dt: TICK_DURATION, is_authority: authority, is_replay: replay, ground }
    }

    fn draw() -> DrawInput {
        DrawInput { aim_x: 127, aim_y: 0, flags: DrawInput::FLAG_DRAW }
    }

    fn idle() -> DrawInput {
        DrawInput { aim_x: 127, aim_y: 0, flags: 0 }
    }

    fn cancel() -> DrawInput {
        DrawInput { aim_x: 127, aim_y: 0, flags: DrawInput::FLAG_CANCEL }
    }

    fn loaded() -> (Bow, ArrowRegistry, ArrowId) {
        let mut registry = ArrowRegistry::new();
        let id = registry.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        let mut bow = Bow::new(BOW, BowConfig::default());
        assert!(bow.try_add_arrow(registry.get_mut(id).expect("arrow"), 0));
        (bow, registry, id)
    }

    #[test]
    fn test_draw_curve() {
        let curve = DrawCurve::default();
        assert_eq!(curve.evaluate(0), to_fixed(0.2));
        assert_eq!(curve.evaluate(FIXED_ONE), FIXED_ONE);
        assert_eq!(curve.evaluate(from_int(2)), FIXED_ONE);
        let mid = curve.evaluate(FIXED_ONE / 4);
        assert!(mid > to_fixed(0.44) && mid < to_fixed(0.46));
    }

    #[test]
    fn test_draw_needs_arrow() {
        let ground = Terrain::default();
        let mut bow = Bow::new(BOW, BowConfig::default());
        bow.simulate(&draw(), &ctx(&ground, 1, true, false));
        assert_eq!(bow.draw_progress(), 0);
    }

    #[test]
    fn test_draw_then_release_on_authority() {
        let ground = Terrain::default();
        let (mut bow, _registry, id) = loaded();
        for tick in 1..=30 {
            bow.simulate(&draw(), &ctx(&ground, tick, true, false));
        }
        assert!(bow.draw_progress() > to_fixed(0.45) && bow.draw_progress() < to_fixed(0.55));

        bow.simulate(&idle(), &ctx(&ground, 31, true, false));
        assert_eq!(bow.slot(), None);
        assert_eq!(bow.draw_progress(), 0);
        assert_eq!(bow.last_cancel_or_release(), Some(31));

        let order = bow.take_release().expect("release order");
        assert_eq!(order.arrow, id);
        assert_eq!(order.tick, 31);
        assert!(order.velocity.x > 0);
        assert!(bow.take_release().is_none());
    }

    #[test]
    fn test_full_draw_is_capped() {
        let ground = Terrain::default();
        let (mut bow, _registry, _) = loaded();
        for tick in 1..=200 {
            bow.simulate(&draw(), &ctx(&ground, tick, true, false));
        }
        assert_eq!(bow.draw_progress(), FIXED_ONE);
        let speed = bow.launch_velocity().length();
        assert!((speed - BOW_VELOCITY).abs() < 512);
    }

    #[test]
    fn test_replica_release_has_no_order() {
        let ground = Terrain::default();
        let (mut bow, _registry, _) = loaded();
        bow.simulate(&draw(), &ctx(&ground, 1, false, false));
        bow.simulate(&idle(), &ctx(&ground, 2, false, false));
        assert_eq!(bow.slot(), None);
        assert!(bow.take_release().is_none());

        // Authority replay does not launch twice either
        let (mut bow, _registry, _) = loaded();
        bow.simulate(&draw(), &ctx(&ground, 1, true, true));
        bow.simulate(&idle(), &ctx(&ground, 2, true, true));
        assert!(bow.take_release().is_none());
    }

    #[test]
    fn test_cancel_resets_and_starts_cooldown() {
        let ground = Terrain::default();
        let (mut bow, _registry, _) = loaded();
        for tick in 1..=10 {
            bow.simulate(&draw(), &ctx(&ground, tick, true, false));
        }
        bow.simulate(&cancel(), &ctx(&ground, 11, true, false));
        assert_eq!(bow.draw_progress(), 0);
        assert!(bow.slot().is_some());

        // Inside the cooldown drawing does nothing
        let cooldown = bow.config().cooldown_ticks;
        bow.simulate(&draw(), &ctx(&ground, 11 + cooldown, true, false));
        assert_eq!(bow.draw_progress(), 0);
        bow.simulate(&draw(), &ctx(&ground, 12 + cooldown, true, false));
        assert!(bow.draw_progress() > 0);
    }

    #[test]
    fn test_neutral_input_holds_state() {
        let ground = Terrain::default();
        let (mut bow, _registry, _) = loaded();
        for tick in 1..=5 {
            bow.simulate(&draw(), &ctx(&ground, tick, true, false));
        }
        let before = bow.snapshot();
        bow.simulate(&DrawInput::NEUTRAL, &ctx(&ground, 6, true, false));
        assert_eq!(bow.snapshot(), before);
        assert!(bow.take_release().is_none());
    }

    #[test]
    fn test_aim_turns_toward_input() {
        let ground = Terrain::default();
        let mut bow = Bow::new(BOW, BowConfig::default());
        let up = DrawInput { aim_x: 0, aim_y: 127, flags: 0 };
        let start = bow.rotation().distance_to(Angle::UP);
        bow.simulate(&up, &ctx(&ground, 1, true, false));
        assert!(bow.rotation().distance_to(Angle::UP) < start);
    }

    #[test]
    fn test_try_add_respects_slot_and_cooldown() {
        let ground = Terrain::default();
        let (mut bow, mut registry, id) = loaded();
        assert_eq!(registry.get(id).map(|a| a.state()), Some(ArrowState::Nock));

        let second = registry.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        assert!(!bow.try_add_arrow(registry.get_mut(second).expect("second"), 0));

        bow.simulate(&draw(), &ctx(&ground, 1, true, false));
        bow.simulate(&idle(), &ctx(&ground, 2, true, false));
        let cooldown = bow.config().cooldown_ticks;
        assert!(!bow.try_add_arrow(registry.get_mut(second).expect("second"), 2 + cooldown));
        assert!(bow.try_add_arrow(registry.get_mut(second).expect("second"), 3 + cooldown));
        assert_eq!(bow.arrows(), vec![second]);
    }

    #[test]
    fn test_try_add_rolls_back_on_foreign_arrow() {
        let mut registry = ArrowRegistry::new();
        let id = registry.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        registry.get_mut(id).expect("arrow").quiver(InventoryId(9)).expect("claim");

        let mut bow = Bow::new(BOW, BowConfig::default());
        assert!(!bow.try_add_arrow(registry.get_mut(id).expect("arrow"), 0));
        assert_eq!(bow.slot(), None);
    }

    #[test]
    fn test_own_quiver_arrow_waits_for_string_then_flies_and_sticks() {
        let ground = Terrain::default();
        let (mut bow, mut registry, held) = loaded();

        // Same inventory already owns it, but the string is taken
        let a = registry.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        registry.get_mut(a).expect("a").quiver(BOW).expect("claim");
        assert!(!bow.try_add_arrow(registry.get_mut(a).expect("a"), 0));
        let waiting = registry.get(a).expect("a");
        assert_eq!(waiting.state(), ArrowState::Quiver);
        assert_eq!(waiting.owner(), Some(BOW));
        assert_eq!(bow.slot(), Some(held));

        bow.simulate(&draw(), &ctx(&ground, 1, true, false));
        bow.simulate(&idle(), &ctx(&ground, 2, true, false));
        let order = bow.take_release().expect("release order");
        assert_eq!(order.arrow, held);
        registry
            .get_mut(held)
            .expect("held")
            .release(BOW, order.position, order.velocity, order.ignore)
            .expect("launch held");

        let cooldown = bow.config().cooldown_ticks;
        assert!(bow.try_add_arrow(registry.get_mut(a).expect("a"), 3 + cooldown));
        let arrow = registry.get_mut(a).expect("a");
        assert_eq!(arrow.state(), ArrowState::Nock);
        assert_eq!(arrow.owner(), Some(BOW));

        arrow
            .release(BOW, FixedVec2::ZERO, FixedVec2::from_ints(5, 0), BTreeSet::new())
            .expect("release");
        assert_eq!(arrow.state(), ArrowState::Flight);
        assert_eq!(arrow.velocity(), FixedVec2::from_ints(5, 0));
        assert_eq!(arrow.owner(), None);

        let contact = Contact {
            collider: ColliderId(40),
            kind: ColliderKind::Damageable(DamageableId(7)),
            relative_velocity: FixedVec2::from_ints(5, 0),
            target_mass: FIXED_ONE,
            collider_position: FixedVec2::from_ints(1, 0),
        };
        let impact = arrow.on_contact_begin(&contact, &ArrowConfig::default()).expect("impact");
        assert_eq!(impact.arrow, a);
        assert!(impact.hit.is_some());
        assert_eq!(arrow.state(), ArrowState::Stuck);
        assert!(!arrow.can_be_picked_up());
    }

    #[test]
    fn test_remove_arrow_keeps_foreign_owner() {
        let (mut bow, mut registry, held) = loaded();
        let stray = registry.spawn(ArrowKind::Normal, FixedVec2::ZERO);
        registry.get_mut(stray).expect("stray").quiver(InventoryId(9)).expect("claim");

        // Slot points at an arrow some other inventory owns
        assert_eq!(bow.swap_arrow(Some(stray), 0), Some(held));
        assert_eq!(bow.remove_arrow(0, &mut registry), Some(stray));
        assert_eq!(bow.slot(), None);
        assert_eq!(bow.draw_progress(), 0);
        assert_eq!(registry.get(stray).map(|x| x.owner()), Some(Some(InventoryId(9))));
        assert_eq!(bow.remove_arrow(0, &mut registry), None);
    }

    #[test]
    fn test_reconcile_roundtrip() {
        let ground = Terrain::default();
        let (mut bow, _registry, _) = loaded();
        for tick in 1..=7 {
            bow.simulate(&draw(), &ctx(&ground, tick, false, false));
        }
        let snap = bow.snapshot();
        let mut other = Bow::new(BOW, BowConfig::default());
        other.reconcile(&snap);
        other.reconcile(&snap);
        assert_eq!(other.snapshot(), snap);
    }

    proptest! {
        #[test]
        fn prop_reconcile_is_idempotent(
            progress in 0..=FIXED_ONE,
            units in -32768i32..32768,
            last in proptest::option::of(0u32..1000),
            slot in proptest::option::of(0u32..64),
        ) {
            let snap = BowSnapshot {
                draw_progress: progress,
                rotation: Angle::from_units(units),
                last_cancel_or_release: last,
                slot: slot.map(ArrowId),
            };
            let mut once = Bow::new(BOW, BowConfig::default());
            once.reconcile(&snap);
            let mut twice = once.clone();
            twice.reconcile(&snap);
            prop_assert_eq!(once.snapshot(), twice.snapshot());
            prop_assert_eq!(once.snapshot(), snap);
        }
    }
}
