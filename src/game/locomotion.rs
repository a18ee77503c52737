//! Locomotion Controller
//!
//! The predicted movement entity of an archer. One step does:
//!
//! 1. Reset the per-tick ground/grip caches
//! 2. Horizontal input: brake when idle, else walk (grounded) or glide
//! 3. Vertical input: jump when positive, dive when negative
//! 4. Integrate gravity, velocity and spin, then resolve ground penetration
//!
//! Forces are accelerations applied for one tick (`v += a * dt / mass`).
//! Only the kinematic state and the jump timer are reconciled.

use serde::{Serialize, Deserialize};

use crate::core::angle::{unsigned_angle_from_right, Angle, FULL_TURN};
use crate::core::fixed::{
    Fixed, FIXED_ONE, fixed_abs, fixed_div, fixed_mul, to_fixed,
    AERIAL_FORCE, AERIAL_SPEED, CHARACTER_MASS, DIVE_SPEED, DIVE_STRENGTH, GRAVITY,
    HORIZONTAL_VELOCITY_CUTOFF, JUMP_IMPULSE, SPRINT_FORCE_MULTIPLIER, SPRINT_SPEED_MULTIPLIER,
    WALKING_FORCE, WALKING_SPEED,
};
use crate::core::hash::StateHasher;
use crate::core::vec2::FixedVec2;
use crate::game::clock::Tick;
use crate::game::input::{LocalInput, MoveInput};
use crate::game::physics::GroundQuery;
use crate::game::predicted::{Predicted, SimContext};

/// Movement tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocomotionConfig {
    /// Grounded acceleration
    pub walking_force: Fixed,
    /// Grounded speed cap
    pub walking_speed: Fixed,
    /// Airborne acceleration
    pub aerial_force: Fixed,
    /// Airborne speed cap
    pub aerial_speed: Fixed,
    /// Sprint multiplier on acceleration
    pub sprint_force_multiplier: Fixed,
    /// Sprint multiplier on the speed cap
    pub sprint_speed_multiplier: Fixed,
    /// Upward velocity change of a jump
    pub jump_impulse: Fixed,
    /// Ticks between jump attempts
    pub jump_cooldown_ticks: u32,
    /// Grounded and idle below this horizontal speed: stop
    pub horizontal_velocity_cutoff: Fixed,
    /// Downward acceleration of a dive
    pub dive_strength: Fixed,
    /// Dive speed cap
    pub dive_speed: Fixed,
    /// Steepest walkable slope
    pub max_ramp_angle: Angle,
    /// Ramp probe ray length
    pub ramp_check_distance: Fixed,
    /// Gravity
    pub gravity: Fixed,
    /// Body mass
    pub mass: Fixed,
    /// Center to feet
    pub half_height: Fixed,
    /// Center to side
    pub half_width: Fixed,
    /// Extra reach of the ground and grip probes
    pub probe_margin: Fixed,
    /// Fraction of spin removed per second
    pub angular_damping: Fixed,
    /// Fraction per second of tilt recovered toward upright
    pub upright_rate: Fixed,
}

impl Default for LocomotionConfig {
    fn default() -> Self {
        Self {
            walking_force: WALKING_FORCE,
            walking_speed: WALKING_SPEED,
            aerial_force: AERIAL_FORCE,
            aerial_speed: AERIAL_SPEED,
            sprint_force_multiplier: SPRINT_FORCE_MULTIPLIER,
            sprint_speed_multiplier: SPRINT_SPEED_MULTIPLIER,
            jump_impulse: JUMP_IMPULSE,
            jump_cooldown_ticks: 15,
            horizontal_velocity_cutoff: HORIZONTAL_VELOCITY_CUTOFF,
            dive_strength: DIVE_STRENGTH,
            dive_speed: DIVE_SPEED,
            max_ramp_angle: Angle::from_degrees(60),
            ramp_check_distance: FIXED_ONE,
            gravity: GRAVITY,
            mass: CHARACTER_MASS,
            half_height: to_fixed(0.9),
            half_width: to_fixed(0.4),
            probe_margin: to_fixed(0.1),
            angular_damping: 4 * FIXED_ONE,
            upright_rate: 6 * FIXED_ONE,
        }
    }
}

/// Reconciled locomotion state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocomotionSnapshot {
    /// Body center
    pub position: FixedVec2,
    /// Linear velocity
    pub velocity: FixedVec2,
    /// Spin in angle units per second
    pub angular_velocity: Fixed,
    /// Tilt
    pub rotation: Angle,
    /// Tick of the last jump attempt
    pub last_jump: Option<Tick>,
}

/// Per-tick probe cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Checks {
    grounded: Option<bool>,
    gripped: Option<bool>,
}

/// Archer movement entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locomotion {
    config: LocomotionConfig,
    position: FixedVec2,
    velocity: FixedVec2,
    angular_velocity: Fixed,
    rotation: Angle,
    last_jump: Option<Tick>,
    checks: Checks,
}

impl Locomotion {
    /// Body at rest at `position`.
    pub fn new(config: LocomotionConfig, position: FixedVec2) -> Self {
        Self {
            config,
            position,
            velocity: FixedVec2::ZERO,
            angular_velocity: 0,
            rotation: Angle::ZERO,
            last_jump: None,
            checks: Checks::default(),
        }
    }

    /// Body center.
    pub fn position(&self) -> FixedVec2 { self.position }

    /// Linear velocity.
    pub fn velocity(&self) -> FixedVec2 { self.velocity }

    /// Tilt.
    pub fn rotation(&self) -> Angle { self.rotation }

    /// Spin.
    pub fn angular_velocity(&self) -> Fixed { self.angular_velocity }

    /// Tick of the last jump attempt.
    pub fn last_jump(&self) -> Option<Tick> { self.last_jump }

    /// Tuning.
    pub fn config(&self) -> &LocomotionConfig { &self.config }

    /// Body mass.
    pub fn mass(&self) -> Fixed { self.config.mass }

    /// Half extents of the body box.
    pub fn half_extents(&self) -> FixedVec2 {
        FixedVec2::new(self.config.half_width, self.config.half_height)
    }

    /// Instant velocity change plus spin, applied by the authority on hits.
    pub fn apply_impulse(&mut self, velocity_change: FixedVec2, spin: Fixed) {
        self.velocity = self.velocity.add(velocity_change);
        self.angular_velocity = self.angular_velocity.wrapping_add(spin);
    }

    // -------------------------------------------------------------------------
    // Probes
    // -------------------------------------------------------------------------

    fn grounded(&mut self, ground: &dyn GroundQuery) -> bool {
        if let Some(g) = self.checks.grounded {
            return g;
        }
        let reach = self.config.half_height + self.config.probe_margin;
        let g = ground.raycast(self.position, FixedVec2::DOWN, reach).is_some();
        self.checks.grounded = Some(g);
        g
    }

    fn gripped(&mut self, ground: &dyn GroundQuery) -> bool {
        if let Some(g) = self.checks.gripped {
            return g;
        }
        let reach = self.config.half_width + self.config.probe_margin;
        let g = ground.raycast(self.position, FixedVec2::LEFT, reach).is_some()
            || ground.raycast(self.position, FixedVec2::RIGHT, reach).is_some();
        self.checks.gripped = Some(g);
        g
    }

    /// Surface tangent under the leading ramp probe, or zero if too steep.
    fn ramp_direction(&self, direction: Fixed, ground: &dyn GroundQuery) -> FixedVec2 {
        let side = if direction < 0 { -self.config.half_width } else { self.config.half_width };
        let probe = self.position.add(FixedVec2::new(side, -self.config.half_height));
        let tangent = match ground.raycast(probe, FixedVec2::DOWN, self.config.ramp_check_distance) {
            Some(hit) => hit.normal.perpendicular_cw(),
            None => FixedVec2::RIGHT,
        };
        if unsigned_angle_from_right(tangent) > self.config.max_ramp_angle {
            FixedVec2::ZERO
        } else {
            tangent
        }
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    /// Accelerate along x unless already at the cap in the input direction.
    fn add_x_force(&mut self, input: Fixed, accel: Fixed, max: Fixed, ground: &dyn GroundQuery, dt: Fixed) {
        let vx = self.velocity.x;
        let below_cap = fixed_abs(vx) < max;
        let reversing = (vx < 0 && input > 0) || (vx > 0 && input < 0);
        if !below_cap && !reversing && vx != 0 {
            return;
        }
        let dir = self.ramp_direction(input, ground);
        let magnitude = fixed_div(fixed_mul(fixed_mul(input, accel), dt), self.config.mass);
        self.velocity = self.velocity.add(dir.scale(magnitude));
    }

    fn brake(&mut self, ground: &dyn GroundQuery) {
        if fixed_abs(self.velocity.x) < self.config.horizontal_velocity_cutoff && self.grounded(ground) {
            self.velocity.x = 0;
        }
    }

    fn walk_or_glide(&mut self, input: Fixed, sprint: bool, ground: &dyn GroundQuery, dt: Fixed) {
        if self.grounded(ground) {
            let (force, speed) = if sprint {
                (
                    fixed_mul(self.config.walking_force, self.config.sprint_force_multiplier),
                    fixed_mul(self.config.walking_speed, self.config.sprint_speed_multiplier),
                )
            } else {
                (self.config.walking_force, self.config.walking_speed)
            };
            self.add_x_force(input, force, speed, ground, dt);
        } else {
            self.add_x_force(input, self.config.aerial_force, self.config.aerial_speed, ground, dt);
        }
    }

    fn jump(&mut self, tick: Tick, ground: &dyn GroundQuery) {
        let ready = self
            .last_jump
            .map_or(true, |last| tick.wrapping_sub(last) >= self.config.jump_cooldown_ticks);
        if !ready {
            return;
        }
        // The attempt restarts the cooldown even if it fails
        self.last_jump = Some(tick);
        if !self.grounded(ground) && !self.gripped(ground) {
            return;
        }
        self.velocity.y = self.velocity.y.wrapping_add(fixed_div(self.config.jump_impulse, self.config.mass));
    }

    fn dive(&mut self, ground: &dyn GroundQuery, dt: Fixed) {
        if self.grounded(ground) {
            return;
        }
        let vy = self.velocity.y;
        let below_cap = fixed_abs(vy) < self.config.dive_speed;
        let reversing = vy > 0;
        if !below_cap && !reversing && vy != 0 {
            return;
        }
        let dv = fixed_div(fixed_mul(self.config.dive_strength, dt), self.config.mass);
        self.velocity.y = vy.wrapping_sub(dv);
    }

    // -------------------------------------------------------------------------
    // Integration
    // -------------------------------------------------------------------------

    fn integrate(&mut self, ground: &dyn GroundQuery, dt: Fixed) {
        self.velocity.y = self.velocity.y.wrapping_sub(fixed_mul(self.config.gravity, dt));
        self.position = self.position.add(self.velocity.scale(dt));

        // Feet below the surface: push out, kill downward speed
        let reach = self.config.half_height + self.config.probe_margin;
        if let Some(hit) = ground.raycast(self.position, FixedVec2::DOWN, reach) {
            if hit.distance < self.config.half_height && self.velocity.y <= 0 {
                self.position.y = self.position.y.wrapping_add(self.config.half_height - hit.distance);
                self.velocity.y = 0;
            }
        }

        // Spin: integrate, damp, recover upright
        let spin_step = fixed_mul(self.angular_velocity, dt);
        self.rotation = Angle::from_units(self.rotation.units().wrapping_add(spin_step));
        let damping = fixed_mul(self.config.angular_damping, dt).min(FIXED_ONE);
        self.angular_velocity = self.angular_velocity.wrapping_sub(fixed_mul(self.angular_velocity, damping));
        let upright = fixed_mul(self.config.upright_rate, dt);
        self.rotation = self.rotation.rotate_toward(Angle::ZERO, upright, FULL_TURN);
    }

    /// Hash into state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_fixed(self.angular_velocity);
        hasher.update_angle(self.rotation);
        hasher.update_opt_u64(self.last_jump.map(u64::from));
    }
}

impl Predicted for Locomotion {
    type Input = MoveInput;
    type Snapshot = LocomotionSnapshot;

    fn capture_input(&self, local: &LocalInput) -> MoveInput {
        local.movement()
    }

    fn neutral_input() -> MoveInput {
        MoveInput::NEUTRAL
    }

    fn simulate(&mut self, input: &MoveInput, ctx: &SimContext<'_>) {
        self.checks = Checks::default();
        let dir = input.direction();

        if dir.x == 0 {
            self.brake(ctx.ground);
        } else {
            self.walk_or_glide(dir.x, input.sprint, ctx.ground, ctx.dt);
        }

        if dir.y > 0 {
            self.jump(ctx.tick, ctx.ground);
        } else if dir.y < 0 {
            self.dive(ctx.ground, ctx.dt);
        }

        self.integrate(ctx.ground, ctx.dt);
    }

    fn snapshot(&self) -> LocomotionSnapshot {
        LocomotionSnapshot {
            position: self.position,
            velocity: self.velocity,
            angular_velocity: self.angular_velocity,
            rotation: self.rotation,
            last_jump: self.last_jump,
        }
    }

    fn reconcile(&mut self, snapshot: &LocomotionSnapshot) {
        self.position = snapshot.position;
        self.velocity = snapshot.velocity;
        self.angular_velocity = snapshot.angular_velocity;
        self.rotation = snapshot.rotation;
        self.last_jump = snapshot.last_jump;
        self.checks = Checks::default();
    }
}
