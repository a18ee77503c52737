//! Binary Angles
//!
//! Rotation is stored as a binary angle: one full turn is 65536 units, so
//! wrap-around is plain integer wrapping and every platform agrees on it.
//! `atan2`, `sin` and `cos` use a 16-step CORDIC with integer shifts only.
//!
//! ```text
//!        16384 (90°)
//!            │
//!  ±32768 ───┼─── 0
//!            │
//!       -16384 (-90°)
//! ```

use std::fmt;
use serde::{Serialize, Deserialize};

use super::fixed::{Fixed, FIXED_ONE, fixed_mul};
use super::vec2::FixedVec2;

/// Units in one full turn.
pub const FULL_TURN: i32 = 1 << 16;

/// Units in half a turn (180°).
pub const HALF_TURN: i32 = FULL_TURN >> 1;

/// Units in a quarter turn (90°).
pub const QUARTER_TURN: i32 = FULL_TURN >> 2;

/// atan(2^-i) in binary angle units.
const CORDIC_ATAN: [i32; 16] = [
    8192, 4836, 2555, 1297, 651, 326, 163, 81,
    41, 20, 10, 5, 3, 1, 1, 0,
];

/// CORDIC gain compensation: 0.607253 * 65536
const CORDIC_GAIN: i64 = 39797;

/// Wrap raw units into [-32768, 32768).
#[inline]
fn wrap(units: i32) -> i32 {
    ((units.wrapping_add(HALF_TURN)) & (FULL_TURN - 1)) - HALF_TURN
}

/// A rotation in binary angle units, always normalised to [-180°, 180°).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Angle(i32);

impl Angle {
    /// Zero rotation (pointing along +X).
    pub const ZERO: Self = Self(0);

    /// Quarter turn counter-clockwise (pointing along +Y).
    pub const UP: Self = Self(QUARTER_TURN);

    /// Create from raw binary angle units (wrapped).
    #[inline]
    pub fn from_units(units: i32) -> Self {
        Self(wrap(units))
    }

    /// Create from whole degrees. Initialization only.
    #[inline]
    pub fn from_degrees(degrees: i32) -> Self {
        Self::from_units(((degrees as i64 * FULL_TURN as i64) / 360) as i32)
    }

    /// Raw units in [-32768, 32768).
    #[inline]
    pub const fn units(self) -> i32 {
        self.0
    }

    /// Degrees for display.
    pub fn to_degrees(self) -> f32 {
        self.0 as f32 * 360.0 / FULL_TURN as f32
    }

    /// Direction of a vector. The zero vector maps to `Angle::ZERO`.
    pub fn of_vector(v: FixedVec2) -> Self {
        Self(atan2(v.y, v.x))
    }

    /// Unit vector pointing along this angle.
    pub fn to_unit_vector(self) -> FixedVec2 {
        let (cos, sin) = cos_sin(self.0);
        FixedVec2::new(cos, sin)
    }

    /// Cosine in Q16.16.
    #[inline]
    pub fn cos(self) -> Fixed {
        cos_sin(self.0).0
    }

    /// Sine in Q16.16.
    #[inline]
    pub fn sin(self) -> Fixed {
        cos_sin(self.0).1
    }

    /// Shortest signed difference `target - self`.
    #[inline]
    pub fn delta_to(self, target: Self) -> i32 {
        wrap(target.0.wrapping_sub(self.0))
    }

    /// Unsigned angular distance, in units.
    #[inline]
    pub fn distance_to(self, target: Self) -> i32 {
        self.delta_to(target).abs()
    }

    /// Rotate toward `target` along the short arc.
    ///
    /// Covers `fraction` (Q16.16, 0..=1) of the remaining difference, but
    /// never more than `max_step` units in one call.
    pub fn rotate_toward(self, target: Self, fraction: Fixed, max_step: i32) -> Self {
        let delta = self.delta_to(target);
        let t = fraction.clamp(0, FIXED_ONE);
        let mut step = fixed_mul(delta, t);
        // Truncation toward zero can stall short of the target
        if step == 0 && delta != 0 && t > 0 {
            step = delta.signum();
        }
        let limit = max_step.max(0);
        let step = step.clamp(-limit, limit);
        Self::from_units(self.0.wrapping_add(step))
    }

    /// Rotate a vector by this angle.
    pub fn rotate(self, v: FixedVec2) -> FixedVec2 {
        let (c, s) = cos_sin(self.0);
        FixedVec2::new(
            fixed_mul(v.x, c).wrapping_sub(fixed_mul(v.y, s)),
            fixed_mul(v.x, s).wrapping_add(fixed_mul(v.y, c)),
        )
    }
}

impl fmt::Debug for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Angle({:.2}°)", self.to_degrees())
    }
}

/// CORDIC vectoring: angle of (x, y) in binary units.
fn atan2(y: Fixed, x: Fixed) -> i32 {
    if x == 0 && y == 0 {
        return 0;
    }

    let mut x = x as i64;
    let mut y = y as i64;
    let mut z: i64 = 0;

    // Bring into the right half-plane
    if x < 0 {
        x = -x;
        y = -y;
        z = HALF_TURN as i64;
    }

    for (i, step) in CORDIC_ATAN.iter().enumerate() {
        let xs = x >> i;
        let ys = y >> i;
        if y > 0 {
            x += ys;
            y -= xs;
            z += *step as i64;
        } else {
            x -= ys;
            y += xs;
            z -= *step as i64;
        }
    }

    wrap(z as i32)
}

/// CORDIC rotation: (cos, sin) of a binary angle in Q16.16.
fn cos_sin(units: i32) -> (Fixed, Fixed) {
    let mut z = wrap(units) as i64;
    let mut flip = false;

    // Fold into [-90°, 90°]
    if z > QUARTER_TURN as i64 {
        z -= HALF_TURN as i64;
        flip = true;
    } else if z < -(QUARTER_TURN as i64) {
        z += HALF_TURN as i64;
        flip = true;
    }

    let mut x: i64 = CORDIC_GAIN;
    let mut y: i64 = 0;

    for (i, step) in CORDIC_ATAN.iter().enumerate() {
        let xs = x >> i;
        let ys = y >> i;
        if z >= 0 {
            x -= ys;
            y += xs;
            z -= *step as i64;
        } else {
            x += ys;
            y -= xs;
            z += *step as i64;
        }
    }

    let (c, s) = (x as Fixed, y as Fixed);
    if flip { (-c, -s) } else { (c, s) }
}

/// Angle between a direction and +X, ignoring sign.
pub fn unsigned_angle_from_right(v: FixedVec2) -> Angle {
    let a = atan2(v.y, v.x);
    Angle(a.abs().min(HALF_TURN - 1))
}
