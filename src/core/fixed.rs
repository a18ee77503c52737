//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic fixed-point math for the archery simulation.
//! All operations use integer arithmetic only - no floats in the tick step.
//!
//! ## Format: Q16.16
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Bit Layout: Q16.16 (32-bit signed integer)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  [S][IIIIIIIIIIIIIIII][FFFFFFFFFFFFFFFF]                    │
//! │   │  └──── 16 bits ────┘└──── 16 bits ────┘                 │
//! │   └─ Sign bit                                               │
//! │                                                             │
//! │  Range: -32768.0 to +32767.99998 (approx)                   │
//! │  Precision: 1/65536 ≈ 0.000015 units                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A client replaying its buffered inputs must land on exactly the bits the
//! server produced for the same tick. Integer math gives that on every
//! platform; `f32` does not.

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE; // 65536

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1; // 32768

// =============================================================================
// SIMULATION CONSTANTS (All as integer literals - NO float conversion!)
// =============================================================================

/// Tick duration: 1/60 second = round(65536/60) = 1092
pub const TICK_DURATION: Fixed = 1092;

/// Gravity acceleration: 20.0 = 20 * 65536 = 1310720
pub const GRAVITY: Fixed = 1310720;

/// Character walking speed cap: 6.0 = 393216
pub const WALKING_SPEED: Fixed = 393216;

/// Character walking acceleration: 60.0 = 3932160
pub const WALKING_FORCE: Fixed = 3932160;

/// Airborne speed cap: 4.0 = 262144
pub const AERIAL_SPEED: Fixed = 262144;

/// Airborne acceleration: 25.0 = 1638400
pub const AERIAL_FORCE: Fixed = 1638400;

/// Sprint multiplier on the speed cap: 1.5 = 98304
pub const SPRINT_SPEED_MULTIPLIER: Fixed = 98304;

/// Sprint multiplier on the acceleration: 1.5 = 98304
pub const SPRINT_FORCE_MULTIPLIER: Fixed = 98304;

/// Jump impulse (velocity change): 9.0 = 589824
pub const JUMP_IMPULSE: Fixed = 589824;

/// Below this horizontal speed a grounded, idle character stops: 0.5 = 32768
pub const HORIZONTAL_VELOCITY_CUTOFF: Fixed = 32768;

/// Dive acceleration: 40.0 = 2621440
pub const DIVE_STRENGTH: Fixed = 2621440;

/// Dive speed cap: 15.0 = 983040
pub const DIVE_SPEED: Fixed = 983040;

/// Bow launch speed at full draw: 25.0 = 1638400
pub const BOW_VELOCITY: Fixed = 1638400;

/// Time to reach full draw: 1.0 second
pub const BOW_DRAW_TIME: Fixed = FIXED_ONE;

/// Default character and target health: 100.0 = 6553600
pub const DEFAULT_MAX_HEALTH: Fixed = 6553600;

/// Damage dealt by a normal arrow: 25.0 = 1638400
pub const NORMAL_ARROW_DAMAGE: Fixed = 1638400;

/// Direct damage dealt by a poison arrow: 10.0 = 655360
pub const POISON_ARROW_DAMAGE: Fixed = 655360;

/// Poison damage per tick: 0.25 = 16384
pub const POISON_DAMAGE_PER_TICK: Fixed = 16384;

/// Arrow mass: 0.1 = 6553 (floor)
pub const ARROW_MASS: Fixed = 6553;

/// Character mass: 1.0
pub const CHARACTER_MASS: Fixed = FIXED_ONE;

// =============================================================================
// CORE OPERATIONS (All deterministic, wrapping semantics)
// =============================================================================

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in the tick step.
///
/// # Example
/// ```
/// use fletch::core::fixed::{to_fixed, FIXED_ONE};
/// const MY_VALUE: i32 = to_fixed(2.5);
/// assert_eq!(MY_VALUE, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to float for display/logging.
///
/// # Warning
/// Only use for visual output. NEVER feed the result back into the step.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Convert an integer to fixed-point.
#[inline]
pub const fn from_int(i: i32) -> Fixed {
    i << FIXED_SCALE
}

/// Multiply two fixed-point numbers.
///
/// Uses i64 intermediate to prevent overflow, then truncates.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers.
///
/// Pre-shifts numerator to maintain precision.
/// Returns 0 on divide-by-zero.
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0; // Deterministic: don't panic
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Square root, exact to the last fractional bit.
///
/// Digit-by-digit integer root of `x << 16`, so the result is the floor of
/// the true Q16.16 root. Returns 0 for non-positive inputs.
#[inline]
pub fn fixed_sqrt(x: Fixed) -> Fixed {
    if x <= 0 {
        return 0;
    }

    isqrt_u64((x as u64) << FIXED_SCALE) as Fixed
}

/// Floor of the integer square root.
#[inline]
pub fn isqrt_u64(mut n: u64) -> u64 {
    let mut root: u64 = 0;
    let mut bit: u64 = 1 << 62;
    while bit > n {
        bit >>= 2;
    }

    while bit != 0 {
        if n >= root + bit {
            n -= root + bit;
            root = (root >> 1) + bit;
        } else {
            root >>= 1;
        }
        bit >>= 2;
    }

    root
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 { x.wrapping_neg() } else { x }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b { a } else { b }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b { a } else { b }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

/// Linear interpolation: a + (b - a) * t
/// where t is in fixed-point (0.0 = 0, 1.0 = FIXED_ONE)
#[inline]
pub fn fixed_lerp(a: Fixed, b: Fixed, t: Fixed) -> Fixed {
    let diff = b.wrapping_sub(a);
    a.wrapping_add(fixed_mul(diff, t))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_constants() {
        assert_eq!(FIXED_ONE, 65536);
        assert_eq!(FIXED_HALF, 32768);
        assert_eq!(FIXED_SCALE, 16);
        assert_eq!(from_int(3), 3 * FIXED_ONE);
    }

    #[test]
    fn test_to_fixed() {
        assert_eq!(to_fixed(1.0), FIXED_ONE);
        assert_eq!(to_fixed(0.5), FIXED_HALF);
        assert_eq!(to_fixed(-1.0), -FIXED_ONE);
    }

    #[test]
    fn test_fixed_mul() {
        assert_eq!(fixed_mul(to_fixed(2.0), to_fixed(3.0)), to_fixed(6.0));
        assert_eq!(fixed_mul(FIXED_HALF, FIXED_HALF), to_fixed(0.25));
        assert_eq!(fixed_mul(to_fixed(-2.0), to_fixed(3.0)), to_fixed(-6.0));
    }

    #[test]
    fn test_fixed_div() {
        assert_eq!(fixed_div(to_fixed(6.0), to_fixed(2.0)), to_fixed(3.0));
        assert_eq!(fixed_div(FIXED_ONE, to_fixed(4.0)), to_fixed(0.25));

        // Divide by zero returns 0
        assert_eq!(fixed_div(FIXED_ONE, 0), 0);
    }

    #[test]
    fn test_fixed_sqrt() {
        assert_eq!(fixed_sqrt(to_fixed(4.0)), to_fixed(2.0));
        assert_eq!(fixed_sqrt(to_fixed(400.0)), to_fixed(20.0));
        assert_eq!(fixed_sqrt(to_fixed(0.25)), to_fixed(0.5));

        assert_eq!(fixed_sqrt(0), 0);
        assert_eq!(fixed_sqrt(-FIXED_ONE), 0);
        assert!(fixed_sqrt(1) >= 0);
    }

    #[test]
    fn test_fixed_clamp_and_lerp() {
        assert_eq!(fixed_clamp(to_fixed(5.0), 0, FIXED_ONE), FIXED_ONE);
        assert_eq!(fixed_clamp(to_fixed(-5.0), 0, FIXED_ONE), 0);
        assert_eq!(fixed_lerp(0, to_fixed(10.0), FIXED_HALF), to_fixed(5.0));
    }

    #[test]
    fn test_simulation_constants() {
        assert_eq!(TICK_DURATION, 1092); // round(65536/60)
        assert_eq!(GRAVITY, 20 * FIXED_ONE);
        assert_eq!(BOW_VELOCITY, 25 * FIXED_ONE);
        assert_eq!(DEFAULT_MAX_HEALTH, 100 * FIXED_ONE);
        assert_eq!(SPRINT_SPEED_MULTIPLIER, to_fixed(1.5));
    }
}
