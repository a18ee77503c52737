//! Input Capture and Normalization
//!
//! Raw device state is collected into a [`LocalInput`] by the embedding
//! application. Each predicted entity captures its own immutable sample from
//! it once per tick: [`MoveInput`] for locomotion, [`DrawInput`] for the bow.
//! Axis values are i8 and converted through a lookup table so every
//! participant derives the same Fixed value.

use serde::{Serialize, Deserialize};
use crate::core::fixed::Fixed;
use crate::core::vec2::FixedVec2;

// =============================================================================
// MOVE LOOKUP TABLE (Critical for Determinism)
// =============================================================================

/// Lookup table for converting i8 move input to Fixed.
///
/// # Why a Lookup Table?
///
/// Converting i8 [-127..+127] to Fixed [-1.0..+1.0] requires:
/// `value * 65536 / 127 = value * 516.0...`
///
/// 516.0 is not an integer, so we use floor division:
/// `(value * 65536) / 127`
///
/// This lookup table precomputes all 256 possible values for
/// deterministic, fast conversion.
///
/// # Special Values
///
/// - Index 128 (-128 as i8) = 0 (represents "no input" / joystick released)
pub static MOVE_LUT: [Fixed; 256] = {
    let mut lut = [0i32; 256];
    let mut i = 0i32;
    while i < 256 {
        // Treat as signed: 0..127 = positive, 128..255 = negative (-128..-1)
        let signed = if i < 128 { i } else { i - 256 };

        // -128 is reserved for "no input" -> map to 0
        if signed == -128 {
            lut[i as usize] = 0;
        } else {
            // Scale [-127..+127] to [-65536..+65536] (FIXED_ONE)
            // Floor division: (signed * 65536) / 127
            lut[i as usize] = (signed * 65536) / 127;
        }
        i += 1;
    }
    lut
};

/// Convert i8 move input to Fixed using lookup table.
#[inline]
pub fn move_to_fixed(input: i8) -> Fixed {
    MOVE_LUT[(input as u8) as usize]
}

// =============================================================================
// INPUT TYPES
// =============================================================================

/// Special axis value: stick released / no input.
pub const NO_INPUT: i8 = -128;

/// Raw per-tick input collected from devices.
///
/// Written by the input collector, read by `capture_input`. Never consumed
/// by the simulation directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalInput {
    /// Movement X: -127 (left) to +127 (right)
    pub move_x: i8,
    /// Movement Y: -127 (dive) to +127 (jump)
    pub move_y: i8,
    /// Aim direction X
    pub aim_x: i8,
    /// Aim direction Y
    pub aim_y: i8,
    /// Action flags:
    /// - Bit 0: Sprint held
    /// - Bit 1: Draw held
    /// - Bit 2: Cancel pressed
    pub flags: u8,
}

impl Default for LocalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalInput {
    /// Sprint flag bit
    pub const FLAG_SPRINT: u8 = 0x01;

    /// Draw flag bit
    pub const FLAG_DRAW: u8 = 0x02;

    /// Cancel flag bit
    pub const FLAG_CANCEL: u8 = 0x04;

    /// Idle input aiming right.
    pub const fn new() -> Self {
        Self {
            move_x: NO_INPUT,
            move_y: NO_INPUT,
            aim_x: 127,
            aim_y: 0,
            flags: 0,
        }
    }

    /// Builder: movement axes.
    pub const fn with_movement(mut self, move_x: i8, move_y: i8) -> Self {
        self.move_x = move_x;
        self.move_y = move_y;
        self
    }

    /// Builder: aim direction.
    pub const fn with_aim(mut self, aim_x: i8, aim_y: i8) -> Self {
        self.aim_x = aim_x;
        self.aim_y = aim_y;
        self
    }

    /// Set or clear a flag.
    #[inline]
    pub fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Builder: set a flag.
    pub fn with_flag(mut self, flag: u8) -> Self {
        self.set_flag(flag, true);
        self
    }

    /// Check a flag.
    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Locomotion sample for this tick.
    pub fn movement(&self) -> MoveInput {
        MoveInput {
            move_x: self.move_x,
            move_y: self.move_y,
            sprint: self.has_flag(Self::FLAG_SPRINT),
        }
    }

    /// Bow sample for this tick.
    pub fn draw(&self) -> DrawInput {
        let mut flags = 0;
        if self.has_flag(Self::FLAG_DRAW) {
            flags |= DrawInput::FLAG_DRAW;
        }
        if self.has_flag(Self::FLAG_CANCEL) {
            flags |= DrawInput::FLAG_CANCEL;
        }
        DrawInput {
            aim_x: self.aim_x,
            aim_y: self.aim_y,
            flags,
        }
    }
}

/// Locomotion input sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInput {
    /// Horizontal axis
    pub move_x: i8,
    /// Vertical axis: positive jumps, negative dives
    pub move_y: i8,
    /// Sprint held
    pub sprint: bool,
}

impl MoveInput {
    /// No movement, no sprint.
    pub const NEUTRAL: Self = Self {
        move_x: NO_INPUT,
        move_y: NO_INPUT,
        sprint: false,
    };

    /// Movement as a Fixed vector in [-1, 1] per axis.
    #[inline]
    pub fn direction(&self) -> FixedVec2 {
        FixedVec2 {
            x: move_to_fixed(self.move_x),
            y: move_to_fixed(self.move_y),
        }
    }
}

/// Bow input sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawInput {
    /// Aim direction X
    pub aim_x: i8,
    /// Aim direction Y
    pub aim_y: i8,
    /// Draw/cancel/neutral flags
    pub flags: u8,
}

impl DrawInput {
    /// Draw held
    pub const FLAG_DRAW: u8 = 0x01;

    /// Cancel pressed
    pub const FLAG_CANCEL: u8 = 0x02;

    /// Substituted by the authority when no input arrived in time
    pub const FLAG_NEUTRAL: u8 = 0x80;

    /// Hold everything as is.
    pub const NEUTRAL: Self = Self {
        aim_x: 0,
        aim_y: 0,
        flags: Self::FLAG_NEUTRAL,
    };

    /// Draw held this tick.
    #[inline]
    pub fn draw(&self) -> bool {
        self.flags & Self::FLAG_DRAW != 0
    }

    /// Cancel pressed this tick.
    #[inline]
    pub fn cancel(&self) -> bool {
        self.flags & Self::FLAG_CANCEL != 0
    }

    /// Whether this is the authority's stand-in for missing input.
    #[inline]
    pub fn is_neutral(&self) -> bool {
        self.flags & Self::FLAG_NEUTRAL != 0
    }

    /// Aim as a Fixed vector.
    #[inline]
    pub fn aim(&self) -> FixedVec2 {
        FixedVec2 {
            x: move_to_fixed(self.aim_x),
            y: move_to_fixed(self.aim_y),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
