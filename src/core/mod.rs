//! Core deterministic primitives.
//!
//! Everything in this module is integer-only so that a client replaying its
//! buffered inputs reproduces the server's results bit for bit.

pub mod fixed;
pub mod vec2;
pub mod angle;
pub mod hash;

// Re-export core types
pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use vec2::FixedVec2;
pub use angle::Angle;
pub use hash::{compute_state_hash, StateHash, StateHasher};
