//! # Fletch
//!
//! Deterministic prediction and reconciliation core for a networked 2D
//! archery platformer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         FLETCH                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── vec2.rs     - 2D vector with fixed-point                │
//! │  ├── angle.rs    - Binary angles and CORDIC trig             │
//! │  └── hash.rs     - State hashing for divergence checks       │
//! │                                                              │
//! │  game/           - Simulation (deterministic)                │
//! │  ├── predicted.rs- Predict / simulate / reconcile            │
//! │  ├── locomotion.rs, bow.rs - Predicted components            │
//! │  ├── arrow.rs    - Arrow state machine                       │
//! │  ├── collector.rs, inventory.rs - Pickup and storage         │
//! │  └── world.rs    - Per-process driver                        │
//! │                                                              │
//! │  network/        - Messages (non-deterministic delivery)     │
//! │  ├── protocol.rs - Message types, JSON and bincode           │
//! │  └── link.rs     - Simulated lossy link                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules never touch floats, wall time or
//! unordered maps. An owner replaying its buffered inputs on top of an
//! authority snapshot reaches the authority's state bit for bit.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use core::vec2::FixedVec2;
pub use core::angle::Angle;
pub use game::input::{LocalInput, MoveInput, DrawInput};
pub use game::world::{World, Role, SimConfig};
pub use game::archer::ParticipantId;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
