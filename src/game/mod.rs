//! Game Logic Module
//!
//! All simulation code. Deterministic given the same inputs and snapshots.
//!
//! ## Module Structure
//!
//! - `clock`: Tick counter and phase subscriptions
//! - `input`: Input capture and per-controller samples
//! - `predicted`: Owner prediction, authority simulation, reconciliation
//! - `locomotion`: Character movement
//! - `bow`: Draw, aim and release
//! - `arrow`: Arrow lifecycle state machine
//! - `inventory`: Arrow holders (quiver; the bow is the other one)
//! - `registry`: Live arrows by id
//! - `collector`: Proximity pickup
//! - `damageable`: Health and damage over time
//! - `physics`: Colliders, contacts and terrain raycasts
//! - `archer`: One participant's character
//! - `world`: Per-process simulation driver
//! - `events`: Observer events for remote participants

pub mod clock;
pub mod input;
pub mod predicted;
pub mod physics;
pub mod damageable;
pub mod arrow;
pub mod inventory;
pub mod registry;
pub mod locomotion;
pub mod bow;
pub mod collector;
pub mod archer;
pub mod world;
pub mod events;

// Re-export key types
pub use clock::{Tick, TickClock, TickPhase};
pub use input::{LocalInput, MoveInput, DrawInput, MOVE_LUT};
pub use predicted::{Predicted, Predictor, PredictionConfig, SimContext};
pub use arrow::{Arrow, ArrowId, ArrowKind, ArrowState, ArrowError};
pub use inventory::{ArrowInventory, InventoryId, Quiver};
pub use locomotion::{Locomotion, LocomotionConfig};
pub use bow::{Bow, BowConfig};
pub use archer::{Archer, ParticipantId};
pub use world::{World, Role, SimConfig, WorldError};
pub use events::{ObserverEvent, ObserverEventData};
