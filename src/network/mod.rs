//! Network Layer
//!
//! Wire messages between the authority and its owners, plus an in-memory
//! link for local runs. Transport-agnostic: all game logic runs through
//! `game/`.

pub mod protocol;
pub mod link;

pub use protocol::{ClientMessage, ServerMessage, InputPacket, ProtocolError};
pub use link::{Link, LinkConfig, LinkStats};
