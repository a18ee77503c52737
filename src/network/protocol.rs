//! Protocol Messages
//!
//! Wire format between the authority and its owners. Messages serialize as
//! JSON for debugging and bincode for production. Enums are externally
//! tagged so both encodings round-trip.

use serde::{Serialize, Deserialize};

use crate::core::vec2::FixedVec2;
use crate::game::archer::ParticipantId;
use crate::game::bow::BowSnapshot;
use crate::game::clock::Tick;
use crate::game::events::ObserverEvent;
use crate::game::input::{DrawInput, MoveInput};
use crate::game::locomotion::LocomotionSnapshot;

/// Protocol encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON encoding failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encoding failed.
    #[error("bincode: {0}")]
    Binary(#[from] bincode::Error),
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Both controllers' inputs for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPacket {
    /// Tick the input was captured for.
    pub tick: Tick,
    /// Locomotion input.
    pub movement: MoveInput,
    /// Bow input.
    pub bow: DrawInput,
}

/// Messages sent from an owner to the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for an archer.
    Join {
        /// Requesting participant
        participant: ParticipantId,
    },

    /// Recent inputs, oldest first; the newest few are resent every time.
    Inputs {
        /// Sender
        participant: ParticipantId,
        /// Redundant window of inputs
        packets: Vec<InputPacket>,
    },

    /// Leave the session.
    Leave {
        /// Leaving participant
        participant: ParticipantId,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted.
    Welcome {
        /// Participant joined
        participant: ParticipantId,
        /// Index that derives the archer's part ids
        index: u32,
        /// Authority tick at join
        tick: Tick,
        /// Spawn point
        spawn: FixedVec2,
    },

    /// Reconciliation snapshot for one owner.
    Snapshot {
        /// Owner
        participant: ParticipantId,
        /// Tick simulated before the snapshot
        tick: Tick,
        /// Locomotion state
        locomotion: LocomotionSnapshot,
        /// Bow state
        bow: BowSnapshot,
    },

    /// Best-effort observer broadcast.
    Observed {
        /// Events in occurrence order
        events: Vec<ObserverEvent>,
    },
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(bincode::deserialize(data)?)
    }
}
