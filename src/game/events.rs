//! Observer Events
//!
//! Best-effort broadcast of observable changes: arrow lifecycle and state
//! transitions, health changes and deaths. The authority appends to an
//! [`EventQueue`]; the transport drains it once per tick.

use serde::{Serialize, Deserialize};

use crate::game::arrow::{ArrowId, ArrowTransition, ArrowView};
use crate::game::clock::Tick;
use crate::game::damageable::{DamageableId, HealthEvent};

/// Observable change. Externally tagged so bincode can decode it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverEventData {
    /// Arrow entered the registry
    ArrowSpawned {
        /// State at spawn
        view: ArrowView,
    },

    /// Arrow changed state
    ArrowChanged {
        /// State after the change
        view: ArrowView,
        /// Edge taken
        transition: ArrowTransition,
    },

    /// Arrow left the registry
    ArrowDespawned {
        /// Arrow removed
        arrow: ArrowId,
    },

    /// Health notification
    Health {
        /// Damageable concerned
        target: DamageableId,
        /// What happened to it
        event: HealthEvent,
    },
}

/// An observer event stamped with its tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObserverEvent {
    /// Tick when the change happened
    pub tick: Tick,

    /// Change
    pub data: ObserverEventData,
}

impl ObserverEvent {
    /// Create a new event.
    pub fn new(tick: Tick, data: ObserverEventData) -> Self {
        Self { tick, data }
    }

    /// Create arrow spawned event.
    pub fn arrow_spawned(tick: Tick, view: ArrowView) -> Self {
        Self::new(tick, ObserverEventData::ArrowSpawned { view })
    }

    /// Create arrow changed event.
    pub fn arrow_changed(tick: Tick, view: ArrowView, transition: ArrowTransition) -> Self {
        Self::new(tick, ObserverEventData::ArrowChanged { view, transition })
    }

    /// Create arrow despawned event.
    pub fn arrow_despawned(tick: Tick, arrow: ArrowId) -> Self {
        Self::new(tick, ObserverEventData::ArrowDespawned { arrow })
    }

    /// Create health event.
    pub fn health(tick: Tick, target: DamageableId, event: HealthEvent) -> Self {
        Self::new(tick, ObserverEventData::Health { target, event })
    }

    /// Whether this is a death notification.
    pub fn is_death(&self) -> bool {
        matches!(self.data, ObserverEventData::Health { event: HealthEvent::Died, .. })
    }
}

/// Outbound event queue.
#[derive(Clone, Debug, Default)]
pub struct EventQueue {
    events: Vec<ObserverEvent>,
}

impl EventQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&mut self, event: ObserverEvent) {
        self.events.push(event);
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Take everything queued so far.
    pub fn drain(&mut self) -> Vec<ObserverEvent> {
        std::mem::take(&mut self.events)
    }
}
