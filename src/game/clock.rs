//! Tick Clock
//!
//! The process-wide heartbeat. Each tick has two notification points:
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────┐   ┌──────────────────────┐
//! │ advance  │──▶│ Tick (capture + sim)  │──▶│ PostTick (snapshots) │
//! └──────────┘   └───────────────────────┘   └──────────────────────┘
//! ```
//!
//! Subscribers register with a per-subscriber flag so double subscribe and
//! double unsubscribe are no-ops. A subscription requested before the clock
//! exists is dropped and must be retried.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::fixed::{Fixed, FIXED_ONE, fixed_div};

/// Discrete simulation step number.
pub type Tick = u32;

/// Notification point within a tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPhase {
    /// Before integration: input capture, replay, simulate.
    Tick,
    /// After integration: the authority captures snapshots.
    PostTick,
}

/// Identity of a clock subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub u32);

/// Fixed-rate tick source.
#[derive(Clone, Debug)]
pub struct TickClock {
    tick: Tick,
    tick_rate: u32,
    dt: Fixed,
    subscribers: BTreeSet<SubscriberId>,
}

impl TickClock {
    /// Create a clock at `start_tick` running at `tick_rate` Hz.
    pub fn new(start_tick: Tick, tick_rate: u32) -> Self {
        let rate = tick_rate.max(1);
        Self {
            tick: start_tick,
            tick_rate: rate,
            dt: fixed_div(FIXED_ONE, (rate as i32) << 16),
            subscribers: BTreeSet::new(),
        }
    }

    /// Current tick.
    #[inline]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Ticks per second.
    #[inline]
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Duration of one tick in seconds (Q16.16).
    #[inline]
    pub fn dt(&self) -> Fixed {
        self.dt
    }

    /// Move to the next tick and return it.
    pub fn advance(&mut self) -> Tick {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    /// Phases in notification order.
    pub const fn phases() -> [TickPhase; 2] {
        [TickPhase::Tick, TickPhase::PostTick]
    }

    /// Register a subscriber. Returns false if it was already registered.
    pub fn subscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.insert(id)
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id)
    }

    /// Whether `id` receives notifications.
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.contains(&id)
    }

    /// Subscribers in notification order.
    pub fn subscribers(&self) -> impl Iterator<Item = SubscriberId> + '_ {
        self.subscribers.iter().copied()
    }
}

/// A subscriber's handle on the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriberId,
    subscribed: bool,
}

impl Subscription {
    /// Create an inactive subscription.
    pub const fn new(id: SubscriberId) -> Self {
        Self { id, subscribed: false }
    }

    /// Subscriber identity.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the subscription is currently active.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Request the subscribed state.
    ///
    /// Returns true if the clock registration changed. With no clock the
    /// request is ignored and the flag is left as is so a later call can
    /// retry.
    pub fn set(&mut self, clock: Option<&mut TickClock>, subscribe: bool) -> bool {
        if self.subscribed == subscribe {
            return false;
        }
        let Some(clock) = clock else {
            debug!(subscriber = self.id.0, "clock unavailable, subscription deferred");
            return false;
        };
        if subscribe {
            clock.subscribe(self.id);
        } else {
            clock.unsubscribe(self.id);
        }
        self.subscribed = subscribe;
        true
    }
}
