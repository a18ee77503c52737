//! Client-Side Prediction and Reconciliation
//!
//! Locomotion and the bow draw share one per-tick protocol, implemented
//! once by [`Predictor`] over any [`Predicted`] entity.
//!
//! ```text
//!  OWNER (client)                           AUTHORITY (server)
//!  ─────────────                            ──────────────────
//!  reconcile(newest snapshot ≤ T)
//!  replay history (T, now)   ──inputs──▶    simulate(remote input or neutral)
//!  capture + simulate(now)                  ───────── post-tick ─────────
//!  record (now, input)       ◀─snapshot──   snapshot(now)
//! ```
//!
//! Newer snapshots supersede older ones; they are never merged. A
//! participant that is both owner and authority simulates once per tick with
//! its own input and never reconciles.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace};

use crate::core::fixed::Fixed;
use crate::core::hash::{StateHash, StateHasher};
use crate::game::clock::Tick;
use crate::game::input::LocalInput;
use crate::game::physics::GroundQuery;

// =============================================================================
// CONTRACT
// =============================================================================

/// Everything a simulation step may read besides the entity and its input.
pub struct SimContext<'a> {
    /// Tick being simulated
    pub tick: Tick,
    /// Tick duration in seconds (Q16.16)
    pub dt: Fixed,
    /// Running on the authority
    pub is_authority: bool,
    /// Re-simulating a buffered input after reconciliation
    pub is_replay: bool,
    /// Raycast capability
    pub ground: &'a dyn GroundQuery,
}

/// An entity simulated with client-side prediction.
pub trait Predicted {
    /// Immutable per-tick input sample.
    type Input: Copy + Debug + PartialEq + Serialize + DeserializeOwned;

    /// Authoritative state needed to resume simulation.
    type Snapshot: Clone + Debug + PartialEq + Serialize + DeserializeOwned;

    /// Read the local input buffer into a sample. Owner only.
    fn capture_input(&self, local: &LocalInput) -> Self::Input;

    /// Sample the authority uses when the owner's input did not arrive.
    fn neutral_input() -> Self::Input;

    /// Advance one tick. Deterministic in (state, input, context).
    fn simulate(&mut self, input: &Self::Input, ctx: &SimContext<'_>);

    /// Capture the current state. Authority, at post-tick.
    fn snapshot(&self) -> Self::Snapshot;

    /// Overwrite local state with a snapshot. Idempotent.
    fn reconcile(&mut self, snapshot: &Self::Snapshot);
}

/// Fingerprint of a snapshot for divergence traces.
pub fn snapshot_fingerprint<S: Serialize>(snapshot: &S) -> Option<StateHash> {
    let bytes = bincode::serialize(snapshot).ok()?;
    let mut hasher = StateHasher::for_snapshot();
    hasher.update_bytes(&bytes);
    Some(hasher.finalize())
}

// =============================================================================
// CONFIG AND STATS
// =============================================================================

/// Prediction tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Unconfirmed inputs kept for replay
    pub history_len: usize,
    /// Past inputs resent with every input packet
    pub input_redundancy: usize,
    /// Remote inputs further ahead than this are dropped
    pub max_input_lead: u32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            history_len: 128,
            input_redundancy: 4,
            max_input_lead: 120,
        }
    }
}

/// Prediction counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionStats {
    /// Snapshots reconciled
    pub applied: u64,
    /// Snapshots dropped for an equal or newer one
    pub superseded: u64,
    /// Reconciled snapshots that differed from the local prediction
    pub corrections: u64,
    /// Authority ticks simulated with neutral input
    pub neutral_ticks: u64,
    /// Inputs re-simulated after reconciliation
    pub replayed: u64,
}

/// Snapshot tagged with the tick it was taken after.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot<S> {
    /// Tick simulated before the snapshot
    pub tick: Tick,
    /// State
    pub state: S,
}

#[derive(Clone, Debug)]
struct HistoryEntry<I, S> {
    tick: Tick,
    input: I,
    predicted: S,
}

// =============================================================================
// PREDICTOR
// =============================================================================

/// Drives a [`Predicted`] entity through the owner/authority tick protocol.
#[derive(Clone, Debug)]
pub struct Predictor<E: Predicted> {
    entity: E,
    is_owner: bool,
    is_authority: bool,
    config: PredictionConfig,
    history: VecDeque<HistoryEntry<E::Input, E::Snapshot>>,
    pending: Option<TickSnapshot<E::Snapshot>>,
    last_confirmed: Option<Tick>,
    last_simulated: Option<Tick>,
    remote_inputs: BTreeMap<Tick, E::Input>,
    outbound_snapshots: Vec<TickSnapshot<E::Snapshot>>,
    stats: PredictionStats,
}

impl<E: Predicted> Predictor<E> {
    /// Wrap an entity with its roles.
    pub fn new(entity: E, is_owner: bool, is_authority: bool, config: PredictionConfig) -> Self {
        Self {
            entity,
            is_owner,
            is_authority,
            config,
            history: VecDeque::with_capacity(config.history_len),
            pending: None,
            last_confirmed: None,
            last_simulated: None,
            remote_inputs: BTreeMap::new(),
            outbound_snapshots: Vec::new(),
            stats: PredictionStats::default(),
        }
    }

    /// The wrapped entity.
    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Mutable entity, for authority-side effects outside the step
    /// (knockback, inventory changes). Never for input handling.
    pub fn entity_mut(&mut self) -> &mut E {
        &mut self.entity
    }

    /// Owns the entity locally.
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    /// Runs the canonical simulation.
    pub fn is_authority(&self) -> bool {
        self.is_authority
    }

    /// Counters.
    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    /// Newest tick reconciled on the owner.
    pub fn last_confirmed(&self) -> Option<Tick> {
        self.last_confirmed
    }

    /// Unconfirmed inputs held for replay.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Tick notification.
    pub fn on_tick(&mut self, local: &LocalInput, ctx: &SimContext<'_>) {
        match (self.is_owner, self.is_authority) {
            (true, true) => {
                let input = self.entity.capture_input(local);
                self.entity.simulate(&input, ctx);
            }
            (true, false) => self.owner_tick(local, ctx),
            (false, true) => self.authority_tick(ctx),
            (false, false) => {}
        }
        self.last_simulated = Some(ctx.tick);
    }

    /// Post-tick notification: the authority queues its snapshot for a
    /// remote owner.
    pub fn on_post_tick(&mut self, tick: Tick) {
        if self.is_authority && !self.is_owner {
            self.outbound_snapshots.push(TickSnapshot {
                tick,
                state: self.entity.snapshot(),
            });
        }
    }

    fn owner_tick(&mut self, local: &LocalInput, ctx: &SimContext<'_>) {
        self.reconcile_pending(ctx);

        let input = self.entity.capture_input(local);
        self.entity.simulate(&input, ctx);
        self.history.push_back(HistoryEntry {
            tick: ctx.tick,
            input,
            predicted: self.entity.snapshot(),
        });
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
    }

    fn reconcile_pending(&mut self, ctx: &SimContext<'_>) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let confirmed = pending.tick;

        let predicted = self
            .history
            .iter()
            .find(|h| h.tick == confirmed)
            .map(|h| &h.predicted);
        if predicted != Some(&pending.state) {
            self.stats.corrections += 1;
            debug!(tick = confirmed, "prediction corrected");
            #[cfg(feature = "debug-tracing")]
            trace!(
                tick = confirmed,
                authoritative = ?snapshot_fingerprint(&pending.state).map(hex::encode),
                predicted = ?predicted.and_then(snapshot_fingerprint).map(hex::encode),
                "snapshot divergence"
            );
        }

        self.entity.reconcile(&pending.state);
        self.stats.applied += 1;
        self.last_confirmed = Some(confirmed);

        while self.history.front().map_or(false, |h| h.tick <= confirmed) {
            self.history.pop_front();
        }

        // Replay what the authority has not confirmed yet
        for entry in self.history.iter_mut() {
            if entry.tick >= ctx.tick {
                break;
            }
            let replay_ctx = SimContext {
                tick: entry.tick,
                dt: ctx.dt,
                is_authority: false,
                is_replay: true,
                ground: ctx.ground,
            };
            self.entity.simulate(&entry.input, &replay_ctx);
            entry.predicted = self.entity.snapshot();
            self.stats.replayed += 1;
        }
        trace!(tick = confirmed, replayed = self.history.len(), "reconciled");
    }

    fn authority_tick(&mut self, ctx: &SimContext<'_>) {
        // Late inputs are useless now
        self.remote_inputs = self.remote_inputs.split_off(&ctx.tick);

        let input = match self.remote_inputs.remove(&ctx.tick) {
            Some(input) => input,
            None => {
                self.stats.neutral_ticks += 1;
                E::neutral_input()
            }
        };
        self.entity.simulate(&input, ctx);
    }

    /// Owner side: accept a snapshot from the authority.
    ///
    /// Keeps only the newest; returns false if the snapshot was superseded.
    pub fn receive_snapshot(&mut self, tick: Tick, state: E::Snapshot) -> bool {
        let newest = self
            .pending
            .as_ref()
            .map(|p| p.tick)
            .into_iter()
            .chain(self.last_confirmed)
            .max();
        if newest.map_or(false, |n| tick <= n) {
            self.stats.superseded += 1;
            debug!(tick, ?newest, "snapshot superseded");
            return false;
        }
        if self.pending.is_some() {
            self.stats.superseded += 1;
        }
        self.pending = Some(TickSnapshot { tick, state });
        true
    }

    /// Authority side: buffer an input for a future tick.
    ///
    /// Duplicates (redundant resends) and inputs for ticks already simulated
    /// are ignored.
    pub fn receive_input(&mut self, tick: Tick, input: E::Input) -> bool {
        if self.last_simulated.map_or(false, |last| tick <= last) {
            return false;
        }
        let horizon = self.last_simulated.unwrap_or(0).saturating_add(self.config.max_input_lead);
        if tick > horizon {
            return false;
        }
        if self.remote_inputs.contains_key(&tick) {
            return false;
        }
        self.remote_inputs.insert(tick, input);
        true
    }

    /// Owner side: the newest `n` unconfirmed inputs, oldest first.
    pub fn recent_inputs(&self, n: usize) -> Vec<(Tick, E::Input)> {
        let skip = self.history.len().saturating_sub(n);
        self.history
            .iter()
            .skip(skip)
            .map(|h| (h.tick, h.input))
            .collect()
    }

    /// Drain snapshots queued at post-tick.
    pub fn take_snapshots(&mut self) -> Vec<TickSnapshot<E::Snapshot>> {
        std::mem::take(&mut self.outbound_snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::TICK_DURATION;
    use crate::game::physics::Terrain;

    /// Counter that adds its input each tick.
    #[derive(Clone, Debug, Default)]
    struct Counter {
        value: i32,
    }

    impl Predicted for Counter {
        type Input = i32;
        type Snapshot = i32;

        fn capture_input(&self, local: &LocalInput) -> i32 {
            local.move_x as i32
        }

        fn neutral_input() -> i32 {
            0
        }

        fn simulate(&mut self, input: &i32, _ctx: &SimContext<'_>) {
            self.value += *input;
        }

        fn snapshot(&self) -> i32 {
            self.value
        }

        fn reconcile(&mut self, snapshot: &i32) {
            self.value = *snapshot;
        }
    }

    fn ctx(ground: &Terrain, tick: Tick, authority: bool) -> SimContext<'_> {
        SimContext { tick, dt: TICK_DURATION, is_authority: authority, is_replay: false, ground }
    }

    fn input(x: i8) -> LocalInput {
        LocalInput::new().with_movement(x, 0)
    }

    #[test]
    fn test_owner_replays_after_reconcile() {
        let ground = Terrain::default();
        let mut owner = Predictor::new(Counter::default(), true, false, PredictionConfig::default());

        for tick in 1..=5 {
            owner.on_tick(&input(1), &ctx(&ground, tick, false));
        }
        assert_eq!(owner.entity().value, 5);

        // Authority saw an extra 10 by tick 2
        assert!(owner.receive_snapshot(2, 12));
        owner.on_tick(&input(1), &ctx(&ground, 6, false));

        // 12 + replay of ticks 3..=5 + tick 6
        assert_eq!(owner.entity().value, 16);
        assert_eq!(owner.stats().corrections, 1);
        assert_eq!(owner.stats().replayed, 3);
        assert_eq!(owner.last_confirmed(), Some(2));
        assert_eq!(owner.history_len(), 4);
    }

    #[test]
    fn test_matching_snapshot_is_not_a_correction() {
        let ground = Terrain::default();
        let mut owner = Predictor::new(Counter::default(), true, false, PredictionConfig::default());
        for tick in 1..=3 {
            owner.on_tick(&input(2), &ctx(&ground, tick, false));
        }
        owner.receive_snapshot(2, 4);
        owner.on_tick(&input(2), &ctx(&ground, 4, false));
        assert_eq!(owner.stats().corrections, 0);
        assert_eq!(owner.entity().value, 8);
    }

    #[test]
    fn test_newer_snapshot_supersedes() {
        let mut owner = Predictor::new(Counter::default(), true, false, PredictionConfig::default());
        assert!(owner.receive_snapshot(5, 50));
        assert!(!owner.receive_snapshot(4, 40));
        assert!(!owner.receive_snapshot(5, 55));
        assert!(owner.receive_snapshot(6, 60));
        assert_eq!(owner.stats().superseded, 3);

        let ground = Terrain::default();
        owner.on_tick(&input(0), &ctx(&ground, 7, false));
        assert_eq!(owner.entity().value, 60);
        // Older than confirmed
        assert!(!owner.receive_snapshot(6, 61));
    }

    #[test]
    fn test_authority_uses_remote_or_neutral() {
        let ground = Terrain::default();
        let mut server = Predictor::new(Counter::default(), false, true, PredictionConfig::default());

        assert!(server.receive_input(1, 5));
        assert!(!server.receive_input(1, 7)); // duplicate
        server.on_tick(&LocalInput::new(), &ctx(&ground, 1, true));
        server.on_tick(&LocalInput::new(), &ctx(&ground, 2, true));
        assert_eq!(server.entity().value, 5);
        assert_eq!(server.stats().neutral_ticks, 1);

        // Too late
        assert!(!server.receive_input(2, 9));

        server.on_post_tick(2);
        let snaps = server.take_snapshots();
        assert_eq!(snaps, vec![TickSnapshot { tick: 2, state: 5 }]);
        assert!(server.take_snapshots().is_empty());
    }

    #[test]
    fn test_owner_authority_simulates_once() {
        let ground = Terrain::default();
        let mut host = Predictor::new(Counter::default(), true, true, PredictionConfig::default());
        host.on_tick(&input(3), &ctx(&ground, 1, true));
        host.on_post_tick(1);
        assert_eq!(host.entity().value, 3);
        assert!(host.take_snapshots().is_empty());
        assert_eq!(host.history_len(), 0);
    }

    #[test]
    fn test_history_is_bounded_and_redundant_inputs() {
        let ground = Terrain::default();
        let config = PredictionConfig { history_len: 4, ..PredictionConfig::default() };
        let mut owner = Predictor::new(Counter::default(), true, false, config);
        for tick in 1..=10 {
            owner.on_tick(&input(tick as i8), &ctx(&ground, tick, false));
        }
        assert_eq!(owner.history_len(), 4);
        assert_eq!(owner.recent_inputs(2), vec![(9, 9), (10, 10)]);
        assert_eq!(owner.recent_inputs(10).len(), 4);
    }

    #[test]
    fn test_snapshot_fingerprint_stable() {
        assert_eq!(snapshot_fingerprint(&42i32), snapshot_fingerprint(&42i32));
        assert_ne!(snapshot_fingerprint(&42i32), snapshot_fingerprint(&43i32));
    }
}
