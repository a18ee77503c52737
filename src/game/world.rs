//! World
//!
//! The simulation driver for one participant process. It owns the clock,
//! the archers, the arrow registry, the targets and the outbound event
//! queue, and runs one step per tick:
//!
//! ```text
//! TICK       archers: locomotion, then bow (owner predicts, authority simulates)
//! AUTHORITY  launch released arrows
//! ALL        arrows: flight alignment, nock pinning, stuck-follow
//! AUTHORITY  contacts -> impacts -> damage + knockback
//! AUTHORITY  collectors, restock, poison, out-of-bounds cleanup
//! POST_TICK  snapshots queued for remote owners
//! ```
//!
//! The same type serves the server, a listen-server host and a client; the
//! [`Role`] decides which phases run.

use std::collections::BTreeMap;
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::fixed::{Fixed, fixed_div, from_int, to_fixed, DEFAULT_MAX_HEALTH};
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::vec2::FixedVec2;
use crate::game::archer::{Archer, ParticipantId};
use crate::game::arrow::{ArrowConfig, ArrowId, ArrowKind, ArrowState, Impact};
use crate::game::bow::{Bow, BowConfig};
use crate::game::clock::{Tick, TickClock};
use crate::game::collector::CollectorConfig;
use crate::game::damageable::{Damageable, DamageableId, HealthEvent};
use crate::game::events::{EventQueue, ObserverEvent, ObserverEventData};
use crate::game::input::LocalInput;
use crate::game::inventory::{Anchor, InventoryId};
use crate::game::locomotion::LocomotionConfig;
use crate::game::physics::{Aabb, Collider, ColliderId, ColliderKind, ContactEvent, ContactTracker, Terrain};
use crate::game::predicted::{PredictionConfig, Predicted, SimContext};
use crate::game::registry::ArrowRegistry;
use crate::network::protocol::{ClientMessage, InputPacket, ProtocolError, ServerMessage};

/// First collider id used for static targets.
pub const TARGET_COLLIDER_BASE: u32 = 1 << 17;

/// First damageable id used for static targets. Archers use their index.
pub const TARGET_DAMAGEABLE_BASE: u32 = 1 << 16;

/// Depth of the surface colliders generated from terrain segments.
const SURFACE_THICKNESS: Fixed = 1 << 16;

// =============================================================================
// CONFIG
// =============================================================================

/// Simulation configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Ticks per second
    pub tick_rate: u32,
    /// Movement tuning
    pub locomotion: LocomotionConfig,
    /// Bow tuning
    pub bow: BowConfig,
    /// Arrow tuning
    pub arrow: ArrowConfig,
    /// Pickup tuning
    pub collector: CollectorConfig,
    /// Prediction tuning
    pub prediction: PredictionConfig,
    /// Quiver slots per archer
    pub quiver_capacity: usize,
    /// Arrows each archer starts with, in quiver order
    pub loadout: Vec<ArrowKind>,
    /// Archer health
    pub max_health: Fixed,
    /// Loose arrows outside these bounds are despawned
    pub bounds: Aabb,
    /// How far ahead of the welcome tick a client starts its clock
    pub client_lead_ticks: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::TICK_RATE,
            locomotion: LocomotionConfig::default(),
            bow: BowConfig::default(),
            arrow: ArrowConfig::default(),
            collector: CollectorConfig::default(),
            prediction: PredictionConfig::default(),
            quiver_capacity: 8,
            loadout: vec![ArrowKind::Normal, ArrowKind::Normal, ArrowKind::Normal, ArrowKind::Poison],
            max_health: DEFAULT_MAX_HEALTH,
            bounds: Aabb::from_center(FixedVec2::ZERO, FixedVec2::from_ints(200, 100)),
            client_lead_ticks: 8,
        }
    }
}

impl SimConfig {
    /// Defaults overridden by `FLETCH_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(rate) = env_parse::<u32>("FLETCH_TICK_RATE") {
            config.tick_rate = rate.max(1);
        }
        if let Some(ticks) = env_parse::<i32>("FLETCH_DRAW_TICKS") {
            config.bow.draw_time = fixed_div(from_int(ticks.max(1)), from_int(config.tick_rate as i32));
        }
        if let Some(ticks) = env_parse::<u32>("FLETCH_BOW_COOLDOWN_TICKS") {
            config.bow.cooldown_ticks = ticks;
        }
        if let Some(range) = env_parse::<f64>("FLETCH_COLLECTOR_RANGE") {
            config.collector.range = to_fixed(range);
        }
        if let Some(len) = env_parse::<usize>("FLETCH_HISTORY_LEN") {
            config.prediction.history_len = len.max(1);
        }
        if let Some(n) = env_parse::<usize>("FLETCH_INPUT_REDUNDANCY") {
            config.prediction.input_redundancy = n.max(1);
        }
        config
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

// =============================================================================
// ROLES, ERRORS, TARGETS
// =============================================================================

/// What this process is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Authority with only remote owners.
    Server,
    /// Authority that also owns one archer.
    Host {
        /// Locally controlled participant
        local: ParticipantId,
    },
    /// Predicting owner of one archer.
    Client {
        /// Locally controlled participant
        local: ParticipantId,
    },
}

impl Role {
    /// Runs the canonical simulation.
    pub fn is_authority(&self) -> bool {
        !matches!(self, Role::Client { .. })
    }

    /// Locally controlled participant.
    pub fn local(&self) -> Option<ParticipantId> {
        match self {
            Role::Server => None,
            Role::Host { local } | Role::Client { local } => Some(*local),
        }
    }
}

/// World errors.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// No archer for this participant.
    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    /// Participant already has an archer.
    #[error("participant {0} already joined")]
    AlreadyJoined(ParticipantId),

    /// Message kind not accepted by this role.
    #[error("{kind} messages are not accepted by a {role:?} world")]
    WrongRole {
        /// Message kind
        kind: &'static str,
        /// This world's role
        role: Role,
    },

    /// Stepping before the clock exists.
    #[error("clock not started")]
    ClockNotStarted,

    /// Encoding failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Where an outbound server message goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// One participant.
    Participant(ParticipantId),
    /// Everyone.
    All,
}

/// A static damageable target.
#[derive(Clone, Debug)]
pub struct Target {
    /// Health
    pub health: Damageable,
    /// Collider
    pub collider: Collider,
}

// =============================================================================
// WORLD
// =============================================================================

/// One process's simulation.
pub struct World {
    role: Role,
    config: SimConfig,
    clock: Option<TickClock>,
    terrain: Terrain,
    surfaces: Vec<Collider>,
    archers: BTreeMap<ParticipantId, Archer>,
    targets: BTreeMap<DamageableId, Target>,
    arrows: ArrowRegistry,
    contacts: ContactTracker<ArrowId>,
    events: EventQueue,
    next_index: u32,
    local_input: LocalInput,
}

impl World {
    /// World over `terrain`. The clock is started separately.
    pub fn new(role: Role, config: SimConfig, terrain: Terrain) -> Self {
        let surfaces = terrain.surface_colliders(0, SURFACE_THICKNESS);
        Self {
            role,
            config,
            clock: None,
            terrain,
            surfaces,
            archers: BTreeMap::new(),
            targets: BTreeMap::new(),
            arrows: ArrowRegistry::new(),
            contacts: ContactTracker::new(),
            events: EventQueue::new(),
            next_index: 0,
            local_input: LocalInput::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current tick, once the clock runs.
    pub fn tick(&self) -> Option<Tick> {
        self.clock.as_ref().map(TickClock::tick)
    }

    /// Archer of a participant.
    pub fn archer(&self, participant: ParticipantId) -> Option<&Archer> {
        self.archers.get(&participant)
    }

    /// All archers in participant order.
    pub fn archers(&self) -> impl Iterator<Item = &Archer> {
        self.archers.values()
    }

    /// Static target.
    pub fn target(&self, id: DamageableId) -> Option<&Target> {
        self.targets.get(&id)
    }

    /// Live arrows.
    pub fn arrows(&self) -> &ArrowRegistry {
        &self.arrows
    }

    /// Input the local owner captures on the next tick.
    pub fn set_local_input(&mut self, input: LocalInput) {
        self.local_input = input;
    }

    /// Take queued observer events (authority: to broadcast, client: to display).
    pub fn drain_events(&mut self) -> Vec<ObserverEvent> {
        self.events.drain()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Create the clock at `start_tick`; retries deferred activations.
    pub fn start(&mut self, start_tick: Tick) {
        if self.clock.is_none() {
            self.clock = Some(TickClock::new(start_tick, self.config.tick_rate));
            info!(tick = start_tick, role = ?self.role, "clock started");
        }
        for archer in self.archers.values_mut() {
            archer.on_activate(self.clock.as_mut());
        }
    }

    fn current_tick(&self) -> Tick {
        self.tick().unwrap_or(0)
    }

    fn spawn_point(&self, index: u32) -> FixedVec2 {
        FixedVec2::new(
            from_int(-10 + (index % 8) as i32 * 3),
            self.config.locomotion.half_height,
        )
    }

    /// Add an archer with the next free index; the authority also stocks
    /// its quiver from the loadout.
    pub fn add_archer(&mut self, participant: ParticipantId, spawn: FixedVec2) -> Result<u32, WorldError> {
        let index = self.next_index;
        self.insert_archer(participant, index, spawn)?;
        Ok(index)
    }

    fn insert_archer(&mut self, participant: ParticipantId, index: u32, spawn: FixedVec2) -> Result<(), WorldError> {
        if self.archers.contains_key(&participant) {
            return Err(WorldError::AlreadyJoined(participant));
        }
        let authority = self.role.is_authority();
        let is_owner = self.role.local() == Some(participant);
        let mut archer = Archer::new(participant, index, spawn, &self.config, is_owner, authority);

        if authority {
            let tick = self.current_tick();
            for kind in self.config.loadout.clone() {
                let id = self.spawn_arrow(kind, spawn);
                archer.stock(&mut self.arrows, id, tick);
            }
        }
        archer.on_activate(self.clock.as_mut());
        self.next_index = self.next_index.max(index + 1);
        self.archers.insert(participant, archer);
        Ok(())
    }

    /// Remove an archer; the authority despawns the arrows it held.
    pub fn remove_archer(&mut self, participant: ParticipantId) -> Result<(), WorldError> {
        let mut archer = self
            .archers
            .remove(&participant)
            .ok_or(WorldError::UnknownParticipant(participant))?;
        archer.on_deactivate(self.clock.as_mut());
        if self.role.is_authority() {
            let tick = self.current_tick();
            for id in archer.held_arrows() {
                self.despawn_arrow(tick, id);
            }
        }
        info!(%participant, "archer removed");
        Ok(())
    }

    /// Add a static target; returns its damageable id.
    pub fn add_target(&mut self, center: FixedVec2, half_extents: FixedVec2, max_health: Fixed) -> DamageableId {
        let n = self.targets.len() as u32;
        let id = DamageableId(TARGET_DAMAGEABLE_BASE + n);
        let collider = Collider {
            id: ColliderId(TARGET_COLLIDER_BASE + n),
            kind: ColliderKind::Damageable(id),
            bounds: Aabb::from_center(center, half_extents),
            velocity: FixedVec2::ZERO,
            mass: 0,
        };
        self.targets.insert(id, Target { health: Damageable::new(id, max_health), collider });
        id
    }

    /// Spawn an unowned arrow. Authority only.
    pub fn spawn_arrow(&mut self, kind: ArrowKind, position: FixedVec2) -> ArrowId {
        let tick = self.current_tick();
        let id = self.arrows.spawn(kind, position);
        if let Some(arrow) = self.arrows.get(id) {
            info!(arrow = id.0, ?kind, tick, "arrow spawned");
            self.events.push(ObserverEvent::arrow_spawned(tick, arrow.view()));
        }
        id
    }

    fn despawn_arrow(&mut self, tick: Tick, id: ArrowId) {
        if self.arrows.despawn(id).is_some() {
            info!(arrow = id.0, tick, "arrow despawned");
            self.contacts.forget(id);
            self.events.push(ObserverEvent::arrow_despawned(tick, id));
        }
    }

    // -------------------------------------------------------------------------
    // Step
    // -------------------------------------------------------------------------

    /// Run one tick. Returns the tick simulated.
    pub fn step(&mut self) -> Result<Tick, WorldError> {
        let clock = self.clock.as_mut().ok_or(WorldError::ClockNotStarted)?;
        let tick = clock.advance();
        let dt = clock.dt();
        let authority = self.role.is_authority();

        // Tick phase
        for archer in self.archers.values_mut().filter(|a| a.is_active()) {
            let ctx = SimContext {
                tick,
                dt,
                is_authority: authority,
                is_replay: false,
                ground: &self.terrain,
            };
            archer.on_tick(&self.local_input, &ctx);
        }

        if authority {
            self.launch_released();
        }
        self.update_arrows(dt);

        if authority {
            let impacts = self.detect_contacts();
            self.apply_impacts(&impacts);
            for archer in self.archers.values_mut().filter(|a| a.is_active()) {
                archer.collect(&mut self.arrows, tick);
                archer.restock(&mut self.arrows, tick);
            }
            for archer in self.archers.values_mut() {
                archer.health_mut().tick_effects();
            }
            for target in self.targets.values_mut() {
                target.health.tick_effects();
            }
            self.cleanup(tick);
        }
        self.flush_events(tick);

        // Post-tick phase
        for archer in self.archers.values_mut().filter(|a| a.is_active()) {
            archer.on_post_tick(tick);
        }
        Ok(tick)
    }

    fn launch_released(&mut self) {
        for archer in self.archers.values_mut() {
            let bow_id = archer.ids().bow;
            let Some(order) = archer.bow_mut().entity_mut().take_release() else {
                continue;
            };
            match self.arrows.get_mut(order.arrow) {
                Some(arrow) => {
                    if let Err(e) = arrow.release(bow_id, order.position, order.velocity, order.ignore) {
                        warn!(arrow = order.arrow.0, error = %e, "release order refused");
                    }
                }
                None => warn!(arrow = order.arrow.0, "release order for a missing arrow"),
            }
        }
    }

    fn update_arrows(&mut self, dt: Fixed) {
        let anchors: BTreeMap<InventoryId, Anchor> = self
            .archers
            .values()
            .map(|a| (a.ids().bow, a.nock_anchor()))
            .collect();
        let parents: BTreeMap<ColliderId, FixedVec2> = self
            .archers
            .values()
            .map(|a| (a.ids().collider, a.position()))
            .chain(self.targets.values().map(|t| (t.collider.id, t.collider.bounds.center())))
            .collect();

        for arrow in self.arrows.iter_mut() {
            match arrow.state() {
                ArrowState::Flight => arrow.update_flight(dt, &self.config.arrow),
                ArrowState::Nock => {
                    if let Some(anchor) = arrow.owner().and_then(|o| anchors.get(&o)) {
                        arrow.pin_to(anchor.position, anchor.rotation);
                    }
                }
                ArrowState::Stuck => {
                    if let Some(center) = arrow.attachment().and_then(|a| parents.get(&a.collider)) {
                        arrow.follow_parent(*center);
                    }
                }
                ArrowState::Quiver => {}
            }
        }
    }

    fn detect_contacts(&mut self) -> Vec<Impact> {
        let mut colliders = self.surfaces.clone();
        colliders.extend(self.archers.values().map(Archer::collider));
        colliders.extend(self.targets.values().map(|t| t.collider.clone()));

        let bodies: Vec<_> = self
            .arrows
            .iter()
            .filter(|a| matches!(a.state(), ArrowState::Flight | ArrowState::Stuck))
            .map(|a| (a.id(), a.position(), a.velocity()))
            .collect();

        let mut impacts = Vec::new();
        for event in self.contacts.update(bodies, &colliders) {
            match event {
                ContactEvent::Begin { body, contact } => {
                    let Some(arrow) = self.arrows.get_mut(body) else { continue };
                    if let Some(impact) = arrow.on_contact_begin(&contact, &self.config.arrow) {
                        debug!(arrow = body.0, collider = impact.collider.0, "arrow impact");
                        impacts.push(impact);
                    }
                }
                ContactEvent::End { body, collider } => {
                    if let Some(arrow) = self.arrows.get_mut(body) {
                        arrow.on_contact_end(collider);
                    }
                }
            }
        }
        impacts
    }

    fn apply_impacts(&mut self, impacts: &[Impact]) {
        for hit in impacts.iter().filter_map(|i| i.hit) {
            if let Some(archer) = self.archers.values_mut().find(|a| a.ids().body == hit.target) {
                let health = archer.health_mut();
                health.damage(hit.damage);
                if let Some((per_tick, ticks)) = hit.poison {
                    health.apply_poison(per_tick, ticks);
                }
                archer.locomotion_mut().entity_mut().apply_impulse(hit.knockback, 0);
            } else if let Some(target) = self.targets.get_mut(&hit.target) {
                target.health.damage(hit.damage);
                if let Some((per_tick, ticks)) = hit.poison {
                    target.health.apply_poison(per_tick, ticks);
                }
            }
        }
    }

    fn cleanup(&mut self, tick: Tick) {
        for id in self.arrows.despawn_out_of_bounds(&self.config.bounds) {
            info!(arrow = id.0, tick, "arrow left the world");
            self.contacts.forget(id);
            self.events.push(ObserverEvent::arrow_despawned(tick, id));
        }
        for archer in self.archers.values_mut() {
            archer.quiver_mut().retain_live(&self.arrows);
        }
    }

    fn flush_events(&mut self, tick: Tick) {
        let authority = self.role.is_authority();
        for arrow in self.arrows.iter_mut() {
            for transition in arrow.take_transitions() {
                if authority {
                    self.events.push(ObserverEvent::arrow_changed(tick, arrow.view(), transition));
                }
            }
        }

        let bodies = self
            .archers
            .values_mut()
            .map(|a| a.health_mut())
            .chain(self.targets.values_mut().map(|t| &mut t.health));
        for health in bodies {
            let target = health.id();
            for event in health.take_events() {
                if event == HealthEvent::Died {
                    info!(target = target.0, tick, "died");
                }
                self.events.push(ObserverEvent::health(tick, target, event));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Messages
    // -------------------------------------------------------------------------

    /// Authority: handle a message from an owner. A join is answered.
    pub fn receive_client(&mut self, message: ClientMessage) -> Result<Option<ServerMessage>, WorldError> {
        if !self.role.is_authority() {
            return Err(WorldError::WrongRole { kind: "client", role: self.role });
        }
        match message {
            ClientMessage::Join { participant } => {
                let index = self.next_index;
                let spawn = self.spawn_point(index);
                self.insert_archer(participant, index, spawn)?;
                Ok(Some(ServerMessage::Welcome {
                    participant,
                    index,
                    tick: self.current_tick(),
                    spawn,
                }))
            }
            ClientMessage::Inputs { participant, packets } => {
                let archer = self.archers.get_mut(&participant).ok_or_else(|| {
                    warn!(%participant, "inputs from unknown participant");
                    WorldError::UnknownParticipant(participant)
                })?;
                for packet in packets {
                    archer.locomotion_mut().receive_input(packet.tick, packet.movement);
                    archer.bow_mut().receive_input(packet.tick, packet.bow);
                }
                Ok(None)
            }
            ClientMessage::Leave { participant } => {
                self.remove_archer(participant)?;
                Ok(None)
            }
        }
    }

    /// Client: handle a message from the authority.
    pub fn receive_server(&mut self, message: ServerMessage) -> Result<(), WorldError> {
        if self.role.is_authority() {
            return Err(WorldError::WrongRole { kind: "server", role: self.role });
        }
        match message {
            ServerMessage::Welcome { participant, index, tick, spawn } => {
                if self.role.local() != Some(participant) {
                    return Ok(());
                }
                self.insert_archer(participant, index, spawn)?;
                self.start(tick.wrapping_add(self.config.client_lead_ticks));
                Ok(())
            }
            ServerMessage::Snapshot { participant, tick, locomotion, bow } => {
                let archer = self
                    .archers
                    .get_mut(&participant)
                    .ok_or(WorldError::UnknownParticipant(participant))?;
                archer.locomotion_mut().receive_snapshot(tick, locomotion);
                archer.bow_mut().receive_snapshot(tick, bow);
                Ok(())
            }
            ServerMessage::Observed { events } => {
                for event in events {
                    match &event.data {
                        ObserverEventData::ArrowSpawned { view }
                        | ObserverEventData::ArrowChanged { view, .. } => self.arrows.upsert_mirror(view),
                        ObserverEventData::ArrowDespawned { arrow } => {
                            self.arrows.despawn(*arrow);
                        }
                        ObserverEventData::Health { .. } => {}
                    }
                    self.events.push(event);
                }
                Ok(())
            }
        }
    }

    /// Client: the redundant input window for the local archer.
    pub fn client_outbound(&self) -> Option<ClientMessage> {
        if self.role.is_authority() {
            return None;
        }
        let participant = self.role.local()?;
        let archer = self.archers.get(&participant)?;
        let n = self.config.prediction.input_redundancy;

        let draws: BTreeMap<Tick, _> = archer.bow().recent_inputs(n).into_iter().collect();
        let packets: Vec<InputPacket> = archer
            .locomotion()
            .recent_inputs(n)
            .into_iter()
            .map(|(tick, movement)| InputPacket {
                tick,
                movement,
                bow: draws.get(&tick).copied().unwrap_or(Bow::neutral_input()),
            })
            .collect();
        if packets.is_empty() {
            return None;
        }
        Some(ClientMessage::Inputs { participant, packets })
    }

    /// Authority: snapshots for remote owners and the observer broadcast.
    pub fn server_outbound(&mut self) -> Vec<(Recipient, ServerMessage)> {
        let mut out = Vec::new();
        for archer in self.archers.values_mut() {
            let participant = archer.participant();
            let bows: BTreeMap<Tick, _> = archer
                .bow_mut()
                .take_snapshots()
                .into_iter()
                .map(|s| (s.tick, s.state))
                .collect();
            for snap in archer.locomotion_mut().take_snapshots() {
                if let Some(bow) = bows.get(&snap.tick) {
                    out.push((
                        Recipient::Participant(participant),
                        ServerMessage::Snapshot { participant, tick: snap.tick, locomotion: snap.state, bow: *bow },
                    ));
                }
            }
        }
        let events = self.events.drain();
        if !events.is_empty() {
            out.push((Recipient::All, ServerMessage::Observed { events }));
        }
        out
    }

    /// Hash of the full world state at the current tick.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.current_tick(), |h| {
            h.update_u32(self.archers.len() as u32);
            for archer in self.archers.values() {
                archer.hash_into(h);
            }
            h.update_u32(self.targets.len() as u32);
            for target in self.targets.values() {
                target.health.hash_into(h);
            }
            self.arrows.hash_into(h);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use crate::core::fixed::{NORMAL_ARROW_DAMAGE, POISON_ARROW_DAMAGE};
    use crate::game::arrow::ArrowEvent;
    use crate::network::link::{Link, LinkConfig};

    const P: ParticipantId = ParticipantId::new([1; 16]);

    fn floor() -> Terrain {
        Terrain::flat(0, from_int(-100), from_int(100))
    }

    fn standing_at(x: i32, config: &SimConfig) -> FixedVec2 {
        FixedVec2::new(from_int(x), config.locomotion.half_height)
    }

    fn host(config: SimConfig) -> World {
        let mut world = World::new(Role::Host { local: P }, config, floor());
        world.start(0);
        let spawn = standing_at(0, world.config());
        world.add_archer(P, spawn).expect("archer");
        world
    }

    fn drawing() -> LocalInput {
        LocalInput::new().with_aim(127, 0).with_flag(LocalInput::FLAG_DRAW)
    }

    /// Draw for `ticks`, then let go; returns the tick of the release.
    fn shoot(world: &mut World, ticks: u32) -> Tick {
        world.set_local_input(drawing());
        for _ in 0..ticks {
            world.step().expect("step");
        }
        world.set_local_input(LocalInput::new().with_aim(127, 0));
        world.step().expect("step")
    }

    #[test]
    fn test_step_requires_clock_and_activation_is_deferred() {
        let mut world = World::new(Role::Server, SimConfig::default(), floor());
        assert!(matches!(world.step(), Err(WorldError::ClockNotStarted)));

        world.add_archer(P, FixedVec2::from_ints(0, 1)).expect("archer");
        assert!(!world.archer(P).map_or(true, Archer::is_active));

        world.start(10);
        assert!(world.archer(P).map_or(false, Archer::is_active));
        assert_eq!(world.step().expect("step"), 11);
    }

    #[test]
    fn test_loadout_and_restock() {
        let mut world = host(SimConfig::default());
        let archer = world.archer(P).expect("archer");
        assert_eq!(archer.quiver().len(), 4);
        assert_eq!(world.arrows().len(), 4);

        world.step().expect("step");
        let archer = world.archer(P).expect("archer");
        let nocked = archer.bow().entity().slot().expect("restocked");
        assert_eq!(archer.quiver().len(), 3);
        assert_eq!(world.arrows().get(nocked).map(|a| a.state()), Some(ArrowState::Nock));
    }

    #[test]
    fn test_shot_hits_target() {
        let mut world = host(SimConfig::default());
        let config = world.config().clone();
        let target = world.add_target(standing_at(6, &config), FixedVec2::from_ints(1, 2), DEFAULT_MAX_HEALTH);

        world.step().expect("restock");
        let arrow = world.archer(P).and_then(|a| a.bow().entity().slot()).expect("nocked");
        shoot(&mut world, 60);
        assert_eq!(world.arrows().get(arrow).map(|a| a.state()), Some(ArrowState::Flight));

        for _ in 0..60 {
            world.step().expect("step");
        }
        let stuck = world.arrows().get(arrow).expect("arrow");
        assert_eq!(stuck.state(), ArrowState::Stuck);
        assert!(!stuck.can_be_picked_up());
        assert_eq!(world.target(target).map(|t| t.health.health()), Some(DEFAULT_MAX_HEALTH - NORMAL_ARROW_DAMAGE));

        let events = world.drain_events();
        assert!(events.iter().any(|e| matches!(
            e.data,
            ObserverEventData::ArrowChanged { transition, .. } if transition.event == ArrowEvent::Hit
        )));
        assert!(events.iter().any(|e| matches!(
            e.data,
            ObserverEventData::Health { target: t, event: HealthEvent::Damaged { .. } } if t == target
        )));
    }

    #[test]
    fn test_poison_keeps_hurting() {
        let config = SimConfig { loadout: vec![ArrowKind::Poison], ..SimConfig::default() };
        let mut world = host(config);
        let spot = standing_at(6, world.config());
        let target = world.add_target(spot, FixedVec2::from_ints(1, 2), DEFAULT_MAX_HEALTH);

        world.step().expect("restock");
        shoot(&mut world, 60);
        for _ in 0..90 {
            world.step().expect("step");
        }
        let health = world.target(target).map(|t| t.health.health()).expect("target");
        assert!(health < DEFAULT_MAX_HEALTH - POISON_ARROW_DAMAGE);
    }

    #[test]
    fn test_stuck_arrow_is_collected_again() {
        // Shoot straight down into the floor next to the archer
        let mut world = host(SimConfig::default());
        world.step().expect("restock");
        let arrow = world.archer(P).and_then(|a| a.bow().entity().slot()).expect("nocked");

        let down = LocalInput::new().with_aim(40, -127);
        world.set_local_input(down.with_flag(LocalInput::FLAG_DRAW));
        for _ in 0..30 {
            world.step().expect("step");
        }
        world.set_local_input(down);
        for _ in 0..60 {
            world.step().expect("step");
        }

        let ids = world.archer(P).expect("archer").ids();
        let owner = world.arrows().get(arrow).and_then(|a| a.owner());
        assert!(owner == Some(ids.bow) || owner == Some(ids.quiver), "arrow not picked up: {owner:?}");
    }

    #[test]
    fn test_out_of_bounds_despawn() {
        let config = SimConfig {
            bounds: Aabb::from_center(FixedVec2::ZERO, FixedVec2::from_ints(3, 10)),
            ..SimConfig::default()
        };
        let mut world = host(config);
        world.step().expect("restock");
        let arrow = world.archer(P).and_then(|a| a.bow().entity().slot()).expect("nocked");
        shoot(&mut world, 60);
        for _ in 0..30 {
            world.step().expect("step");
        }
        assert!(!world.arrows().contains(arrow));
        assert!(world
            .drain_events()
            .iter()
            .any(|e| e.data == ObserverEventData::ArrowDespawned { arrow }));
    }

    #[test]
    fn test_roles_reject_foreign_messages() {
        let mut server = World::new(Role::Server, SimConfig::default(), floor());
        let mut client = World::new(Role::Client { local: P }, SimConfig::default(), floor());
        let observed = ServerMessage::Observed { events: Vec::new() };

        assert!(matches!(server.receive_server(observed), Err(WorldError::WrongRole { .. })));
        assert!(matches!(
            client.receive_client(ClientMessage::Join { participant: P }),
            Err(WorldError::WrongRole { .. })
        ));
        assert!(matches!(
            server.receive_client(ClientMessage::Inputs { participant: P, packets: Vec::new() }),
            Err(WorldError::UnknownParticipant(_))
        ));
        assert!(server.receive_client(ClientMessage::Join { participant: P }).expect("join").is_some());
        assert!(matches!(
            server.receive_client(ClientMessage::Join { participant: P }),
            Err(WorldError::AlreadyJoined(_))
        ));
    }

    #[test]
    fn test_leave_despawns_held_arrows() {
        let mut world = World::new(Role::Server, SimConfig::default(), floor());
        world.start(0);
        world.receive_client(ClientMessage::Join { participant: P }).expect("join");
        assert_eq!(world.arrows().len(), 4);
        world.drain_events();

        world.receive_client(ClientMessage::Leave { participant: P }).expect("leave");
        assert!(world.arrows().is_empty());
        assert!(world.archer(P).is_none());
        assert_eq!(world.drain_events().len(), 4);
    }

    #[test]
    fn test_identical_scripts_hash_identically() {
        let mut a = host(SimConfig::default());
        let mut b = host(SimConfig::default());
        for i in 0..120 {
            let input = if i % 40 < 30 { drawing().with_movement(127, 0) } else { LocalInput::new() };
            a.set_local_input(input);
            b.set_local_input(input);
            a.step().expect("step");
            b.step().expect("step");
        }
        assert_eq!(a.compute_hash(), b.compute_hash());

        b.set_local_input(LocalInput::new().with_movement(0, 127));
        a.step().expect("step");
        b.step().expect("step");
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    fn random_input(rng: &mut StdRng) -> LocalInput {
        let axis = [-127i8, 0, 0, 127];
        let mut input = LocalInput::new()
            .with_movement(axis[rng.gen_range(0..4)], axis[rng.gen_range(0..4)])
            .with_aim(rng.gen_range(-127..=127), rng.gen_range(-127..=127));
        if rng.gen_bool(0.3) {
            input = input.with_flag(LocalInput::FLAG_SPRINT);
        }
        if rng.gen_bool(0.6) {
            input = input.with_flag(LocalInput::FLAG_DRAW);
        }
        if rng.gen_bool(0.05) {
            input = input.with_flag(LocalInput::FLAG_CANCEL);
        }
        input
    }

    #[test]
    fn test_client_converges_over_lossy_link() {
        let config = SimConfig::default();
        let mut server = World::new(Role::Server, config.clone(), floor());
        let mut client = World::new(Role::Client { local: P }, config, floor());
        server.start(0);

        let link = LinkConfig { latency: 2, loss_period: 5, reorder: true };
        let mut up: Link<ClientMessage> = Link::new(link);
        let mut down: Link<ServerMessage> = Link::new(link);
        let mut rng = StdRng::seed_from_u64(7);
        up.send(0, ClientMessage::Join { participant: P });

        let mut scripted = 0;
        for _ in 0..400 {
            let now = server.step().expect("server step");
            for message in up.receive(now) {
                if let Some(reply) = server.receive_client(message).expect("client message") {
                    down.send(now, reply);
                }
            }
            for (_, message) in server.server_outbound() {
                down.send(now, message);
            }
            for message in down.receive(now) {
                client.receive_server(message).expect("server message");
            }

            if client.tick().is_some() {
                let input = if scripted < 240 { random_input(&mut rng) } else { LocalInput::new() };
                scripted += 1;
                client.set_local_input(input);
                client.step().expect("client step");
                if let Some(message) = client.client_outbound() {
                    up.send(now, message);
                }
            }
        }

        // Let the authority catch up with the client's last input
        let target = client.tick().expect("client running");
        while server.tick().map_or(false, |t| t < target) {
            let now = server.tick().unwrap_or(0);
            if let Some(message) = client.client_outbound() {
                up.send(now, message);
            }
            for message in up.receive(now) {
                server.receive_client(message).expect("client message");
            }
            server.step().expect("server step");
        }

        let predicted = client.archer(P).expect("client archer");
        let authoritative = server.archer(P).expect("server archer");
        assert_eq!(
            predicted.locomotion().entity().snapshot(),
            authoritative.locomotion().entity().snapshot()
        );
        let stats = predicted.locomotion().stats();
        assert!(stats.applied > 0);
        assert!(stats.replayed > 0);
        assert!(client.arrows().len() >= 4);
    }
}
