//! Archer
//!
//! One participant's composed character: a predicted locomotion body, a
//! predicted bow, a quiver, a collector and a health pool. All ids of the
//! parts are derived from the archer's index so both ends of a connection
//! agree on them without extra messages.

use std::collections::BTreeSet;
use std::fmt;
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::hash::StateHasher;
use crate::core::vec2::FixedVec2;
use crate::game::arrow::ArrowId;
use crate::game::bow::Bow;
use crate::game::clock::{SubscriberId, Subscription, Tick, TickClock};
use crate::game::collector::{Claim, Collector};
use crate::game::damageable::{Damageable, DamageableId};
use crate::game::input::LocalInput;
use crate::game::inventory::{Anchor, ArrowInventory, InventoryId, Quiver};
use crate::game::locomotion::Locomotion;
use crate::game::physics::{Aabb, Collider, ColliderId, ColliderKind};
use crate::game::predicted::{Predictor, SimContext};
use crate::game::registry::ArrowRegistry;
use crate::game::world::SimConfig;

/// First collider id used for archer bodies. Terrain uses ids below it.
pub const ARCHER_COLLIDER_BASE: u32 = 1 << 16;

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Unique participant identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub [u8; 16]);

impl ParticipantId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random id.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}

/// Ids of an archer's parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcherIds {
    /// Bow inventory
    pub bow: InventoryId,
    /// Quiver inventory
    pub quiver: InventoryId,
    /// Body collider
    pub collider: ColliderId,
    /// Health pool
    pub body: DamageableId,
    /// Clock subscriber
    pub subscriber: SubscriberId,
}

impl ArcherIds {
    /// Ids for the archer with `index`.
    pub const fn for_index(index: u32) -> Self {
        Self {
            bow: InventoryId(index * 2),
            quiver: InventoryId(index * 2 + 1),
            collider: ColliderId(ARCHER_COLLIDER_BASE + index),
            body: DamageableId(index),
            subscriber: SubscriberId(index),
        }
    }
}

// =============================================================================
// ARCHER
// =============================================================================

/// A participant's character.
#[derive(Clone, Debug)]
pub struct Archer {
    participant: ParticipantId,
    index: u32,
    ids: ArcherIds,
    locomotion: Predictor<Locomotion>,
    bow: Predictor<Bow>,
    quiver: Quiver,
    collector: Collector,
    health: Damageable,
    subscription: Subscription,
}

impl Archer {
    /// Build an inactive archer at `spawn`.
    pub fn new(
        participant: ParticipantId,
        index: u32,
        spawn: FixedVec2,
        config: &SimConfig,
        is_owner: bool,
        is_authority: bool,
    ) -> Self {
        let ids = ArcherIds::for_index(index);
        let mut bow = Bow::new(ids.bow, config.bow.clone());
        bow.set_ignored_colliders(BTreeSet::from([ids.collider]));

        let mut archer = Self {
            participant,
            index,
            ids,
            locomotion: Predictor::new(
                Locomotion::new(config.locomotion.clone(), spawn),
                is_owner,
                is_authority,
                config.prediction,
            ),
            bow: Predictor::new(bow, is_owner, is_authority, config.prediction),
            quiver: Quiver::new(ids.quiver, config.quiver_capacity),
            collector: Collector::new(config.collector),
            health: Damageable::new(ids.body, config.max_health),
            subscription: Subscription::new(ids.subscriber),
        };
        archer.sync_attachments();
        archer
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Start receiving ticks. Deferred while the clock does not exist.
    pub fn on_activate(&mut self, clock: Option<&mut TickClock>) -> bool {
        let changed = self.subscription.set(clock, true);
        if changed {
            info!(participant = %self.participant, index = self.index, "archer activated");
        }
        changed
    }

    /// Stop receiving ticks.
    pub fn on_deactivate(&mut self, clock: Option<&mut TickClock>) -> bool {
        let changed = self.subscription.set(clock, false);
        if changed {
            info!(participant = %self.participant, index = self.index, "archer deactivated");
        }
        changed
    }

    /// Whether the archer receives ticks.
    pub fn is_active(&self) -> bool {
        self.subscription.is_subscribed()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Participant.
    pub fn participant(&self) -> ParticipantId { self.participant }

    /// Index assigned by the authority.
    pub fn index(&self) -> u32 { self.index }

    /// Part ids.
    pub fn ids(&self) -> ArcherIds { self.ids }

    /// Movement predictor.
    pub fn locomotion(&self) -> &Predictor<Locomotion> { &self.locomotion }

    /// Mutable movement predictor.
    pub fn locomotion_mut(&mut self) -> &mut Predictor<Locomotion> { &mut self.locomotion }

    /// Bow predictor.
    pub fn bow(&self) -> &Predictor<Bow> { &self.bow }

    /// Mutable bow predictor.
    pub fn bow_mut(&mut self) -> &mut Predictor<Bow> { &mut self.bow }

    /// Quiver.
    pub fn quiver(&self) -> &Quiver { &self.quiver }

    /// Mutable quiver.
    pub fn quiver_mut(&mut self) -> &mut Quiver { &mut self.quiver }

    /// Health.
    pub fn health(&self) -> &Damageable { &self.health }

    /// Mutable health.
    pub fn health_mut(&mut self) -> &mut Damageable { &mut self.health }

    /// Body center.
    pub fn position(&self) -> FixedVec2 {
        self.locomotion.entity().position()
    }

    /// Body collider for contact tests.
    pub fn collider(&self) -> Collider {
        let body = self.locomotion.entity();
        Collider {
            id: self.ids.collider,
            kind: ColliderKind::Damageable(self.ids.body),
            bounds: Aabb::from_center(body.position(), body.half_extents()),
            velocity: body.velocity(),
            mass: body.mass(),
        }
    }

    /// Where the nocked arrow sits.
    pub fn nock_anchor(&self) -> Anchor {
        self.bow.entity().next_arrow_anchor()
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    fn sync_attachments(&mut self) {
        let position = self.locomotion.entity().position();
        self.bow.entity_mut().set_position(position);
        self.quiver.set_position(position);
        self.collector.set_position(position);
    }

    /// Tick phase: movement first, then the bow from the new position.
    pub fn on_tick(&mut self, local: &LocalInput, ctx: &SimContext<'_>) {
        self.locomotion.on_tick(local, ctx);
        self.sync_attachments();
        self.bow.on_tick(local, ctx);
    }

    /// Post-tick phase.
    pub fn on_post_tick(&mut self, tick: Tick) {
        self.locomotion.on_post_tick(tick);
        self.bow.on_post_tick(tick);
    }

    /// Put an arrow straight into the quiver (initial loadout).
    pub fn stock(&mut self, arrows: &mut ArrowRegistry, id: ArrowId, tick: Tick) -> bool {
        match arrows.get_mut(id) {
            Some(arrow) => self.quiver.try_add_arrow(arrow, tick),
            None => false,
        }
    }

    /// Move the first quivered arrow onto an empty string. Authority only.
    pub fn restock(&mut self, arrows: &mut ArrowRegistry, tick: Tick) -> Option<ArrowId> {
        let bow = self.bow.entity_mut();
        if bow.slot().is_some() || !bow.cooldown_elapsed(tick) || self.quiver.is_empty() {
            return None;
        }
        let id = self.quiver.remove_arrow(0, arrows)?;
        let arrow = arrows.get_mut(id)?;
        if bow.try_add_arrow(arrow, tick) {
            debug!(participant = %self.participant, arrow = id.0, tick, "restocked");
            Some(id)
        } else {
            self.quiver.try_add_arrow(arrow, tick);
            None
        }
    }

    /// Proximity pickup into the bow, then the quiver. Authority only.
    pub fn collect(&mut self, arrows: &mut ArrowRegistry, tick: Tick) -> Vec<Claim> {
        self.sync_attachments();
        self.collector
            .scan(arrows, &mut [self.bow.entity_mut(), &mut self.quiver], tick)
    }

    /// Arrows on the string and in the quiver.
    pub fn held_arrows(&self) -> Vec<ArrowId> {
        let mut held = self.bow.entity().arrows();
        held.extend(self.quiver.arrows());
        held
    }

    /// Hash into state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_uuid(&self.participant.0);
        hasher.update_u32(self.index);
        self.locomotion.entity().hash_into(hasher);
        self.bow.entity().hash_into(hasher);
        hasher.update_u32(self.quiver.len() as u32);
        for id in self.quiver.arrows() {
            hasher.update_u32(id.0);
        }
        self.health.hash_into(hasher);
    }
}
