//! Damageable Entities
//!
//! Bounded health with clamped mutation. Mutated by the authority only;
//! observers learn about changes through [`HealthEvent`]s.

use serde::{Serialize, Deserialize};

use crate::core::fixed::Fixed;
use crate::core::hash::StateHasher;

/// Damageable identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DamageableId(pub u32);

/// Health notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthEvent {
    /// Damage was applied (requested amount).
    Damaged {
        /// Amount requested
        amount: Fixed,
    },
    /// Healing was applied (requested amount).
    Healed {
        /// Amount requested
        amount: Fixed,
    },
    /// Health after a damage or heal.
    HealthChanged {
        /// New health
        health: Fixed,
    },
    /// Health reached zero from above.
    Died,
}

/// Damage-over-time effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poison {
    /// Damage per tick
    pub per_tick: Fixed,
    /// Ticks left
    pub remaining_ticks: u32,
}

/// Entity with health in `[0, max_health]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Damageable {
    id: DamageableId,
    health: Fixed,
    max_health: Fixed,
    poison: Option<Poison>,
    #[serde(skip)]
    events: Vec<HealthEvent>,
}

impl Damageable {
    /// Full-health entity. Negative `max_health` is treated as zero.
    pub fn new(id: DamageableId, max_health: Fixed) -> Self {
        let max_health = max_health.max(0);
        Self {
            id,
            health: max_health,
            max_health,
            poison: None,
            events: Vec::new(),
        }
    }

    /// Entity starting at `health` (clamped).
    pub fn with_health(id: DamageableId, health: Fixed, max_health: Fixed) -> Self {
        let mut d = Self::new(id, max_health);
        d.health = health.clamp(0, d.max_health);
        d
    }

    /// Identity.
    pub fn id(&self) -> DamageableId {
        self.id
    }

    /// Current health.
    pub fn health(&self) -> Fixed {
        self.health
    }

    /// Health ceiling, fixed at spawn.
    pub fn max_health(&self) -> Fixed {
        self.max_health
    }

    /// Whether health is zero.
    pub fn is_dead(&self) -> bool {
        self.health == 0
    }

    /// Active poison, if any.
    pub fn poison(&self) -> Option<Poison> {
        self.poison
    }

    /// Subtract `amount`, clamped at zero.
    ///
    /// Non-positive amounts are ignored. Returns true if this call killed
    /// the entity.
    pub fn damage(&mut self, amount: Fixed) -> bool {
        if amount <= 0 {
            return false;
        }
        let before = self.health;
        self.health = self.health.saturating_sub(amount).max(0);
        self.events.push(HealthEvent::Damaged { amount });
        self.events.push(HealthEvent::HealthChanged { health: self.health });

        let died = before > 0 && self.health == 0;
        if died {
            self.poison = None;
            self.events.push(HealthEvent::Died);
        }
        died
    }

    /// Add `amount`, clamped at `max_health`. Non-positive amounts are ignored.
    pub fn heal(&mut self, amount: Fixed) {
        if amount <= 0 {
            return;
        }
        self.health = self.health.saturating_add(amount).min(self.max_health);
        self.events.push(HealthEvent::Healed { amount });
        self.events.push(HealthEvent::HealthChanged { health: self.health });
    }

    /// Start or refresh a damage-over-time effect.
    pub fn apply_poison(&mut self, per_tick: Fixed, ticks: u32) {
        if self.is_dead() || per_tick <= 0 || ticks == 0 {
            return;
        }
        self.poison = Some(Poison { per_tick, remaining_ticks: ticks });
    }

    /// Advance timed effects by one tick. Returns true if this killed the entity.
    pub fn tick_effects(&mut self) -> bool {
        let Some(mut poison) = self.poison.take() else {
            return false;
        };
        poison.remaining_ticks -= 1;
        if poison.remaining_ticks > 0 {
            self.poison = Some(poison);
        }
        self.damage(poison.per_tick)
    }

    /// Drain pending notifications.
    pub fn take_events(&mut self) -> Vec<HealthEvent> {
        std::mem::take(&mut self.events)
    }

    /// Hash into state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_fixed(self.health);
        hasher.update_fixed(self.max_health);
        match self.poison {
            Some(p) => {
                hasher.update_u8(1);
                hasher.update_fixed(p.per_tick);
                hasher.update_u32(p.remaining_ticks);
            }
            None => hasher.update_u8(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::from_int;
    use proptest::prelude::*;

    fn deaths(events: &[HealthEvent]) -> usize {
        events.iter().filter(|e| matches!(e, HealthEvent::Died)).count()
    }

    #[test]
    fn test_overkill_dies_once() {
        let mut d = Damageable::new(DamageableId(1), from_int(10));

        assert!(d.damage(from_int(15)));
        assert_eq!(d.health(), 0);
        let events = d.take_events();
        assert_eq!(deaths(&events), 1);
        assert_eq!(events[0], HealthEvent::Damaged { amount: from_int(15) });
        assert_eq!(events[1], HealthEvent::HealthChanged { health: 0 });

        // Damage while dead: still notified, no second death
        assert!(!d.damage(from_int(5)));
        assert_eq!(d.health(), 0);
        let events = d.take_events();
        assert_eq!(deaths(&events), 0);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_heal_clamps() {
        let mut d = Damageable::with_health(DamageableId(1), from_int(8), from_int(10));
        d.heal(from_int(50));
        assert_eq!(d.health(), from_int(10));
        assert_eq!(
            d.take_events(),
            vec![
                HealthEvent::Healed { amount: from_int(50) },
                HealthEvent::HealthChanged { health: from_int(10) },
            ]
        );
    }

    #[test]
    fn test_zero_amounts_are_noops() {
        let mut d = Damageable::new(DamageableId(1), from_int(10));
        assert!(!d.damage(0));
        d.heal(0);
        assert!(d.take_events().is_empty());
        assert_eq!(d.health(), from_int(10));
    }

    #[test]
    fn test_poison_runs_out() {
        let mut d = Damageable::new(DamageableId(1), from_int(10));
        d.apply_poison(from_int(1), 3);
        for _ in 0..5 {
            d.tick_effects();
        }
        assert_eq!(d.health(), from_int(7));
        assert!(d.poison().is_none());
    }

    #[test]
    fn test_poison_kill_clears_effect() {
        let mut d = Damageable::with_health(DamageableId(1), from_int(2), from_int(10));
        d.apply_poison(from_int(1), 10);
        assert!(!d.tick_effects());
        assert!(d.tick_effects());
        assert!(d.poison().is_none());
        assert_eq!(deaths(&d.take_events()), 1);
    }

    proptest! {
        #[test]
        fn prop_health_stays_bounded(
            max in 1i32..1_000_000,
            ops in proptest::collection::vec((any::<bool>(), -10_000i32..2_000_000), 0..64),
        ) {
            let mut d = Damageable::new(DamageableId(1), max);
            let mut died = 0;
            for (is_damage, amount) in ops {
                if is_damage {
                    if d.damage(amount) {
                        died += 1;
                    }
                } else {
                    d.heal(amount);
                }
                prop_assert!(d.health() >= 0 && d.health() <= d.max_health());
            }
            prop_assert_eq!(deaths(&d.take_events()), died);
        }
    }
}
