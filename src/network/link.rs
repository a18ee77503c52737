//! Simulated Link
//!
//! Deterministic in-memory transport with latency, periodic loss and
//! reordering, measured in ticks. Used by the demo binary and the
//! convergence tests in place of a socket.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use tracing::trace;

use crate::game::clock::Tick;

/// Link behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Delivery delay in ticks
    pub latency: u32,
    /// Drop every Nth message (0 = lossless)
    pub loss_period: u32,
    /// Delay every other message one extra tick so it lands after its successor
    pub reorder: bool,
}

/// Link counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Messages offered
    pub sent: u64,
    /// Messages dropped
    pub dropped: u64,
    /// Messages handed to the receiver
    pub delivered: u64,
}

/// One-way message pipe.
#[derive(Clone, Debug)]
pub struct Link<T> {
    config: LinkConfig,
    in_flight: BTreeMap<(Tick, u64), T>,
    stats: LinkStats,
}

impl<T> Link<T> {
    /// Empty link.
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            in_flight: BTreeMap::new(),
            stats: LinkStats::default(),
        }
    }

    /// Counters.
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Messages not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Offer a message at tick `now`. Returns false if it was dropped.
    pub fn send(&mut self, now: Tick, message: T) -> bool {
        let seq = self.stats.sent;
        self.stats.sent += 1;

        let period = u64::from(self.config.loss_period);
        if period > 0 && (seq + 1) % period == 0 {
            self.stats.dropped += 1;
            trace!(seq, "link dropped message");
            return false;
        }

        let mut deliver_at = now.wrapping_add(self.config.latency);
        if self.config.reorder && seq % 2 == 0 {
            deliver_at = deliver_at.wrapping_add(1);
        }
        self.in_flight.insert((deliver_at, seq), message);
        true
    }

    /// Everything due at or before `now`, in delivery order.
    pub fn receive(&mut self, now: Tick) -> Vec<T> {
        let later = self.in_flight.split_off(&(now.wrapping_add(1), 0));
        let due = std::mem::replace(&mut self.in_flight, later);
        self.stats.delivered += due.len() as u64;
        due.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency() {
        let mut link = Link::new(LinkConfig { latency: 3, ..Default::default() });
        assert!(link.send(10, "a"));
        assert!(link.receive(12).is_empty());
        assert_eq!(link.receive(13), vec!["a"]);
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn test_periodic_loss() {
        let mut link = Link::new(LinkConfig { latency: 0, loss_period: 3, reorder: false });
        let kept: Vec<bool> = (0..6).map(|i| link.send(0, i)).collect();
        assert_eq!(kept, vec![true, true, false, true, true, false]);
        assert_eq!(link.receive(0), vec![0, 1, 3, 4]);
        assert_eq!(link.stats().dropped, 2);
        assert_eq!(link.stats().delivered, 4);
    }

    #[test]
    fn test_reorder_swaps_neighbors() {
        let mut link = Link::new(LinkConfig { latency: 1, loss_period: 0, reorder: true });
        link.send(0, 'a');
        link.send(0, 'b');
        assert!(link.receive(0).is_empty());
        assert_eq!(link.receive(1), vec!['b']);
        assert_eq!(link.receive(2), vec!['a']);
    }
}
