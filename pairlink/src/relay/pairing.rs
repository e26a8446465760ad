//! Pairing state for supply and demand peers.
//!
//! A peer waits in an unmet set (frozen by the caller) until a counterpart
//! arrives, at which point both sides are recorded in a bidirectional pair
//! map. A pair entry of `None` is the broken-cycle sentinel used during a
//! disconnect cascade: the surviving half maps to `None` so the second
//! disconnection pass finds nothing left to tear down.
//!
//! Which peer is popped from an unmet set is whatever hash-set iteration
//! yields first; callers must not rely on any order.

use std::collections::{HashMap, HashSet};

use crate::socket::Descriptor;

/// Waiting queues and the bidirectional pairing map.
#[derive(Debug, Default)]
pub(crate) struct PairingTable {
    unmet_supply: HashSet<Descriptor>,
    unmet_demand: HashSet<Descriptor>,
    pairs: HashMap<Descriptor, Option<Descriptor>>,
}

impl PairingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a supply peer with no counterpart. The caller freezes it.
    pub fn queue_supply(&mut self, d: Descriptor) {
        self.unmet_supply.insert(d);
    }

    /// Queues a demand peer with no counterpart. The caller freezes it.
    pub fn queue_demand(&mut self, d: Descriptor) {
        self.unmet_demand.insert(d);
    }

    /// Pops an arbitrary waiting demand peer, if any.
    pub fn take_unmet_demand(&mut self) -> Option<Descriptor> {
        let d = self.unmet_demand.iter().next().copied()?;
        self.unmet_demand.remove(&d);
        Some(d)
    }

    /// Pops an arbitrary waiting supply peer, if any.
    pub fn take_unmet_supply(&mut self) -> Option<Descriptor> {
        let d = self.unmet_supply.iter().next().copied()?;
        self.unmet_supply.remove(&d);
        Some(d)
    }

    /// Records `a` and `b` as partners.
    pub fn insert_pair(&mut self, a: Descriptor, b: Descriptor) {
        self.pairs.insert(a, Some(b));
        self.pairs.insert(b, Some(a));
    }

    /// Pair entry for `d`: `None` if unpaired, `Some(None)` if the partner
    /// is already mid-teardown, `Some(Some(p))` if `p` is live.
    pub fn partner(&self, d: Descriptor) -> Option<Option<Descriptor>> {
        self.pairs.get(&d).copied()
    }

    /// Removes all record of `d`. Returns the live partner that must now
    /// be torn down, if `d` was one half of an intact pair.
    pub fn remove(&mut self, d: Descriptor) -> Option<Descriptor> {
        if let Some(partner) = self.pairs.remove(&d) {
            return partner;
        }
        self.unmet_supply.remove(&d);
        self.unmet_demand.remove(&d);
        None
    }

    /// Breaks `d`'s half of the cycle: its entry now maps to the sentinel
    /// so a later pass will not dereference the dead side.
    pub fn sever(&mut self, d: Descriptor) {
        if let Some(entry) = self.pairs.get_mut(&d) {
            *entry = None;
        }
    }

    pub fn unmet_supply_count(&self) -> usize {
        self.unmet_supply.len()
    }

    pub fn unmet_demand_count(&self) -> usize {
        self.unmet_demand.len()
    }

    pub fn is_queued(&self, d: Descriptor) -> bool {
        self.unmet_supply.contains(&d) || self.unmet_demand.contains(&d)
    }

    /// Queued supply peers, in no particular order.
    pub fn queued_supply_peers(&self) -> Vec<Descriptor> {
        self.unmet_supply.iter().copied().collect()
    }

    /// Queued demand peers, in no particular order.
    pub fn queued_demand_peers(&self) -> Vec<Descriptor> {
        self.unmet_demand.iter().copied().collect()
    }

    /// Every pair-map entry, including sentinel halves.
    pub fn entries(&self) -> Vec<(Descriptor, Option<Descriptor>)> {
        self.pairs.iter().map(|(&d, &p)| (d, p)).collect()
    }
}
