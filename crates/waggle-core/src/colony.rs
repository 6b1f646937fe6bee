//! Colony: the replication group of a bee
//!
//! A colony is one master bee plus its slaves, versioned by a generation
//! counter that strictly increases across every published mutation. A
//! colony is mutated only by its current master and only through registry
//! compare-and-set; losing the CAS is the definitive signal that the local
//! bee is stale and must stop.

use crate::id::{BeeId, HiveId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Replication group descriptor
///
/// Invariants: the master is never listed among the slaves, slave hives are
/// pairwise distinct and distinct from the master's hive, and `generation`
/// strictly increases across published mutations.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Colony {
    /// The master bee
    pub master: BeeId,
    /// Slave bees, each on a distinct hive
    pub slaves: Vec<BeeId>,
    /// Monotonic version, bumped on every published mutation
    pub generation: u64,
}

impl Colony {
    /// Create a fresh colony with no slaves
    pub fn new(master: BeeId) -> Self {
        Self {
            master,
            slaves: Vec::new(),
            generation: 0,
        }
    }

    /// Create a colony at a specific generation
    pub fn with_generation(master: BeeId, generation: u64) -> Self {
        Self {
            master,
            slaves: Vec::new(),
            generation,
        }
    }

    /// Check whether `id` is the colony's master
    pub fn is_master(&self, id: &BeeId) -> bool {
        self.master == *id
    }

    /// Check whether `id` is one of the colony's slaves
    pub fn is_slave(&self, id: &BeeId) -> bool {
        self.slaves.contains(id)
    }

    /// Check whether `id` belongs to the colony at all
    pub fn contains(&self, id: &BeeId) -> bool {
        self.is_master(id) || self.is_slave(id)
    }

    /// Add a slave, preserving the membership invariants
    ///
    /// Returns false (and leaves the colony unchanged) if the bee is the
    /// master, already a slave, or co-located with an existing member.
    pub fn add_slave(&mut self, id: BeeId) -> bool {
        if self.is_master(&id) || self.is_slave(&id) {
            return false;
        }
        if self.master.hive == id.hive || self.slaves.iter().any(|s| s.hive == id.hive) {
            return false;
        }
        self.slaves.push(id);
        true
    }

    /// Remove a slave; returns false if it was not a member
    pub fn del_slave(&mut self, id: &BeeId) -> bool {
        let before = self.slaves.len();
        self.slaves.retain(|s| s != id);
        self.slaves.len() != before
    }

    /// Hives currently hosting a slave
    pub fn slave_hives(&self) -> Vec<HiveId> {
        self.slaves.iter().map(|s| s.hive.clone()).collect()
    }

    /// Bump the generation counter
    pub fn bump_generation(&mut self) {
        self.generation += 1;
    }
}

impl fmt::Display for Colony {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "colony(master={}, slaves=[", self.master)?;
        for (i, s) in self.slaves.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", s)?;
        }
        write!(f, "], gen={})", self.generation)
    }
}
