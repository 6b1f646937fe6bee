//! Slave placement strategy
//!
//! Given a blacklist of hives already hosting colony members (or known
//! bad), pick up to `n` hives to host new slaves. A strategy must never
//! return a blacklisted hive and may return fewer than asked for.

use std::sync::RwLock;
use waggle_core::HiveId;

/// Chooses hives to host new slaves
pub trait ReplicationStrategy: Send + Sync {
    /// Select up to `n` hives, excluding everything in `blacklist`
    fn select_slave_hives(&self, blacklist: &[HiveId], n: usize) -> Vec<HiveId>;
}

/// Round-robin selection over a known hive list
pub struct RoundRobinStrategy {
    hives: RwLock<Vec<HiveId>>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl RoundRobinStrategy {
    /// Create a strategy over the given hives
    pub fn new(hives: Vec<HiveId>) -> Self {
        Self {
            hives: RwLock::new(hives),
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Add a hive to the candidate pool
    pub fn add_hive(&self, hive: HiveId) {
        let mut hives = self.hives.write().expect("strategy lock poisoned");
        if !hives.contains(&hive) {
            hives.push(hive);
        }
    }

    /// Remove a hive from the candidate pool
    pub fn remove_hive(&self, hive: &HiveId) {
        let mut hives = self.hives.write().expect("strategy lock poisoned");
        hives.retain(|h| h != hive);
    }
}

impl ReplicationStrategy for RoundRobinStrategy {
    fn select_slave_hives(&self, blacklist: &[HiveId], n: usize) -> Vec<HiveId> {
        let hives = self.hives.read().expect("strategy lock poisoned");
        let candidates: Vec<_> = hives
            .iter()
            .filter(|h| !blacklist.contains(h))
            .cloned()
            .collect();

        if candidates.is_empty() || n == 0 {
            return Vec::new();
        }

        let start = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let take = n.min(candidates.len());
        (0..take)
            .map(|i| candidates[(start + i) % candidates.len()].clone())
            .collect()
    }
}
