//! Bee state: named dictionaries of opaque values
//!
//! State is mutated only by the owning local bee during transaction
//! application, and snapshotted wholesale for migration.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One named dictionary of a bee's state
pub type Dict = HashMap<String, Bytes>;

/// The in-memory state of a bee
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeeState {
    dicts: HashMap<String, Dict>,
}

impl BeeState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (creating if absent) a named dictionary
    pub fn dict(&mut self, name: impl Into<String>) -> &mut Dict {
        self.dicts.entry(name.into()).or_default()
    }

    /// Look up a value without creating the dictionary
    pub fn get(&self, dict: &str, key: &str) -> Option<&Bytes> {
        self.dicts.get(dict).and_then(|d| d.get(key))
    }

    /// Store a value
    pub fn put(&mut self, dict: impl Into<String>, key: impl Into<String>, value: Bytes) {
        self.dict(dict).insert(key.into(), value);
    }

    /// Iterate over the named dictionaries
    pub fn dicts(&self) -> impl Iterator<Item = (&String, &Dict)> {
        self.dicts.iter()
    }

    /// Copy every (dict, key, value) from `other` into this state
    ///
    /// Used on the target side of a migration replace.
    pub fn merge_from(&mut self, other: &BeeState) {
        for (name, dict) in other.dicts() {
            let target = self.dict(name.clone());
            for (key, value) in dict {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Whether the state holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.dicts.values().all(|d| d.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_put_get() {
        let mut state = BeeState::new();
        state.put("d", "k", Bytes::from_static(b"v"));
        assert_eq!(state.get("d", "k"), Some(&Bytes::from_static(b"v")));
        assert_eq!(state.get("d", "missing"), None);
        assert_eq!(state.get("missing", "k"), None);
    }

    #[test]
    fn test_state_merge_from() {
        let mut a = BeeState::new();
        a.put("d1", "k1", Bytes::from_static(b"v1"));

        let mut b = BeeState::new();
        b.put("d1", "k2", Bytes::from_static(b"v2"));
        b.put("d2", "k3", Bytes::from_static(b"v3"));

        a.merge_from(&b);
        assert_eq!(a.get("d1", "k1"), Some(&Bytes::from_static(b"v1")));
        assert_eq!(a.get("d1", "k2"), Some(&Bytes::from_static(b"v2")));
        assert_eq!(a.get("d2", "k3"), Some(&Bytes::from_static(b"v3")));
    }

    #[test]
    fn test_state_is_empty() {
        let mut state = BeeState::new();
        assert!(state.is_empty());
        state.dict("d");
        assert!(state.is_empty());
        state.put("d", "k", Bytes::new());
        assert!(!state.is_empty());
    }
}
