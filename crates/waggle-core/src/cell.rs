//! Cells: the unit of sharding and ownership
//!
//! A cell is a (dictionary, key) pair. An application's map function turns
//! a message into a set of cells, and the queen routes the message to the
//! bee that owns them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A (dictionary, key) pair addressing one shard of application state
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellKey {
    /// The state dictionary the key lives in
    pub dict: String,
    /// The key within the dictionary
    pub key: String,
}

impl CellKey {
    /// Create a new cell key
    pub fn new(dict: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            dict: dict.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.dict, self.key)
    }
}

/// An unordered set of cell keys owned by a single bee
///
/// Backed by a `BTreeSet` so iteration order is deterministic.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct MappedCells(BTreeSet<CellKey>);

impl MappedCells {
    /// Create an empty cell set
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Insert a cell; returns false if it was already present
    pub fn insert(&mut self, cell: CellKey) -> bool {
        self.0.insert(cell)
    }

    /// Check whether the set contains a cell
    pub fn contains(&self, cell: &CellKey) -> bool {
        self.0.contains(cell)
    }

    /// Iterate the cells in deterministic order
    pub fn iter(&self) -> impl Iterator<Item = &CellKey> {
        self.0.iter()
    }

    /// Number of cells in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge another cell set into this one
    pub fn extend(&mut self, other: &MappedCells) {
        for cell in other.iter() {
            self.0.insert(cell.clone());
        }
    }
}

impl FromIterator<CellKey> for MappedCells {
    fn from_iter<I: IntoIterator<Item = CellKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for MappedCells {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, cell) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", cell)?;
        }
        write!(f, "}}")
    }
}

/// Result of an application map function
#[derive(Debug, Clone)]
pub enum MapSet {
    /// Route to the bee owning these cells
    Cells(MappedCells),
    /// Fan out to every local bee instead of routing to an owner
    LocalBroadcast,
}

impl MapSet {
    /// Build a cell-routed map set from an iterator of cells
    pub fn cells<I: IntoIterator<Item = CellKey>>(iter: I) -> Self {
        Self::Cells(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_cells_insert_dedup() {
        let mut cells = MappedCells::new();
        assert!(cells.insert(CellKey::new("d", "k1")));
        assert!(!cells.insert(CellKey::new("d", "k1")));
        assert!(cells.insert(CellKey::new("d", "k2")));
        assert_eq!(cells.len(), 2);
    }

    #[test]
    fn test_mapped_cells_deterministic_order() {
        let cells: MappedCells = [
            CellKey::new("d", "k2"),
            CellKey::new("d", "k1"),
            CellKey::new("c", "k9"),
        ]
        .into_iter()
        .collect();

        let order: Vec<_> = cells.iter().map(|c| format!("{}", c)).collect();
        assert_eq!(order, vec!["(c, k9)", "(d, k1)", "(d, k2)"]);
    }

    #[test]
    fn test_mapped_cells_extend() {
        let mut a: MappedCells = [CellKey::new("d", "k1")].into_iter().collect();
        let b: MappedCells = [CellKey::new("d", "k2")].into_iter().collect();
        a.extend(&b);
        assert_eq!(a.len(), 2);
        assert!(a.contains(&CellKey::new("d", "k2")));
    }
}
