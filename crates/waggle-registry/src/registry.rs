//! Registry trait
//!
//! Explicit trait with compare-and-set colony mutation.

use async_trait::async_trait;
use waggle_core::{BeeId, Colony, MappedCells, Result};

/// The registry trait: authoritative `cells -> colony` mapping
///
/// # Guarantees
/// - Unique ownership: each cell maps to at most one colony at any time
/// - Linearizable operations: concurrent compare-and-set calls on the same
///   cells admit at most one winner per old value
///
/// All operations are explicit and async; errors are returned, never
/// panicked.
#[async_trait]
pub trait Registry: Send + Sync {
    // =========================================================================
    // App Lock
    // =========================================================================

    /// Acquire the exclusive advisory lock for the bee's app namespace
    ///
    /// # Errors
    /// `Error::LockContention` if another bee holds the lock.
    async fn try_lock_app(&self, bee: &BeeId) -> Result<()>;

    /// Release the app lock
    ///
    /// # Errors
    /// Returns an error if the caller does not hold the lock.
    async fn unlock_app(&self, bee: &BeeId) -> Result<()>;

    // =========================================================================
    // Cell Ownership
    // =========================================================================

    /// Bind unbound cells to a fresh colony owned by `bee`, or return the
    /// existing owner if any cell is already bound
    ///
    /// The returned bee ID is the definitive owner of the cells after the
    /// call; callers reconcile against it.
    async fn store_or_get(&self, bee: &BeeId, cells: &MappedCells) -> Result<BeeId>;

    /// Unconditionally take ownership of the cells for `bee`
    async fn set(&self, bee: &BeeId, cells: &MappedCells) -> Result<()>;

    /// Atomically swap the colony descriptor for `cells` iff the current
    /// value equals `old`
    ///
    /// Returns the previously observed colony on success.
    ///
    /// # Errors
    /// `Error::StaleColony { observed }` if the current value differs from
    /// `old`; the caller's view is stale and the only correct response is
    /// to stop the local bee.
    async fn compare_and_set(
        &self,
        old: &Colony,
        new: &Colony,
        cells: &MappedCells,
    ) -> Result<Colony>;

    /// Reverse lookup: the cells currently bound to `colony`
    ///
    /// # Errors
    /// `Error::ColonyNotFound` if the colony no longer owns any cells.
    async fn mapped_cells(&self, colony: &Colony) -> Result<MappedCells>;
}
