//! In-memory registry implementation
//!
//! Suitable for tests and single-process deployments. A single write lock
//! linearizes every mutation, which is what gives compare-and-set its
//! at-most-one-winner guarantee here.

use crate::registry::Registry;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use waggle_core::{AppName, BeeId, CellKey, Colony, Error, MappedCells, Result};

#[derive(Default)]
struct Inner {
    /// Cell bindings, scoped per app
    cells: HashMap<(AppName, CellKey), Colony>,
    /// Advisory app locks: app -> holder
    locks: HashMap<AppName, BeeId>,
}

/// In-memory registry
///
/// All state is lost on restart.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<Inner>,
}

impl MemoryRegistry {
    /// Create a new in-memory registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the colony currently bound to a cell (for tests)
    pub async fn colony_of(&self, app: &AppName, cell: &CellKey) -> Option<Colony> {
        let inner = self.inner.read().await;
        inner.cells.get(&(app.clone(), cell.clone())).cloned()
    }

    /// Bind cells directly to a colony, bypassing compare-and-set
    ///
    /// For bootstrap and test seeding only; live mutations go through
    /// `compare_and_set`.
    pub async fn bind(&self, colony: &Colony, cells: &MappedCells) {
        let mut inner = self.inner.write().await;
        for cell in cells.iter() {
            inner
                .cells
                .insert((colony.master.app.clone(), cell.clone()), colony.clone());
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn try_lock_app(&self, bee: &BeeId) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.locks.get(&bee.app) {
            Some(holder) if holder != bee => Err(Error::LockContention {
                app: bee.app.to_string(),
            }),
            _ => {
                inner.locks.insert(bee.app.clone(), bee.clone());
                Ok(())
            }
        }
    }

    async fn unlock_app(&self, bee: &BeeId) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.locks.get(&bee.app) {
            Some(holder) if holder == bee => {
                inner.locks.remove(&bee.app);
                Ok(())
            }
            Some(holder) => Err(Error::internal(format!(
                "unlock of {} held by {}",
                bee.app, holder
            ))),
            None => Err(Error::internal(format!("unlock of unlocked app {}", bee.app))),
        }
    }

    async fn store_or_get(&self, bee: &BeeId, cells: &MappedCells) -> Result<BeeId> {
        let mut inner = self.inner.write().await;

        for cell in cells.iter() {
            if let Some(existing) = inner.cells.get(&(bee.app.clone(), cell.clone())) {
                debug!(cell = %cell, owner = %existing.master, "cells already bound");
                return Ok(existing.master.clone());
            }
        }

        // Fresh bindings publish at generation 0, matching the owner's
        // fresh local colony view; every later mutation increases it.
        let colony = Colony::with_generation(bee.clone(), 0);
        for cell in cells.iter() {
            inner
                .cells
                .insert((bee.app.clone(), cell.clone()), colony.clone());
        }
        Ok(bee.clone())
    }

    async fn set(&self, bee: &BeeId, cells: &MappedCells) -> Result<()> {
        let mut inner = self.inner.write().await;

        let prev_generation = cells
            .iter()
            .filter_map(|cell| inner.cells.get(&(bee.app.clone(), cell.clone())))
            .map(|c| c.generation)
            .max()
            .unwrap_or(0);

        let colony = Colony::with_generation(bee.clone(), prev_generation + 1);
        for cell in cells.iter() {
            inner
                .cells
                .insert((bee.app.clone(), cell.clone()), colony.clone());
        }
        Ok(())
    }

    async fn compare_and_set(
        &self,
        old: &Colony,
        new: &Colony,
        cells: &MappedCells,
    ) -> Result<Colony> {
        debug_assert!(
            new.generation > old.generation,
            "published colony mutations must increase the generation"
        );

        let mut inner = self.inner.write().await;
        let app = &old.master.app;

        for cell in cells.iter() {
            match inner.cells.get(&(app.clone(), cell.clone())) {
                None => {
                    return Err(Error::ColonyNotFound {
                        master: old.master.to_string(),
                    })
                }
                Some(current) if current != old => {
                    return Err(Error::StaleColony {
                        observed: current.clone(),
                    })
                }
                Some(_) => {}
            }
        }

        for cell in cells.iter() {
            inner
                .cells
                .insert((app.clone(), cell.clone()), new.clone());
        }
        Ok(old.clone())
    }

    async fn mapped_cells(&self, colony: &Colony) -> Result<MappedCells> {
        let inner = self.inner.read().await;
        let cells: MappedCells = inner
            .cells
            .iter()
            .filter(|((app, _), bound)| *app == colony.master.app && bound.master == colony.master)
            .map(|((_, cell), _)| cell.clone())
            .collect();

        if cells.is_empty() {
            return Err(Error::ColonyNotFound {
                master: colony.master.to_string(),
            });
        }
        Ok(cells)
    }
}
