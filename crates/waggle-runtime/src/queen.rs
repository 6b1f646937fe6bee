//! The queen: per-(hive, app) event loop
//!
//! A single task multiplexes the application's data and control channels.
//! The `by_id` and `by_cell` indices, the queen's map state, and the bee
//! id counter are touched only from inside the loop, so every multi-step
//! operation on them is atomic with respect to message routing.

use crate::app::{App, DetachedHandler, MapContext};
use crate::bee::{BeeKind, BeeRef, DetachedBee, LocalBee, MsgAndHandler, ProxyBee};
use crate::heartbeat;
use crate::hive::HiveContext;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use waggle_cluster::{CmdReply, RemoteCmd, ReplaceBeeData};
use waggle_core::{
    AppName, BeeId, BeeState, CellKey, Error, HiveId, MapSet, MappedCells, Result,
};

/// Control commands understood by the queen
pub enum QueenCmd {
    /// Stop every bee, then the queen itself
    Stop { reply: oneshot::Sender<Result<()>> },
    /// Index lookup by bee id
    FindBee {
        id: BeeId,
        reply: oneshot::Sender<Result<BeeRef>>,
    },
    /// Allocate and start a fresh local bee
    CreateBee { reply: oneshot::Sender<Result<BeeId>> },
    /// Move a local bee to another hive
    MigrateBee {
        bee: BeeId,
        to: HiveId,
        reply: oneshot::Sender<Result<BeeId>>,
    },
    /// Install a migrated bee's state and cells (target side)
    ReplaceBee {
        data: ReplaceBeeData,
        reply: oneshot::Sender<Result<BeeId>>,
    },
    /// Force-set registry ownership of cells and install local entries
    LockMappedCells {
        cells: MappedCells,
        bee: BeeId,
        reply: oneshot::Sender<Result<BeeId>>,
    },
    /// Create a detached bee bound to the handler
    StartDetached {
        handler: Arc<dyn DetachedHandler>,
        reply: oneshot::Sender<Result<BeeId>>,
    },
    /// A bee somewhere in the cluster was detected dead; fan the notice
    /// out to local bees
    BeeFailed { failed: BeeId },
    /// Start a heartbeat monitor for a remote bee
    MonitorBee { bee: BeeId },
    /// Point local cell entries at the bee (used after promotion)
    InstallCells { bee: BeeId, cells: MappedCells },
    /// Remove a self-stopped bee from the indices
    DropBee { id: BeeId },
}

pub(crate) struct Queen {
    hive: Arc<HiveContext>,
    app: Arc<dyn App>,
    app_name: AppName,
    data_rx: mpsc::Receiver<MsgAndHandler>,
    ctrl_rx: mpsc::Receiver<QueenCmd>,
    ctrl_tx: mpsc::Sender<QueenCmd>,
    by_id: HashMap<BeeId, BeeRef>,
    by_cell: HashMap<CellKey, BeeRef>,
    map_state: BeeState,
    last_bee_seq: u64,
    monitors: HashMap<BeeId, tokio::task::JoinHandle<()>>,
}

impl Queen {
    /// Build the queen and the sender halves of its channels
    pub(crate) fn new(
        hive: Arc<HiveContext>,
        app: Arc<dyn App>,
    ) -> (Self, mpsc::Sender<MsgAndHandler>, mpsc::Sender<QueenCmd>) {
        let channels = &hive.config().channels;
        let (data_tx, data_rx) = mpsc::channel(channels.queen_data_depth);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(channels.queen_ctrl_depth);

        let queen = Self {
            app_name: app.name(),
            hive,
            app,
            data_rx,
            ctrl_rx,
            ctrl_tx: ctrl_tx.clone(),
            by_id: HashMap::new(),
            by_cell: HashMap::new(),
            map_state: BeeState::new(),
            last_bee_seq: 0,
            monitors: HashMap::new(),
        };
        (queen, data_tx, ctrl_tx)
    }

    /// Run the loop until either channel closes or a stop is processed
    pub(crate) async fn run(mut self) {
        info!(app = %self.app_name, hive = %self.hive.id(), "queen started");
        loop {
            tokio::select! {
                maybe = self.data_rx.recv() => match maybe {
                    Some(mh) => self.handle_msg(mh).await,
                    None => break,
                },
                maybe = self.ctrl_rx.recv() => match maybe {
                    Some(cmd) => {
                        if self.handle_cmd(cmd).await.is_break() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        for (_, monitor) in self.monitors.drain() {
            monitor.abort();
        }
        info!(app = %self.app_name, hive = %self.hive.id(), "queen stopped");
    }

    // =========================================================================
    // Control commands
    // =========================================================================

    async fn handle_cmd(&mut self, cmd: QueenCmd) -> ControlFlow<()> {
        match cmd {
            QueenCmd::Stop { reply } => {
                debug!(app = %self.app_name, "stopping bees");
                self.stop_bees().await;
                let _ = reply.send(Ok(()));
                return ControlFlow::Break(());
            }
            QueenCmd::FindBee { id, reply } => {
                let result = self
                    .by_id
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| Error::bee_not_found(&id));
                let _ = reply.send(result);
            }
            QueenCmd::CreateBee { reply } => {
                let bee = self.new_local_bee();
                debug!(bee = %bee.id(), "created a new local bee");
                let _ = reply.send(Ok(bee.id().clone()));
            }
            QueenCmd::MigrateBee { bee, to, reply } => {
                let _ = reply.send(self.migrate(bee, to).await);
            }
            QueenCmd::ReplaceBee { data, reply } => {
                let _ = reply.send(self.replace_bee(data).await);
            }
            QueenCmd::LockMappedCells { cells, bee, reply } => {
                let _ = reply.send(self.lock_mapped_cells(cells, bee).await);
            }
            QueenCmd::StartDetached { handler, reply } => {
                let id = self.next_bee_id(true);
                let (bee, bee_ref) = DetachedBee::new(id.clone(), handler, &self.hive);
                self.by_id.insert(id.clone(), bee_ref);
                bee.spawn();
                let _ = reply.send(Ok(id));
            }
            QueenCmd::BeeFailed { failed } => {
                self.fan_out_failure(failed).await;
            }
            QueenCmd::MonitorBee { bee } => {
                self.start_monitor(bee);
            }
            QueenCmd::InstallCells { bee, cells } => {
                match self.by_id.get(&bee).cloned() {
                    Some(bee_ref) => self.lock_locally(&bee_ref, &cells),
                    None => warn!(bee = %bee, "cell install for unknown bee ignored"),
                }
            }
            QueenCmd::DropBee { id } => {
                if let Some(target) = self.by_id.get(&id).cloned() {
                    self.by_id.retain(|_, b| !b.same_bee(&target));
                    self.by_cell.retain(|_, b| !b.same_bee(&target));
                    debug!(bee = %id, "dropped bee from indices");
                }
            }
        }
        ControlFlow::Continue(())
    }

    async fn stop_bees(&mut self) {
        let mut unique: Vec<BeeRef> = Vec::new();
        for bee in self.by_id.values() {
            if unique.iter().any(|b| b.same_bee(bee)) {
                continue;
            }
            unique.push(bee.clone());
        }
        for bee in unique {
            if let Err(e) = bee.stop().await {
                error!(bee = %bee.id(), error = %e, "error in stopping a bee");
            }
        }
    }

    async fn fan_out_failure(&mut self, failed: BeeId) {
        warn!(failed = %failed, "fanning bee failure out to local bees");
        let mut seen: Vec<BeeRef> = Vec::new();
        for bee in self.by_id.values() {
            if bee.kind() != BeeKind::Local || seen.iter().any(|b| b.same_bee(bee)) {
                continue;
            }
            seen.push(bee.clone());
        }
        for bee in seen {
            let _ = bee
                .enqueue_cmd(crate::bee::BeeCmd::PeerFailed {
                    failed: failed.clone(),
                })
                .await;
        }
    }

    fn start_monitor(&mut self, bee: BeeId) {
        if bee.hive == *self.hive.id() || self.monitors.contains_key(&bee) {
            return;
        }
        let handle = heartbeat::monitor(self.hive.clone(), bee.clone(), self.ctrl_tx.clone());
        self.monitors.insert(bee, handle);
    }

    // =========================================================================
    // Routing
    // =========================================================================

    async fn handle_msg(&mut self, mh: MsgAndHandler) {
        if let Some(to) = mh.msg.to.clone() {
            debug!(to = %to, kind = %mh.msg.kind, "unicast message");
            let bee = match self.by_id.get(&to).cloned() {
                Some(b) => b,
                None => {
                    if self.is_local(&to) {
                        error!(bee = %to, "cannot find a local bee");
                        panic!("missing local bee {to}: shard index corrupted");
                    }
                    self.find_or_create_bee(&to)
                }
            };

            if mh.handler.is_none() && !to.detached {
                error!(bee = %to, kind = %mh.msg.kind, "handler missing for bee message");
                panic!("handler cannot be missing for bee messages");
            }

            if let Err(e) = bee.enqueue_msg(mh).await {
                warn!(bee = %to, error = %e, "enqueue failed");
            }
            return;
        }

        let Some(map_set) = self.call_map(&mh) else {
            debug!(kind = %mh.msg.kind, "message dropped");
            return;
        };

        match map_set {
            MapSet::LocalBroadcast => {
                debug!(kind = %mh.msg.kind, "sending a message to all local bees");
                let mut seen: Vec<BeeRef> = Vec::new();
                for bee in self.by_id.values() {
                    if seen.iter().any(|b| b.same_bee(bee)) {
                        continue;
                    }
                    seen.push(bee.clone());
                }
                for bee in seen {
                    let _ = bee.enqueue_msg(mh.clone()).await;
                }
            }
            MapSet::Cells(cells) => {
                let bee = match self.any_bee(&cells) {
                    Some(b) => {
                        self.sync_bees(&cells, &b).await;
                        b
                    }
                    None => match self.new_bee_for_mapped_cells(&cells).await {
                        Ok(b) => b,
                        Err(e) => {
                            error!(error = %e, cells = %cells, "cannot place message; dropped");
                            return;
                        }
                    },
                };
                debug!(bee = %bee.id(), "sending to bee");
                if let Err(e) = bee.enqueue_msg(mh).await {
                    warn!(bee = %bee.id(), error = %e, "enqueue failed");
                }
            }
        }
    }

    /// Invoke the handler's map function behind a panic guard
    ///
    /// A panic inside application code drops the message; the queen never
    /// dies from handler faults.
    fn call_map(&mut self, mh: &MsgAndHandler) -> Option<MapSet> {
        let handler = mh.handler.as_ref()?;
        let app_name = self.app_name.clone();
        let hive_id = self.hive.id().clone();
        let map_state = &mut self.map_state;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut ctx = MapContext {
                app: &app_name,
                hive: &hive_id,
                state: map_state,
            };
            handler.map(&mh.msg, &mut ctx)
        }));

        match result {
            Ok(map_set) => Some(map_set),
            Err(_) => {
                error!(app = %app_name, kind = %mh.msg.kind, "error in map; message dropped");
                None
            }
        }
    }

    fn any_bee(&self, cells: &MappedCells) -> Option<BeeRef> {
        cells
            .iter()
            .find_map(|cell| self.by_cell.get(cell).cloned())
    }

    /// Verify every cell either maps to `owner` or is unbound, binding the
    /// unbound ones
    ///
    /// A cell owned by a different bee means the shard has split, which
    /// breaks every routing guarantee; the hive aborts.
    async fn sync_bees(&mut self, cells: &MappedCells, owner: &BeeRef) {
        for cell in cells.iter() {
            match self.by_cell.get(cell).cloned() {
                None => {
                    if let Err(e) = self.lock_key(cell, owner).await {
                        warn!(cell = %cell, error = %e, "cell lock failed");
                    }
                }
                Some(existing) if existing.same_bee(owner) => {}
                Some(existing) => {
                    error!(
                        cell = %cell,
                        owner = %existing.id(),
                        expected = %owner.id(),
                        "inconsistent shards for cells"
                    );
                    panic!("inconsistent shards for cell {cell}");
                }
            }
        }
    }

    // =========================================================================
    // Ownership and locking
    // =========================================================================

    /// Lock `cells` for `bee` in the registry
    ///
    /// Returns the id that actually owns the cells after the call. In
    /// isolated mode this is a no-op returning `bee`.
    async fn lock(&self, cells: &MappedCells, bee: &BeeId, force: bool) -> Result<BeeId> {
        if self.hive.isolated() {
            return Ok(bee.clone());
        }
        if force {
            self.hive.registry().set(bee, cells).await?;
            Ok(bee.clone())
        } else {
            self.hive.registry().store_or_get(bee, cells).await
        }
    }

    /// Point local cell entries at the bee
    fn lock_locally(&mut self, bee: &BeeRef, cells: &MappedCells) {
        for cell in cells.iter() {
            self.by_cell.insert(cell.clone(), bee.clone());
        }
    }

    async fn lock_key(&mut self, cell: &CellKey, bee: &BeeRef) -> Result<()> {
        let single: MappedCells = [cell.clone()].into_iter().collect();
        self.lock_locally(bee, &single);
        if self.hive.isolated() {
            return Ok(());
        }
        self.hive.registry().store_or_get(bee.id(), &single).await?;
        Ok(())
    }

    async fn lock_mapped_cells(&mut self, cells: MappedCells, bee: BeeId) -> Result<BeeId> {
        let owner = self.lock(&cells, &bee, true).await?;
        if owner != bee {
            return Err(Error::internal(format!("cannot lock cells for {bee}")));
        }
        let bee_ref = self.find_or_create_bee(&owner);
        self.lock_locally(&bee_ref, &cells);
        Ok(owner)
    }

    // =========================================================================
    // Bee creation
    // =========================================================================

    fn is_local(&self, id: &BeeId) -> bool {
        id.hive == *self.hive.id()
    }

    fn next_bee_id(&mut self, detached: bool) -> BeeId {
        self.last_bee_seq += 1;
        BeeId::new(
            self.hive.id().clone(),
            self.app_name.clone(),
            self.last_bee_seq,
            detached,
        )
    }

    fn new_local_bee(&mut self) -> BeeRef {
        let id = self.next_bee_id(false);
        self.find_or_create_bee(&id)
    }

    fn find_or_create_bee(&mut self, id: &BeeId) -> BeeRef {
        if let Some(bee) = self.by_id.get(id) {
            return bee.clone();
        }

        if self.is_local(id) {
            let (bee, bee_ref) = LocalBee::new(
                id.clone(),
                self.app.clone(),
                self.hive.clone(),
                self.ctrl_tx.clone(),
            );
            self.by_id.insert(id.clone(), bee_ref.clone());
            bee.spawn();
            bee_ref
        } else {
            let state = Arc::new(tokio::sync::RwLock::new(BeeState::new()));
            let (proxy, bee_ref) = ProxyBee::new(id.clone(), &self.hive, state);
            self.by_id.insert(id.clone(), bee_ref.clone());
            proxy.spawn();
            self.start_monitor(id.clone());
            bee_ref
        }
    }

    /// Create the owner bee for a set of cells
    ///
    /// A fresh local id is allocated speculatively; if the registry
    /// already knows an owner, the allocation is released and the owner
    /// (possibly remote) is materialized instead.
    async fn new_bee_for_mapped_cells(&mut self, cells: &MappedCells) -> Result<BeeRef> {
        let new_id = self.next_bee_id(false);
        let owner = self.lock(cells, &new_id, false).await?;
        if owner != new_id {
            self.last_bee_seq -= 1;
        }
        let bee = self.find_or_create_bee(&owner);
        self.lock_locally(&bee, cells);
        Ok(bee)
    }

    // =========================================================================
    // Migration
    // =========================================================================

    async fn migrate(&mut self, bee_id: BeeId, to: HiveId) -> Result<BeeId> {
        if bee_id.detached {
            return Err(Error::MigrateDetached {
                id: bee_id.to_string(),
            });
        }
        if to == *self.hive.id() {
            return Err(Error::internal(format!(
                "bee {bee_id} is already on {to}"
            )));
        }

        let old_bee = self
            .by_id
            .get(&bee_id)
            .cloned()
            .ok_or_else(|| Error::bee_not_found(&bee_id))?;
        if old_bee.kind() != BeeKind::Local {
            return Err(Error::internal(format!("bee {bee_id} is not local")));
        }

        old_bee.stop().await?;
        debug!(bee = %bee_id, "bee stopped for migration");

        // TODO(queen): migrations past the control channel depth can
        // deadlock the queen against its own bees; bound in-flight
        // migrations before lifting BEE_CTRL_CHANNEL_DEPTH.
        let proxy = self.hive.proxy(&to);
        let new_id = match proxy
            .send_cmd(RemoteCmd::CreateBee {
                app: self.app_name.clone(),
            })
            .await?
        {
            CmdReply::BeeCreated(id) => id,
            other => {
                return Err(Error::internal(format!(
                    "unexpected create reply: {other:?}"
                )))
            }
        };
        debug!(bee = %new_id, "created a new bee for migration");

        let (proxy_task, proxy_ref) = self.proxy_from_local(new_id.clone(), &old_bee)?;
        let cells = self.cells_of_bee(&old_bee);
        let state = old_bee.state_snapshot().await;

        match proxy
            .send_cmd(RemoteCmd::ReplaceBee(ReplaceBeeData {
                old_bee: bee_id.clone(),
                new_bee: new_id.clone(),
                state,
                cells: cells.clone(),
            }))
            .await?
        {
            CmdReply::BeeReplaced(_) => {}
            other => {
                return Err(Error::internal(format!(
                    "unexpected replace reply: {other:?}"
                )))
            }
        }

        self.lock_locally(&proxy_ref, &cells);
        proxy_task.spawn();
        info!(from = %bee_id, to = %new_id, "bee migrated");
        Ok(new_id)
    }

    /// Convert a stopped local bee into a proxy for its remote successor
    ///
    /// The proxy is registered under both the remote id and the old local
    /// id so in-flight references keep resolving.
    fn proxy_from_local(
        &mut self,
        remote_id: BeeId,
        old_bee: &BeeRef,
    ) -> Result<(ProxyBee, BeeRef)> {
        if self.is_local(&remote_id) {
            return Err(Error::internal(format!(
                "bee id {remote_id} is a local id"
            )));
        }
        if self.by_id.contains_key(&remote_id) {
            return Err(Error::DuplicateBee {
                id: remote_id.to_string(),
            });
        }

        let (proxy, proxy_ref) = ProxyBee::new(remote_id.clone(), &self.hive, old_bee.state_handle());
        self.by_id.insert(remote_id, proxy_ref.clone());
        self.by_id.insert(old_bee.id().clone(), proxy_ref.clone());
        Ok((proxy, proxy_ref))
    }

    /// The cells currently indexed to a bee
    fn cells_of_bee(&self, bee: &BeeRef) -> MappedCells {
        self.by_cell
            .iter()
            .filter(|(_, b)| b.same_bee(bee))
            .map(|(cell, _)| cell.clone())
            .collect()
    }

    /// Install a migrated bee on this hive (target side of a migration)
    async fn replace_bee(&mut self, data: ReplaceBeeData) -> Result<BeeId> {
        if !self.is_local(&data.new_bee) {
            return Err(Error::internal(format!(
                "cannot replace with a non-local bee {}",
                data.new_bee
            )));
        }

        let bee = self
            .by_id
            .get(&data.new_bee)
            .cloned()
            .ok_or_else(|| Error::bee_not_found(&data.new_bee))?;

        {
            let handle = bee.state_handle();
            let mut state = handle.write().await;
            state.merge_from(&data.state);
        }
        debug!(old = %data.old_bee, new = %data.new_bee, "replicated state");

        self.lock(&data.cells, &data.new_bee, true).await?;
        debug!(bee = %data.new_bee, cells = %data.cells, "locked cells");

        self.lock_locally(&bee, &data.cells);
        Ok(data.new_bee)
    }
}
