//! Colony failure handling
//!
//! Triggered by a peer-failed notice on a surviving bee. Under the
//! registry's exclusive app lock the survivor either replaces a dead slave
//! (master recovery) or, if its master died, reconciles transaction logs
//! with the remaining slaves, recruits replacements, and publishes itself
//! as the new master through compare-and-set. Losing the CAS means a
//! competing survivor won; the loser stops.

use crate::bee::{BeeCmd, LocalBee};
use crate::queen::QueenCmd;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use waggle_cluster::{CmdReply, RemoteCmd};
use waggle_core::{BeeId, Tx, TxStatus};

impl LocalBee {
    /// Entry point for a peer-failure notice
    ///
    /// Returning `Break` stops the bee: its local view no longer
    /// represents the registry's truth.
    pub(crate) async fn handle_peer_failed(&mut self, failed: BeeId) -> ControlFlow<()> {
        self.abort_tx();

        if self.hive.isolated() {
            return ControlFlow::Continue(());
        }

        if let Err(e) = self.hive.registry().try_lock_app(&self.id).await {
            debug!(bee = %self.id, error = %e, "app lock busy; snoozing failure handling");
            let ctrl = self.ctrl_tx.clone();
            let snooze = Duration::from_millis(self.hive.config().replication.lock_timeout_ms);
            tokio::spawn(async move {
                tokio::time::sleep(snooze).await;
                let _ = ctrl.send(BeeCmd::PeerFailed { failed }).await;
            });
            return ControlFlow::Continue(());
        }

        let flow = self.dispatch_failure(&failed).await;

        if let Err(e) = self.hive.registry().unlock_app(&self.id).await {
            error!(bee = %self.id, error = %e, "cannot unlock the application");
            panic!("cannot unlock app {}: {e}", self.id.app);
        }
        flow
    }

    async fn dispatch_failure(&mut self, failed: &BeeId) -> ControlFlow<()> {
        let colony = self.colony.clone();
        if colony.is_master(failed) {
            self.handle_master_failure(failed).await
        } else if colony.is_slave(failed) && self.is_master() {
            self.handle_slave_failure(failed).await
        } else {
            debug!(bee = %self.id, failed = %failed, "failed bee is not in our colony");
            ControlFlow::Continue(())
        }
    }

    /// Master recovery: replace a dead slave
    async fn handle_slave_failure(&mut self, slave_id: &BeeId) -> ControlFlow<()> {
        let old_col = self.colony.clone();
        let mut new_col = old_col.clone();
        if !new_col.del_slave(slave_id) {
            return ControlFlow::Continue(());
        }

        warn!(bee = %self.id, slave = %slave_id, "bee has a failed slave");

        new_col.bump_generation();
        let (new_col, new_slaves) = self.create_slaves_for_colony(new_col, 1).await;
        match new_slaves.first() {
            None => error!(master = %new_col.master, "cannot create a new slave"),
            Some(s) => debug!(slave = %s, master = %new_col.master, "created replacement slave"),
        }

        let cells = match self.hive.registry().mapped_cells(&old_col).await {
            Ok(cells) => cells,
            Err(e) => {
                error!(bee = %self.id, error = %e, "cannot find the mapped cells of colony");
                return ControlFlow::Break(());
            }
        };

        debug!(old = %old_col, new = %new_col, cells = %cells, "replacing colony in the registry");
        match self
            .hive
            .registry()
            .compare_and_set(&old_col, &new_col, &cells)
            .await
        {
            Ok(_) => {
                self.install_colony(new_col.clone());
                info!(colony = %new_col, "replaced the failed slave");
                ControlFlow::Continue(())
            }
            Err(e) => {
                error!(bee = %self.id, error = %e, "bee has an expired colony");
                ControlFlow::Break(())
            }
        }
    }

    /// Slave promotion: reconcile logs and take over a dead master's colony
    ///
    /// Runs on every surviving slave; the registry CAS serializes which
    /// one wins.
    async fn handle_master_failure(&mut self, master_id: &BeeId) -> ControlFlow<()> {
        let old_col = self.colony.clone();
        let mut new_col = old_col.clone();
        if !new_col.is_master(master_id) {
            return ControlFlow::Continue(());
        }
        if !new_col.del_slave(&self.id) {
            return ControlFlow::Continue(());
        }

        warn!(bee = %self.id, master = %master_id, "bee has a failed master");

        // Probe the peer slaves.
        let mut failed_slaves: Vec<BeeId> = Vec::new();
        let mut peer_infos = Vec::new();
        for peer in new_col.slaves.clone() {
            match self
                .hive
                .proxy(&peer.hive)
                .send_cmd(RemoteCmd::GetTxInfo { to: peer.clone() })
                .await
            {
                Ok(CmdReply::TxInfo(info)) => {
                    debug!(peer = %peer, info = %info, "peer slave log view");
                    peer_infos.push((peer, info));
                }
                Ok(other) => {
                    debug!(peer = %peer, reply = ?other, "unexpected probe reply; peer marked failed");
                    failed_slaves.push(peer);
                }
                Err(e) => {
                    debug!(peer = %peer, error = %e, "bee finds peer slave dead");
                    failed_slaves.push(peer);
                }
            }
        }

        // A peer with a newer generation means a newer quorum already
        // elected a master; this bee is stale.
        for (peer, info) in &peer_infos {
            if info.generation > self.colony.generation {
                error!(bee = %self.id, peer = %peer, "peer has a newer generation; stopping");
                return ControlFlow::Break(());
            }
        }

        let cells = match self.hive.registry().mapped_cells(&old_col).await {
            Ok(cells) => cells,
            Err(e) => {
                error!(colony = %old_col, error = %e, "cannot find the mapped cells of colony");
                return ControlFlow::Continue(());
            }
        };

        // Reconcile log horizons across the current generation.
        let mut max_info = self.tx_info();
        let mut last_buffered_slave: Option<BeeId> = None;
        for (peer, info) in &peer_infos {
            if info.generation < max_info.generation {
                continue;
            }
            if info.last_committed > max_info.last_committed {
                max_info.last_committed = info.last_committed;
            }
            if info.last_buffered > max_info.last_buffered {
                max_info.last_buffered = info.last_buffered;
                last_buffered_slave = Some(peer.clone());
            }
        }

        if max_info.last_committed > max_info.last_buffered {
            // TODO(failover): an inconsistent peer keeps running after the
            // clamp; decide whether it should be stopped instead.
            error!(info = %max_info, "inconsistencies in peer logs; clamping commit horizon");
            max_info.last_committed = max_info.last_buffered;
        }

        // Pull the entries this bee is missing from the most advanced peer.
        if let Some(src) = last_buffered_slave.clone() {
            let from_seq = self.last_buffered() + 1;
            match self
                .hive
                .proxy(&src.hive)
                .send_cmd(RemoteCmd::GetTx {
                    to: src.clone(),
                    from_seq,
                    to_seq: max_info.last_buffered,
                })
                .await
            {
                Ok(CmdReply::Txs(txs)) => {
                    for mut tx in txs {
                        tx.status = if tx.seq <= max_info.last_committed {
                            TxStatus::Committed
                        } else {
                            TxStatus::Buffered
                        };
                        self.append_pulled_tx(tx);
                    }
                }
                _ => {
                    // The only known copy of the missing entries is gone;
                    // this promotion cannot proceed safely.
                    error!(peer = %src, "catch-up source unreachable; aborting promotion");
                    return ControlFlow::Continue(());
                }
            }
        }

        // Push missing entries forward to the lagging peers.
        for (peer, info) in &peer_infos {
            if failed_slaves.contains(peer) || info.last_buffered >= max_info.last_buffered {
                continue;
            }
            let start = self
                .tx_buf
                .iter()
                .position(|t| t.seq == info.last_buffered)
                .map(|i| i + 1)
                .unwrap_or(0);
            let pending: Vec<Tx> = self.tx_buf[start..].to_vec();
            let proxy = self.hive.proxy(&peer.hive);
            for tx in pending {
                if let Err(e) = proxy
                    .send_cmd(RemoteCmd::BufferTx {
                        to: peer.clone(),
                        tx,
                    })
                    .await
                {
                    warn!(peer = %peer, error = %e, "peer unreachable during buffer push; marked failed");
                    failed_slaves.push(peer.clone());
                    break;
                }
            }
        }

        // Advance the lagging peers' commit horizon.
        for (peer, info) in &peer_infos {
            if failed_slaves.contains(peer) || info.last_committed >= max_info.last_committed {
                continue;
            }
            if let Err(e) = self
                .hive
                .proxy(&peer.hive)
                .send_cmd(RemoteCmd::CommitTx {
                    to: peer.clone(),
                    seq: max_info.last_committed,
                })
                .await
            {
                warn!(peer = %peer, error = %e, "peer unreachable during commit push; marked failed");
                failed_slaves.push(peer.clone());
            }
        }

        for peer in &failed_slaves {
            new_col.del_slave(peer);
        }

        // Take over the colony and top up its slaves.
        new_col.master = self.id.clone();
        let factor = self.app.replication_factor();
        let need = factor.saturating_sub(new_col.slaves.len() + 1);
        let (mut new_col, new_slaves) = if need > 0 {
            self.create_slaves_for_colony(new_col, need).await
        } else {
            (new_col, Vec::new())
        };
        if need > 0 && new_slaves.is_empty() {
            error!(colony = %new_col, "cannot create a slave for colony");
        }
        if new_col.slaves.len() < self.app.commit_threshold() {
            warn!(
                colony = %new_col,
                slaves = new_col.slaves.len(),
                threshold = self.app.commit_threshold(),
                "colony below commit threshold"
            );
        }

        new_col.bump_generation();
        if let Err(e) = self
            .hive
            .registry()
            .compare_and_set(&old_col, &new_col, &cells)
            .await
        {
            error!(bee = %self.id, colony = %new_col, error = %e, "bee has an expired colony");
            return ControlFlow::Break(());
        }

        // Announce the new colony; an unreachable slave is repaired by the
        // next failure round.
        for peer in new_col.slaves.clone() {
            if let Err(e) = self.send_join_colony(&new_col, &peer).await {
                warn!(peer = %peer, error = %e, "peer unreachable during colony announce");
            }
        }

        self.install_colony(new_col.clone());
        let _ = self
            .queen_ctrl
            .send(QueenCmd::InstallCells {
                bee: self.id.clone(),
                cells: cells.clone(),
            })
            .await;

        self.commit_through(max_info.last_buffered);
        self.tx_seq = max_info.last_buffered;

        info!(colony = %new_col, "successfully replaced the failed master");
        ControlFlow::Continue(())
    }
}
