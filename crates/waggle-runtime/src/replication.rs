//! Steady-state colony replication
//!
//! A master keeps `slaves = replication_factor - 1` by recruiting on
//! demand. Recruitment walks the replication strategy's candidates,
//! blacklisting hives that fail any step of create / join / catch-up,
//! and publishes the grown colony through registry compare-and-set.

use crate::bee::LocalBee;
use tracing::{debug, error, info};
use waggle_cluster::{CmdReply, RemoteCmd};
use waggle_core::{BeeId, Colony, Error, Result, RECRUIT_ROUNDS_COUNT_MAX};

impl LocalBee {
    /// Reconcile the colony's slave count with the replication factor
    ///
    /// Returns the number of slaves recruited. An under-replicated colony
    /// (below the commit threshold) surfaces `Error::UnderReplicated` so
    /// the caller knows the colony keeps running degraded.
    pub(crate) async fn try_to_recruit_slaves(&mut self) -> Result<usize> {
        let old_col = self.colony.clone();
        if !self.is_master() {
            return Err(Error::internal(format!(
                "{} is not the master of {}",
                self.id, old_col
            )));
        }

        let factor = self.app.replication_factor();
        let need = factor.saturating_sub(old_col.slaves.len() + 1);
        if need == 0 {
            return Ok(0);
        }

        let (mut new_col, new_slaves) = self.create_slaves_for_colony(old_col.clone(), need).await;
        debug!(bee = %self.id, recruited = new_slaves.len(), colony = %old_col, "recruited slaves");

        if new_slaves.is_empty() {
            return Err(Error::UnderReplicated {
                have: new_col.slaves.len(),
                want: self.app.commit_threshold(),
            });
        }

        new_col.bump_generation();
        for slave in new_slaves.iter() {
            if let Err(e) = self.send_join_colony(&new_col, slave).await {
                error!(slave = %slave, error = %e, "slave did not join the colony");
                new_col.del_slave(slave);
            }
        }

        let cells = self.hive.registry().mapped_cells(&old_col).await?;
        self.hive
            .registry()
            .compare_and_set(&old_col, &new_col, &cells)
            .await?;

        let recruited = new_slaves
            .iter()
            .filter(|s| new_col.is_slave(s))
            .count();
        self.install_colony(new_col.clone());

        if new_col.slaves.len() < self.app.commit_threshold() {
            return Err(Error::UnderReplicated {
                have: new_col.slaves.len(),
                want: self.app.commit_threshold(),
            });
        }
        Ok(recruited)
    }

    /// Grow `col` by up to `n` slaves
    ///
    /// Walks strategy candidates, blacklisting hives that fail creation,
    /// join, or log replication. Bounded to a few strategy rounds so a
    /// strategy that keeps proposing broken hives cannot loop forever.
    /// Returns the grown colony and the recruited slave ids (possibly
    /// fewer than `n`).
    pub(crate) async fn create_slaves_for_colony(
        &mut self,
        col: Colony,
        n: usize,
    ) -> (Colony, Vec<BeeId>) {
        let mut blacklist = col.slave_hives();
        blacklist.push(col.master.hive.clone());

        let mut new_col = col;
        let mut recruited: Vec<BeeId> = Vec::new();

        for _ in 0..RECRUIT_ROUNDS_COUNT_MAX {
            if recruited.len() >= n {
                break;
            }

            let candidates = self
                .hive
                .strategy()
                .select_slave_hives(&blacklist, n - recruited.len());
            if candidates.is_empty() {
                break;
            }

            for candidate in candidates {
                debug!(hive = %candidate, "trying to create a slave bee");
                blacklist.push(candidate.clone());

                let proxy = self.hive.proxy(&candidate);
                let new_slave = match proxy
                    .send_cmd(RemoteCmd::CreateBee {
                        app: self.app.name(),
                    })
                    .await
                {
                    Ok(CmdReply::BeeCreated(id)) => id,
                    Ok(other) => {
                        debug!(hive = %candidate, reply = ?other, "unexpected create reply");
                        continue;
                    }
                    Err(e) => {
                        debug!(hive = %candidate, error = %e, "cannot create bee");
                        continue;
                    }
                };

                if !new_col.add_slave(new_slave.clone()) {
                    debug!(slave = %new_slave, "candidate violates colony invariants");
                    continue;
                }

                if let Err(e) = self.send_join_colony(&new_col, &new_slave).await {
                    error!(slave = %new_slave, error = %e, "new slave cannot join the colony");
                    new_col.del_slave(&new_slave);
                    continue;
                }

                if let Err(e) = self.replicate_all_tx_on_slave(&new_slave).await {
                    error!(slave = %new_slave, error = %e, "error in replicating the log");
                    new_col.del_slave(&new_slave);
                    continue;
                }

                info!(slave = %new_slave, colony = %new_col, "recruited slave");
                recruited.push(new_slave);
                if recruited.len() >= n {
                    break;
                }
            }
        }

        (new_col, recruited)
    }

    pub(crate) async fn send_join_colony(&self, col: &Colony, slave: &BeeId) -> Result<()> {
        self.hive
            .proxy(&slave.hive)
            .send_cmd(RemoteCmd::JoinColony {
                to: slave.clone(),
                colony: col.clone(),
            })
            .await
            .map(|_| ())
    }

    /// Push the entire transaction buffer to a freshly recruited slave
    pub(crate) async fn replicate_all_tx_on_slave(&self, slave: &BeeId) -> Result<()> {
        let proxy = self.hive.proxy(&slave.hive);
        for tx in self.tx_buf.iter() {
            proxy
                .send_cmd(RemoteCmd::BufferTx {
                    to: slave.clone(),
                    tx: tx.clone(),
                })
                .await?;
        }
        if self.last_committed > 0 {
            proxy
                .send_cmd(RemoteCmd::CommitTx {
                    to: slave.clone(),
                    seq: self.last_committed,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{bee_id, cells, harness, ScriptMesh, TestApp};
    use std::sync::Arc;
    use waggle_cluster::{CmdReply, RemoteCmd, RoundRobinStrategy};
    use waggle_core::{Colony, Error, HiveId, TxStatus};
    use waggle_registry::{MemoryRegistry, Registry};

    #[tokio::test]
    async fn test_recruit_grows_colony_and_publishes() {
        let registry = Arc::new(MemoryRegistry::new());
        let mesh = ScriptMesh::new();
        mesh.on("h2", |cmd| match cmd {
            RemoteCmd::CreateBee { .. } => Ok(CmdReply::BeeCreated(bee_id("h2", 7))),
            _ => Ok(CmdReply::Ok),
        });
        mesh.on("h3", |cmd| match cmd {
            RemoteCmd::CreateBee { .. } => Ok(CmdReply::BeeCreated(bee_id("h3", 7))),
            _ => Ok(CmdReply::Ok),
        });

        let strategy = Arc::new(RoundRobinStrategy::new(vec![
            HiveId::new("h2").unwrap(),
            HiveId::new("h3").unwrap(),
        ]));
        let app = Arc::new(TestApp::new(3, 1));
        let (mut bee, _bee_ref, _queen_rx) =
            harness("h1", 1, app, registry.clone(), strategy, mesh.clone());

        // The colony's cells must already be registered.
        registry
            .store_or_get(&bee.id, &cells(&["k1"]))
            .await
            .unwrap();

        let recruited = bee.try_to_recruit_slaves().await.unwrap();
        assert_eq!(recruited, 2);
        assert_eq!(bee.colony.slaves.len(), 2);
        assert_eq!(bee.colony.generation, 1);

        // Registry holds the published colony.
        let bound = registry
            .colony_of(&bee.id.app, &waggle_core::CellKey::new("d", "k1"))
            .await
            .unwrap();
        assert_eq!(bound, bee.colony);
    }

    #[tokio::test]
    async fn test_recruit_blacklists_failing_hive() {
        let registry = Arc::new(MemoryRegistry::new());
        let mesh = ScriptMesh::new();
        // h2 cannot create bees; h3 works.
        mesh.on("h2", |_| Err(Error::unreachable("h2", "down")));
        mesh.on("h3", |cmd| match cmd {
            RemoteCmd::CreateBee { .. } => Ok(CmdReply::BeeCreated(bee_id("h3", 7))),
            _ => Ok(CmdReply::Ok),
        });

        let strategy = Arc::new(RoundRobinStrategy::new(vec![
            HiveId::new("h2").unwrap(),
            HiveId::new("h3").unwrap(),
        ]));
        let app = Arc::new(TestApp::new(2, 1));
        let (mut bee, _bee_ref, _queen_rx) =
            harness("h1", 1, app, registry.clone(), strategy, mesh.clone());
        registry
            .store_or_get(&bee.id, &cells(&["k1"]))
            .await
            .unwrap();

        let recruited = bee.try_to_recruit_slaves().await.unwrap();
        assert_eq!(recruited, 1);
        assert_eq!(bee.colony.slaves[0], bee_id("h3", 7));
    }

    #[tokio::test]
    async fn test_recruit_under_threshold_is_warning() {
        let registry = Arc::new(MemoryRegistry::new());
        let mesh = ScriptMesh::new();
        let strategy = Arc::new(RoundRobinStrategy::new(Vec::new()));
        let app = Arc::new(TestApp::new(3, 1));
        let (mut bee, _bee_ref, _queen_rx) =
            harness("h1", 1, app, registry.clone(), strategy, mesh.clone());

        let err = bee.try_to_recruit_slaves().await.unwrap_err();
        assert!(matches!(err, Error::UnderReplicated { .. }));
        // Nothing published: local colony view is unchanged.
        assert_eq!(bee.colony, Colony::new(bee.id.clone()));
    }

    #[tokio::test]
    async fn test_recruit_requires_master() {
        let registry = Arc::new(MemoryRegistry::new());
        let mesh = ScriptMesh::new();
        let strategy = Arc::new(RoundRobinStrategy::new(Vec::new()));
        let app = Arc::new(TestApp::new(3, 1));
        let (mut bee, _bee_ref, _queen_rx) =
            harness("h1", 1, app, registry, strategy, mesh.clone());

        // Join a colony mastered elsewhere.
        let mut colony = Colony::with_generation(bee_id("h9", 1), 4);
        colony.add_slave(bee.id.clone());
        bee.colony = colony;

        assert!(bee.try_to_recruit_slaves().await.is_err());
    }

    #[tokio::test]
    async fn test_new_slave_receives_full_log() {
        let registry = Arc::new(MemoryRegistry::new());
        let mesh = ScriptMesh::new();
        mesh.on("h2", |cmd| match cmd {
            RemoteCmd::CreateBee { .. } => Ok(CmdReply::BeeCreated(bee_id("h2", 7))),
            _ => Ok(CmdReply::Ok),
        });
        let strategy = Arc::new(RoundRobinStrategy::new(vec![HiveId::new("h2").unwrap()]));
        let app = Arc::new(TestApp::new(2, 1));
        let (mut bee, _bee_ref, _queen_rx) =
            harness("h1", 1, app, registry.clone(), strategy, mesh.clone());
        registry
            .store_or_get(&bee.id, &cells(&["k1"]))
            .await
            .unwrap();

        bee.buffer_remote_tx(crate::test_support::tx(1)).unwrap();
        bee.buffer_remote_tx(crate::test_support::tx(2)).unwrap();
        bee.commit_through(1);

        bee.try_to_recruit_slaves().await.unwrap();

        let buffered: Vec<_> = mesh
            .sent_to("h2")
            .into_iter()
            .filter_map(|cmd| match cmd {
                RemoteCmd::BufferTx { tx, .. } => Some(tx.seq),
                _ => None,
            })
            .collect();
        assert_eq!(buffered, vec![1, 2]);

        let commits: Vec<_> = mesh
            .sent_to("h2")
            .into_iter()
            .filter_map(|cmd| match cmd {
                RemoteCmd::CommitTx { seq, .. } => Some(seq),
                _ => None,
            })
            .collect();
        assert_eq!(commits, vec![1]);

        // The replicated entries keep their dense order.
        assert_eq!(bee.tx_buf[0].status, TxStatus::Committed);
    }
}
