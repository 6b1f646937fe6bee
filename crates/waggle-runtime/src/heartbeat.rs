//! Heartbeat monitoring of remote bees
//!
//! The queen starts one monitor per remote bee it talks to (proxies and
//! colony peers). A monitor pings the bee's hive on a fixed cadence;
//! after enough consecutive misses it reports the bee failed and exits.
//! The queen deduplicates monitors per bee and aborts them on stop.

use crate::hive::HiveContext;
use crate::queen::QueenCmd;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use waggle_cluster::RemoteCmd;
use waggle_core::BeeId;

/// Spawn a monitor for one remote bee
pub(crate) fn monitor(
    hive: Arc<HiveContext>,
    bee: BeeId,
    queen_ctrl: mpsc::Sender<QueenCmd>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let config = hive.config().heartbeat.clone();
        let proxy = hive.proxy(&bee.hive);
        let mut misses = 0u32;

        debug!(bee = %bee, "heartbeat monitor started");
        loop {
            tokio::time::sleep(Duration::from_millis(config.interval_ms)).await;

            match proxy.send_cmd(RemoteCmd::Ping).await {
                Ok(_) => misses = 0,
                Err(e) => {
                    misses += 1;
                    debug!(bee = %bee, misses, error = %e, "heartbeat miss");
                    if misses >= config.miss_count_max {
                        warn!(bee = %bee, misses, "bee failed after missed heartbeats");
                        let _ = queen_ctrl
                            .send(QueenCmd::BeeFailed { failed: bee.clone() })
                            .await;
                        return;
                    }
                }
            }
        }
    })
}
