//! Multi-hive behavior over the in-process mesh: migration, steady-state
//! replication, and master failover.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use waggle_cluster::{CmdHandler, CmdReply, MemoryMesh, ProxyFactory, RemoteCmd, RoundRobinStrategy};
use waggle_core::{AppName, BeeId, CellKey, HiveConfig, MapSet, Msg, Result, TxInfo};
use waggle_registry::MemoryRegistry;
use waggle_runtime::{App, BeeKind, Handler, Hive, MapContext, RcvContext};

struct KvApp {
    factor: usize,
}

impl App for KvApp {
    fn name(&self) -> AppName {
        AppName::new("kv").unwrap()
    }

    fn replication_factor(&self) -> usize {
        self.factor
    }

    fn commit_threshold(&self) -> usize {
        1
    }
}

/// Routes every message to the (d, k) cell and stores the payload there
struct SingleCell;

impl Handler for SingleCell {
    fn map(&self, _msg: &Msg, _ctx: &mut MapContext<'_>) -> MapSet {
        MapSet::cells([CellKey::new("d", "k")])
    }

    fn rcv(&self, msg: &Msg, ctx: &mut RcvContext<'_>) -> Result<()> {
        ctx.state.put("d", "k", msg.data.clone());
        Ok(())
    }
}

struct Cluster {
    registry: Arc<MemoryRegistry>,
    mesh: MemoryMesh,
    hives: Vec<Arc<Hive>>,
}

async fn cluster(names: &[&str], slave_hives: &[&str], factor: usize) -> Cluster {
    let registry = Arc::new(MemoryRegistry::new());
    let mesh = MemoryMesh::new();
    let strategy = Arc::new(RoundRobinStrategy::new(
        slave_hives
            .iter()
            .map(|h| waggle_core::HiveId::new(*h).unwrap())
            .collect(),
    ));

    let mut hives = Vec::new();
    for name in names {
        let mut config = HiveConfig {
            hive_id: Some((*name).into()),
            ..Default::default()
        };
        config.heartbeat.interval_ms = 10;
        config.heartbeat.miss_count_max = 2;
        config.replication.lock_timeout_ms = 20;

        let hive = Hive::new(
            config,
            registry.clone(),
            strategy.clone(),
            Arc::new(mesh.clone()),
        )
        .unwrap();

        let handler: Arc<dyn Handler> = Arc::new(SingleCell);
        hive.register_app(Arc::new(KvApp { factor }), vec![("put".into(), handler)])
            .await
            .unwrap();

        mesh.register(hive.id().clone(), hive.clone() as Arc<dyn CmdHandler>);
        hives.push(hive);
    }

    Cluster {
        registry,
        mesh,
        hives,
    }
}

fn app() -> AppName {
    AppName::new("kv").unwrap()
}

fn the_cell() -> CellKey {
    CellKey::new("d", "k")
}

async fn owner_colony(registry: &MemoryRegistry) -> Option<waggle_core::Colony> {
    registry.colony_of(&app(), &the_cell()).await
}

async fn eventually<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn tx_info_of(mesh: &MemoryMesh, bee: &BeeId) -> Option<TxInfo> {
    match mesh
        .proxy(&bee.hive)
        .send_cmd(RemoteCmd::GetTxInfo { to: bee.clone() })
        .await
    {
        Ok(CmdReply::TxInfo(info)) => Some(info),
        _ => None,
    }
}

// Scenario: bee B on h1 with state {d: {k: v}}. After Migrate(B, h2) the
// state lives on h2, and on h1 both the old and the new id resolve to the
// same proxy.
#[tokio::test]
async fn test_migration_moves_state_and_aliases_ids() {
    let c = cluster(&["h1", "h2"], &[], 1).await;
    let (h1, h2) = (&c.hives[0], &c.hives[1]);

    h1.emit(&app(), Msg::new("put", Bytes::from_static(b"v")))
        .await
        .unwrap();

    eventually("owner bound in registry", || async {
        owner_colony(&c.registry).await.is_some()
    })
    .await;
    let old_id = owner_colony(&c.registry).await.unwrap().master;
    assert_eq!(old_id.hive.as_str(), "h1");

    let queen1 = h1.queen(&app()).await.unwrap();
    eventually("state applied before migration", || async {
        let bee = queen1.find_bee(&old_id).await.unwrap();
        bee.state_snapshot().await.get("d", "k") == Some(&Bytes::from_static(b"v"))
    })
    .await;

    let new_id = queen1
        .migrate_bee(&old_id, &waggle_core::HiveId::new("h2").unwrap())
        .await
        .unwrap();
    assert_eq!(new_id.hive.as_str(), "h2");

    // The state round-tripped to the new local bee.
    let queen2 = h2.queen(&app()).await.unwrap();
    let new_bee = queen2.find_bee(&new_id).await.unwrap();
    assert_eq!(new_bee.kind(), BeeKind::Local);
    assert_eq!(
        new_bee.state_snapshot().await.get("d", "k"),
        Some(&Bytes::from_static(b"v"))
    );

    // On the source hive both ids alias the same proxy.
    let via_old = queen1.find_bee(&old_id).await.unwrap();
    let via_new = queen1.find_bee(&new_id).await.unwrap();
    assert_eq!(via_old.kind(), BeeKind::Proxy);
    assert!(via_old.same_bee(&via_new));

    // The registry moved ownership to the new bee.
    assert_eq!(owner_colony(&c.registry).await.unwrap().master, new_id);

    // Messages emitted on the source hive flow through the proxy to the
    // migrated bee.
    h1.emit(&app(), Msg::new("put", Bytes::from_static(b"v2")))
        .await
        .unwrap();
    eventually("proxied write applied", || async {
        new_bee.state_snapshot().await.get("d", "k") == Some(&Bytes::from_static(b"v2"))
    })
    .await;

    for hive in &c.hives {
        hive.stop().await.unwrap();
    }
}

// A master short of its replication factor recruits slaves before
// processing, then replicates and commits each processed message.
#[tokio::test]
async fn test_master_recruits_and_replicates() {
    let c = cluster(&["h1", "h2", "h3"], &["h2", "h3"], 3).await;
    let h1 = &c.hives[0];

    h1.emit(&app(), Msg::new("put", Bytes::from_static(b"v")))
        .await
        .unwrap();

    eventually("colony fully replicated", || async {
        owner_colony(&c.registry)
            .await
            .map(|col| col.slaves.len() == 2 && col.generation == 1)
            .unwrap_or(false)
    })
    .await;

    let colony = owner_colony(&c.registry).await.unwrap();
    assert_eq!(colony.master.hive.as_str(), "h1");
    let slave_hives: Vec<&str> = colony.slaves.iter().map(|s| s.hive.as_str()).collect();
    assert!(slave_hives.contains(&"h2"));
    assert!(slave_hives.contains(&"h3"));

    // Every slave buffered and committed the transaction.
    for slave in &colony.slaves {
        let slave = slave.clone();
        eventually("slave caught up", || {
            let slave = slave.clone();
            let mesh = c.mesh.clone();
            async move {
                tx_info_of(&mesh, &slave).await
                    == Some(TxInfo {
                        generation: 1,
                        last_buffered: 1,
                        last_committed: 1,
                    })
            }
        })
        .await;
    }

    for hive in &c.hives {
        hive.stop().await.unwrap();
    }
}

// Scenario: the master's hive is partitioned away. A surviving slave wins
// the promotion race, publishes the next generation, and the other slave
// joins the new colony.
#[tokio::test]
async fn test_master_failover_promotes_a_slave() {
    let c = cluster(&["h1", "h2", "h3"], &["h2", "h3"], 3).await;
    let h1 = &c.hives[0];

    h1.emit(&app(), Msg::new("put", Bytes::from_static(b"v")))
        .await
        .unwrap();

    eventually("colony fully replicated", || async {
        owner_colony(&c.registry)
            .await
            .map(|col| col.slaves.len() == 2)
            .unwrap_or(false)
    })
    .await;
    let before = owner_colony(&c.registry).await.unwrap();

    c.mesh.disconnect(&waggle_core::HiveId::new("h1").unwrap());

    eventually("a slave won the promotion", || async {
        owner_colony(&c.registry)
            .await
            .map(|col| col.generation > before.generation && col.master.hive.as_str() != "h1")
            .unwrap_or(false)
    })
    .await;

    let after = owner_colony(&c.registry).await.unwrap();
    assert!(before.slaves.contains(&after.master));

    // The losing slave installs the promoted colony.
    let survivor = before
        .slaves
        .iter()
        .find(|s| **s != after.master)
        .unwrap()
        .clone();
    assert!(after.is_slave(&survivor));
    let mesh = c.mesh.clone();
    eventually("survivor joined the new colony", || {
        let survivor = survivor.clone();
        let mesh = mesh.clone();
        let generation = after.generation;
        async move {
            tx_info_of(&mesh, &survivor)
                .await
                .map(|info| info.generation == generation)
                .unwrap_or(false)
        }
    })
    .await;

    // The promoted master holds the full committed log.
    let info = tx_info_of(&c.mesh, &after.master).await.unwrap();
    assert_eq!(info.last_buffered, 1);
    assert_eq!(info.last_committed, 1);

    for hive in &c.hives[1..] {
        hive.stop().await.unwrap();
    }
}
