//! Routing behavior of a single isolated hive

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use waggle_cluster::{MemoryMesh, RoundRobinStrategy};
use waggle_core::{AppName, CellKey, HiveConfig, MapSet, Msg, Result};
use waggle_registry::MemoryRegistry;
use waggle_runtime::{App, DetachedHandler, Handler, Hive, MapContext, RcvContext};

struct KvApp;

impl App for KvApp {
    fn name(&self) -> AppName {
        AppName::new("kv").unwrap()
    }
}

/// Records which bee processed each message
struct Recording {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Handler for Recording {
    fn map(&self, msg: &Msg, _ctx: &mut MapContext<'_>) -> MapSet {
        match msg.kind.as_str() {
            "pair" => MapSet::cells([CellKey::new("d", "k1"), CellKey::new("d", "k2")]),
            "single" => MapSet::cells([CellKey::new("d", "k2")]),
            "bcast" => MapSet::LocalBroadcast,
            "boom" => panic!("map blew up"),
            other => panic!("unexpected kind {other}"),
        }
    }

    fn rcv(&self, msg: &Msg, ctx: &mut RcvContext<'_>) -> Result<()> {
        self.seen.lock().unwrap().push(ctx.bee.to_string());
        ctx.state.put("d", msg.kind.clone(), msg.data.clone());
        Ok(())
    }
}

fn isolated_hive() -> (Arc<Hive>, Arc<Mutex<Vec<String>>>) {
    let config = HiveConfig {
        hive_id: Some("h1".into()),
        isolated: true,
        ..Default::default()
    };
    let hive = Hive::new(
        config,
        Arc::new(MemoryRegistry::new()),
        Arc::new(RoundRobinStrategy::new(Vec::new())),
        Arc::new(MemoryMesh::new()),
    )
    .unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    (hive, seen)
}

async fn register_kv(hive: &Hive, seen: Arc<Mutex<Vec<String>>>) {
    let handler: Arc<dyn Handler> = Arc::new(Recording { seen });
    hive.register_app(
        Arc::new(KvApp),
        vec![
            ("pair".into(), handler.clone()),
            ("single".into(), handler.clone()),
            ("bcast".into(), handler.clone()),
            ("boom".into(), handler),
        ],
    )
    .await
    .unwrap();
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// A message mapping to two fresh cells creates one bee owning both; a
// later message on one of the cells reuses it.
#[tokio::test]
async fn test_mapped_cells_share_one_bee() {
    let (hive, seen) = isolated_hive();
    register_kv(&hive, seen.clone()).await;
    let app = AppName::new("kv").unwrap();

    hive.emit(&app, Msg::new("pair", Bytes::from_static(b"a")))
        .await
        .unwrap();
    hive.emit(&app, Msg::new("single", Bytes::from_static(b"b")))
        .await
        .unwrap();

    eventually("both messages processed", || seen.lock().unwrap().len() == 2).await;
    let processed = seen.lock().unwrap().clone();
    assert_eq!(processed[0], processed[1], "second message must reuse the owner bee");

    hive.stop().await.unwrap();
}

#[tokio::test]
async fn test_local_broadcast_reaches_every_bee() {
    let (hive, seen) = isolated_hive();
    register_kv(&hive, seen.clone()).await;
    let app = AppName::new("kv").unwrap();

    hive.emit(&app, Msg::new("pair", Bytes::from_static(b"a")))
        .await
        .unwrap();
    eventually("owner bee created", || seen.lock().unwrap().len() == 1).await;

    hive.emit(&app, Msg::new("bcast", Bytes::from_static(b"b")))
        .await
        .unwrap();
    eventually("broadcast processed", || seen.lock().unwrap().len() == 2).await;

    hive.stop().await.unwrap();
}

// A panicking map function drops the message; the queen keeps routing.
#[tokio::test]
async fn test_map_panic_does_not_kill_the_queen() {
    let (hive, seen) = isolated_hive();
    register_kv(&hive, seen.clone()).await;
    let app = AppName::new("kv").unwrap();

    hive.emit(&app, Msg::new("boom", Bytes::new())).await.unwrap();
    hive.emit(&app, Msg::new("pair", Bytes::from_static(b"a")))
        .await
        .unwrap();

    eventually("message after panic processed", || {
        seen.lock().unwrap().len() == 1
    })
    .await;

    hive.stop().await.unwrap();
}

struct CountingDetached {
    started: AtomicUsize,
    received: AtomicUsize,
    stopped: AtomicUsize,
}

impl DetachedHandler for CountingDetached {
    fn start(&self, _ctx: &mut RcvContext<'_>) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn rcv(&self, _msg: &Msg, _ctx: &mut RcvContext<'_>) -> Result<()> {
        self.received.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, _ctx: &mut RcvContext<'_>) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_detached_bee_lifecycle() {
    let (hive, seen) = isolated_hive();
    register_kv(&hive, seen).await;
    let app = AppName::new("kv").unwrap();

    let handler = Arc::new(CountingDetached {
        started: AtomicUsize::new(0),
        received: AtomicUsize::new(0),
        stopped: AtomicUsize::new(0),
    });

    let queen = hive.queen(&app).await.unwrap();
    let id = queen.start_detached(handler.clone()).await.unwrap();
    assert!(id.detached);

    eventually("start hook ran", || handler.started.load(Ordering::SeqCst) == 1).await;

    hive.emit(&app, Msg::unicast("anything", Bytes::new(), id))
        .await
        .unwrap();
    eventually("detached received", || {
        handler.received.load(Ordering::SeqCst) == 1
    })
    .await;

    hive.stop().await.unwrap();
    assert_eq!(handler.stopped.load(Ordering::SeqCst), 1);
}

// After stop, the queen's channels are closed and emission fails.
#[tokio::test]
async fn test_stop_closes_the_data_channel() {
    let (hive, seen) = isolated_hive();
    register_kv(&hive, seen).await;
    let app = AppName::new("kv").unwrap();

    hive.stop().await.unwrap();

    // The queen loop has exited; give its receivers time to drop.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(hive
        .emit(&app, Msg::new("pair", Bytes::new()))
        .await
        .is_err());
}
