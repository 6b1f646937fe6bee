//! Shared fixtures for runtime unit tests
//!
//! The failover tests drive a real `LocalBee` against a scripted mesh:
//! each simulated hive answers commands through a closure, and every
//! command sent is recorded for assertions.

use crate::app::App;
use crate::bee::{BeeRef, LocalBee};
use crate::hive::HiveContext;
use crate::queen::QueenCmd;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use waggle_cluster::{
    CmdReply, HiveProxy, ProxyFactory, RemoteCmd, ReplicationStrategy,
};
use waggle_core::{AppName, BeeId, CellKey, HiveConfig, HiveId, MappedCells, Result, Tx};
use waggle_registry::Registry;

pub(crate) struct TestApp {
    factor: usize,
    threshold: usize,
}

impl TestApp {
    pub(crate) fn new(factor: usize, threshold: usize) -> Self {
        Self { factor, threshold }
    }
}

impl App for TestApp {
    fn name(&self) -> AppName {
        AppName::new("kv").unwrap()
    }

    fn replication_factor(&self) -> usize {
        self.factor
    }

    fn commit_threshold(&self) -> usize {
        self.threshold
    }
}

pub(crate) fn bee_id(hive: &str, seq: u64) -> BeeId {
    BeeId::new(
        HiveId::new(hive).unwrap(),
        AppName::new("kv").unwrap(),
        seq,
        false,
    )
}

pub(crate) fn cells(keys: &[&str]) -> MappedCells {
    keys.iter().map(|k| CellKey::new("d", *k)).collect()
}

pub(crate) fn tx(seq: u64) -> Tx {
    Tx::new(seq, Bytes::from_static(b"payload"))
}

type ScriptFn = Arc<dyn Fn(&RemoteCmd) -> Result<CmdReply> + Send + Sync>;

#[derive(Default)]
struct ScriptInner {
    scripts: Mutex<HashMap<HiveId, ScriptFn>>,
    log: Mutex<Vec<(HiveId, RemoteCmd)>>,
}

/// A mesh whose hives are closures
#[derive(Clone, Default)]
pub(crate) struct ScriptMesh {
    inner: Arc<ScriptInner>,
}

impl ScriptMesh {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Script the responses of one hive
    pub(crate) fn on<F>(&self, hive: &str, script: F)
    where
        F: Fn(&RemoteCmd) -> Result<CmdReply> + Send + Sync + 'static,
    {
        let mut scripts = self.inner.scripts.lock().unwrap();
        scripts.insert(HiveId::new(hive).unwrap(), Arc::new(script));
    }

    /// Every command sent to one hive, in order
    pub(crate) fn sent_to(&self, hive: &str) -> Vec<RemoteCmd> {
        let target = HiveId::new(hive).unwrap();
        let log = self.inner.log.lock().unwrap();
        log.iter()
            .filter(|(h, _)| *h == target)
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }
}

impl ProxyFactory for ScriptMesh {
    fn proxy(&self, hive: &HiveId) -> Arc<dyn HiveProxy> {
        Arc::new(ScriptProxy {
            inner: Arc::clone(&self.inner),
            target: hive.clone(),
        })
    }
}

struct ScriptProxy {
    inner: Arc<ScriptInner>,
    target: HiveId,
}

#[async_trait::async_trait]
impl HiveProxy for ScriptProxy {
    async fn send_cmd(&self, cmd: RemoteCmd) -> Result<CmdReply> {
        {
            let mut log = self.inner.log.lock().unwrap();
            log.push((self.target.clone(), cmd.clone()));
        }
        let script = {
            let scripts = self.inner.scripts.lock().unwrap();
            scripts.get(&self.target).cloned()
        };
        match script {
            Some(f) => f(&cmd),
            None => Err(waggle_core::Error::unreachable(
                &self.target,
                "hive not scripted",
            )),
        }
    }
}

/// Build an un-spawned local bee over the given collaborators
///
/// Returns the bee, its handle, and the receiving end of the queen
/// control channel so tests can observe what the bee asks its queen for.
pub(crate) fn harness(
    hive: &str,
    seq: u64,
    app: Arc<TestApp>,
    registry: Arc<dyn Registry>,
    strategy: Arc<dyn ReplicationStrategy>,
    mesh: ScriptMesh,
) -> (LocalBee, BeeRef, mpsc::Receiver<QueenCmd>) {
    let ctx = Arc::new(HiveContext::new(
        HiveId::new(hive).unwrap(),
        HiveConfig::default(),
        registry,
        strategy,
        Arc::new(mesh),
    ));
    let (queen_ctrl, queen_rx) = mpsc::channel(64);
    let (bee, bee_ref) = LocalBee::new(bee_id(hive, seq), app, ctx, queen_ctrl);
    (bee, bee_ref, queen_rx)
}
