//! Hive: the per-process runtime context
//!
//! A hive hosts one queen per registered application, resolves handlers
//! for inbound messages, and dispatches commands arriving from other
//! hives. The context (registry, replication strategy, proxy factory) is
//! passed to queens and bees as an explicit `Arc`, never as ambient state.

use crate::app::{App, DetachedHandler, Handler};
use crate::bee::{BeeRef, MsgAndHandler};
use crate::queen::{Queen, QueenCmd};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use waggle_cluster::{
    CmdHandler, CmdReply, HiveProxy, ProxyFactory, RemoteCmd, ReplaceBeeData, ReplicationStrategy,
};
use waggle_core::{
    AppName, BeeId, Error, HiveConfig, HiveId, MappedCells, Msg, Result,
};
use waggle_registry::Registry;

/// Everything a queen or bee needs from its process
pub struct HiveContext {
    id: HiveId,
    config: HiveConfig,
    registry: Arc<dyn Registry>,
    strategy: Arc<dyn ReplicationStrategy>,
    proxies: Arc<dyn ProxyFactory>,
}

impl HiveContext {
    /// Assemble a context from its collaborators
    pub fn new(
        id: HiveId,
        config: HiveConfig,
        registry: Arc<dyn Registry>,
        strategy: Arc<dyn ReplicationStrategy>,
        proxies: Arc<dyn ProxyFactory>,
    ) -> Self {
        Self {
            id,
            config,
            registry,
            strategy,
            proxies,
        }
    }

    /// The local hive's id
    pub fn id(&self) -> &HiveId {
        &self.id
    }

    /// The hive configuration
    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    /// Single-hive mode: no registry coordination
    pub fn isolated(&self) -> bool {
        self.config.isolated
    }

    /// The cluster registry
    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// The slave placement strategy
    pub fn strategy(&self) -> &dyn ReplicationStrategy {
        self.strategy.as_ref()
    }

    /// A proxy to another hive
    pub fn proxy(&self, hive: &HiveId) -> Arc<dyn HiveProxy> {
        self.proxies.proxy(hive)
    }
}

/// Handle to an application's queen
#[derive(Clone)]
pub struct QueenHandle {
    data_tx: mpsc::Sender<MsgAndHandler>,
    ctrl_tx: mpsc::Sender<QueenCmd>,
}

impl QueenHandle {
    pub(crate) async fn send_data(&self, mh: MsgAndHandler) -> Result<()> {
        self.data_tx
            .send(mh)
            .await
            .map_err(|_| Error::channel_closed("queen data"))
    }

    async fn send_cmd<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> QueenCmd,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.ctrl_tx
            .send(make(reply))
            .await
            .map_err(|_| Error::channel_closed("queen ctrl"))?;
        rx.await
            .map_err(|_| Error::channel_closed("queen reply"))?
    }

    /// Stop every bee, then the queen
    pub async fn stop(&self) -> Result<()> {
        self.send_cmd(|reply| QueenCmd::Stop { reply }).await
    }

    /// Look up a bee by id
    pub async fn find_bee(&self, id: &BeeId) -> Result<BeeRef> {
        let id = id.clone();
        self.send_cmd(move |reply| QueenCmd::FindBee { id, reply })
            .await
    }

    /// Create and start a fresh local bee
    pub async fn create_bee(&self) -> Result<BeeId> {
        self.send_cmd(|reply| QueenCmd::CreateBee { reply }).await
    }

    /// Move a local bee to another hive
    pub async fn migrate_bee(&self, bee: &BeeId, to: &HiveId) -> Result<BeeId> {
        let (bee, to) = (bee.clone(), to.clone());
        self.send_cmd(move |reply| QueenCmd::MigrateBee { bee, to, reply })
            .await
    }

    /// Install a migrated bee's state and cells (target side)
    pub async fn replace_bee(&self, data: ReplaceBeeData) -> Result<BeeId> {
        self.send_cmd(move |reply| QueenCmd::ReplaceBee { data, reply })
            .await
    }

    /// Force-set ownership of cells to a bee
    pub async fn lock_cells(&self, cells: MappedCells, bee: BeeId) -> Result<BeeId> {
        self.send_cmd(move |reply| QueenCmd::LockMappedCells { cells, bee, reply })
            .await
    }

    /// Create a detached bee driven by the handler
    pub async fn start_detached(&self, handler: Arc<dyn DetachedHandler>) -> Result<BeeId> {
        self.send_cmd(move |reply| QueenCmd::StartDetached { handler, reply })
            .await
    }
}

struct AppRuntime {
    handlers: HashMap<String, Arc<dyn Handler>>,
    queen: QueenHandle,
}

/// One process of the cluster
pub struct Hive {
    ctx: Arc<HiveContext>,
    apps: RwLock<HashMap<AppName, AppRuntime>>,
}

static HIVE_COUNTER: AtomicU64 = AtomicU64::new(0);

impl Hive {
    /// Create a hive over the given collaborators
    pub fn new(
        config: HiveConfig,
        registry: Arc<dyn Registry>,
        strategy: Arc<dyn ReplicationStrategy>,
        proxies: Arc<dyn ProxyFactory>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let id = match &config.hive_id {
            Some(id) => HiveId::new(id.clone())?,
            None => {
                let n = HIVE_COUNTER.fetch_add(1, Ordering::Relaxed);
                HiveId::new(format!("hive-{}-{}", std::process::id(), n))?
            }
        };

        info!(hive = %id, isolated = config.isolated, "hive starting");
        let ctx = Arc::new(HiveContext::new(id, config, registry, strategy, proxies));
        Ok(Arc::new(Self {
            ctx,
            apps: RwLock::new(HashMap::new()),
        }))
    }

    /// The hive's id
    pub fn id(&self) -> &HiveId {
        self.ctx.id()
    }

    /// The hive's context
    pub fn context(&self) -> &Arc<HiveContext> {
        &self.ctx
    }

    /// Register an application and start its queen
    ///
    /// `handlers` maps message kinds to their handler.
    pub async fn register_app(
        &self,
        app: Arc<dyn App>,
        handlers: Vec<(String, Arc<dyn Handler>)>,
    ) -> Result<QueenHandle> {
        let name = app.name();
        let mut apps = self.apps.write().await;
        if apps.contains_key(&name) {
            return Err(Error::internal(format!("app {name} already registered")));
        }

        let (queen, data_tx, ctrl_tx) = Queen::new(Arc::clone(&self.ctx), app);
        tokio::spawn(queen.run());

        let handle = QueenHandle { data_tx, ctrl_tx };
        apps.insert(
            name.clone(),
            AppRuntime {
                handlers: handlers.into_iter().collect(),
                queen: handle.clone(),
            },
        );
        info!(hive = %self.ctx.id(), app = %name, "app registered");
        Ok(handle)
    }

    /// The queen handle for an application
    pub async fn queen(&self, app: &AppName) -> Result<QueenHandle> {
        let apps = self.apps.read().await;
        apps.get(app)
            .map(|rt| rt.queen.clone())
            .ok_or_else(|| Error::internal(format!("app {app} not registered")))
    }

    /// Hand a message to its application's queen
    ///
    /// The handler for the message's kind is resolved here; a message with
    /// no registered handler is still enqueued and dropped by the queen
    /// with a log.
    pub async fn emit(&self, app: &AppName, msg: Msg) -> Result<()> {
        let (queen, handler) = {
            let apps = self.apps.read().await;
            let rt = apps
                .get(app)
                .ok_or_else(|| Error::internal(format!("app {app} not registered")))?;
            (rt.queen.clone(), rt.handlers.get(&msg.kind).cloned())
        };
        queen.send_data(MsgAndHandler { msg, handler }).await
    }

    /// Stop every application's queen
    pub async fn stop(&self) -> Result<()> {
        let queens: Vec<QueenHandle> = {
            let apps = self.apps.read().await;
            apps.values().map(|rt| rt.queen.clone()).collect()
        };
        for queen in queens {
            queen.stop().await?;
        }
        info!(hive = %self.ctx.id(), "hive stopped");
        Ok(())
    }

    async fn find_bee(&self, id: &BeeId) -> Result<BeeRef> {
        self.queen(&id.app).await?.find_bee(id).await
    }
}

#[async_trait]
impl CmdHandler for Hive {
    async fn handle_cmd(&self, cmd: RemoteCmd) -> Result<CmdReply> {
        match cmd {
            RemoteCmd::Ping => Ok(CmdReply::Ok),

            RemoteCmd::CreateBee { app } => {
                let id = self.queen(&app).await?.create_bee().await?;
                Ok(CmdReply::BeeCreated(id))
            }

            RemoteCmd::ReplaceBee(data) => {
                let queen = self.queen(&data.new_bee.app).await?;
                let id = queen.replace_bee(data).await?;
                Ok(CmdReply::BeeReplaced(id))
            }

            RemoteCmd::JoinColony { to, colony } => {
                self.find_bee(&to).await?.join_colony(colony).await?;
                Ok(CmdReply::Ok)
            }

            RemoteCmd::GetTxInfo { to } => {
                let info = self.find_bee(&to).await?.tx_info().await?;
                Ok(CmdReply::TxInfo(info))
            }

            RemoteCmd::GetTx {
                to,
                from_seq,
                to_seq,
            } => {
                let txs = self.find_bee(&to).await?.get_txs(from_seq, to_seq).await?;
                Ok(CmdReply::Txs(txs))
            }

            RemoteCmd::BufferTx { to, tx } => {
                self.find_bee(&to).await?.buffer_tx(tx).await?;
                Ok(CmdReply::Ok)
            }

            RemoteCmd::CommitTx { to, seq } => {
                self.find_bee(&to).await?.commit_tx(seq).await?;
                Ok(CmdReply::Ok)
            }

            RemoteCmd::DeliverMsg { to, mut msg } => {
                let (queen, handler) = {
                    let apps = self.apps.read().await;
                    let rt = apps
                        .get(&to.app)
                        .ok_or_else(|| Error::internal(format!("app {} not registered", to.app)))?;
                    (rt.queen.clone(), rt.handlers.get(&msg.kind).cloned())
                };
                if handler.is_none() && !to.detached {
                    return Err(Error::HandlerFault {
                        app: to.app.to_string(),
                        reason: format!("no handler for kind {}", msg.kind),
                    });
                }
                msg.to = Some(to);
                queen.send_data(MsgAndHandler { msg, handler }).await?;
                Ok(CmdReply::Ok)
            }
        }
    }
}
