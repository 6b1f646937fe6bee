//! Bees: the actors of the runtime
//!
//! A bee is a capability set: enqueue message, enqueue command, id, state.
//! Three variants implement it. A local bee runs the real serial loop and
//! owns state plus a replicated transaction buffer. A proxy bee forwards
//! to a bee on another hive. A detached bee drives a user-provided
//! lifecycle handler and owns no cells.
//!
//! Cross-bee interaction is exclusively by enqueued messages or commands;
//! RPC to remote hives is issued from the enqueuing loop and may block it.

use crate::app::{App, DetachedHandler, Handler, RcvContext};
use crate::hive::HiveContext;
use crate::queen::QueenCmd;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use waggle_cluster::{CmdReply, RemoteCmd};
use waggle_core::{
    BeeId, BeeState, Colony, Error, Msg, Result, Tx, TxInfo, TxSeq, TxStatus,
};

/// A message paired with its resolved handler
pub struct MsgAndHandler {
    /// The message to deliver
    pub msg: Msg,
    /// The handler for the message's kind, if the app registered one
    pub handler: Option<Arc<dyn Handler>>,
}

impl Clone for MsgAndHandler {
    fn clone(&self) -> Self {
        Self {
            msg: self.msg.clone(),
            handler: self.handler.clone(),
        }
    }
}

/// Control commands understood by bees
pub enum BeeCmd {
    /// Stop the bee's loop; acked when the loop is about to exit
    Stop { reply: oneshot::Sender<Result<()>> },
    /// Install a colony descriptor
    JoinColony {
        colony: Colony,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Report the bee's transaction log view
    GetTxInfo { reply: oneshot::Sender<Result<TxInfo>> },
    /// Fetch buffered transactions in `[from_seq, to_seq]`
    GetTx {
        from_seq: TxSeq,
        to_seq: TxSeq,
        reply: oneshot::Sender<Result<Vec<Tx>>>,
    },
    /// Append a replicated transaction
    BufferTx {
        tx: Tx,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Commit buffered transactions up to `seq`
    CommitTx {
        seq: TxSeq,
        reply: oneshot::Sender<Result<()>>,
    },
    /// A colony peer was reported dead; runs the failure handler
    PeerFailed { failed: BeeId },
    /// Reconcile the colony's slave count with the replication factor
    RecruitSlaves { reply: oneshot::Sender<Result<usize>> },
}

/// Which loop runs behind a bee handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeeKind {
    /// Runs here, owns cells and state
    Local,
    /// Forwards to a bee on another hive
    Proxy,
    /// Manually driven, not bound to cells
    Detached,
}

/// Handle to a bee, as held by the queen's indices
///
/// After a migration the same handle is registered under both the old
/// local id and the new remote id, so in-flight references keep resolving.
#[derive(Clone)]
pub struct BeeRef {
    id: BeeId,
    kind: BeeKind,
    data_tx: mpsc::Sender<MsgAndHandler>,
    ctrl_tx: mpsc::Sender<BeeCmd>,
    state: Arc<RwLock<BeeState>>,
}

impl BeeRef {
    /// The id the handle was created under
    pub fn id(&self) -> &BeeId {
        &self.id
    }

    /// The bee variant behind the handle
    pub fn kind(&self) -> BeeKind {
        self.kind
    }

    /// Whether two handles lead to the same loop (aliases included)
    pub fn same_bee(&self, other: &BeeRef) -> bool {
        self.data_tx.same_channel(&other.data_tx)
    }

    /// Enqueue a data message
    pub async fn enqueue_msg(&self, mh: MsgAndHandler) -> Result<()> {
        self.data_tx
            .send(mh)
            .await
            .map_err(|_| Error::channel_closed(format!("bee {} data", self.id)))
    }

    /// Enqueue a control command
    pub async fn enqueue_cmd(&self, cmd: BeeCmd) -> Result<()> {
        self.ctrl_tx
            .send(cmd)
            .await
            .map_err(|_| Error::channel_closed(format!("bee {} ctrl", self.id)))
    }

    /// Stop the bee and wait for its ack
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue_cmd(BeeCmd::Stop { reply }).await?;
        rx.await
            .map_err(|_| Error::channel_closed(format!("bee {} stop reply", self.id)))?
    }

    /// Install a colony descriptor and wait for the ack
    pub async fn join_colony(&self, colony: Colony) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue_cmd(BeeCmd::JoinColony { colony, reply }).await?;
        rx.await
            .map_err(|_| Error::channel_closed(format!("bee {} join reply", self.id)))?
    }

    /// Fetch the bee's transaction log view
    pub async fn tx_info(&self) -> Result<TxInfo> {
        let (reply, rx) = oneshot::channel();
        self.enqueue_cmd(BeeCmd::GetTxInfo { reply }).await?;
        rx.await
            .map_err(|_| Error::channel_closed(format!("bee {} tx info reply", self.id)))?
    }

    /// Fetch buffered transactions in `[from_seq, to_seq]`
    pub async fn get_txs(&self, from_seq: TxSeq, to_seq: TxSeq) -> Result<Vec<Tx>> {
        let (reply, rx) = oneshot::channel();
        self.enqueue_cmd(BeeCmd::GetTx {
            from_seq,
            to_seq,
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| Error::channel_closed(format!("bee {} get tx reply", self.id)))?
    }

    /// Append a replicated transaction
    pub async fn buffer_tx(&self, tx: Tx) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue_cmd(BeeCmd::BufferTx { tx, reply }).await?;
        rx.await
            .map_err(|_| Error::channel_closed(format!("bee {} buffer reply", self.id)))?
    }

    /// Commit buffered transactions up to `seq`
    pub async fn commit_tx(&self, seq: TxSeq) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue_cmd(BeeCmd::CommitTx { seq, reply }).await?;
        rx.await
            .map_err(|_| Error::channel_closed(format!("bee {} commit reply", self.id)))?
    }

    /// Snapshot the bee's state dictionaries
    pub async fn state_snapshot(&self) -> BeeState {
        self.state.read().await.clone()
    }

    pub(crate) fn state_handle(&self) -> Arc<RwLock<BeeState>> {
        Arc::clone(&self.state)
    }
}

// =============================================================================
// Local bee
// =============================================================================

pub(crate) struct LocalBee {
    pub(crate) id: BeeId,
    pub(crate) app: Arc<dyn App>,
    pub(crate) hive: Arc<HiveContext>,
    pub(crate) queen_ctrl: mpsc::Sender<QueenCmd>,
    pub(crate) ctrl_tx: mpsc::Sender<BeeCmd>,
    pub(crate) state: Arc<RwLock<BeeState>>,
    pub(crate) colony: Colony,
    pub(crate) tx_buf: Vec<Tx>,
    pub(crate) tx_seq: TxSeq,
    pub(crate) last_committed: TxSeq,
    pub(crate) open_tx: Option<Tx>,
    pub(crate) recruit_attempted: bool,
    pub(crate) data_rx: mpsc::Receiver<MsgAndHandler>,
    pub(crate) ctrl_rx: mpsc::Receiver<BeeCmd>,
}

impl LocalBee {
    /// Build a local bee and its handle without starting the loop
    pub(crate) fn new(
        id: BeeId,
        app: Arc<dyn App>,
        hive: Arc<HiveContext>,
        queen_ctrl: mpsc::Sender<QueenCmd>,
    ) -> (Self, BeeRef) {
        let channels = &hive.config().channels;
        let (data_tx, data_rx) = mpsc::channel(channels.bee_data_depth);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(channels.bee_ctrl_depth);
        let state = Arc::new(RwLock::new(BeeState::new()));

        let bee = Self {
            colony: Colony::new(id.clone()),
            id: id.clone(),
            app,
            hive,
            queen_ctrl,
            ctrl_tx: ctrl_tx.clone(),
            state: Arc::clone(&state),
            tx_buf: Vec::new(),
            tx_seq: 0,
            last_committed: 0,
            open_tx: None,
            recruit_attempted: false,
            data_rx,
            ctrl_rx,
        };

        let bee_ref = BeeRef {
            id,
            kind: BeeKind::Local,
            data_tx,
            ctrl_tx,
            state,
        };
        (bee, bee_ref)
    }

    /// Start the serial loop
    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        debug!(bee = %self.id, "local bee started");
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
        debug!(bee = %self.id, "local bee stopped");
    }

    pub(crate) fn is_master(&self) -> bool {
        self.colony.is_master(&self.id)
    }

    pub(crate) fn last_buffered(&self) -> TxSeq {
        self.tx_buf.last().map(|t| t.seq).unwrap_or(0)
    }

    pub(crate) fn tx_info(&self) -> TxInfo {
        TxInfo::new(
            self.colony.generation,
            self.last_buffered(),
            self.last_committed,
        )
    }

    /// Drop any transaction that was opened but never buffered
    pub(crate) fn abort_tx(&mut self) {
        if let Some(tx) = self.open_tx.take() {
            warn!(bee = %self.id, seq = tx.seq, "aborted in-progress transaction");
            self.tx_seq = tx.seq.saturating_sub(1);
        }
    }

    /// Install a new colony view and ask the queen to watch its peers
    pub(crate) fn install_colony(&mut self, colony: Colony) {
        debug!(bee = %self.id, colony = %colony, "installing colony");
        for peer in colony
            .slaves
            .iter()
            .chain(std::iter::once(&colony.master))
            .filter(|p| **p != self.id)
        {
            let _ = self.queen_ctrl.try_send(QueenCmd::MonitorBee { bee: peer.clone() });
        }
        self.colony = colony;
        self.recruit_attempted = false;
    }

    /// Append a transaction replicated from the colony's master
    pub(crate) fn buffer_remote_tx(&mut self, mut tx: Tx) -> Result<()> {
        let last = self.last_buffered();
        if tx.seq <= last {
            debug!(bee = %self.id, seq = tx.seq, "duplicate transaction ignored");
            return Ok(());
        }
        if !self.tx_buf.is_empty() && tx.seq != last + 1 {
            return Err(Error::internal(format!(
                "transaction gap: have {}, got {}",
                last, tx.seq
            )));
        }
        tx.status = TxStatus::Buffered;
        self.tx_seq = self.tx_seq.max(tx.seq);
        self.tx_buf.push(tx);
        Ok(())
    }

    /// Append a transaction pulled during promotion catch-up
    ///
    /// Entries at or below the committed horizon arrive already tagged
    /// committed by the caller.
    pub(crate) fn append_pulled_tx(&mut self, tx: Tx) {
        let last = self.last_buffered();
        if tx.seq <= last {
            return;
        }
        if !self.tx_buf.is_empty() && tx.seq != last + 1 {
            warn!(bee = %self.id, have = last, got = tx.seq, "gap in pulled log; entry dropped");
            return;
        }
        self.tx_seq = self.tx_seq.max(tx.seq);
        self.tx_buf.push(tx);
    }

    /// Mark every buffered transaction up to `seq` committed
    ///
    /// The horizon is clamped to the buffer: a bee never commits past what
    /// it has buffered.
    pub(crate) fn commit_through(&mut self, seq: TxSeq) {
        let limit = seq.min(self.last_buffered());
        for tx in &mut self.tx_buf {
            if tx.seq <= limit {
                tx.status = TxStatus::Committed;
            }
        }
        self.last_committed = self.last_committed.max(limit);
    }

    async fn handle_cmd(&mut self, cmd: BeeCmd) -> ControlFlow<()> {
        match cmd {
            BeeCmd::Stop { reply } => {
                let _ = reply.send(Ok(()));
                return ControlFlow::Break(());
            }
            BeeCmd::JoinColony { colony, reply } => {
                self.install_colony(colony);
                let _ = reply.send(Ok(()));
            }
            BeeCmd::GetTxInfo { reply } => {
                let _ = reply.send(Ok(self.tx_info()));
            }
            BeeCmd::GetTx {
                from_seq,
                to_seq,
                reply,
            } => {
                let txs: Vec<Tx> = self
                    .tx_buf
                    .iter()
                    .filter(|t| t.seq >= from_seq && t.seq <= to_seq)
                    .take(waggle_core::TX_FETCH_COUNT_MAX)
                    .cloned()
                    .collect();
                let _ = reply.send(Ok(txs));
            }
            BeeCmd::BufferTx { tx, reply } => {
                let _ = reply.send(self.buffer_remote_tx(tx));
            }
            BeeCmd::CommitTx { seq, reply } => {
                self.commit_through(seq);
                let _ = reply.send(Ok(()));
            }
            BeeCmd::PeerFailed { failed } => {
                if self.handle_peer_failed(failed).await.is_break() {
                    let _ = self
                        .queen_ctrl
                        .send(QueenCmd::DropBee {
                            id: self.id.clone(),
                        })
                        .await;
                    return ControlFlow::Break(());
                }
            }
            BeeCmd::RecruitSlaves { reply } => {
                let _ = reply.send(self.try_to_recruit_slaves().await);
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_msg(&mut self, mh: MsgAndHandler) {
        let Some(handler) = mh.handler.clone() else {
            debug!(bee = %self.id, kind = %mh.msg.kind, "message without handler dropped");
            return;
        };

        if !self.is_master() {
            warn!(bee = %self.id, "message for non-master bee dropped");
            return;
        }

        // A master short of slaves reconciles before taking more writes.
        if !self.hive.isolated()
            && !self.recruit_attempted
            && self.colony.slaves.len() + 1 < self.app.replication_factor()
        {
            self.recruit_attempted = true;
            match self.try_to_recruit_slaves().await {
                Ok(n) if n > 0 => info!(bee = %self.id, recruited = n, "recruited slaves"),
                Ok(_) => {}
                Err(Error::UnderReplicated { have, want }) => {
                    warn!(bee = %self.id, have, want, "colony under-replicated");
                }
                Err(e) => warn!(bee = %self.id, error = %e, "slave recruitment failed"),
            }
        }

        let payload = match serde_json::to_vec(&mh.msg) {
            Ok(encoded) => bytes::Bytes::from(encoded),
            Err(e) => {
                error!(bee = %self.id, error = %e, "message encode failed; dropped");
                return;
            }
        };

        let seq = self.tx_seq + 1;
        self.tx_seq = seq;
        self.open_tx = Some(Tx::new(seq, payload));

        // Buffer locally.
        let Some(mut tx) = self.open_tx.take() else {
            return;
        };
        tx.status = TxStatus::Buffered;
        self.tx_buf.push(tx.clone());

        // Replicate to slaves.
        let mut acks = 0usize;
        for slave in self.colony.slaves.clone() {
            let proxy = self.hive.proxy(&slave.hive);
            match proxy
                .send_cmd(RemoteCmd::BufferTx {
                    to: slave.clone(),
                    tx: tx.clone(),
                })
                .await
            {
                Ok(_) => acks += 1,
                Err(e) => warn!(bee = %self.id, slave = %slave, error = %e, "buffer replication failed"),
            }
        }

        if !self.colony.slaves.is_empty() && acks < self.app.commit_threshold() {
            warn!(
                bee = %self.id,
                seq,
                acks,
                threshold = self.app.commit_threshold(),
                "transaction below commit quorum; left buffered"
            );
            return;
        }

        // Commit and apply.
        self.commit_through(seq);
        {
            let mut state = self.state.write().await;
            let mut ctx = RcvContext {
                bee: &self.id,
                colony: &self.colony,
                state: &mut *state,
            };
            if let Err(e) = handler.rcv(&mh.msg, &mut ctx) {
                error!(bee = %self.id, kind = %mh.msg.kind, error = %e, "handler failed");
            }
        }

        for slave in self.colony.slaves.clone() {
            let proxy = self.hive.proxy(&slave.hive);
            if let Err(e) = proxy
                .send_cmd(RemoteCmd::CommitTx {
                    to: slave.clone(),
                    seq,
                })
                .await
            {
                warn!(bee = %self.id, slave = %slave, error = %e, "commit replication failed");
            }
        }
    }
}

// =============================================================================
// Proxy bee
// =============================================================================

pub(crate) struct ProxyBee {
    id: BeeId,
    proxy: Arc<dyn waggle_cluster::HiveProxy>,
    data_rx: mpsc::Receiver<MsgAndHandler>,
    ctrl_rx: mpsc::Receiver<BeeCmd>,
}

impl ProxyBee {
    /// Build a proxy bee for a remote id and its handle
    ///
    /// `state` is shared with the handle so references converted from a
    /// stopped local bee still expose the final snapshot.
    pub(crate) fn new(
        id: BeeId,
        hive: &HiveContext,
        state: Arc<RwLock<BeeState>>,
    ) -> (Self, BeeRef) {
        let channels = &hive.config().channels;
        let (data_tx, data_rx) = mpsc::channel(channels.bee_data_depth);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(channels.bee_ctrl_depth);

        let bee = Self {
            proxy: hive.proxy(&id.hive),
            id: id.clone(),
            data_rx,
            ctrl_rx,
        };
        let bee_ref = BeeRef {
            id,
            kind: BeeKind::Proxy,
            data_tx,
            ctrl_tx,
            state,
        };
        (bee, bee_ref)
    }

    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        debug!(bee = %self.id, "proxy bee started");
        loop {
            tokio::select! {
                maybe = self.data_rx.recv() => match maybe {
                    Some(mh) => self.forward_msg(mh.msg).await,
                    None => break,
                },
                maybe = self.ctrl_rx.recv() => match maybe {
                    Some(cmd) => {
                        if self.forward_cmd(cmd).await.is_break() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        debug!(bee = %self.id, "proxy bee stopped");
    }

    async fn forward_msg(&self, mut msg: Msg) {
        msg.to = Some(self.id.clone());
        if let Err(e) = self
            .proxy
            .send_cmd(RemoteCmd::DeliverMsg {
                to: self.id.clone(),
                msg,
            })
            .await
        {
            warn!(bee = %self.id, error = %e, "message forward failed");
        }
    }

    async fn forward_cmd(&self, cmd: BeeCmd) -> ControlFlow<()> {
        match cmd {
            BeeCmd::Stop { reply } => {
                let _ = reply.send(Ok(()));
                return ControlFlow::Break(());
            }
            BeeCmd::JoinColony { colony, reply } => {
                let result = self
                    .proxy
                    .send_cmd(RemoteCmd::JoinColony {
                        to: self.id.clone(),
                        colony,
                    })
                    .await
                    .map(|_| ());
                let _ = reply.send(result);
            }
            BeeCmd::GetTxInfo { reply } => {
                let result = match self
                    .proxy
                    .send_cmd(RemoteCmd::GetTxInfo {
                        to: self.id.clone(),
                    })
                    .await
                {
                    Ok(CmdReply::TxInfo(info)) => Ok(info),
                    Ok(other) => Err(Error::internal(format!("unexpected reply: {other:?}"))),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            BeeCmd::GetTx {
                from_seq,
                to_seq,
                reply,
            } => {
                let result = match self
                    .proxy
                    .send_cmd(RemoteCmd::GetTx {
                        to: self.id.clone(),
                        from_seq,
                        to_seq,
                    })
                    .await
                {
                    Ok(CmdReply::Txs(txs)) => Ok(txs),
                    Ok(other) => Err(Error::internal(format!("unexpected reply: {other:?}"))),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            BeeCmd::BufferTx { tx, reply } => {
                let result = self
                    .proxy
                    .send_cmd(RemoteCmd::BufferTx {
                        to: self.id.clone(),
                        tx,
                    })
                    .await
                    .map(|_| ());
                let _ = reply.send(result);
            }
            BeeCmd::CommitTx { seq, reply } => {
                let result = self
                    .proxy
                    .send_cmd(RemoteCmd::CommitTx {
                        to: self.id.clone(),
                        seq,
                    })
                    .await
                    .map(|_| ());
                let _ = reply.send(result);
            }
            BeeCmd::PeerFailed { .. } => {
                // Failures are handled by local bees only.
            }
            BeeCmd::RecruitSlaves { reply } => {
                let _ = reply.send(Err(Error::internal("proxy bees do not recruit")));
            }
        }
        ControlFlow::Continue(())
    }
}

// =============================================================================
// Detached bee
// =============================================================================

pub(crate) struct DetachedBee {
    id: BeeId,
    handler: Arc<dyn DetachedHandler>,
    state: Arc<RwLock<BeeState>>,
    colony: Colony,
    data_rx: mpsc::Receiver<MsgAndHandler>,
    ctrl_rx: mpsc::Receiver<BeeCmd>,
}

impl DetachedBee {
    pub(crate) fn new(
        id: BeeId,
        handler: Arc<dyn DetachedHandler>,
        hive: &HiveContext,
    ) -> (Self, BeeRef) {
        debug_assert!(id.detached, "detached bee requires a detached id");
        let channels = &hive.config().channels;
        let (data_tx, data_rx) = mpsc::channel(channels.bee_data_depth);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(channels.bee_ctrl_depth);
        let state = Arc::new(RwLock::new(BeeState::new()));

        let bee = Self {
            colony: Colony::new(id.clone()),
            id: id.clone(),
            handler,
            state: Arc::clone(&state),
            data_rx,
            ctrl_rx,
        };
        let bee_ref = BeeRef {
            id,
            kind: BeeKind::Detached,
            data_tx,
            ctrl_tx,
            state,
        };
        (bee, bee_ref)
    }

    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        {
            let mut state = self.state.write().await;
            let mut ctx = RcvContext {
                bee: &self.id,
                colony: &self.colony,
                state: &mut *state,
            };
            self.handler.start(&mut ctx);
        }
        debug!(bee = %self.id, "detached bee started");

        loop {
            tokio::select! {
                maybe = self.data_rx.recv() => match maybe {
                    Some(mh) => {
                        let mut state = self.state.write().await;
                        let mut ctx = RcvContext {
                            bee: &self.id,
                            colony: &self.colony,
                            state: &mut *state,
                        };
                        if let Err(e) = self.handler.rcv(&mh.msg, &mut ctx) {
                            error!(bee = %self.id, error = %e, "detached handler failed");
                        }
                    }
                    None => break,
                },
                maybe = self.ctrl_rx.recv() => match maybe {
                    Some(BeeCmd::Stop { reply }) => {
                        {
                            let mut state = self.state.write().await;
                            let mut ctx = RcvContext {
                                bee: &self.id,
                                colony: &self.colony,
                                state: &mut *state,
                            };
                            self.handler.stop(&mut ctx);
                        }
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(_) => {
                        debug!(bee = %self.id, "colony command ignored by detached bee");
                    }
                    None => break,
                },
            }
        }
        debug!(bee = %self.id, "detached bee stopped");
    }
}
