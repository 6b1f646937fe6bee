//! Inter-hive commands
//!
//! Explicit message types; every command is request/reply. The wire
//! framing underneath the proxy is out of scope here: proxies may run over
//! any transport that can carry the serialized envelope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use waggle_core::{AppName, BeeId, BeeState, Colony, HiveId, MappedCells, Msg, Result, Tx, TxInfo, TxSeq};

/// Payload of a migration replace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceBeeData {
    /// The stopped source bee
    pub old_bee: BeeId,
    /// The freshly created target bee
    pub new_bee: BeeId,
    /// Snapshot of the source bee's state dictionaries
    pub state: BeeState,
    /// The cells the source bee owned
    pub cells: MappedCells,
}

/// Commands carried between hives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteCmd {
    /// Liveness probe
    Ping,

    /// Create a local bee for `app` on the receiving hive
    CreateBee { app: AppName },

    /// Install a migrated bee's state and take ownership of its cells
    ReplaceBee(ReplaceBeeData),

    /// Install a colony descriptor on the target bee
    JoinColony { to: BeeId, colony: Colony },

    /// Fetch the target bee's transaction log view
    GetTxInfo { to: BeeId },

    /// Fetch buffered transactions in `[from_seq, to_seq]`
    GetTx {
        to: BeeId,
        from_seq: TxSeq,
        to_seq: TxSeq,
    },

    /// Append a replicated transaction to the target bee's buffer
    BufferTx { to: BeeId, tx: Tx },

    /// Commit every buffered transaction up to `seq` on the target bee
    CommitTx { to: BeeId, seq: TxSeq },

    /// Deliver a data message to the target bee
    DeliverMsg { to: BeeId, msg: Msg },
}

impl RemoteCmd {
    /// The bee the command addresses, if any
    pub fn target_bee(&self) -> Option<&BeeId> {
        match self {
            Self::Ping | Self::CreateBee { .. } => None,
            Self::ReplaceBee(data) => Some(&data.new_bee),
            Self::JoinColony { to, .. } => Some(to),
            Self::GetTxInfo { to } => Some(to),
            Self::GetTx { to, .. } => Some(to),
            Self::BufferTx { to, .. } => Some(to),
            Self::CommitTx { to, .. } => Some(to),
            Self::DeliverMsg { to, .. } => Some(to),
        }
    }
}

/// Replies to remote commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CmdReply {
    /// Command succeeded with no payload
    Ok,
    /// A bee was created
    BeeCreated(BeeId),
    /// A bee was replaced
    BeeReplaced(BeeId),
    /// The target bee's log view
    TxInfo(TxInfo),
    /// A slice of the target bee's buffer
    Txs(Vec<Tx>),
}

/// Client side: a handle for issuing commands to one remote hive
#[async_trait]
pub trait HiveProxy: Send + Sync {
    /// Send a command and wait for its reply
    async fn send_cmd(&self, cmd: RemoteCmd) -> Result<CmdReply>;
}

/// Produces proxies to remote hives
pub trait ProxyFactory: Send + Sync {
    /// Get a proxy to the given hive
    fn proxy(&self, hive: &HiveId) -> Arc<dyn HiveProxy>;
}

/// Server side: dispatches commands arriving at a hive
#[async_trait]
pub trait CmdHandler: Send + Sync {
    /// Handle an inbound command and produce its reply
    async fn handle_cmd(&self, cmd: RemoteCmd) -> Result<CmdReply>;
}
