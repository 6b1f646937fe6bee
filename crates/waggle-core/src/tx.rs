//! Replicated transaction log types
//!
//! A master bee turns each processed message into a transaction: buffered
//! locally, replicated to slaves, committed once a quorum has buffered it,
//! then applied. Sequence numbers are dense (no gaps) per bee.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction sequence number, dense per bee
pub type TxSeq = u64;

/// Lifecycle of a transaction in a bee's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Created but not yet in the buffer
    Open,
    /// In the buffer, not yet known committed
    Buffered,
    /// Committed; safe to apply
    Committed,
}

/// One entry in a bee's replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// Dense sequence number
    pub seq: TxSeq,
    /// Opaque payload (the message the master processed)
    pub payload: Bytes,
    /// Current status
    pub status: TxStatus,
}

impl Tx {
    /// Create a new open transaction
    pub fn new(seq: TxSeq, payload: Bytes) -> Self {
        Self {
            seq,
            payload,
            status: TxStatus::Open,
        }
    }
}

/// A bee's view of its own log, exchanged during failover reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    /// Colony generation the bee last installed
    pub generation: u64,
    /// Highest sequence number in the buffer
    pub last_buffered: TxSeq,
    /// Highest committed sequence number
    pub last_committed: TxSeq,
}

impl TxInfo {
    /// Create a new tx info
    pub fn new(generation: u64, last_buffered: TxSeq, last_committed: TxSeq) -> Self {
        Self {
            generation,
            last_buffered,
            last_committed,
        }
    }

    /// Whether `last_committed <= last_buffered` holds
    pub fn is_consistent(&self) -> bool {
        self.last_committed <= self.last_buffered
    }
}

impl fmt::Display for TxInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx(gen={}, buffered={}, committed={})",
            self.generation, self.last_buffered, self.last_committed
        )
    }
}
