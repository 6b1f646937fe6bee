//! Message envelope

use crate::id::BeeId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A message flowing through the cluster
///
/// `kind` selects the application handler; `data` is opaque to the
/// runtime. A message with a `to` field is unicast to that bee; otherwise
/// the queen maps it to cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    /// Handler-dispatch key
    pub kind: String,
    /// Opaque payload
    pub data: Bytes,
    /// Sender, if known
    pub from: Option<BeeId>,
    /// Unicast target, if any
    pub to: Option<BeeId>,
}

impl Msg {
    /// Create a broadcast (map-routed) message
    pub fn new(kind: impl Into<String>, data: Bytes) -> Self {
        Self {
            kind: kind.into(),
            data,
            from: None,
            to: None,
        }
    }

    /// Create a unicast message addressed to a specific bee
    pub fn unicast(kind: impl Into<String>, data: Bytes, to: BeeId) -> Self {
        Self {
            kind: kind.into(),
            data,
            from: None,
            to: Some(to),
        }
    }

    /// Whether the message targets a specific bee
    pub fn is_unicast(&self) -> bool {
        self.to.is_some()
    }
}
