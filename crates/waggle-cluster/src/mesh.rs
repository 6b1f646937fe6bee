//! In-process mesh transport
//!
//! Hives in the same process register their command handlers here; proxies
//! dispatch directly to the target handler. Tests partition the cluster by
//! disconnecting a hive, which makes every command to it fail as
//! unreachable.

use crate::rpc::{CmdHandler, CmdReply, HiveProxy, ProxyFactory, RemoteCmd};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use waggle_core::{Error, HiveId, Result};

type HandlerTable = Arc<RwLock<HashMap<HiveId, Arc<dyn CmdHandler>>>>;

/// In-process hive mesh
///
/// Cheaply cloneable; clones share the same handler table, so proxies see
/// hives registered after the proxy was created.
#[derive(Clone, Default)]
pub struct MemoryMesh {
    handlers: HandlerTable,
}

impl MemoryMesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hive's command handler
    pub fn register(&self, hive: HiveId, handler: Arc<dyn CmdHandler>) {
        debug!(hive = %hive, "hive joined the mesh");
        let mut handlers = self.handlers.write().expect("mesh lock poisoned");
        handlers.insert(hive, handler);
    }

    /// Disconnect a hive; subsequent commands to it fail as unreachable
    pub fn disconnect(&self, hive: &HiveId) {
        debug!(hive = %hive, "hive left the mesh");
        let mut handlers = self.handlers.write().expect("mesh lock poisoned");
        handlers.remove(hive);
    }

    fn handler(&self, hive: &HiveId) -> Option<Arc<dyn CmdHandler>> {
        let handlers = self.handlers.read().expect("mesh lock poisoned");
        handlers.get(hive).cloned()
    }
}

impl ProxyFactory for MemoryMesh {
    fn proxy(&self, hive: &HiveId) -> Arc<dyn HiveProxy> {
        Arc::new(MeshProxy {
            mesh: self.clone(),
            target: hive.clone(),
        })
    }
}

struct MeshProxy {
    mesh: MemoryMesh,
    target: HiveId,
}

#[async_trait]
impl HiveProxy for MeshProxy {
    async fn send_cmd(&self, cmd: RemoteCmd) -> Result<CmdReply> {
        let handler = self
            .mesh
            .handler(&self.target)
            .ok_or_else(|| Error::unreachable(&self.target, "hive not registered"))?;
        handler.handle_cmd(cmd).await
    }
}
