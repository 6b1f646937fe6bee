//! Waggle Cluster
//!
//! The hive-to-hive plumbing the runtime depends on: a serializable
//! command envelope, proxy/factory traits for issuing commands to remote
//! hives, an in-process mesh transport for tests and single-process
//! clusters, and the slave-placement strategy.

pub mod mesh;
pub mod rpc;
pub mod strategy;

pub use mesh::MemoryMesh;
pub use rpc::{CmdHandler, CmdReply, HiveProxy, ProxyFactory, RemoteCmd, ReplaceBeeData};
pub use strategy::{ReplicationStrategy, RoundRobinStrategy};
