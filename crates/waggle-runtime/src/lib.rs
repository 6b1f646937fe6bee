//! Waggle Runtime
//!
//! The event loops that make the cluster tick. Each hive runs one queen
//! per application; the queen maps messages to cells, finds or creates the
//! owning bee, and coordinates bee lifecycle. Each bee is a serial loop
//! over its own data and control channels. Masters replicate processed
//! messages as transactions to their colony's slaves; the failure handler
//! reconciles logs and re-elects masters when peers die.

pub mod app;
pub mod bee;
pub mod failure;
pub mod heartbeat;
pub mod hive;
pub mod queen;
pub mod replication;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::{App, DetachedHandler, Handler, MapContext, RcvContext};
pub use bee::{BeeCmd, BeeKind, BeeRef, MsgAndHandler};
pub use hive::{Hive, HiveContext, QueenHandle};
pub use queen::QueenCmd;
