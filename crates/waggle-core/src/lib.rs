//! Waggle Core
//!
//! Core types, errors, and constants for the Waggle distributed actor
//! runtime.
//!
//! # Overview
//!
//! Waggle runs application logic in lightweight per-key actors ("bees")
//! spread across a cluster of processes ("hives"). Bees are replicated
//! into colonies (one master plus slaves) and messages are routed to the
//! bee that owns the relevant cells. This crate holds the data model that
//! every other crate in the workspace shares: identifiers, cells, colony
//! descriptors, the transaction log types, bee state dictionaries, the
//! message envelope, and the workspace-wide error type.

pub mod cell;
pub mod colony;
pub mod config;
pub mod constants;
pub mod error;
pub mod id;
pub mod msg;
pub mod state;
pub mod telemetry;
pub mod tx;

pub use cell::{CellKey, MapSet, MappedCells};
pub use colony::Colony;
pub use config::{ChannelConfig, HeartbeatConfig, HiveConfig, ReplicationConfig};
pub use constants::*;
pub use error::{Error, Result};
pub use id::{AppName, BeeId, HiveId};
pub use msg::Msg;
pub use state::BeeState;
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use tx::{Tx, TxInfo, TxSeq, TxStatus};
