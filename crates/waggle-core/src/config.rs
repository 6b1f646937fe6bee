//! Configuration for a hive
//!
//! Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for one hive process
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Hive identifier (auto-generated if not specified)
    #[serde(default)]
    pub hive_id: Option<String>,

    /// Isolated mode: single hive, no registry coordination
    #[serde(default)]
    pub isolated: bool,

    /// Channel configuration
    #[serde(default)]
    pub channels: ChannelConfig,

    /// Replication configuration
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Heartbeat configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl HiveConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.channels.validate()?;
        self.replication.validate()?;
        self.heartbeat.validate()?;
        Ok(())
    }
}

/// Channel depths for queens and bees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Queen data channel depth
    #[serde(default = "default_queen_data_depth")]
    pub queen_data_depth: usize,

    /// Queen control channel depth
    #[serde(default = "default_queen_ctrl_depth")]
    pub queen_ctrl_depth: usize,

    /// Bee data channel depth
    #[serde(default = "default_bee_data_depth")]
    pub bee_data_depth: usize,

    /// Bee control channel depth
    #[serde(default = "default_bee_ctrl_depth")]
    pub bee_ctrl_depth: usize,
}

fn default_queen_data_depth() -> usize {
    QUEEN_DATA_CHANNEL_DEPTH
}

fn default_queen_ctrl_depth() -> usize {
    QUEEN_CTRL_CHANNEL_DEPTH
}

fn default_bee_data_depth() -> usize {
    BEE_DATA_CHANNEL_DEPTH
}

fn default_bee_ctrl_depth() -> usize {
    BEE_CTRL_CHANNEL_DEPTH
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queen_data_depth: default_queen_data_depth(),
            queen_ctrl_depth: default_queen_ctrl_depth(),
            bee_data_depth: default_bee_data_depth(),
            bee_ctrl_depth: default_bee_ctrl_depth(),
        }
    }
}

impl ChannelConfig {
    fn validate(&self) -> Result<()> {
        if self.queen_data_depth == 0 || self.bee_data_depth == 0 {
            return Err(Error::InvalidConfig {
                field: "channels".into(),
                reason: "channel depths must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Replication and failover timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Snooze before retrying a contended registry app lock (ms)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    APP_LOCK_TIMEOUT_MS_DEFAULT
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl ReplicationConfig {
    fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(Error::InvalidConfig {
                field: "replication.lock_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Heartbeat probing of remote bees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between probes (ms)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,

    /// Consecutive misses before the bee is reported failed
    #[serde(default = "default_heartbeat_miss_max")]
    pub miss_count_max: u32,
}

fn default_heartbeat_interval_ms() -> u64 {
    HEARTBEAT_INTERVAL_MS_DEFAULT
}

fn default_heartbeat_miss_max() -> u32 {
    HEARTBEAT_MISS_COUNT_MAX
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval_ms(),
            miss_count_max: default_heartbeat_miss_max(),
        }
    }
}

impl HeartbeatConfig {
    fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::InvalidConfig {
                field: "heartbeat.interval_ms".into(),
                reason: "must be positive".into(),
            });
        }
        if self.miss_count_max == 0 {
            return Err(Error::InvalidConfig {
                field: "heartbeat.miss_count_max".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}
