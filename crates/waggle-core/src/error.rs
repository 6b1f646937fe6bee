//! Error types for Waggle
//!
//! One `thiserror` enum shared across the workspace: errors travel through
//! bee and queen reply channels, so every crate speaks the same type.

use crate::colony::Colony;
use thiserror::Error;

/// Result type alias for Waggle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Waggle error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Control-Plane Errors
    // =========================================================================
    #[error("bee not found: {id}")]
    BeeNotFound { id: String },

    #[error("bee already exists: {id}")]
    DuplicateBee { id: String },

    #[error("cannot migrate a detached bee: {id}")]
    MigrateDetached { id: String },

    #[error("invalid identifier {id}: {reason}")]
    InvalidId { id: String, reason: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// The registry rejected our colony view; the local bee is stale and
    /// must stop.
    #[error("stale colony view; registry holds {observed}")]
    StaleColony { observed: Colony },

    #[error("colony not found in registry: {master}")]
    ColonyNotFound { master: String },

    #[error("app lock busy: {app}")]
    LockContention { app: String },

    // =========================================================================
    // Cluster Errors
    // =========================================================================
    #[error("hive {hive} unreachable: {reason}")]
    HiveUnreachable { hive: String, reason: String },

    // =========================================================================
    // Replication Errors
    // =========================================================================
    /// Warning-level: the colony keeps running but has fewer slaves than
    /// its commit threshold.
    #[error("under-replicated: {have} slaves, need {want}")]
    UnderReplicated { have: usize, want: usize },

    // =========================================================================
    // Application Errors
    // =========================================================================
    #[error("handler fault in {app}: {reason}")]
    HandlerFault { app: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("channel closed: {channel}")]
    ChannelClosed { channel: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// Create a bee-not-found error
    pub fn bee_not_found(id: impl ToString) -> Self {
        Self::BeeNotFound { id: id.to_string() }
    }

    /// Create a hive-unreachable error
    pub fn unreachable(hive: impl ToString, reason: impl Into<String>) -> Self {
        Self::HiveUnreachable {
            hive: hive.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a channel-closed error
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        Self::ChannelClosed {
            channel: channel.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Lock contention and unreachable peers may resolve on their own;
    /// a stale colony never does.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::LockContention { .. } | Self::HiveUnreachable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::bee_not_found("hive-1/ping/3");
        assert!(err.to_string().contains("hive-1/ping/3"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::LockContention { app: "ping".into() }.is_retriable());
        assert!(Error::unreachable("hive-2", "connection refused").is_retriable());
        assert!(!Error::bee_not_found("x").is_retriable());
    }
}
