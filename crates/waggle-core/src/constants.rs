//! Workspace constants
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identifier Limits
// =============================================================================

/// Maximum length of a hive ID in bytes
pub const HIVE_ID_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an application name in bytes
pub const APP_NAME_LENGTH_BYTES_MAX: usize = 128;

// =============================================================================
// Channel Depths
// =============================================================================

/// Depth of a queen's data channel
pub const QUEEN_DATA_CHANNEL_DEPTH: usize = 4096;

/// Depth of a queen's control channel
pub const QUEEN_CTRL_CHANNEL_DEPTH: usize = 1024;

/// Depth of a bee's data channel
pub const BEE_DATA_CHANNEL_DEPTH: usize = 1024;

/// Depth of a bee's control channel
///
/// Concurrent migrations beyond this depth can deadlock the queen against
/// its own bees; see the note in the migration pipeline.
pub const BEE_CTRL_CHANNEL_DEPTH: usize = 128;

// =============================================================================
// Replication Limits
// =============================================================================

/// Default replication factor (master plus two slaves)
pub const REPLICATION_FACTOR_DEFAULT: usize = 3;

/// Default number of slave acks required before a transaction commits
pub const COMMIT_THRESHOLD_DEFAULT: usize = 1;

/// Maximum strategy rounds a single recruitment pass may run
pub const RECRUIT_ROUNDS_COUNT_MAX: usize = 3;

/// Maximum number of transactions served by one log fetch
pub const TX_FETCH_COUNT_MAX: usize = 4096;

// =============================================================================
// Timing
// =============================================================================

/// Snooze before retrying a contended registry app lock (1 sec)
pub const APP_LOCK_TIMEOUT_MS_DEFAULT: u64 = 1000;

/// Interval between heartbeat probes to a remote bee (1 sec)
pub const HEARTBEAT_INTERVAL_MS_DEFAULT: u64 = 1000;

/// Consecutive missed heartbeats before a bee is reported failed
pub const HEARTBEAT_MISS_COUNT_MAX: u32 = 3;

// Compile-time assertions for constant validity
const _: () = {
    assert!(HIVE_ID_LENGTH_BYTES_MAX >= 16);
    assert!(BEE_CTRL_CHANNEL_DEPTH >= 16);
    assert!(REPLICATION_FACTOR_DEFAULT >= 1);
    assert!(COMMIT_THRESHOLD_DEFAULT < REPLICATION_FACTOR_DEFAULT);
    assert!(RECRUIT_ROUNDS_COUNT_MAX >= 1);
    assert!(HEARTBEAT_MISS_COUNT_MAX >= 1);
};
