//! Application traits
//!
//! An application provides its replication parameters and, per message
//! kind, a handler with a map function (message -> cells) and a receive
//! function (message -> state mutation). The runtime owns routing,
//! replication, and failover; the application owns meaning.

use waggle_core::{AppName, BeeId, BeeState, Colony, HiveId, MapSet, Msg, Result};

/// Replication parameters of an application
pub trait App: Send + Sync + 'static {
    /// The application's name; scopes its queens and colony namespace
    fn name(&self) -> AppName;

    /// Total copies of each bee (master plus slaves)
    fn replication_factor(&self) -> usize {
        waggle_core::REPLICATION_FACTOR_DEFAULT
    }

    /// Slave buffer acks required before a transaction commits
    fn commit_threshold(&self) -> usize {
        waggle_core::COMMIT_THRESHOLD_DEFAULT
    }
}

/// Context handed to map functions
///
/// The state belongs to the queen and is touched only from the queen's
/// loop.
pub struct MapContext<'a> {
    /// The application being routed for
    pub app: &'a AppName,
    /// The local hive
    pub hive: &'a HiveId,
    /// Queen-local state dictionaries
    pub state: &'a mut BeeState,
}

/// Context handed to receive functions
pub struct RcvContext<'a> {
    /// The bee processing the message
    pub bee: &'a BeeId,
    /// The bee's current colony view
    pub colony: &'a Colony,
    /// The bee's state dictionaries
    pub state: &'a mut BeeState,
}

/// A message handler for one message kind
///
/// `map` runs on the queen and must be cheap; a panic inside it is caught,
/// logged, and drops the message without harming the queen. `rcv` runs on
/// the owning bee during transaction application.
pub trait Handler: Send + Sync + 'static {
    /// Map a message to the cells that address its logical bee
    fn map(&self, msg: &Msg, ctx: &mut MapContext<'_>) -> MapSet;

    /// Process a message on the owning bee
    fn rcv(&self, msg: &Msg, ctx: &mut RcvContext<'_>) -> Result<()>;
}

/// Lifecycle hooks for a detached bee
///
/// Detached bees are manually driven: they own no cells and take part in
/// no colony. The runtime only starts them, feeds them messages, and stops
/// them.
pub trait DetachedHandler: Send + Sync + 'static {
    /// Called once when the bee starts
    fn start(&self, ctx: &mut RcvContext<'_>);

    /// Called for every message delivered to the bee
    fn rcv(&self, msg: &Msg, ctx: &mut RcvContext<'_>) -> Result<()>;

    /// Called once when the bee stops
    fn stop(&self, ctx: &mut RcvContext<'_>);
}
