//! Waggle Registry
//!
//! The cluster-wide authority for the `cells -> colony` binding. The core
//! runtime depends on two guarantees: an exclusive advisory lock per
//! application namespace, and compare-and-set as the atomicity primitive
//! for colony mutations. Everything else about the backing store is an
//! implementation detail.

pub mod memory;
pub mod registry;

pub use memory::MemoryRegistry;
pub use registry::Registry;
