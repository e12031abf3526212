//! Cluster routing for the relay
//!
//! A measurement key maps onto a named shard through a consistent-hash
//! ring; the router replicates writes to every backend of the shard and
//! answers queries from the first healthy one, consulting the former ring
//! alongside during a resharding window.

pub mod ring;
pub mod router;
pub mod stats;

pub use ring::HashRing;
pub use router::ClusterRouter;
pub use stats::{RelayStats, Statistics};
