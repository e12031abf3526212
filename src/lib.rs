//! # fluxgate
//!
//! A sharding, replicating HTTP relay for InfluxDB-compatible time-series
//! databases.
//!
//! fluxgate sits in front of a pool of databases speaking the line-protocol
//! write API and an InfluxQL-style query API. Clients send unmodified
//! `/write` and `/query` requests to the relay, which routes each
//! measurement deterministically to a shard and replicates across it.
//!
//! ## Key Features
//!
//! - **Consistent-hash routing**: measurements map to named shards over a
//!   virtual-node ring, so adding capacity moves a minimal key range
//! - **Write replication**: every row is fanned out to all backends of its
//!   shard; a backend outage is absorbed by a bounded in-memory retry
//!   buffer that drains with exponential backoff
//! - **Resharding window**: queries consult the former ring alongside the
//!   current one and the two result sets are merged by statement id
//! - **Transparent surface**: gzip request bodies, `Authorization`
//!   passthrough and response headers behave as if clients talked to the
//!   database directly
//!
//! ## Architecture
//!
//! - **Front-end** (`api`): accepts `/write`, `/query`, `/ping`, `/stats`
//! - **Router** (`cluster`): ring lookup, per-line fan-out, query merging
//! - **Backends** (`backend`): health-probed HTTP clients with per-backend
//!   retry buffers

pub mod api;
pub mod backend;
pub mod cluster;
pub mod config;
pub mod lineproto;
pub mod query;

mod error;

pub use error::{Error, Result};
