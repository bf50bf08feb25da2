//! cinder-core: the storage engine.
//!
//! Owns the sharded keyspace, key locking, expiry, transactions, the
//! command registry, and the append-only journal. The wire protocol
//! lives in `cinder-protocol`; the TCP front end in `cinder-server`.
//!
//! Layering, leaves first: `hash` and `time` are pure helpers; `dict`,
//! `lock`, `wheel`, and `zset` are standalone primitives; `db` composes
//! them into one logical keyspace; `engine` holds the fixed set of
//! logical databases, the journal (`aof`), and the dispatch boundary.

pub mod aof;
pub mod cmd;
pub mod db;
pub mod dict;
pub mod engine;
pub mod error;
pub mod hash;
pub mod lock;
pub mod session;
pub mod time;
pub mod types;
pub mod wheel;
pub mod zset;

mod tx;

#[cfg(test)]
pub(crate) mod testutil;

pub use aof::SyncMode;
pub use db::Database;
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use session::Session;
pub use types::DataEntity;
