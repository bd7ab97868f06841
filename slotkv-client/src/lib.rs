//! # SlotKV Client
//!
//! Purpose: Blocking client driver for Redis-protocol stores, from a single
//! node up to a slot-sharded cluster, with pooling, batches, pub/sub,
//! scripts and a distributed lock.
//!
//! ## Design Principles
//! 1. **One Contract**: `Pool` and `Cluster` both implement `Client`, so callers
//!    and the lock never care which one they hold.
//! 2. **No I/O Under Locks**: Pool and topology locks guard bookkeeping only.
//! 3. **Explicit Ownership**: Borrowed connections are RAII values; named
//!    clients live in an explicit `Registry`.
//! 4. **Protocol Clarity**: RESP2 is encoded and parsed by hand in `resp`.

mod batch;
mod client;
mod config;
mod conn;
mod error;
mod pool;
mod pubsub;
mod registry;
mod resp;

pub mod cluster;
pub mod lock;
pub mod script;
pub mod slot;

pub use batch::Op;
pub use client::{connect, BatchFn, Client, DataFn, MetaFn};
pub use cluster::{Cluster, SlotRange};
pub use config::{ClientEntry, Options, RegistryConfig};
pub use conn::Connection;
pub use error::{ClientError, ClientResult};
pub use lock::{LockOptions, Mutex};
pub use pool::{Pool, PoolStats, PooledConn};
pub use pubsub::SubscriptionEvent;
pub use registry::Registry;
pub use resp::RespValue;
pub use script::Script;
