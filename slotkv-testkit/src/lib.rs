//! # slotkv-testkit
//!
//! Purpose: In-process RESP2 nodes for testing `slotkv-client` without an
//! external server. A node speaks the subset of commands the driver issues;
//! a [`TestCluster`] shares one slot table across nodes and redirects with
//! `MOVED` like a sharded deployment.
//!
//! ## Design Principles
//! 1. **Blocking Facade**: Tests stay synchronous; the async runtime is
//!    hidden inside each node.
//! 2. **Scripts As Closures**: Lua is replaced by Rust handlers registered
//!    under the script source, keyed by its SHA1.
//! 3. **Fault Injection**: Connections can be dropped and slot ranges moved
//!    while clients are live.

mod cluster;
mod layout;
mod node;
mod protocol;
mod scripts;
mod store;

pub use cluster::TestCluster;
pub use layout::{even_split, key_slot, Assignment, Layout, SLOTS};
pub use node::{NodeConfig, TestNode};
pub use protocol::{parse_command, ProtocolError, Reply};
pub use scripts::{compare_and_delete, compare_and_expire, script_sha, ScriptHandler};
pub use store::{Store, Ttl, DATABASES};
