//! # Cluster Router
//!
//! Purpose: Present one logical client over a slot-sharded cluster, keeping a
//! 16384-entry slot index that points at one pool per node.
//!
//! ## Design Principles
//! 1. **Read-Mostly Topology**: Lookups take a read lock; a refresh holds the
//!    write lock only for the swap, after new pools are fully built.
//! 2. **Cheap No-Op Refresh**: An unchanged slot table leaves every pool alone.
//! 3. **Refresh Once, Retry Once**: A redirection signal triggers exactly one
//!    refresh and one retry; a second failure goes to the caller.
//! 4. **All or Nothing Install**: A refresh that fails midway closes what it
//!    built and keeps the installed topology.

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::client::{BatchFn, Client, DataFn, MetaFn};
use crate::config::Options;
use crate::conn::Connection;
use crate::error::{is_redirect_message, ClientError, ClientResult, Lossy};
use crate::pool::{fix_keys, Pool};
use crate::resp::RespValue;
use crate::script::{ensure_single_key, Script};
use crate::slot::{slot, SLOT_COUNT};

/// Contiguous slots served by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    /// `host:port` of the master serving the range.
    pub addr: String,
}

/// Asks the first reachable seed for its slot table.
pub fn query_cluster_slots(options: &Options) -> ClientResult<Vec<SlotRange>> {
    let mut last_err = None;
    for seed in &options.address {
        let mut conn = match Connection::dial(seed, options) {
            Ok(conn) => conn,
            Err(err) => {
                debug!(seed = %seed, error = %err, "seed unreachable");
                last_err = Some(err);
                continue;
            }
        };
        let reply = conn.exec(&[b"CLUSTER", b"SLOTS"]);
        conn.close();
        return parse_cluster_slots(reply?, seed_host(seed), options);
    }
    Err(last_err.unwrap_or_else(|| ClientError::Config("no seed addresses".to_string())))
}

fn seed_host(seed: &str) -> &str {
    seed.rsplit_once(':').map_or(seed, |(host, _)| host)
}

/// Parses a `CLUSTER SLOTS` reply.
///
/// Each item is `[start, end, [host, port, id?], replicas...]`; only the
/// master is used. Hosts go through `options.address_map`, and an empty host
/// means the seed's own host.
pub fn parse_cluster_slots(
    reply: RespValue,
    seed_host: &str,
    options: &Options,
) -> ClientResult<Vec<SlotRange>> {
    let items = reply
        .into_array()
        .map_err(|_| invalid("reply is not an array"))?;
    if items.is_empty() {
        return Err(invalid("slot table is empty"));
    }

    let mut ranges = Vec::with_capacity(items.len());
    for item in items {
        let mut fields = item
            .into_array()
            .map_err(|_| invalid("slot entry is not an array"))?
            .into_iter();
        let start = slot_number(fields.next())?;
        let end = slot_number(fields.next())?;
        if start > end {
            return Err(invalid("slot range is reversed"));
        }

        let mut node = fields
            .next()
            .ok_or_else(|| invalid("slot entry has no master"))?
            .into_array()
            .map_err(|_| invalid("master entry is not an array"))?
            .into_iter();
        let host = node
            .next()
            .ok_or_else(|| invalid("master entry has no host"))?
            .into_string()
            .map_err(|_| invalid("master host is not a string"))?;
        let port = node
            .next()
            .ok_or_else(|| invalid("master entry has no port"))?
            .as_i64()
            .map_err(|_| invalid("master port is not an integer"))?;

        let host = if host.is_empty() {
            seed_host.to_string()
        } else {
            options.address_map.get(&host).cloned().unwrap_or(host)
        };
        ranges.push(SlotRange {
            start,
            end,
            addr: format!("{}:{}", host, port),
        });
    }
    Ok(ranges)
}

fn slot_number(value: Option<RespValue>) -> ClientResult<u16> {
    let number = value
        .ok_or_else(|| invalid("slot entry is truncated"))?
        .as_i64()
        .map_err(|_| invalid("slot bound is not an integer"))?;
    if number < 0 || number as usize >= SLOT_COUNT {
        return Err(invalid("slot bound out of range"));
    }
    Ok(number as u16)
}

fn invalid(reason: &str) -> ClientError {
    ClientError::InvalidClusterSlots(reason.to_string())
}

/// Returns true unless both tables hold the same ranges.
///
/// Ranges are matched by start slot in any order; a matched pair must agree
/// on end slot and address.
pub fn slots_changed(old: &[SlotRange], new: &[SlotRange]) -> bool {
    if old.len() != new.len() {
        return true;
    }
    let mut matched = vec![false; new.len()];
    for range in old {
        let found = new
            .iter()
            .enumerate()
            .find(|(i, candidate)| !matched[*i] && candidate.start == range.start);
        match found {
            Some((i, candidate)) => {
                if candidate.end != range.end || candidate.addr != range.addr {
                    return true;
                }
                matched[i] = true;
            }
            None => return true,
        }
    }
    false
}

/// Installed slot table, its pools and the slot index.
#[derive(Default)]
struct Topology {
    ranges: Vec<SlotRange>,
    pools: Vec<Arc<Pool>>,
    /// Slot -> position in `pools`; empty until the first install.
    index: Vec<Option<usize>>,
}

/// Cluster-aware client.
pub struct Cluster {
    options: Options,
    topology: RwLock<Topology>,
    // Serializes refreshes; lookups never take it.
    refresh_lock: Mutex<()>,
    refreshes: AtomicU64,
    generation: AtomicU64,
}

impl Cluster {
    /// Discovers the topology from `options.address` and opens node pools.
    pub fn new(options: Options) -> ClientResult<Self> {
        let options = options.normalize();
        options.validate()?;
        let cluster = Cluster {
            options,
            topology: RwLock::new(Topology::default()),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        };
        cluster.refresh_topology()?;
        Ok(cluster)
    }

    /// Re-reads the slot table and installs it when it changed.
    ///
    /// Returns whether a new topology was installed.
    pub fn refresh_topology(&self) -> ClientResult<bool> {
        let _serial = self.refresh_lock.lock();
        self.refreshes.fetch_add(1, Ordering::SeqCst);

        let ranges = query_cluster_slots(&self.options)?;
        if !slots_changed(&self.topology.read().ranges, &ranges) {
            debug!("cluster topology unchanged");
            return Ok(false);
        }

        let pools = self.build_pools(&ranges)?;
        let retired = {
            let mut topology = self.topology.write();
            if topology.index.len() != SLOT_COUNT {
                topology.index = vec![None; SLOT_COUNT];
            } else {
                topology.index.iter_mut().for_each(|entry| *entry = None);
            }
            for (pos, range) in ranges.iter().enumerate() {
                for slot in range.start..=range.end {
                    topology.index[slot as usize] = Some(pos);
                }
            }
            topology.ranges = ranges;
            mem::replace(&mut topology.pools, pools)
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            generation,
            nodes = self.topology.read().pools.len(),
            "installed cluster topology"
        );
        for pool in retired {
            pool.close();
        }
        Ok(true)
    }

    fn build_pools(&self, ranges: &[SlotRange]) -> ClientResult<Vec<Arc<Pool>>> {
        let mut pools = Vec::with_capacity(ranges.len());
        for range in ranges {
            match Pool::new(range.addr.clone(), self.options.for_node(&range.addr)) {
                Ok(pool) => pools.push(Arc::new(pool)),
                Err(err) => {
                    warn!(addr = %range.addr, error = %err, "failed to build node pool");
                    pools.iter().for_each(|pool: &Arc<Pool>| pool.close());
                    return Err(err);
                }
            }
        }
        Ok(pools)
    }

    /// Number of refresh attempts, installed or not.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Number of topologies installed.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Currently installed slot table.
    pub fn ranges(&self) -> Vec<SlotRange> {
        self.topology.read().ranges.clone()
    }

    /// Address of the node owning `key`, with the key suffix applied.
    pub fn node_for(&self, key: &[u8]) -> Option<String> {
        let key = self.options.fix_key(key);
        self.pool_for(slot(&key)).ok().map(|pool| pool.addr().to_string())
    }

    fn pool_for(&self, slot: u16) -> ClientResult<Arc<Pool>> {
        let topology = self.topology.read();
        topology
            .index
            .get(slot as usize)
            .copied()
            .flatten()
            .and_then(|pos| topology.pools.get(pos).cloned())
            .ok_or(ClientError::SlotUnassigned(slot))
    }

    /// Runs `op` on the pool owning `slot`, refreshing and retrying once when
    /// `stale` flags the outcome.
    fn dispatch<T>(
        &self,
        slot: u16,
        mut op: impl FnMut(&Pool) -> ClientResult<T>,
        stale: impl Fn(&ClientResult<T>) -> bool,
    ) -> ClientResult<T> {
        let first = self.pool_for(slot).and_then(|pool| op(&*pool));
        if !stale(&first) {
            return first;
        }
        if let Err(err) = &first {
            warn!(slot, error = %err, "redirected, refreshing topology");
        }
        if let Err(err) = self.refresh_topology() {
            warn!(error = %err, "topology refresh failed");
        }
        self.pool_for(slot).and_then(|pool| op(&*pool))
    }
}

fn redirected<T>(result: &ClientResult<T>) -> bool {
    matches!(result, Err(err) if err.is_redirect())
}

/// A pipeline whose every reply is a redirection executed nothing.
fn pipeline_redirected(result: &ClientResult<Vec<RespValue>>) -> bool {
    match result {
        Ok(replies) => {
            !replies.is_empty()
                && replies
                    .iter()
                    .all(|reply| matches!(reply, RespValue::Error(message) if is_redirect_message(message)))
        }
        Err(_) => redirected(result),
    }
}

impl Client for Cluster {
    fn exec(&self, cmd: &str, key: &[u8], args: &[&[u8]]) -> ClientResult<RespValue> {
        let key = self.options.fix_key(key);
        self.dispatch(slot(&key), |pool| pool.exec_fixed(cmd, &key, args), redirected)
    }

    fn pipeline(&self, key: &[u8], batch: &mut BatchFn<'_>) -> ClientResult<Vec<RespValue>> {
        let slot = slot(&self.options.fix_key(key));
        self.dispatch(
            slot,
            |pool| pool.pipeline_pinned(Some(slot), &mut *batch),
            pipeline_redirected,
        )
    }

    fn transaction(&self, key: &[u8], batch: &mut BatchFn<'_>) -> ClientResult<Vec<RespValue>> {
        let slot = slot(&self.options.fix_key(key));
        self.dispatch(
            slot,
            |pool| pool.transaction_pinned(Some(slot), &mut *batch),
            redirected,
        )
    }

    fn publish(&self, channel: &[u8], message: &[u8]) -> ClientResult<i64> {
        let channel = self.options.fix_key(channel);
        self.dispatch(
            slot(&channel),
            |pool| pool.publish_fixed(&channel, message),
            redirected,
        )
    }

    fn subscribe(
        &self,
        channel: &[u8],
        on_data: &mut DataFn<'_>,
        on_meta: &mut MetaFn<'_>,
    ) -> ClientResult<()> {
        let channel = self.options.fix_key(channel);
        debug!(channel = %Lossy(&channel), "cluster subscribe");
        self.dispatch(
            slot(&channel),
            |pool| pool.subscribe_fixed(&channel, &mut *on_data, &mut *on_meta),
            redirected,
        )
    }

    fn eval(&self, script: &Script, keys: &[&[u8]], args: &[&[u8]]) -> ClientResult<RespValue> {
        ensure_single_key(keys)?;
        let fixed = fix_keys(&self.options, keys);
        let keys: Vec<&[u8]> = fixed.iter().map(|key| key.as_ref()).collect();
        self.dispatch(
            slot(keys[0]),
            |pool| pool.eval_fixed(script, &keys, args),
            redirected,
        )
    }

    fn close(&self) {
        for pool in self.topology.read().pools.iter() {
            pool.close();
        }
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("ranges", &self.topology.read().ranges)
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u16, end: u16, addr: &str) -> SlotRange {
        SlotRange {
            start,
            end,
            addr: addr.to_string(),
        }
    }

    fn bulk(text: &str) -> RespValue {
        RespValue::Bulk(Some(text.as_bytes().to_vec()))
    }

    fn entry(start: i64, end: i64, host: &str, port: i64) -> RespValue {
        RespValue::Array(vec![
            RespValue::Integer(start),
            RespValue::Integer(end),
            RespValue::Array(vec![bulk(host), RespValue::Integer(port), bulk("node-id")]),
            RespValue::Array(vec![bulk(host), RespValue::Integer(port + 3)]),
        ])
    }

    #[test]
    fn same_ranges_in_any_order_are_unchanged() {
        let old = vec![range(0, 5460, "a:1"), range(5461, 16383, "b:1")];
        let new = vec![range(5461, 16383, "b:1"), range(0, 5460, "a:1")];
        assert!(!slots_changed(&old, &new));
    }

    #[test]
    fn moved_range_or_new_node_is_a_change() {
        let old = vec![range(0, 5460, "a:1"), range(5461, 16383, "b:1")];
        assert!(slots_changed(&old, &[range(0, 5460, "a:1"), range(5461, 16383, "c:1")]));
        assert!(slots_changed(&old, &[range(0, 5000, "a:1"), range(5461, 16383, "b:1")]));
        assert!(slots_changed(&old, &[range(0, 16383, "a:1")]));
        assert!(slots_changed(&[], &old));
        assert!(!slots_changed(&[], &[]));
    }

    #[test]
    fn parses_slot_table_with_address_map() {
        let mut options = Options::default();
        options
            .address_map
            .insert("172.31.0.63".to_string(), "10.1.1.1".to_string());
        let reply = RespValue::Array(vec![
            entry(0, 5460, "172.31.0.63", 7000),
            entry(5461, 16383, "", 7001),
        ]);
        let ranges = parse_cluster_slots(reply, "seed.local", &options).unwrap();
        assert_eq!(
            ranges,
            vec![range(0, 5460, "10.1.1.1:7000"), range(5461, 16383, "seed.local:7001")]
        );
    }

    #[test]
    fn rejects_malformed_tables() {
        let options = Options::default();
        let bad = [
            RespValue::Array(Vec::new()),
            RespValue::Integer(1),
            RespValue::Array(vec![entry(10, 5, "h", 1)]),
            RespValue::Array(vec![entry(0, 20000, "h", 1)]),
            RespValue::Array(vec![RespValue::Array(vec![RespValue::Integer(0)])]),
        ];
        for reply in bad {
            assert!(matches!(
                parse_cluster_slots(reply, "h", &options),
                Err(ClientError::InvalidClusterSlots(_))
            ));
        }
    }

    #[test]
    fn seed_host_strips_port() {
        assert_eq!(seed_host("127.0.0.1:7000"), "127.0.0.1");
        assert_eq!(seed_host("localhost"), "localhost");
    }

    #[test]
    fn all_redirect_pipelines_are_retried() {
        let moved = RespValue::Error(b"MOVED 1 a:1".to_vec());
        assert!(pipeline_redirected(&Ok(vec![moved.clone(), moved.clone()])));
        assert!(!pipeline_redirected(&Ok(vec![moved, RespValue::Integer(1)])));
        assert!(!pipeline_redirected(&Ok(Vec::new())));
        assert!(pipeline_redirected(&Err(ClientError::PoolClosed)));
    }
}
