//! # Connection Pool
//!
//! Purpose: Hand out healthy connections to one node under a capacity bound,
//! recycle them after use and tear down the ones that failed.
//!
//! ## Design Principles
//! 1. **Arena Lists**: Entries live in a `Vec<Option<Entry>>` and are linked by
//!    index into a free list and a used list; moving between them is O(1)
//!    relinking with no pointers and no shifting.
//! 2. **Lock Only Bookkeeping**: Dial, probe, command I/O and close all happen
//!    after the mutex is released.
//! 3. **Backpressure**: At capacity, callers wait on a condvar (optionally
//!    bounded by a deadline) instead of polling.
//! 4. **LIFO Reuse**: Returned connections go to the free-list head and are
//!    taken from there; the tail holds the longest-idle one.
//! 5. **RAII Borrow**: A `PooledConn` dropped without `put` is discarded.
//! 6. **Close Reaches Borrowers**: Every lent connection leaves a shutdown
//!    handle in its entry, so `close` can unblock a borrower stuck in a read.

use std::borrow::Cow;
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::batch::{run_pipeline, run_transaction, BatchRun};
use crate::client::{command_parts, BatchFn, Client, DataFn, MetaFn};
use crate::config::Options;
use crate::conn::Connection;
use crate::error::{ClientError, ClientResult};
use crate::pubsub::run_subscription;
use crate::resp::RespValue;
use crate::script::{eval_on, Script};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Free,
    Used,
}

/// One pooled connection slot.
///
/// The connection is stored here only while the entry sits in the free list;
/// while lent out it is owned by the borrower's `PooledConn`.
#[derive(Debug)]
struct Entry<C> {
    conn: Option<C>,
    // Duplicate of the socket while the connection is lent out.
    shutdown: Option<TcpStream>,
    // Set when the connection was last returned.
    idle_since: Instant,
    list: ListKind,
    // Intrusive links (arena indices).
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Links {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Mutex-protected pool bookkeeping.
#[derive(Debug)]
struct PoolState<C = Connection> {
    entries: Vec<Option<Entry<C>>>,
    /// Recycled arena slots.
    vacant: Vec<usize>,
    free: Links,
    used: Links,
    closed: bool,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        PoolState {
            entries: Vec::new(),
            vacant: Vec::new(),
            free: Links::default(),
            used: Links::default(),
            closed: false,
        }
    }

    fn total(&self) -> usize {
        self.free.len + self.used.len
    }

    fn links_mut(&mut self, kind: ListKind) -> &mut Links {
        match kind {
            ListKind::Free => &mut self.free,
            ListKind::Used => &mut self.used,
        }
    }

    /// Links `idx` at the head of `kind`.
    fn link_front(&mut self, kind: ListKind, idx: usize) {
        let head = self.links_mut(kind).head;
        if let Some(entry) = self.entries[idx].as_mut() {
            entry.list = kind;
            entry.prev = None;
            entry.next = head;
        }
        match head {
            Some(head_idx) => {
                if let Some(head_entry) = self.entries[head_idx].as_mut() {
                    head_entry.prev = Some(idx);
                }
            }
            None => self.links_mut(kind).tail = Some(idx),
        }
        let links = self.links_mut(kind);
        links.head = Some(idx);
        links.len += 1;
    }

    /// Detaches `idx` from whichever list holds it.
    fn unlink(&mut self, idx: usize) {
        let (kind, prev, next) = match self.entries[idx].as_ref() {
            Some(entry) => (entry.list, entry.prev, entry.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_entry) = self.entries[prev_idx].as_mut() {
                    prev_entry.next = next;
                }
            }
            None => self.links_mut(kind).head = next,
        }
        match next {
            Some(next_idx) => {
                if let Some(next_entry) = self.entries[next_idx].as_mut() {
                    next_entry.prev = prev;
                }
            }
            None => self.links_mut(kind).tail = prev,
        }

        if let Some(entry) = self.entries[idx].as_mut() {
            entry.prev = None;
            entry.next = None;
        }
        let links = self.links_mut(kind);
        links.len = links.len.saturating_sub(1);
    }

    fn insert(&mut self, kind: ListKind, conn: Option<C>) -> usize {
        let idx = self.vacant.pop().unwrap_or_else(|| {
            self.entries.push(None);
            self.entries.len() - 1
        });
        self.entries[idx] = Some(Entry {
            conn,
            shutdown: None,
            idle_since: Instant::now(),
            list: kind,
            prev: None,
            next: None,
        });
        self.link_front(kind, idx);
        idx
    }

    /// Registers a connection about to be dialed; it counts against capacity.
    fn reserve(&mut self) -> usize {
        self.insert(ListKind::Used, None)
    }

    /// Drops the entry at `idx` and hands back any idle connection it held.
    fn remove(&mut self, idx: usize) -> Option<C> {
        self.entries[idx].as_ref()?;
        self.unlink(idx);
        let entry = self.entries[idx].take()?;
        self.vacant.push(idx);
        entry.conn
    }

    /// Moves the free-list head to the used list.
    fn take_free(&mut self) -> Option<(usize, C, Instant)> {
        let idx = self.free.head?;
        self.unlink(idx);
        let entry = self.entries[idx].as_mut()?;
        let idle_since = entry.idle_since;
        let conn = entry.conn.take()?;
        self.link_front(ListKind::Used, idx);
        Some((idx, conn, idle_since))
    }

    /// Moves a returned connection to the free-list head.
    fn back(&mut self, idx: usize, conn: C) {
        self.unlink(idx);
        if let Some(entry) = self.entries[idx].as_mut() {
            entry.conn = Some(conn);
            entry.shutdown = None;
            entry.idle_since = Instant::now();
        }
        self.link_front(ListKind::Free, idx);
    }

    /// Removes the longest-idle connection.
    fn evict_oldest_idle(&mut self) -> Option<C> {
        let idx = self.free.tail?;
        self.remove(idx)
    }

    /// Records the shutdown handle of the connection lent from `idx`.
    fn track(&mut self, idx: usize, handle: TcpStream) {
        if let Some(entry) = self.entries[idx].as_mut() {
            entry.shutdown = Some(handle);
        }
    }

    /// Takes the shutdown handles of every lent connection.
    fn take_lent(&mut self) -> Vec<TcpStream> {
        let mut handles = Vec::with_capacity(self.used.len);
        let mut cursor = self.used.head;
        while let Some(idx) = cursor {
            let Some(entry) = self.entries[idx].as_mut() else {
                break;
            };
            handles.extend(entry.shutdown.take());
            cursor = entry.next;
        }
        handles
    }

    fn drain_free(&mut self) -> Vec<C> {
        let mut drained = Vec::with_capacity(self.free.len);
        while let Some(idx) = self.free.head {
            if let Some(conn) = self.remove(idx) {
                drained.push(conn);
            }
        }
        drained
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
    pub used: usize,
}

/// Bounded connection pool for one node.
pub struct Pool {
    addr: String,
    options: Options,
    state: Mutex<PoolState>,
    available: Condvar,
}

enum Acquired {
    Idle {
        idx: usize,
        conn: Connection,
        idle_since: Instant,
    },
    Fresh(usize),
}

impl Pool {
    /// Creates a pool for `addr` and opens `init_conns` connections.
    ///
    /// Any dial failure closes the connections opened so far and fails.
    pub fn new(addr: impl Into<String>, options: Options) -> ClientResult<Self> {
        let addr = addr.into();
        let options = options.normalize();

        let mut opened = Vec::with_capacity(options.init_conns);
        for _ in 0..options.init_conns {
            match Connection::dial(&addr, &options) {
                Ok(conn) => opened.push(conn),
                Err(err) => {
                    warn!(addr = %addr, error = %err, "pool initialization failed");
                    opened.into_iter().for_each(Connection::close);
                    return Err(err);
                }
            }
        }

        let mut state = PoolState::new();
        for conn in opened {
            state.insert(ListKind::Free, Some(conn));
        }
        debug!(addr = %addr, conns = state.total(), "pool created");

        Ok(Pool {
            addr,
            options,
            state: Mutex::new(state),
            available: Condvar::new(),
        })
    }

    /// Node address served by this pool.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Borrows a connection, waiting at most `options.wait_timeout`.
    pub fn get(&self) -> ClientResult<PooledConn<'_>> {
        let deadline = self.options.wait_timeout.map(|t| Instant::now() + t);
        self.get_with_deadline(deadline)
    }

    /// Borrows a connection, waiting until `deadline` when at capacity.
    ///
    /// `None` waits until a connection is returned or the pool closes.
    pub fn get_with_deadline(&self, deadline: Option<Instant>) -> ClientResult<PooledConn<'_>> {
        loop {
            match self.acquire(deadline)? {
                Acquired::Idle {
                    idx,
                    conn,
                    idle_since,
                } => {
                    let mut pooled = self.lend(idx, conn)?;
                    if self.needs_probe(idle_since) {
                        if let Err(err) = pooled.conn_mut().exec(&[b"PING"]) {
                            warn!(addr = %self.addr, error = %err, "idle connection failed probe");
                            pooled.put(Some(&err));
                            continue;
                        }
                    }
                    return Ok(pooled);
                }
                Acquired::Fresh(idx) => {
                    return match Connection::dial(&self.addr, &self.options) {
                        Ok(conn) => self.lend(idx, conn),
                        Err(err) => {
                            {
                                let mut state = self.state.lock();
                                state.remove(idx);
                                self.available.notify_one();
                            }
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    fn acquire(&self, deadline: Option<Instant>) -> ClientResult<Acquired> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(ClientError::PoolClosed);
            }
            if state.free.len > 0 || !self.at_capacity(&state) {
                break;
            }
            if self.options.error_on_exhaustion {
                return Err(ClientError::PoolExhausted);
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(ClientError::PoolTimeout);
                    }
                    self.available.wait_until(&mut state, deadline);
                }
                None => self.available.wait(&mut state),
            }
        }

        if let Some((idx, conn, idle_since)) = state.take_free() {
            return Ok(Acquired::Idle {
                idx,
                conn,
                idle_since,
            });
        }
        Ok(Acquired::Fresh(state.reserve()))
    }

    /// Hands `conn` to a borrower, keeping a handle `close` can shut down.
    fn lend(&self, idx: usize, conn: Connection) -> ClientResult<PooledConn<'_>> {
        let handle = match conn.shutdown_handle() {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(addr = %self.addr, error = %err, "cannot track lent connection");
                None
            }
        };
        {
            let mut state = self.state.lock();
            if !state.closed {
                if let Some(handle) = handle {
                    state.track(idx, handle);
                }
                return Ok(PooledConn::new(self, idx, conn));
            }
        }
        self.release(idx, conn, false);
        Err(ClientError::PoolClosed)
    }

    fn at_capacity(&self, state: &PoolState) -> bool {
        self.options.max_conns > 0 && state.total() >= self.options.max_conns
    }

    fn needs_probe(&self, idle_since: Instant) -> bool {
        let threshold = self.options.test_idle_timeout;
        threshold > Duration::ZERO && idle_since.elapsed() >= threshold
    }

    /// Returns a borrowed connection; `keep == false` destroys it.
    fn release(&self, idx: usize, conn: Connection, keep: bool) {
        let mut doomed = Vec::new();
        {
            let mut state = self.state.lock();
            let mut evicted = 0;
            if keep && !state.closed {
                state.back(idx, conn);
                let max_idles = self.options.max_idles;
                while max_idles > 0 && state.free.len > max_idles {
                    match state.evict_oldest_idle() {
                        Some(oldest) => {
                            doomed.push(oldest);
                            evicted += 1;
                        }
                        None => break,
                    }
                }
            } else {
                state.remove(idx);
                doomed.push(conn);
            }
            // Evictions free capacity too, so each one wakes another waiter.
            for _ in 0..=evicted {
                self.available.notify_one();
            }
        }

        for conn in doomed {
            debug!(addr = %self.addr, "discarding connection");
            conn.close();
        }
    }

    /// Drops the bookkeeping of a borrow that ended without being returned.
    fn forget(&self, idx: usize) {
        let mut state = self.state.lock();
        state.remove(idx);
        self.available.notify_one();
    }

    /// Marks the pool closed and closes every connection.
    ///
    /// Idle connections are closed right away. Lent ones have their socket
    /// shut down, so a borrower blocked on a read fails with an I/O error and
    /// the entry goes away when the borrow ends.
    pub fn close(&self) {
        let (drained, lent) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.available.notify_all();
            (state.drain_free(), state.take_lent())
        };
        debug!(
            addr = %self.addr,
            idle = drained.len(),
            lent = lent.len(),
            "pool closed"
        );
        drained.into_iter().for_each(Connection::close);
        for handle in lent {
            let _ = handle.shutdown(Shutdown::Both);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            total: state.total(),
            free: state.free.len,
            used: state.used.len,
        }
    }

    /// Issues a keyless `PING`.
    pub fn ping(&self) -> ClientResult<()> {
        self.with_conn(|conn| conn.exec(&[b"PING"]).map(|_| ()))
    }

    /// Borrows a connection for `op` and returns it with the outcome.
    fn with_conn<T>(&self, op: impl FnOnce(&mut Connection) -> ClientResult<T>) -> ClientResult<T> {
        let mut pooled = self.get()?;
        let result = op(pooled.conn_mut());
        pooled.put(result.as_ref().err());
        result
    }

    // Routed operations below take keys with the suffix already applied, so
    // the cluster router can share them.

    pub(crate) fn exec_fixed(&self, cmd: &str, key: &[u8], args: &[&[u8]]) -> ClientResult<RespValue> {
        let parts = command_parts(cmd, key, args);
        self.with_conn(|conn| conn.exec(&parts))
    }

    pub(crate) fn pipeline_pinned(
        &self,
        slot: Option<u16>,
        batch: &mut BatchFn<'_>,
    ) -> ClientResult<Vec<RespValue>> {
        let mut pooled = self.get()?;
        let run = run_pipeline(pooled.conn_mut(), &self.options, slot, batch);
        pooled.finish(run)
    }

    pub(crate) fn transaction_pinned(
        &self,
        slot: Option<u16>,
        batch: &mut BatchFn<'_>,
    ) -> ClientResult<Vec<RespValue>> {
        let mut pooled = self.get()?;
        let run = run_transaction(pooled.conn_mut(), &self.options, slot, batch);
        pooled.finish(run)
    }

    pub(crate) fn publish_fixed(&self, channel: &[u8], message: &[u8]) -> ClientResult<i64> {
        self.with_conn(|conn| conn.exec(&[b"PUBLISH", channel, message])?.as_i64())
    }

    pub(crate) fn subscribe_fixed(
        &self,
        channel: &[u8],
        on_data: &mut DataFn<'_>,
        on_meta: &mut MetaFn<'_>,
    ) -> ClientResult<()> {
        let mut pooled = self.get()?;
        let result = run_subscription(pooled.conn_mut(), channel, on_data, on_meta);
        // Subscribed connections never serve ordinary commands again.
        pooled.discard();
        result
    }

    pub(crate) fn eval_fixed(
        &self,
        script: &Script,
        keys: &[&[u8]],
        args: &[&[u8]],
    ) -> ClientResult<RespValue> {
        self.with_conn(|conn| eval_on(conn, script, keys, args))
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("addr", &self.addr)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

/// Applies the key suffix to every key of a multi-key call.
pub(crate) fn fix_keys<'k>(options: &Options, keys: &[&'k [u8]]) -> Vec<Cow<'k, [u8]>> {
    keys.iter().map(|&key| options.fix_key(key)).collect()
}

impl Client for Pool {
    fn exec(&self, cmd: &str, key: &[u8], args: &[&[u8]]) -> ClientResult<RespValue> {
        let key = self.options.fix_key(key);
        self.exec_fixed(cmd, &key, args)
    }

    fn pipeline(&self, _key: &[u8], batch: &mut BatchFn<'_>) -> ClientResult<Vec<RespValue>> {
        self.pipeline_pinned(None, batch)
    }

    fn transaction(&self, _key: &[u8], batch: &mut BatchFn<'_>) -> ClientResult<Vec<RespValue>> {
        self.transaction_pinned(None, batch)
    }

    fn publish(&self, channel: &[u8], message: &[u8]) -> ClientResult<i64> {
        let channel = self.options.fix_key(channel);
        self.publish_fixed(&channel, message)
    }

    fn subscribe(
        &self,
        channel: &[u8],
        on_data: &mut DataFn<'_>,
        on_meta: &mut MetaFn<'_>,
    ) -> ClientResult<()> {
        let channel = self.options.fix_key(channel);
        self.subscribe_fixed(&channel, on_data, on_meta)
    }

    fn eval(&self, script: &Script, keys: &[&[u8]], args: &[&[u8]]) -> ClientResult<RespValue> {
        let fixed = fix_keys(&self.options, keys);
        let keys: Vec<&[u8]> = fixed.iter().map(|key| key.as_ref()).collect();
        self.eval_fixed(script, &keys, args)
    }

    fn close(&self) {
        Pool::close(self);
    }
}

/// A connection borrowed from a [`Pool`].
pub struct PooledConn<'a> {
    conn: Connection,
    lease: Lease<'a>,
}

/// Ties a borrow to its pool entry; an unsettled lease discards the entry.
struct Lease<'a> {
    pool: &'a Pool,
    idx: usize,
    settled: bool,
}

impl Lease<'_> {
    fn settle(mut self, conn: Connection, keep: bool) {
        self.settled = true;
        self.pool.release(self.idx, conn, keep);
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(addr = %self.pool.addr, "borrowed connection dropped without put");
            self.pool.forget(self.idx);
        }
    }
}

impl<'a> PooledConn<'a> {
    fn new(pool: &'a Pool, idx: usize, conn: Connection) -> Self {
        PooledConn {
            conn,
            lease: Lease {
                pool,
                idx,
                settled: false,
            },
        }
    }

    /// Mutable access to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Returns the connection to its pool.
    ///
    /// `None` and `ClientError::Nil` keep it; any other error destroys it.
    pub fn put(self, err: Option<&ClientError>) {
        let keep = err.map_or(true, ClientError::is_nil);
        self.release(keep);
    }

    /// Destroys the connection.
    pub fn discard(self) {
        self.release(false);
    }

    fn finish(self, run: BatchRun) -> ClientResult<Vec<RespValue>> {
        self.release(run.reusable);
        run.result
    }

    fn release(self, keep: bool) {
        let PooledConn { conn, lease } = self;
        lease.settle(conn, keep);
    }
}

impl std::fmt::Debug for PooledConn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("addr", &self.lease.pool.addr)
            .field("idx", &self.lease.idx)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(state: &PoolState<u32>, kind: ListKind) -> Vec<usize> {
        let links = match kind {
            ListKind::Free => state.free,
            ListKind::Used => state.used,
        };
        let mut out = Vec::new();
        let mut cursor = links.head;
        while let Some(idx) = cursor {
            let entry = state.entries[idx].as_ref().unwrap();
            assert_eq!(entry.list, kind);
            out.push(idx);
            cursor = entry.next;
        }
        assert_eq!(out.len(), links.len);
        assert_eq!(links.tail, out.last().copied());
        out
    }

    #[test]
    fn reuse_is_lifo() {
        let mut state = PoolState::new();
        let a = state.insert(ListKind::Free, Some(1u32));
        let b = state.insert(ListKind::Free, Some(2u32));
        assert_eq!(collect(&state, ListKind::Free), vec![b, a]);

        let (idx, conn, _) = state.take_free().unwrap();
        assert_eq!((idx, conn), (b, 2));
        assert_eq!(collect(&state, ListKind::Used), vec![b]);

        state.back(idx, conn);
        let (idx, _, _) = state.take_free().unwrap();
        assert_eq!(idx, b);
    }

    #[test]
    fn lists_partition_entries() {
        let mut state = PoolState::new();
        for n in 0..4u32 {
            state.insert(ListKind::Free, Some(n));
        }
        let (first, _, _) = state.take_free().unwrap();
        let fresh = state.reserve();
        assert_eq!(state.total(), 5);
        assert_eq!(state.free.len + state.used.len, state.total());
        assert_eq!(collect(&state, ListKind::Used), vec![fresh, first]);
        assert_eq!(collect(&state, ListKind::Free).len(), 3);

        assert!(state.remove(fresh).is_none());
        assert_eq!(collect(&state, ListKind::Used), vec![first]);
        assert_eq!(state.total(), 4);
    }

    #[test]
    fn eviction_takes_the_tail() {
        let mut state = PoolState::new();
        let oldest = state.insert(ListKind::Free, Some(10u32));
        state.insert(ListKind::Free, Some(20u32));
        state.insert(ListKind::Free, Some(30u32));
        assert_eq!(state.evict_oldest_idle(), Some(10));
        assert!(state.entries[oldest].is_none());
        assert_eq!(state.free.len, 2);
    }

    #[test]
    fn vacant_slots_are_recycled() {
        let mut state = PoolState::new();
        let a = state.insert(ListKind::Free, Some(1u32));
        state.remove(a);
        let b = state.insert(ListKind::Free, Some(2u32));
        assert_eq!(a, b);
        assert_eq!(state.entries.len(), 1);
    }

    #[test]
    fn lent_handles_are_taken_once() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let mut state = PoolState::new();
        state.insert(ListKind::Free, Some(1u32));
        let (lent, _, _) = state.take_free().unwrap();
        state.reserve();
        state.track(lent, stream);

        assert_eq!(state.take_lent().len(), 1);
        assert!(state.take_lent().is_empty());
        assert_eq!(state.used.len, 2);
    }

    #[test]
    fn returned_entries_drop_their_handle() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        let mut state = PoolState::new();
        state.insert(ListKind::Free, Some(1u32));
        let (idx, conn, _) = state.take_free().unwrap();
        state.track(idx, stream);
        state.back(idx, conn);
        assert!(state.entries[idx].as_ref().unwrap().shutdown.is_none());
        assert!(state.take_lent().is_empty());
    }

    #[test]
    fn drain_empties_free_list_only() {
        let mut state = PoolState::new();
        state.insert(ListKind::Free, Some(1u32));
        state.insert(ListKind::Free, Some(2u32));
        state.reserve();
        let mut drained = state.drain_free();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(state.free.len, 0);
        assert_eq!(state.used.len, 1);
    }
}
