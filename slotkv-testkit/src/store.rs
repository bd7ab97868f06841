//! # In-Memory Store
//!
//! Purpose: Sixteen numbered keyspaces of byte strings with optional expiry,
//! enough to answer the string commands the driver's tests issue.
//!
//! ## Design Principles
//! 1. **Lazy Expiry**: Expired entries are dropped when touched.
//! 2. **Caller Locks**: The node wraps the store in one mutex, so `MULTI`
//!    blocks and script handlers run atomically.

use std::time::{Duration, Instant};

use hashbrown::HashMap;

/// Number of selectable databases.
pub const DATABASES: usize = 16;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}

/// Remaining lifetime of a key, as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    ExpiresIn(Duration),
}

#[derive(Debug)]
pub struct Store {
    dbs: Vec<HashMap<Vec<u8>, Entry>>,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            dbs: (0..DATABASES).map(|_| HashMap::new()).collect(),
        }
    }

    fn live(&mut self, db: usize, key: &[u8]) -> Option<&mut Entry> {
        let now = Instant::now();
        let map = &mut self.dbs[db];
        if map.get(key).map_or(false, |entry| entry.is_expired(now)) {
            map.remove(key);
            return None;
        }
        map.get_mut(key)
    }

    pub fn get(&mut self, db: usize, key: &[u8]) -> Option<Vec<u8>> {
        self.live(db, key).map(|entry| entry.value.clone())
    }

    pub fn contains(&mut self, db: usize, key: &[u8]) -> bool {
        self.live(db, key).is_some()
    }

    /// Stores `value`, replacing any previous entry and its expiry.
    pub fn set(&mut self, db: usize, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) {
        self.dbs[db].insert(
            key.to_vec(),
            Entry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    pub fn remove(&mut self, db: usize, key: &[u8]) -> bool {
        let existed = self.contains(db, key);
        self.dbs[db].remove(key);
        existed
    }

    /// Sets a new expiry; false when the key does not exist.
    pub fn expire(&mut self, db: usize, key: &[u8], ttl: Duration) -> bool {
        match self.live(db, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }
    }

    pub fn ttl(&mut self, db: usize, key: &[u8]) -> Ttl {
        match self.live(db, key) {
            None => Ttl::Missing,
            Some(entry) => match entry.expires_at {
                None => Ttl::Persistent,
                Some(deadline) => Ttl::ExpiresIn(deadline.saturating_duration_since(Instant::now())),
            },
        }
    }

    /// Adds `delta` to an integer value, creating it at zero.
    pub fn incr_by(&mut self, db: usize, key: &[u8], delta: i64) -> Result<i64, &'static str> {
        let current = match self.live(db, key) {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or("value is not an integer or out of range")?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or("increment or decrement would overflow")?;
        match self.live(db, key) {
            Some(entry) => entry.value = next.to_string().into_bytes(),
            None => self.set(db, key, next.to_string().into_bytes(), None),
        }
        Ok(next)
    }

    pub fn len(&mut self, db: usize) -> usize {
        let now = Instant::now();
        self.dbs[db].retain(|_, entry| !entry.is_expired(now));
        self.dbs[db].len()
    }

    pub fn is_empty(&mut self, db: usize) -> bool {
        self.len(db) == 0
    }

    pub fn flush(&mut self, db: usize) {
        self.dbs[db].clear();
    }
}
