//! # Cluster Layout
//!
//! Purpose: A slot table shared by every node of a test cluster. Nodes answer
//! `CLUSTER SLOTS` from it and reply `MOVED` for slots they do not own.

use std::sync::Arc;

use parking_lot::RwLock;

/// Number of cluster slots.
pub const SLOTS: u16 = 16384;

/// One contiguous slot range and the node address serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub start: u16,
    pub end: u16,
    pub addr: String,
}

/// Shared, mutable slot table.
#[derive(Debug, Clone, Default)]
pub struct Layout {
    ranges: Arc<RwLock<Vec<Assignment>>>,
}

impl Layout {
    pub fn new() -> Self {
        Layout::default()
    }

    /// Replaces the whole table.
    pub fn set(&self, ranges: Vec<Assignment>) {
        *self.ranges.write() = ranges;
    }

    pub fn snapshot(&self) -> Vec<Assignment> {
        self.ranges.read().clone()
    }

    /// Address owning `slot`, if any.
    pub fn owner(&self, slot: u16) -> Option<String> {
        self.ranges
            .read()
            .iter()
            .find(|range| range.start <= slot && slot <= range.end)
            .map(|range| range.addr.clone())
    }
}

/// Splits the slot space into `nodes` near-equal ranges.
pub fn even_split(addrs: &[String]) -> Vec<Assignment> {
    let nodes = addrs.len() as u32;
    let start_of = |i: u32| ((i * SLOTS as u32 + nodes / 2) / nodes) as u16;
    addrs
        .iter()
        .enumerate()
        .map(|(i, addr)| {
            let i = i as u32;
            let end = if i + 1 == nodes {
                SLOTS - 1
            } else {
                start_of(i + 1) - 1
            };
            Assignment {
                start: start_of(i),
                end,
                addr: addr.clone(),
            }
        })
        .collect()
}

/// Slot of `key`: CRC16-XMODEM over the `{tag}` when present, mod 16384.
pub fn key_slot(key: &[u8]) -> u16 {
    let hashed = match key.iter().position(|b| *b == b'{') {
        Some(open) => match key[open + 1..].iter().position(|b| *b == b'}') {
            Some(0) | None => key,
            Some(len) => &key[open + 1..open + 1 + len],
        },
        None => key,
    };
    crc16(hashed) % SLOTS
}

fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_way_split_matches_cluster_create() {
        let addrs: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let ranges = even_split(&addrs);
        let bounds: Vec<(u16, u16)> = ranges.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(bounds, vec![(0, 5460), (5461, 10922), (10923, 16383)]);
    }

    #[test]
    fn owner_lookup() {
        let layout = Layout::new();
        layout.set(even_split(&["a".to_string(), "b".to_string()]));
        assert_eq!(layout.owner(0).as_deref(), Some("a"));
        assert_eq!(layout.owner(16383).as_deref(), Some("b"));
    }

    #[test]
    fn key_slots() {
        assert_eq!(key_slot(b"foo"), 12182);
        assert_eq!(key_slot(b"{foo}.bar"), 12182);
        assert_eq!(key_slot(b"123456789"), 12739);
    }
}
