//! # Key Slots
//!
//! Purpose: Map keys onto the 16384 cluster slots with CRC16-XMODEM, hashing
//! only the `{tag}` part of a key when one is present.
//!
//! ## Design Principles
//! 1. **Pure Function**: `slot` depends on the key bytes alone.
//! 2. **Table Driven**: The 256-entry CRC table is built at compile time.

/// Number of slots in a cluster.
pub const SLOT_COUNT: usize = 16384;

// Polynomial 0x1021, initial value 0.
const CRC16_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC16-XMODEM of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        (crc << 8) ^ CRC16_TABLE[(((crc >> 8) ^ byte as u16) & 0xff) as usize]
    })
}

/// Slot owning `key`, in `0..SLOT_COUNT`.
///
/// Only the bytes inside a non-empty `{...}` tag are hashed. An empty `{}`
/// does not count as a tag, so `a{}b` hashes all of its bytes, matching how
/// cluster servers place such keys.
pub fn slot(key: &[u8]) -> u16 {
    (crc16(hash_tag(key).unwrap_or(key)) as usize % SLOT_COUNT) as u16
}

/// Bytes between the first `{` and the first `}` after it.
///
/// An unterminated or empty tag yields `None`, and the whole key is hashed.
pub fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let rest = &key[open + 1..];
    let close = rest.iter().position(|&b| b == b'}')?;
    if close == 0 {
        return None;
    }
    Some(&rest[..close])
}
