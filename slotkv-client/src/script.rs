//! # Server-Side Scripts
//!
//! Purpose: Hold a Lua script with its SHA1 digest so evaluation can try the
//! cached `EVALSHA` first and ship the source only when the server lacks it.

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::conn::Connection;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

/// A Lua script and its hex SHA1 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    source: String,
    hash: String,
}

impl Script {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let hash = sha1_hex(source.as_bytes());
        Script { source, hash }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Lowercase hex SHA1 of the source, as `SCRIPT LOAD` reports it.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Computes the lowercase hex SHA1 digest of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Runs `script` on `conn` via `EVALSHA`, falling back to `EVAL` on `NOSCRIPT`.
pub(crate) fn eval_on(
    conn: &mut Connection,
    script: &Script,
    keys: &[&[u8]],
    args: &[&[u8]],
) -> ClientResult<RespValue> {
    let numkeys = keys.len().to_string();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(3 + keys.len() + args.len());
    parts.push(b"EVALSHA");
    parts.push(script.hash.as_bytes());
    parts.push(numkeys.as_bytes());
    parts.extend_from_slice(keys);
    parts.extend_from_slice(args);

    match conn.exec(&parts) {
        Err(err) if err.code() == Some(&b"NOSCRIPT"[..]) => {
            debug!(sha = %script.hash, "script not cached, sending source");
            parts[0] = b"EVAL";
            parts[1] = script.source.as_bytes();
            conn.exec(&parts)
        }
        other => other,
    }
}

/// Rejects scripts a cluster cannot route to one node.
pub(crate) fn ensure_single_key(keys: &[&[u8]]) -> ClientResult<()> {
    if keys.len() != 1 {
        return Err(ClientError::UnsupportedKeyCount(keys.len()));
    }
    Ok(())
}
