//! # Distributed Mutex
//!
//! Purpose: Cooperative mutual exclusion across processes, using one store
//! entry per lock key as the arbiter.
//!
//! ## Design Principles
//! 1. **Token Fencing**: Ownership is proven by the stored value, so only the
//!    holder's token can release or extend the entry.
//! 2. **Atomic Check-and-Act**: Release and extend run as server-side scripts.
//! 3. **Expected Contention**: Running out of tries is `LockFailed`, distinct
//!    from transport failures.

use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::debug;

use crate::client::Client;
use crate::error::{ClientError, ClientResult, Lossy};
use crate::script::Script;

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
pub const UNLOCK_SCRIPT: &str = r#"if redis.call("GET", KEYS[1]) == ARGV[1] then return redis.call("DEL", KEYS[1]) else return 0 end"#;

/// Resets the expiry of `KEYS[1]` to `ARGV[2]` seconds while it holds `ARGV[1]`.
pub const EXTEND_SCRIPT: &str = r#"if redis.call("GET", KEYS[1]) == ARGV[1] then return redis.call("EXPIRE", KEYS[1], tonumber(ARGV[2])) else return 0 end"#;

fn unlock_script() -> &'static Script {
    static SCRIPT: OnceLock<Script> = OnceLock::new();
    SCRIPT.get_or_init(|| Script::new(UNLOCK_SCRIPT))
}

fn extend_script() -> &'static Script {
    static SCRIPT: OnceLock<Script> = OnceLock::new();
    SCRIPT.get_or_init(|| Script::new(EXTEND_SCRIPT))
}

/// Lock tuning. Deserializes with humantime durations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// How long the entry lives unless extended.
    #[serde(with = "humantime_serde")]
    pub expiry: Duration,
    /// Acquisition attempts before giving up.
    pub tries: usize,
    /// Sleep between failed attempts.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// Registry name of the client to lock through; `None` is the default.
    pub client: Option<String>,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            expiry: Duration::from_secs(8),
            tries: 32,
            delay: Duration::from_millis(500),
            client: None,
        }
    }
}

/// A distributed lock bound to one key and one client.
pub struct Mutex {
    key: Vec<u8>,
    expiry: Duration,
    tries: usize,
    delay: Duration,
    token: String,
    client: Arc<dyn Client>,
}

impl Mutex {
    /// Creates a lock with a fresh token. Nothing is sent yet.
    pub fn new(key: impl Into<Vec<u8>>, client: Arc<dyn Client>, options: &LockOptions) -> Self {
        Mutex {
            key: key.into(),
            expiry: options.expiry,
            tries: options.tries,
            delay: options.delay,
            token: new_token(),
            client,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Value stored in the lock entry while held.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Tries `SET key token EX secs NX` up to `tries` times.
    pub fn lock(&self) -> ClientResult<()> {
        let secs = self.expiry_secs();
        for attempt in 1..=self.tries {
            let reply = self.client.exec(
                "SET",
                &self.key,
                &[self.token.as_bytes(), b"EX", secs.as_bytes(), b"NX"],
            )?;
            if !reply.is_nil() {
                debug!(key = %Lossy(&self.key), attempt, "lock acquired");
                return Ok(());
            }
            if attempt < self.tries {
                thread::sleep(self.delay);
            }
        }
        debug!(key = %Lossy(&self.key), tries = self.tries, "lock busy");
        Err(ClientError::LockFailed)
    }

    /// Deletes the entry if this lock still owns it.
    pub fn unlock(&self) -> ClientResult<bool> {
        let reply = self
            .client
            .eval(unlock_script(), &[self.key.as_slice()], &[self.token.as_bytes()])?;
        Ok(reply.as_i64()? > 0)
    }

    /// Resets the entry's expiry if this lock still owns it.
    pub fn extend(&self) -> ClientResult<bool> {
        let secs = self.expiry_secs();
        let reply = self.client.eval(
            extend_script(),
            &[self.key.as_slice()],
            &[self.token.as_bytes(), secs.as_bytes()],
        )?;
        Ok(reply.as_i64()? > 0)
    }

    // EX rejects zero, so sub-second expiries round up to one second.
    fn expiry_secs(&self) -> String {
        self.expiry.as_secs().max(1).to_string()
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("key", &String::from_utf8_lossy(&self.key))
            .field("token", &self.token)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// `<unix nanos base16>-<random u64 base16>`.
fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("{:x}-{:x}", nanos, rand::random::<u64>())
}
