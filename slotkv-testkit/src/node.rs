//! # Test Node
//!
//! Purpose: Accept RESP2 connections on an ephemeral port and answer the
//! commands the driver uses, with hooks for the failure modes its tests need
//! (forced disconnects, redirections, missing scripts).
//!
//! ## Design Principles
//! 1. **Own Runtime**: Each node runs on its own tokio runtime, so blocking
//!    test code can drive it from plain threads.
//! 2. **One Store Lock**: Commands, `EXEC` blocks and scripts run under the
//!    store mutex, which makes them atomic with respect to each other.
//! 3. **Observable**: Per-command counters and connection gauges let tests
//!    assert routing and pool behavior from the server side.

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::layout::{key_slot, Layout};
use crate::protocol::{parse_command, Reply};
use crate::scripts::{script_sha, ScriptHandler};
use crate::store::{Store, Ttl, DATABASES};

const CHANNEL_CAPACITY: usize = 256;

/// Commands whose first argument is a key.
const KEYED: &[&str] = &[
    "GET", "SET", "DEL", "EXISTS", "EXPIRE", "TTL", "INCR", "INCRBY", "DECR",
];

const KNOWN: &[&str] = &[
    "PING", "ECHO", "AUTH", "SELECT", "MULTI", "EXEC", "DISCARD", "SUBSCRIBE", "PUBLISH",
    "CLUSTER", "EVAL", "EVALSHA", "SCRIPT", "DBSIZE", "FLUSHDB", "GET", "SET", "DEL", "EXISTS",
    "EXPIRE", "TTL", "INCR", "INCRBY", "DECR",
];

/// Startup options for a [`TestNode`].
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Require `AUTH <password>` before any other command.
    pub password: Option<String>,
    /// Serve `CLUSTER SLOTS` from this table and redirect foreign keys.
    pub layout: Option<Layout>,
}

struct Shared {
    addr: String,
    config: NodeConfig,
    store: Mutex<Store>,
    scripts: Mutex<HashMap<String, ScriptHandler>>,
    // Digests the node has seen through EVAL or SCRIPT LOAD.
    loaded: Mutex<HashSet<String>>,
    channels: Mutex<HashMap<Vec<u8>, broadcast::Sender<Vec<u8>>>>,
    commands: Mutex<HashMap<String, u64>>,
    accepted: AtomicU64,
    active: AtomicUsize,
    kill: watch::Sender<u64>,
}

impl Shared {
    fn count(&self, name: &str) {
        *self.commands.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        self.channels
            .lock()
            .get(channel)
            .and_then(|sender| sender.send(message.to_vec()).ok())
            .unwrap_or(0)
    }

    fn subscribe(&self, channel: &[u8]) -> broadcast::Receiver<Vec<u8>> {
        self.channels
            .lock()
            .entry(channel.to_vec())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// `MOVED` when the command's key belongs to another node.
    fn redirect(&self, name: &str, args: &[Vec<u8>]) -> Option<Reply> {
        let layout = self.config.layout.as_ref()?;
        let key = routing_key(name, args)?;
        let slot = key_slot(key);
        match layout.owner(slot) {
            Some(owner) if owner == self.addr => None,
            Some(owner) => Some(Reply::Error(format!("MOVED {} {}", slot, owner))),
            None => Some(Reply::Error("CLUSTERDOWN Hash slot not served".to_string())),
        }
    }

    fn cluster_slots(&self) -> Reply {
        let Some(layout) = self.config.layout.as_ref() else {
            return Reply::err("This instance has cluster support disabled");
        };
        let entries = layout
            .snapshot()
            .into_iter()
            .map(|range| {
                let (host, port) = range.addr.rsplit_once(':').unwrap_or((range.addr.as_str(), "0"));
                Reply::Array(vec![
                    Reply::Integer(range.start as i64),
                    Reply::Integer(range.end as i64),
                    Reply::Array(vec![
                        Reply::bulk(host),
                        Reply::Integer(port.parse().unwrap_or(0)),
                        Reply::bulk(script_sha(range.addr.as_bytes())),
                    ]),
                ])
            })
            .collect();
        Reply::Array(entries)
    }

    fn eval(&self, store: &mut Store, db: usize, args: &[Vec<u8>], by_digest: bool) -> Reply {
        if args.len() < 3 {
            return wrong_arity(if by_digest { "EVALSHA" } else { "EVAL" });
        }
        let Some(numkeys) = parse_int::<usize>(&args[2]) else {
            return Reply::err("value is not an integer or out of range");
        };
        if 3 + numkeys > args.len() {
            return Reply::err("Number of keys can't be greater than number of args");
        }
        let digest = if by_digest {
            String::from_utf8_lossy(&args[1]).to_ascii_lowercase()
        } else {
            script_sha(&args[1])
        };

        if by_digest && !self.loaded.lock().contains(&digest) {
            return Reply::Error("NOSCRIPT No matching script. Please use EVAL.".to_string());
        }
        let Some(handler) = self.scripts.lock().get(&digest).cloned() else {
            return Reply::err("script is not registered with this test node");
        };
        self.loaded.lock().insert(digest);
        handler(store, db, &args[3..3 + numkeys], &args[3 + numkeys..])
    }
}

fn routing_key<'a>(name: &str, args: &'a [Vec<u8>]) -> Option<&'a [u8]> {
    if KEYED.contains(&name) {
        return args.get(1).map(Vec::as_slice);
    }
    if name == "EVAL" || name == "EVALSHA" {
        let numkeys = parse_int::<usize>(args.get(2)?)?;
        if numkeys > 0 {
            return args.get(3).map(Vec::as_slice);
        }
    }
    None
}

/// Handle to a running node. Dropping it stops the node.
pub struct TestNode {
    shared: Arc<Shared>,
    runtime: Option<Runtime>,
}

impl TestNode {
    /// Starts a plain node without password or cluster layout.
    pub fn start() -> anyhow::Result<Self> {
        Self::start_with(NodeConfig::default())
    }

    pub fn start_with(config: NodeConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("failed to build node runtime")?;

        let std_listener = StdTcpListener::bind("127.0.0.1:0").context("failed to bind node")?;
        std_listener.set_nonblocking(true)?;
        let addr = std_listener.local_addr()?.to_string();

        let (kill, _) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            addr: addr.clone(),
            config,
            store: Mutex::new(Store::new()),
            scripts: Mutex::new(HashMap::new()),
            loaded: Mutex::new(HashSet::new()),
            channels: Mutex::new(HashMap::new()),
            commands: Mutex::new(HashMap::new()),
            accepted: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            kill,
        });

        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener).context("failed to register listener")?
        };
        runtime.spawn(accept_loop(listener, Arc::clone(&shared)));
        debug!(addr = %addr, "test node started");

        Ok(TestNode {
            shared,
            runtime: Some(runtime),
        })
    }

    /// `host:port` the node listens on.
    pub fn addr(&self) -> String {
        self.shared.addr.clone()
    }

    /// Registers a handler that `EVAL`/`EVALSHA` run for `source`.
    ///
    /// The digest is only known to `EVALSHA` after a first `EVAL` or
    /// `SCRIPT LOAD`, as on a real server after restart.
    pub fn register_script<F>(&self, source: &str, handler: F)
    where
        F: Fn(&mut Store, usize, &[Vec<u8>], &[Vec<u8>]) -> Reply + Send + Sync + 'static,
    {
        self.shared
            .scripts
            .lock()
            .insert(script_sha(source.as_bytes()), Arc::new(handler));
    }

    /// Forgets every loaded script digest, like `SCRIPT FLUSH`.
    pub fn flush_scripts(&self) {
        self.shared.loaded.lock().clear();
    }

    /// Closes every open client connection.
    pub fn drop_connections(&self) {
        self.shared.kill.send_modify(|generation| *generation += 1);
    }

    /// How many times `name` (upper case) was received.
    pub fn command_count(&self, name: &str) -> u64 {
        self.shared.commands.lock().get(name).copied().unwrap_or(0)
    }

    /// Connections accepted since start.
    pub fn accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Publishes from the server side; returns the receiver count.
    pub fn publish(&self, channel: &[u8], message: &[u8]) -> usize {
        self.shared.publish(channel, message)
    }

    /// Runs `f` against the store under its lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        f(&mut *self.shared.store.lock())
    }

    /// Polls `condition` every few milliseconds until it holds or `timeout`
    /// passes. Returns whether it held.
    pub fn wait_until(&self, timeout: Duration, mut condition: impl FnMut(&TestNode) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                shared.accepted.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    shared.active.fetch_add(1, Ordering::SeqCst);
                    if let Err(err) = handle_connection(stream, Arc::clone(&shared)).await {
                        debug!(peer = %peer, error = %err, "connection ended with error");
                    }
                    shared.active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(err) => {
                debug!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

struct Transaction {
    queued: Vec<Vec<Vec<u8>>>,
    aborted: bool,
}

enum Outcome {
    Reply(Reply),
    Subscribe(Vec<u8>),
}

/// Per-connection state.
struct Session {
    db: usize,
    authed: bool,
    multi: Option<Transaction>,
}

impl Session {
    fn new(shared: &Shared) -> Self {
        Session {
            db: 0,
            authed: shared.config.password.is_none(),
            multi: None,
        }
    }

    fn execute(&mut self, shared: &Shared, args: Vec<Vec<u8>>) -> Outcome {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        shared.count(&name);

        if !self.authed && name != "AUTH" {
            return Outcome::Reply(Reply::Error("NOAUTH Authentication required.".to_string()));
        }

        if let Some(tx) = self.multi.as_mut() {
            if !matches!(name.as_str(), "EXEC" | "DISCARD" | "MULTI") {
                let rejected = if KNOWN.contains(&name.as_str()) {
                    shared.redirect(&name, &args)
                } else {
                    Some(unknown_command(&name))
                };
                if let Some(reply) = rejected {
                    tx.aborted = true;
                    return Outcome::Reply(reply);
                }
                tx.queued.push(args);
                return Outcome::Reply(Reply::Simple("QUEUED".to_string()));
            }
        }

        let reply = match name.as_str() {
            "AUTH" => self.auth(shared, &args),
            "SELECT" => self.select(shared, &args),
            "MULTI" => {
                if self.multi.is_some() {
                    Reply::err("MULTI calls can not be nested")
                } else {
                    self.multi = Some(Transaction {
                        queued: Vec::new(),
                        aborted: false,
                    });
                    Reply::ok()
                }
            }
            "EXEC" => match self.multi.take() {
                None => Reply::err("EXEC without MULTI"),
                Some(tx) if tx.aborted => Reply::Error(
                    "EXECABORT Transaction discarded because of previous errors.".to_string(),
                ),
                Some(tx) => {
                    let mut store = shared.store.lock();
                    Reply::Array(
                        tx.queued
                            .iter()
                            .map(|queued| self.command(shared, &mut store, queued))
                            .collect(),
                    )
                }
            },
            "DISCARD" => match self.multi.take() {
                None => Reply::err("DISCARD without MULTI"),
                Some(_) => Reply::ok(),
            },
            "SUBSCRIBE" => {
                if args.len() != 2 {
                    wrong_arity("SUBSCRIBE")
                } else {
                    return Outcome::Subscribe(args[1].clone());
                }
            }
            _ => match shared.redirect(&name, &args) {
                Some(moved) => moved,
                None => {
                    let mut store = shared.store.lock();
                    self.command(shared, &mut store, &args)
                }
            },
        };
        Outcome::Reply(reply)
    }

    fn auth(&mut self, shared: &Shared, args: &[Vec<u8>]) -> Reply {
        if args.len() != 2 {
            return wrong_arity("AUTH");
        }
        match shared.config.password.as_deref() {
            None => Reply::err("AUTH called without any password configured for the default user"),
            Some(password) if password.as_bytes() == args[1].as_slice() => {
                self.authed = true;
                Reply::ok()
            }
            Some(_) => Reply::Error("WRONGPASS invalid username-password pair".to_string()),
        }
    }

    fn select(&mut self, shared: &Shared, args: &[Vec<u8>]) -> Reply {
        if args.len() != 2 {
            return wrong_arity("SELECT");
        }
        if shared.config.layout.is_some() {
            return Reply::err("SELECT is not allowed in cluster mode");
        }
        match parse_int::<usize>(&args[1]) {
            Some(db) if db < DATABASES => {
                self.db = db;
                Reply::ok()
            }
            _ => Reply::err("DB index is out of range"),
        }
    }

    /// Commands that touch the store or node state but not the session.
    fn command(&self, shared: &Shared, store: &mut Store, args: &[Vec<u8>]) -> Reply {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let db = self.db;
        match (name.as_str(), args.len()) {
            ("PING", 1) => Reply::Simple("PONG".to_string()),
            ("PING", 2) | ("ECHO", 2) => Reply::bulk(args[1].clone()),
            ("GET", 2) => Reply::Bulk(store.get(db, &args[1])),
            ("SET", n) if n >= 3 => set(store, db, args),
            ("DEL", n) if n >= 2 => {
                Reply::Integer(args[1..].iter().filter(|key| store.remove(db, key)).count() as i64)
            }
            ("EXISTS", n) if n >= 2 => {
                Reply::Integer(args[1..].iter().filter(|key| store.contains(db, key)).count() as i64)
            }
            ("EXPIRE", 3) => match parse_int::<u64>(&args[2]) {
                Some(secs) => Reply::Integer(store.expire(db, &args[1], Duration::from_secs(secs)) as i64),
                None => Reply::err("value is not an integer or out of range"),
            },
            ("TTL", 2) => Reply::Integer(match store.ttl(db, &args[1]) {
                Ttl::Missing => -2,
                Ttl::Persistent => -1,
                Ttl::ExpiresIn(left) => left.as_secs() as i64,
            }),
            ("INCR", 2) => incr(store, db, &args[1], 1),
            ("DECR", 2) => incr(store, db, &args[1], -1),
            ("INCRBY", 3) => match parse_int::<i64>(&args[2]) {
                Some(delta) => incr(store, db, &args[1], delta),
                None => Reply::err("value is not an integer or out of range"),
            },
            ("DBSIZE", 1) => Reply::Integer(store.len(db) as i64),
            ("FLUSHDB", 1) => {
                store.flush(db);
                Reply::ok()
            }
            ("PUBLISH", 3) => Reply::Integer(shared.publish(&args[1], &args[2]) as i64),
            ("CLUSTER", 2) if args[1].eq_ignore_ascii_case(b"SLOTS") => shared.cluster_slots(),
            ("EVAL", _) => shared.eval(store, db, args, false),
            ("EVALSHA", _) => shared.eval(store, db, args, true),
            ("SCRIPT", n) if n >= 2 => script(shared, args),
            (known, _) if KNOWN.contains(&known) => wrong_arity(known),
            (unknown, _) => unknown_command(unknown),
        }
    }
}

fn set(store: &mut Store, db: usize, args: &[Vec<u8>]) -> Reply {
    let mut ttl = None;
    let mut only_missing = false;
    let mut only_present = false;
    let mut idx = 3;
    while idx < args.len() {
        let option = String::from_utf8_lossy(&args[idx]).to_ascii_uppercase();
        match option.as_str() {
            "NX" => only_missing = true,
            "XX" => only_present = true,
            "EX" | "PX" => {
                let Some(amount) = args.get(idx + 1).and_then(|arg| parse_int::<u64>(arg)) else {
                    return Reply::err("value is not an integer or out of range");
                };
                if amount == 0 {
                    return Reply::err("invalid expire time in 'set' command");
                }
                ttl = Some(if option == "EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
                idx += 1;
            }
            _ => return Reply::err("syntax error"),
        }
        idx += 1;
    }

    let exists = store.contains(db, &args[1]);
    if (only_missing && exists) || (only_present && !exists) {
        return Reply::nil();
    }
    store.set(db, &args[1], args[2].clone(), ttl);
    Reply::ok()
}

fn incr(store: &mut Store, db: usize, key: &[u8], delta: i64) -> Reply {
    match store.incr_by(db, key, delta) {
        Ok(value) => Reply::Integer(value),
        Err(message) => Reply::err(message),
    }
}

fn script(shared: &Shared, args: &[Vec<u8>]) -> Reply {
    let sub = String::from_utf8_lossy(&args[1]).to_ascii_uppercase();
    match (sub.as_str(), args.len()) {
        ("LOAD", 3) => {
            let digest = script_sha(&args[2]);
            if !shared.scripts.lock().contains_key(&digest) {
                return Reply::err("script is not registered with this test node");
            }
            shared.loaded.lock().insert(digest.clone());
            Reply::bulk(digest)
        }
        ("FLUSH", 2) => {
            shared.loaded.lock().clear();
            Reply::ok()
        }
        ("EXISTS", n) if n >= 3 => {
            let loaded = shared.loaded.lock();
            Reply::Array(
                args[2..]
                    .iter()
                    .map(|digest| {
                        let digest = String::from_utf8_lossy(digest).to_ascii_lowercase();
                        Reply::Integer(loaded.contains(&digest) as i64)
                    })
                    .collect(),
            )
        }
        _ => Reply::err("unknown SCRIPT subcommand"),
    }
}

fn wrong_arity(name: &str) -> Reply {
    Reply::err(format!(
        "wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn unknown_command(name: &str) -> Reply {
    Reply::err(format!("unknown command '{}'", name))
}

fn parse_int<T: std::str::FromStr>(arg: &[u8]) -> Option<T> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

async fn write_reply(stream: &mut TcpStream, out: &mut BytesMut, reply: &Reply) -> std::io::Result<()> {
    out.clear();
    reply.encode(out);
    stream.write_all(out).await
}

/// Serves one client until it disconnects, breaks framing or is killed.
async fn handle_connection(mut stream: TcpStream, shared: Arc<Shared>) -> std::io::Result<()> {
    let mut kill = shared.kill.subscribe();
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::with_capacity(1024);
    let mut session = Session::new(&shared);

    loop {
        loop {
            match parse_command(&mut buffer) {
                Ok(Some(args)) if args.is_empty() => continue,
                Ok(Some(args)) => match session.execute(&shared, args) {
                    Outcome::Reply(reply) => write_reply(&mut stream, &mut out, &reply).await?,
                    Outcome::Subscribe(channel) => {
                        return subscribed(stream, buffer, out, &shared, channel, kill).await;
                    }
                },
                Ok(None) => break,
                Err(_) => {
                    write_reply(&mut stream, &mut out, &Reply::err("Protocol error")).await?;
                    return Ok(());
                }
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    return Ok(());
                }
            }
            _ = kill.changed() => return Ok(()),
        }
    }
}

/// Subscribed mode: forward channel messages until the client leaves.
async fn subscribed(
    mut stream: TcpStream,
    mut buffer: BytesMut,
    mut out: BytesMut,
    shared: &Shared,
    channel: Vec<u8>,
    mut kill: watch::Receiver<u64>,
) -> std::io::Result<()> {
    let mut receiver = shared.subscribe(&channel);
    let frame = |kind: &str, payload: Reply| {
        Reply::Array(vec![Reply::bulk(kind), Reply::bulk(channel.clone()), payload])
    };
    write_reply(&mut stream, &mut out, &frame("subscribe", Reply::Integer(1))).await?;

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Ok(payload) => {
                    write_reply(&mut stream, &mut out, &frame("message", Reply::bulk(payload))).await?;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            read = stream.read_buf(&mut buffer) => {
                if read? == 0 {
                    return Ok(());
                }
                while let Ok(Some(args)) = parse_command(&mut buffer) {
                    let Some(name) = args.first() else { continue };
                    let name = String::from_utf8_lossy(name).to_ascii_uppercase();
                    shared.count(&name);
                    let reply = match name.as_str() {
                        "UNSUBSCRIBE" => {
                            write_reply(&mut stream, &mut out, &frame("unsubscribe", Reply::Integer(0))).await?;
                            return Ok(());
                        }
                        "PING" => Reply::Array(vec![Reply::bulk("pong"), Reply::bulk("")]),
                        _ => Reply::err(format!("Can't execute '{}' in subscribed mode", name.to_ascii_lowercase())),
                    };
                    write_reply(&mut stream, &mut out, &reply).await?;
                }
            }
            _ = kill.changed() => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_keys() {
        let args = |parts: &[&str]| parts.iter().map(|p| p.as_bytes().to_vec()).collect::<Vec<_>>();
        assert_eq!(routing_key("GET", &args(&["GET", "foo"])), Some(&b"foo"[..]));
        assert_eq!(routing_key("EVAL", &args(&["EVAL", "s", "1", "k", "a"])), Some(&b"k"[..]));
        assert_eq!(routing_key("EVAL", &args(&["EVAL", "s", "0"])), None);
        assert_eq!(routing_key("PING", &args(&["PING"])), None);
    }

    #[test]
    fn set_options() {
        let mut store = Store::new();
        let args = |parts: &[&str]| parts.iter().map(|p| p.as_bytes().to_vec()).collect::<Vec<_>>();
        assert_eq!(set(&mut store, 0, &args(&["SET", "k", "v", "EX", "10", "NX"])), Reply::ok());
        assert_eq!(set(&mut store, 0, &args(&["SET", "k", "w", "NX"])), Reply::nil());
        assert_eq!(set(&mut store, 0, &args(&["SET", "m", "w", "XX"])), Reply::nil());
        assert!(matches!(set(&mut store, 0, &args(&["SET", "k", "v", "EX", "0"])), Reply::Error(_)));
        assert_eq!(store.get(0, b"k"), Some(b"v".to_vec()));
    }
}
