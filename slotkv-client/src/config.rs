//! # Client Options
//!
//! Purpose: Describe how to reach a node or cluster and how to size its
//! pools. The same struct drives single-node pools, every per-node pool of
//! a cluster, and the TOML bootstrap of a [`Registry`](crate::Registry).
//!
//! ## Design Principles
//! 1. **Serde First**: Options deserialize straight from TOML; durations use
//!    humantime strings such as `"30s"` or `"500ms"`.
//! 2. **Zero Means Off**: A zero duration or count disables the feature it
//!    bounds (`max_conns = 0` is unbounded, `test_idle_timeout = 0` never probes).
//! 3. **Validate Once**: `normalize` and `validate` run before any dial.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ClientError, ClientResult};

/// Connection and pool options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Network type. Only `"tcp"` is supported.
    pub network: String,
    /// Node address for a pool, or seed addresses for a cluster.
    pub address: Vec<String>,
    /// TCP keep-alive interval; zero leaves keep-alive off.
    #[serde(with = "humantime_serde")]
    pub keepalive: Duration,
    /// Dial timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,
    /// Socket read timeout.
    #[serde(with = "humantime_serde")]
    pub read_timeout: Option<Duration>,
    /// Socket write timeout.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Option<Duration>,
    /// Sent with `AUTH` after every dial when set.
    pub password: Option<String>,
    /// Connections opened eagerly when a pool is created.
    pub init_conns: usize,
    /// Upper bound of open connections per pool; zero is unbounded.
    pub max_conns: usize,
    /// Upper bound of idle connections per pool; zero is unbounded.
    pub max_idles: usize,
    /// Idle time after which a borrowed connection is probed with `PING`.
    #[serde(with = "humantime_serde")]
    pub test_idle_timeout: Duration,
    /// Fail with `PoolExhausted` instead of waiting when at `max_conns`.
    pub error_on_exhaustion: bool,
    /// Bound on how long `get` waits for a connection; `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Option<Duration>,
    /// Legacy suffix appended to routing keys as `<key>.<keyfix>`.
    pub keyfix: Option<String>,
    /// Database index selected after every dial. Must stay 0 in cluster mode.
    pub select: u32,
    /// Route through the cluster router instead of a single pool.
    pub cluster: bool,
    /// Host substitutions applied to addresses announced by `CLUSTER SLOTS`.
    pub address_map: HashMap<String, String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            network: "tcp".to_string(),
            address: vec!["127.0.0.1:6379".to_string()],
            keepalive: Duration::from_secs(60),
            connect_timeout: Some(Duration::from_secs(30)),
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(30)),
            password: None,
            init_conns: 0,
            max_conns: 16,
            max_idles: 16,
            test_idle_timeout: Duration::ZERO,
            error_on_exhaustion: false,
            wait_timeout: None,
            keyfix: None,
            select: 0,
            cluster: false,
            address_map: HashMap::new(),
        }
    }
}

impl Options {
    /// Creates options for a single address with default settings.
    pub fn new(addr: impl Into<String>) -> Self {
        Options {
            address: vec![addr.into()],
            ..Options::default()
        }
    }

    /// Applies the merge rules for unset fields.
    ///
    /// `max_idles == 0` inherits `init_conns`, and an empty network means tcp.
    pub fn normalize(mut self) -> Self {
        if self.network.is_empty() {
            self.network = "tcp".to_string();
        }
        if self.max_idles == 0 {
            self.max_idles = self.init_conns;
        }
        if matches!(self.password.as_deref(), Some("")) {
            self.password = None;
        }
        if matches!(self.keyfix.as_deref(), Some("")) {
            self.keyfix = None;
        }
        self
    }

    /// Rejects option sets no pool could honor.
    pub fn validate(&self) -> ClientResult<()> {
        if !self.network.eq_ignore_ascii_case("tcp") {
            return Err(ClientError::Config(format!(
                "unsupported network {:?}",
                self.network
            )));
        }
        if self.address.is_empty() {
            return Err(ClientError::Config("address list is empty".to_string()));
        }
        if self.max_conns > 0 && self.init_conns > self.max_conns {
            return Err(ClientError::Config(format!(
                "init_conns {} exceeds max_conns {}",
                self.init_conns, self.max_conns
            )));
        }
        if self.cluster && self.select != 0 {
            // Cluster nodes only serve database 0 and refuse SELECT.
            return Err(ClientError::Config(format!(
                "select {} is not allowed in cluster mode",
                self.select
            )));
        }
        Ok(())
    }

    /// Returns a copy bound to one node address, as used for per-node pools.
    pub fn for_node(&self, addr: &str) -> Self {
        Options {
            address: vec![addr.to_string()],
            ..self.clone()
        }
    }

    /// Appends the configured key suffix.
    pub fn fix_key<'k>(&self, key: &'k [u8]) -> Cow<'k, [u8]> {
        match self.keyfix.as_deref() {
            Some(fix) => {
                let mut fixed = Vec::with_capacity(key.len() + fix.len() + 1);
                fixed.extend_from_slice(key);
                fixed.push(b'.');
                fixed.extend_from_slice(fix.as_bytes());
                Cow::Owned(fixed)
            }
            None => Cow::Borrowed(key),
        }
    }
}

/// One named client in a registry bootstrap document.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEntry {
    /// Comma-separated names the client is registered under.
    pub key: String,
    /// Marks the registry's default client.
    #[serde(default)]
    pub default: bool,
    #[serde(flatten)]
    pub options: Options,
}

/// Registry bootstrap document.
///
/// ```toml
/// [[redis]]
/// key = "demo,cache"
/// default = true
/// address = ["127.0.0.1:6379"]
/// max_conns = 32
/// read_timeout = "5s"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub redis: Vec<ClientEntry>,
}

impl RegistryConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> ClientResult<Self> {
        toml::from_str(content).map_err(|err| ClientError::Config(err.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_inherits_idle_bound_from_init_conns() {
        let options = Options {
            init_conns: 4,
            max_idles: 0,
            password: Some(String::new()),
            ..Options::default()
        }
        .normalize();
        assert_eq!(options.max_idles, 4);
        assert!(options.password.is_none());
    }

    #[test]
    fn validate_rejects_bad_sizes_and_networks() {
        let options = Options {
            init_conns: 8,
            max_conns: 2,
            ..Options::default()
        };
        assert!(matches!(options.validate(), Err(ClientError::Config(_))));

        let options = Options {
            network: "udp".to_string(),
            ..Options::default()
        };
        assert!(options.validate().is_err());
        assert!(Options::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_select_in_cluster_mode() {
        let options = Options {
            cluster: true,
            select: 1,
            ..Options::default()
        };
        assert!(matches!(options.validate(), Err(ClientError::Config(_))));

        let options = Options {
            cluster: true,
            ..Options::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn fix_key_appends_suffix() {
        let mut options = Options::default();
        assert_eq!(options.fix_key(b"user").as_ref(), b"user");
        options.keyfix = Some("v2".to_string());
        assert_eq!(options.fix_key(b"user").as_ref(), b"user.v2");
    }

    #[test]
    fn parses_registry_document() {
        let doc = r#"
            [[redis]]
            key = "demo, cache"
            default = true
            address = ["10.0.0.1:7000", "10.0.0.2:7000"]
            cluster = true
            read_timeout = "5s"
            test_idle_timeout = "1m"
            max_conns = 4

            [redis.address_map]
            "172.31.0.63" = "120.92.144.252"

            [[redis]]
            key = "locks"
        "#;
        let config = RegistryConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.redis.len(), 2);

        let first = &config.redis[0];
        assert!(first.default);
        assert!(first.options.cluster);
        assert_eq!(first.options.address.len(), 2);
        assert_eq!(first.options.read_timeout, Some(Duration::from_secs(5)));
        assert_eq!(first.options.test_idle_timeout, Duration::from_secs(60));
        assert_eq!(first.options.max_conns, 4);
        assert_eq!(
            first.options.address_map.get("172.31.0.63").map(String::as_str),
            Some("120.92.144.252")
        );

        let second = &config.redis[1];
        assert!(!second.default);
        assert_eq!(second.options.max_conns, 16);
        assert_eq!(second.options.address, vec!["127.0.0.1:6379".to_string()]);
    }
}
