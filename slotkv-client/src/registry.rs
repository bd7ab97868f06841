//! # Client Registry
//!
//! Purpose: Own the named clients of an application and resolve them by
//! name, including the default client used by locks without a selector.
//!
//! ## Design Principles
//! 1. **Explicit Object**: Callers construct a registry and pass it around;
//!    there is no process-wide map.
//! 2. **Aliases Share One Client**: `"a, b"` registers one client under two
//!    names.
//! 3. **No Partial Setup**: A taken name fails before anything is dialed.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::client::{connect, Client};
use crate::config::{Options, RegistryConfig};
use crate::error::{ClientError, ClientResult};
use crate::lock::{LockOptions, Mutex};

#[derive(Default)]
struct Entries {
    by_name: HashMap<String, Arc<dyn Client>>,
    default: Option<Arc<dyn Client>>,
}

/// Named clients plus an optional default.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<Entries>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Builds every `[[redis]]` entry of a bootstrap document.
    ///
    /// On failure the clients built so far are closed.
    pub fn from_config(config: &RegistryConfig) -> ClientResult<Self> {
        let registry = Registry::new();
        for entry in &config.redis {
            if let Err(err) = registry.setup(&entry.key, entry.options.clone(), entry.default) {
                warn!(names = %entry.key, error = %err, "registry bootstrap failed");
                registry.close_all();
                return Err(err);
            }
        }
        Ok(registry)
    }

    /// Connects a client and registers it under the comma-separated `names`.
    pub fn setup(&self, names: &str, options: Options, default: bool) -> ClientResult<Arc<dyn Client>> {
        let names = split_names(names)?;
        self.ensure_vacant(&names)?;
        let client = connect(options)?;
        if let Err(err) = self.insert(&names, Arc::clone(&client), default) {
            client.close();
            return Err(err);
        }
        info!(names = ?names, default, "client registered");
        Ok(client)
    }

    /// Registers an already built client.
    pub fn register(&self, names: &str, client: Arc<dyn Client>, default: bool) -> ClientResult<()> {
        let names = split_names(names)?;
        self.insert(&names, client, default)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Client>> {
        self.entries.read().by_name.get(name).cloned()
    }

    pub fn default_client(&self) -> Option<Arc<dyn Client>> {
        self.entries.read().default.clone()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves `options.client` (or the default) and binds a lock to `key`.
    pub fn mutex(&self, key: impl Into<Vec<u8>>, options: &LockOptions) -> ClientResult<Mutex> {
        let client = match options.client.as_deref() {
            Some(name) => self
                .get(name)
                .ok_or_else(|| ClientError::ClientNotFound(name.to_string()))?,
            None => self
                .default_client()
                .ok_or_else(|| ClientError::ClientNotFound("default".to_string()))?,
        };
        Ok(Mutex::new(key, client, options))
    }

    /// Closes every client once and empties the registry.
    pub fn close_all(&self) {
        let entries = std::mem::take(&mut *self.entries.write());
        let mut closed: Vec<Arc<dyn Client>> = Vec::new();
        for client in entries.by_name.into_values().chain(entries.default) {
            if closed.iter().any(|seen| Arc::ptr_eq(seen, &client)) {
                continue;
            }
            client.close();
            closed.push(client);
        }
    }

    fn ensure_vacant(&self, names: &[String]) -> ClientResult<()> {
        let entries = self.entries.read();
        match names.iter().find(|name| entries.by_name.contains_key(*name)) {
            Some(taken) => Err(ClientError::DuplicateName(taken.clone())),
            None => Ok(()),
        }
    }

    fn insert(&self, names: &[String], client: Arc<dyn Client>, default: bool) -> ClientResult<()> {
        let mut entries = self.entries.write();
        // Checked again: another setup may have won the race while dialing.
        if let Some(taken) = names.iter().find(|name| entries.by_name.contains_key(*name)) {
            return Err(ClientError::DuplicateName(taken.clone()));
        }
        for name in names {
            entries.by_name.insert(name.clone(), Arc::clone(&client));
        }
        if default {
            entries.default = Some(client);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("names", &self.names()).finish()
    }
}

fn split_names(names: &str) -> ClientResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for name in names.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        if out.iter().any(|seen| seen == name) {
            return Err(ClientError::DuplicateName(name.to_string()));
        }
        out.push(name.to_string());
    }
    if out.is_empty() {
        return Err(ClientError::InvalidArgument("client name is empty"));
    }
    Ok(out)
}
