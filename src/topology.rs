//! Server-list serialization and the external-config barrier interface.
//!
//! A deployment can synchronize cache membership through an external
//! metadata store. That coordination (watch-and-commit over a metadata
//! tree) lives outside this crate; only its interface is named here:
//!
//! - [`MetadataCoordinator`]: what the external store must provide:
//!   register a barrier for a region, write data, unregister.
//! - [`BarrierListener`]: callbacks the coordinator drives: `on_init`
//!   when the barrier attaches, `on_commit` when a new server list is
//!   agreed on, `on_destroy` when the region goes away.
//! - [`ServerListBarrierListener`]: the crate's listener implementation
//!   that applies committed server lists to a cache as add/remove diffs.
//!
//! Server lists travel as UTF-8, comma-separated `host:port` pairs;
//! whitespace around commas is trimmed and duplicates collapse.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::cache::MemcachedCache;
use crate::error::TopologyError;

// ---------------------------------------------------------------------------
// Server-list serialization
// ---------------------------------------------------------------------------

/// Parses a comma-separated `host:port` list.
///
/// Entries are trimmed, resolved, and deduplicated preserving first
/// appearance; unresolvable entries are logged and skipped.
pub fn parse_server_list(list: &str) -> Vec<SocketAddr> {
    let mut seen = FxHashSet::default();
    let mut servers = Vec::new();
    for entry in list.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.to_socket_addrs() {
            Ok(mut resolved) => {
                if let Some(addr) = resolved.next() {
                    if seen.insert(addr) {
                        servers.push(addr);
                    }
                }
            },
            Err(err) => {
                warn!(entry, error = %err, "skipping unresolvable server entry");
            },
        }
    }
    servers
}

/// Formats servers as a comma-separated `host:port` list.
pub fn format_server_list(servers: &[SocketAddr]) -> String {
    servers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

// ---------------------------------------------------------------------------
// Barrier interfaces
// ---------------------------------------------------------------------------

/// Callbacks driven by the external metadata coordinator.
pub trait BarrierListener: Send + Sync {
    /// The barrier attached; `remote_bytes` holds the store's current
    /// data for this region (possibly empty).
    fn on_init(&self, region: &str, path: &str, remote_bytes: &[u8]) -> Result<(), TopologyError>;

    /// A new value was committed for this region.
    fn on_commit(&self, region: &str, path: &str, new_bytes: &[u8]);

    /// The region was torn down.
    fn on_destroy(&self, region: &str);
}

/// The external coordination surface this crate depends on but does not
/// implement: a watch-and-commit barrier over a metadata store.
pub trait MetadataCoordinator: Send + Sync {
    /// Registers a barrier for `region`, seeding the store with
    /// `local_bytes` when the region is new. Returns the data path the
    /// listener will be driven with.
    fn register_barrier(
        &self,
        region: &str,
        listener: Arc<dyn BarrierListener>,
        local_bytes: &[u8],
    ) -> Result<String, TopologyError>;

    /// Writes `bytes` at `path`, triggering a commit cycle.
    fn set_data(&self, path: &str, bytes: &[u8]) -> Result<(), TopologyError>;

    /// Removes the barrier for `region`.
    fn unregister_barrier(&self, region: &str) -> Result<(), TopologyError>;
}

// ---------------------------------------------------------------------------
// ServerListBarrierListener
// ---------------------------------------------------------------------------

/// Applies committed server lists to a cache.
///
/// Commits are applied as a diff against the last-applied set: servers in
/// the new list join the cache, servers gone from it leave. With
/// `prefer_remote` the listener refuses to initialize until the store
/// carries a non-empty list and seeds the cache from it.
pub struct ServerListBarrierListener {
    cache: MemcachedCache,
    applied: Mutex<FxHashSet<SocketAddr>>,
    prefer_remote: bool,
}

impl ServerListBarrierListener {
    pub fn new(
        cache: MemcachedCache,
        initial_servers: impl IntoIterator<Item = SocketAddr>,
        prefer_remote: bool,
    ) -> Self {
        Self {
            cache,
            applied: Mutex::new(initial_servers.into_iter().collect()),
            prefer_remote,
        }
    }

    /// The last server set this listener applied.
    pub fn applied_servers(&self) -> Vec<SocketAddr> {
        self.applied.lock().iter().copied().collect()
    }

    fn apply(&self, target: &[SocketAddr]) {
        let target_set: FxHashSet<SocketAddr> = target.iter().copied().collect();
        let mut applied = self.applied.lock();
        let added: Vec<SocketAddr> = target_set.difference(&applied).copied().collect();
        let removed: Vec<SocketAddr> = applied.difference(&target_set).copied().collect();
        for server in added {
            self.cache.add_server(server);
            applied.insert(server);
        }
        for server in removed {
            self.cache.remove_server(server);
            applied.remove(&server);
        }
    }
}

impl BarrierListener for ServerListBarrierListener {
    fn on_init(&self, region: &str, path: &str, remote_bytes: &[u8]) -> Result<(), TopologyError> {
        if !self.prefer_remote {
            debug!(region, path, "barrier attached; keeping local server list");
            return Ok(());
        }
        if remote_bytes.is_empty() {
            return Err(TopologyError::new(format!(
                "remote config was not ready. path={}, region={}",
                path, region
            )));
        }
        let list = String::from_utf8_lossy(remote_bytes);
        let servers = parse_server_list(&list);
        if servers.is_empty() {
            return Err(TopologyError::new(format!(
                "remote config was not ready. path={}, region={}",
                path, region
            )));
        }
        info!(region, servers = servers.len(), "seeding server list from remote config");
        self.apply(&servers);
        Ok(())
    }

    fn on_commit(&self, region: &str, path: &str, new_bytes: &[u8]) {
        let list = String::from_utf8_lossy(new_bytes);
        let servers = parse_server_list(&list);
        if servers.is_empty() {
            warn!(region, path, "ignoring empty committed server list");
            return;
        }
        info!(region, servers = servers.len(), "applying committed server list");
        self.apply(&servers);
    }

    fn on_destroy(&self, region: &str) {
        info!(region, "barrier destroyed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
