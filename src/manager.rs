//! Lifecycle of caches and the shared transport.
//!
//! A manager owns a set of named caches and the [`TcpTransport`] they
//! connect through. Shutdown stops every cache (monitor threads, pooled
//! connections) and then stops the transport, unless the transport was
//! supplied externally, in which case its owner keeps it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::cache::{CacheBuilder, MemcachedCache};
use crate::conn::TcpTransport;
use crate::error::ConfigError;

/// Shared name → cache registry; builders register through it so a cache
/// built after shutdown is rejected instead of leaking threads.
pub(crate) struct CacheRegistry {
    caches: Mutex<FxHashMap<String, MemcachedCache>>,
    shutdown: AtomicBool,
}

impl CacheRegistry {
    fn new() -> Self {
        Self {
            caches: Mutex::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn register(&self, cache: MemcachedCache) -> Result<(), ConfigError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(ConfigError::new("manager has already shut down"));
        }
        let mut caches = self.caches.lock();
        if caches.contains_key(cache.name()) {
            return Err(ConfigError::new(format!(
                "cache `{}` already exists",
                cache.name()
            )));
        }
        caches.insert(cache.name().to_string(), cache);
        Ok(())
    }
}

/// Owns caches and (usually) the transport they share.
pub struct CacheManager {
    registry: Arc<CacheRegistry>,
    transport: Arc<TcpTransport>,
    external_transport: bool,
}

impl CacheManager {
    /// A manager with its own transport.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder {
            transport: None,
            nodelay: true,
        }
    }

    /// Starts building a cache registered under `name`.
    pub fn cache_builder(&self, name: &str) -> CacheBuilder {
        CacheBuilder::new(
            name.to_string(),
            Arc::clone(&self.transport),
            Arc::clone(&self.registry),
        )
    }

    /// Looks up a cache by name; `None` after shutdown.
    pub fn get_cache(&self, name: &str) -> Option<MemcachedCache> {
        if self.is_shutdown() {
            return None;
        }
        self.registry.caches.lock().get(name).cloned()
    }

    /// Stops and deregisters a cache. Returns `false` if it was unknown.
    pub fn remove_cache(&self, name: &str) -> bool {
        if self.is_shutdown() {
            return false;
        }
        let cache = self.registry.caches.lock().remove(name);
        match cache {
            Some(cache) => {
                cache.stop();
                true
            },
            None => false,
        }
    }

    /// Stops every cache, then the owned transport. Idempotent. An
    /// externally supplied transport is left running.
    pub fn shutdown(&self) {
        if self
            .registry
            .shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let caches: Vec<MemcachedCache> = self.registry.caches.lock().drain().map(|(_, cache)| cache).collect();
        for cache in caches {
            cache.stop();
        }
        if !self.external_transport {
            self.transport.stop();
        }
        info!("cache manager shut down");
    }

    /// True once [`shutdown`](Self::shutdown) has run.
    pub fn is_shutdown(&self) -> bool {
        self.registry.shutdown.load(Ordering::Acquire)
    }

    /// The transport caches connect through.
    pub fn transport(&self) -> &Arc<TcpTransport> {
        &self.transport
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder {
    transport: Option<Arc<TcpTransport>>,
    nodelay: bool,
}

impl CacheManagerBuilder {
    /// Uses an externally owned transport; the manager will not stop it.
    pub fn transport(mut self, transport: Arc<TcpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Socket nodelay for the owned transport.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn build(self) -> CacheManager {
        let (transport, external) = match self.transport {
            Some(transport) => (transport, true),
            None => (Arc::new(TcpTransport::with_nodelay(self.nodelay)), false),
        };
        CacheManager {
            registry: Arc::new(CacheRegistry::new()),
            transport,
            external_transport: external,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::pool::PoolConfig;

    fn quiet_config() -> CacheConfig {
        CacheConfig {
            health_monitor_interval: None,
            pool: PoolConfig {
                min: 0,
                keep_alive: None,
                ..PoolConfig::default()
            },
            ..CacheConfig::default()
        }
    }

    #[test]
    fn caches_register_and_resolve_by_name() {
        let manager = CacheManager::new();
        let cache = manager
            .cache_builder("users")
            .config(quiet_config())
            .build()
            .unwrap();
        assert_eq!(cache.name(), "users");
        assert!(manager.get_cache("users").is_some());
        assert!(manager.get_cache("sessions").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let manager = CacheManager::new();
        manager
            .cache_builder("users")
            .config(quiet_config())
            .build()
            .unwrap();
        let err = manager
            .cache_builder("users")
            .config(quiet_config())
            .build()
            .unwrap_err();
        assert!(err.message().contains("already exists"));
    }

    #[test]
    fn remove_cache_stops_it() {
        let manager = CacheManager::new();
        let cache = manager
            .cache_builder("users")
            .config(quiet_config())
            .build()
            .unwrap();
        assert!(manager.remove_cache("users"));
        assert!(cache.is_stopped());
        assert!(!manager.remove_cache("users"));
    }

    #[test]
    fn shutdown_stops_caches_and_owned_transport() {
        let manager = CacheManager::new();
        let cache = manager
            .cache_builder("users")
            .config(quiet_config())
            .build()
            .unwrap();
        manager.shutdown();
        assert!(cache.is_stopped());
        assert!(manager.transport().is_stopped());
        assert!(manager.get_cache("users").is_none());
    }

    #[test]
    fn external_transport_survives_shutdown() {
        let transport = Arc::new(TcpTransport::new());
        let manager = CacheManager::builder()
            .transport(Arc::clone(&transport))
            .build();
        manager.shutdown();
        assert!(!transport.is_stopped());
    }

    #[test]
    fn builds_after_shutdown_are_rejected() {
        let manager = CacheManager::new();
        manager.shutdown();
        let err = manager
            .cache_builder("late")
            .config(quiet_config())
            .build()
            .unwrap_err();
        assert!(err.message().contains("shut down"));
    }
}
