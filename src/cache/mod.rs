//! Public command surface: routing, timeouts, failover, and the memcached
//! command set.
//!
//! ## Architecture
//!
//! ```text
//!   caller ──▶ MemcachedCache ──▶ HashRing (key → server)
//!                    │
//!                    ├──▶ KeyedObjectPool (server → Connection)
//!                    │          │
//!                    │          └──▶ Connection (frame + correlate)
//!                    │
//!                    └──▶ HealthMonitor (quarantine / revival)
//! ```
//!
//! Every command resolves its key to a server, borrows a pooled
//! connection, runs the wire exchange, and returns the connection (or
//! destroys it on a transport-level failure). With failover enabled, a
//! failed server is quarantined and the operation walks the ring to the
//! next distinct server.
//!
//! ## Failure semantics
//!
//! Per-request failures never surface as errors: stores and deletes
//! report `false`, retrievals report `None`, multi-ops fill per-key
//! failure entries. `Key_Not_Found` on DELETE counts as success so
//! deletes are retry-safe; `Key_Exists` on ADD or a mismatched CAS is a
//! plain `false`. Calling any command after [`MemcachedCache::stop`] is a
//! programmer error and panics.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::conn::{Connection, ConnectionFactory, TcpTransport};
use crate::error::{ConfigError, OpError, PoolError};
use crate::health::HealthMonitor;
use crate::manager::CacheRegistry;
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::pool::KeyedObjectPool;
use crate::protocol::{Extras, Opcode, Request, Response, ResponseStatus};
use crate::ring::HashRing;

pub mod config;
pub mod multi;

pub use config::CacheConfig;

// ---------------------------------------------------------------------------
// Result carriers
// ---------------------------------------------------------------------------

/// A value together with the server-assigned CAS token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueWithCas {
    pub value: Vec<u8>,
    pub cas: u64,
}

/// A value together with the key echoed by the server (GetK).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueWithKey {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

pub(crate) struct CacheInner {
    pub(crate) name: String,
    pub(crate) config: CacheConfig,
    pub(crate) ring: Arc<HashRing<SocketAddr>>,
    pub(crate) pool: KeyedObjectPool<SocketAddr, Connection, ConnectionFactory>,
    pub(crate) monitor: HealthMonitor,
    pub(crate) metrics: Arc<CacheMetrics>,
    /// Full membership, including quarantined servers.
    pub(crate) servers: Mutex<FxHashSet<SocketAddr>>,
    pub(crate) stopped: AtomicBool,
}

/// A logical cache over a set of memcached servers.
///
/// Cheaply cloneable handle; clones share routing state, pools, and the
/// health monitor. Built through
/// [`CacheManager::cache_builder`](crate::manager::CacheManager::cache_builder).
#[derive(Clone)]
pub struct MemcachedCache {
    inner: Arc<CacheInner>,
}

impl MemcachedCache {
    /// The cache name under its manager.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Point-in-time operation counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stops the cache: halts the health monitor and destroys every
    /// pooled connection. Further commands panic.
    pub fn stop(&self) {
        if self
            .inner
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.inner.monitor.stop();
        self.inner.pool.destroy();
        info!(cache = %self.inner.name, "cache stopped");
    }

    /// True once [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    fn ensure_running(&self) {
        assert!(
            !self.is_stopped(),
            "cache `{}` has already been stopped",
            self.inner.name
        );
    }

    // -- server membership ------------------------------------------------

    /// Adds a server to the cache and warms its connection pool.
    ///
    /// Returns `false` if the server was already a member.
    pub fn add_server(&self, server: SocketAddr) -> bool {
        self.ensure_running();
        let newly = self.inner.servers.lock().insert(server);
        self.inner.monitor.forget(&server);
        self.inner.ring.add(server);
        if let Err(err) = self.inner.pool.preload_min(&server) {
            debug!(server = %server, error = %err, "could not warm connection pool");
        }
        if newly {
            info!(cache = %self.inner.name, server = %server, "server added");
        }
        newly
    }

    /// Removes a server from routing and destroys its pooled connections.
    pub fn remove_server(&self, server: SocketAddr) {
        self.ensure_running();
        self.inner.servers.lock().remove(&server);
        self.inner.monitor.forget(&server);
        self.inner.ring.remove(&server);
        self.inner.pool.destroy_key(&server);
        info!(cache = %self.inner.name, server = %server, "server removed");
    }

    /// True if `server` is a member (live or quarantined).
    pub fn contains_server(&self, server: &SocketAddr) -> bool {
        self.inner.servers.lock().contains(server)
    }

    /// Current membership, including quarantined servers.
    pub fn current_server_list(&self) -> Vec<SocketAddr> {
        self.inner.servers.lock().iter().copied().collect()
    }

    /// Servers currently excluded from routing.
    pub fn quarantined_servers(&self) -> Vec<SocketAddr> {
        self.inner.monitor.quarantined_servers()
    }

    /// The server `key` currently routes to, if any.
    pub fn server_for_key(&self, key: &[u8]) -> Option<SocketAddr> {
        self.inner.ring.lookup(key)
    }

    // -- storage commands -------------------------------------------------

    /// Stores `value` under `key` unconditionally.
    pub fn set(&self, key: &[u8], value: &[u8], expiration: u32, noreply: bool) -> bool {
        self.store(Opcode::Set, key, value, expiration, 0, noreply)
    }

    /// Stores only if `key` is absent. `Key_Exists` reports `false`.
    pub fn add(&self, key: &[u8], value: &[u8], expiration: u32, noreply: bool) -> bool {
        self.store(Opcode::Add, key, value, expiration, 0, noreply)
    }

    /// Stores only if `key` is present.
    pub fn replace(&self, key: &[u8], value: &[u8], expiration: u32, noreply: bool) -> bool {
        self.store(Opcode::Replace, key, value, expiration, 0, noreply)
    }

    /// Compare-and-store: succeeds only while the item's CAS still equals
    /// `cas`. A zero token stores unconditionally.
    pub fn cas(&self, key: &[u8], value: &[u8], expiration: u32, cas: u64, noreply: bool) -> bool {
        self.store(Opcode::Set, key, value, expiration, cas, noreply)
    }

    /// Appends `value` to the stored item.
    pub fn append(&self, key: &[u8], value: &[u8], noreply: bool) -> bool {
        self.concat(Opcode::Append, key, value, noreply)
    }

    /// Prepends `value` to the stored item.
    pub fn prepend(&self, key: &[u8], value: &[u8], noreply: bool) -> bool {
        self.concat(Opcode::Prepend, key, value, noreply)
    }

    fn store(
        &self,
        opcode: Opcode,
        key: &[u8],
        value: &[u8],
        expiration: u32,
        cas: u64,
        noreply: bool,
    ) -> bool {
        let request = Request {
            cas,
            extras: Extras::Storage {
                flags: 0,
                expiration,
            },
            key: key.to_vec(),
            value: value.to_vec(),
            ..Request::new(opcode)
        };
        let ok = self.write_command(request, noreply, false);
        if ok {
            self.inner.metrics.record_store();
        }
        ok
    }

    fn concat(&self, opcode: Opcode, key: &[u8], value: &[u8], noreply: bool) -> bool {
        let request = Request {
            key: key.to_vec(),
            value: value.to_vec(),
            ..Request::new(opcode)
        };
        let ok = self.write_command(request, noreply, false);
        if ok {
            self.inner.metrics.record_store();
        }
        ok
    }

    // -- retrieval commands -----------------------------------------------

    /// Fetches the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.retrieve(Opcode::Get, key, Extras::None)
            .map(|response| response.value)
    }

    /// Fetches the value and its CAS token.
    pub fn gets(&self, key: &[u8]) -> Option<ValueWithCas> {
        self.retrieve(Opcode::Get, key, Extras::None)
            .map(|response| ValueWithCas {
                value: response.value,
                cas: response.cas,
            })
    }

    /// Fetches the value with the key echoed by the server.
    pub fn get_key(&self, key: &[u8]) -> Option<ValueWithKey> {
        self.retrieve(Opcode::GetK, key, Extras::None)
            .map(|response| ValueWithKey {
                key: response.key,
                value: response.value,
            })
    }

    /// Get-and-touch: fetches the value and resets its expiration.
    pub fn gat(&self, key: &[u8], expiration: u32) -> Option<Vec<u8>> {
        self.retrieve(Opcode::Gat, key, Extras::Expiration(expiration))
            .map(|response| response.value)
    }

    fn retrieve(&self, opcode: Opcode, key: &[u8], extras: Extras) -> Option<Response> {
        self.ensure_running();
        let request = Request {
            extras,
            key: key.to_vec(),
            ..Request::new(opcode)
        };
        match self.run_routed(key, &request) {
            Ok(response) if response.is_ok() => {
                self.inner.metrics.record_hit();
                Some(response)
            },
            Ok(response) => {
                if response.status != ResponseStatus::KeyNotFound {
                    debug!(status = response.status.message(), "retrieval failed");
                    self.inner.metrics.record_failure();
                } else {
                    self.inner.metrics.record_miss();
                }
                None
            },
            Err(err) => {
                warn!(error = %err, "retrieval failed");
                self.inner.metrics.record_failure();
                None
            },
        }
    }

    // -- delete / touch / arithmetic ---------------------------------------

    /// Deletes `key`. `Key_Not_Found` reports `true` so deletes are
    /// retry-safe.
    pub fn delete(&self, key: &[u8], noreply: bool) -> bool {
        let request = Request {
            key: key.to_vec(),
            ..Request::new(Opcode::Delete)
        };
        let ok = self.write_command(request, noreply, true);
        if ok {
            self.inner.metrics.record_delete();
        }
        ok
    }

    /// Resets the expiration of `key`.
    pub fn touch(&self, key: &[u8], expiration: u32) -> bool {
        let request = Request {
            extras: Extras::Expiration(expiration),
            key: key.to_vec(),
            ..Request::new(Opcode::Touch)
        };
        self.write_command(request, false, false)
    }

    /// Increments the counter at `key` by `delta`, seeding it with
    /// `initial` when absent (unless `expiration` is
    /// [`EXPIRATION_NO_CREATE`](crate::protocol::frame::EXPIRATION_NO_CREATE)).
    pub fn incr(
        &self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
        noreply: bool,
    ) -> Option<u64> {
        self.arithmetic(Opcode::Increment, key, delta, initial, expiration, noreply)
    }

    /// Decrements the counter at `key` by `delta`; clamps at zero.
    pub fn decr(
        &self,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
        noreply: bool,
    ) -> Option<u64> {
        self.arithmetic(Opcode::Decrement, key, delta, initial, expiration, noreply)
    }

    fn arithmetic(
        &self,
        opcode: Opcode,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
        noreply: bool,
    ) -> Option<u64> {
        self.ensure_running();
        let mut request = Request {
            extras: Extras::Arithmetic {
                delta,
                initial,
                expiration,
            },
            key: key.to_vec(),
            ..Request::new(opcode)
        };
        if noreply {
            request.opcode = request.opcode.quiet().unwrap_or(request.opcode);
            // Fire-and-forget: there is no counter value to report.
            let _ = self.run_routed_quiet(key, request);
            return None;
        }
        match self.run_routed(key, &request) {
            Ok(response) if response.is_ok() => response.counter_value(),
            Ok(response) => {
                if response.status != ResponseStatus::KeyNotFound {
                    debug!(status = response.status.message(), "arithmetic failed");
                    self.inner.metrics.record_failure();
                }
                None
            },
            Err(err) => {
                warn!(error = %err, "arithmetic failed");
                self.inner.metrics.record_failure();
                None
            },
        }
    }

    /// Shared body of the boolean-returning write commands.
    ///
    /// `not_found_ok` makes `Key_Not_Found` count as success (DELETE).
    fn write_command(&self, mut request: Request, noreply: bool, not_found_ok: bool) -> bool {
        self.ensure_running();
        let routing_key = request.key.clone();
        if noreply {
            request.opcode = request.opcode.quiet().unwrap_or(request.opcode);
            return match self.run_routed_quiet(&routing_key, request) {
                Ok(()) => true,
                Err(_) => {
                    self.inner.metrics.record_failure();
                    false
                },
            };
        }
        match self.run_routed(&routing_key, &request) {
            Ok(response) if response.is_ok() => true,
            Ok(response) if not_found_ok && response.status == ResponseStatus::KeyNotFound => true,
            Ok(response) => {
                debug!(
                    opcode = ?request.opcode,
                    status = response.status.message(),
                    "write command rejected"
                );
                self.inner.metrics.record_failure();
                false
            },
            Err(err) => {
                warn!(opcode = ?request.opcode, error = %err, "write command failed");
                self.inner.metrics.record_failure();
                false
            },
        }
    }

    // -- per-server commands ----------------------------------------------

    /// Server version string.
    pub fn version(&self, server: SocketAddr) -> Option<String> {
        self.run_on_address(server, Request::new(Opcode::Version))
            .ok()
            .filter(Response::is_ok)
            .and_then(|response| String::from_utf8(response.value).ok())
    }

    /// Liveness probe; true when the server answers.
    pub fn noop(&self, server: SocketAddr) -> bool {
        self.run_on_address(server, Request::new(Opcode::Noop))
            .map(|response| response.is_ok())
            .unwrap_or(false)
    }

    /// Sets the server's logging verbosity.
    pub fn verbosity(&self, server: SocketAddr, level: u32) -> bool {
        let request = Request {
            extras: Extras::Verbosity(level),
            ..Request::new(Opcode::Verbosity)
        };
        self.run_on_address(server, request)
            .map(|response| response.is_ok())
            .unwrap_or(false)
    }

    /// Flushes the server, optionally after `delay` seconds.
    pub fn flush_all(&self, server: SocketAddr, delay: Option<u32>, noreply: bool) -> bool {
        let mut request = Request::new(if noreply { Opcode::FlushQ } else { Opcode::Flush });
        if let Some(delay) = delay {
            request.extras = Extras::Expiration(delay);
        }
        if noreply {
            return self.quiet_on_address(server, request).is_ok();
        }
        self.run_on_address(server, request)
            .map(|response| response.is_ok())
            .unwrap_or(false)
    }

    /// General server statistics.
    pub fn stats(&self, server: SocketAddr) -> Option<HashMap<String, String>> {
        self.stats_items(server, None)
    }

    /// Statistics for a named subsystem (e.g. `"items"`).
    ///
    /// STAT streams one response per entry under a single opaque and ends
    /// with an empty key/value pair.
    pub fn stats_items(
        &self,
        server: SocketAddr,
        item: Option<&str>,
    ) -> Option<HashMap<String, String>> {
        self.ensure_running();
        let mut conn = self.borrow_address(server).ok()?;
        let opaque = conn.next_opaque();
        conn.track(opaque);
        let request = Request {
            opaque,
            key: item.map(|item| item.as_bytes().to_vec()).unwrap_or_default(),
            ..Request::new(Opcode::Stat)
        };
        if let Err(err) = conn.send(std::slice::from_ref(&request), self.inner.config.write_timeout)
        {
            warn!(server = %server, error = %err, "stats request failed");
            self.inner.pool.invalidate(&server, conn);
            return None;
        }
        let mut stats = HashMap::new();
        loop {
            match conn.receive_keyed(opaque, self.inner.config.response_timeout) {
                Ok(response) => {
                    if !response.is_ok() {
                        debug!(status = response.status.message(), "stats rejected");
                        conn.untrack(opaque);
                        self.inner.pool.return_object(&server, conn);
                        return None;
                    }
                    if response.key.is_empty() && response.value.is_empty() {
                        conn.untrack(opaque);
                        self.inner.pool.return_object(&server, conn);
                        return Some(stats);
                    }
                    let key = String::from_utf8_lossy(&response.key).into_owned();
                    let value = String::from_utf8_lossy(&response.value).into_owned();
                    stats.insert(key, value);
                },
                Err(err) => {
                    warn!(server = %server, error = %err, "stats stream failed");
                    self.inner.pool.invalidate(&server, conn);
                    return None;
                },
            }
        }
    }

    /// Lists the SASL mechanisms the server supports.
    pub fn sasl_list(&self, server: SocketAddr) -> Option<String> {
        self.run_on_address(server, Request::new(Opcode::SaslListMechs))
            .ok()
            .filter(Response::is_ok)
            .and_then(|response| String::from_utf8(response.value).ok())
    }

    /// Starts SASL authentication; the mechanism payload is opaque to the
    /// client. Returns the server's challenge data while authentication is
    /// incomplete or succeeded.
    pub fn sasl_auth(&self, server: SocketAddr, mechanism: &str, data: &[u8]) -> Option<Vec<u8>> {
        self.sasl_exchange(Opcode::SaslAuth, server, mechanism, data)
    }

    /// Continues a SASL exchange.
    pub fn sasl_step(&self, server: SocketAddr, mechanism: &str, data: &[u8]) -> Option<Vec<u8>> {
        self.sasl_exchange(Opcode::SaslStep, server, mechanism, data)
    }

    fn sasl_exchange(
        &self,
        opcode: Opcode,
        server: SocketAddr,
        mechanism: &str,
        data: &[u8],
    ) -> Option<Vec<u8>> {
        let request = Request {
            key: mechanism.as_bytes().to_vec(),
            value: data.to_vec(),
            ..Request::new(opcode)
        };
        match self.run_on_address(server, request) {
            Ok(response)
                if response.is_ok()
                    || matches!(
                        response.status,
                        ResponseStatus::AuthenticationContinue
                            | ResponseStatus::FurtherAuthenticationRequired
                    ) =>
            {
                Some(response.value)
            },
            Ok(response) => {
                debug!(status = response.status.message(), "authentication rejected");
                None
            },
            Err(_) => None,
        }
    }

    /// Asks the server to close this connection.
    pub fn quit(&self, server: SocketAddr, noreply: bool) -> bool {
        self.ensure_running();
        let mut conn = match self.borrow_address(server) {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        let result = if noreply {
            conn.send_quiet(Request::new(Opcode::QuitQ), self.inner.config.write_timeout)
                .map(|()| true)
        } else {
            conn.round_trip(
                Request::new(Opcode::Quit),
                self.inner.config.write_timeout,
                self.inner.config.response_timeout,
            )
            .map(|response| response.is_ok())
        };
        // The server closes the channel after QUIT either way.
        self.inner.pool.invalidate(&server, conn);
        result.unwrap_or(false)
    }

    // -- routing core ------------------------------------------------------

    /// Sends `request` to the key's owner, walking the ring on failure
    /// when failover is enabled.
    pub(crate) fn run_routed(&self, key: &[u8], request: &Request) -> Result<Response, OpError> {
        let walks = self.inner.config.retry_count.max(1);
        let mut last_err = None;
        for _ in 0..walks {
            let candidates = self.route_candidates(key);
            if candidates.is_empty() {
                break;
            }
            for server in candidates {
                if self.inner.monitor.is_quarantined(&server) {
                    continue;
                }
                match self.run_on_server(server, request.clone()) {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        debug!(server = %server, error = %err, "command attempt failed");
                        self.note_server_failure(server, &err);
                        if !self.inner.config.failover {
                            return Err(err);
                        }
                        last_err = Some(err);
                    },
                }
            }
        }
        Err(last_err.unwrap_or(OpError::Pool(PoolError::Exhausted)))
    }

    /// Quiet-path counterpart: writes without reading a response.
    pub(crate) fn run_routed_quiet(&self, key: &[u8], request: Request) -> Result<(), OpError> {
        let walks = self.inner.config.retry_count.max(1);
        let mut last_err = None;
        for _ in 0..walks {
            let candidates = self.route_candidates(key);
            if candidates.is_empty() {
                break;
            }
            for server in candidates {
                if self.inner.monitor.is_quarantined(&server) {
                    continue;
                }
                match self.send_quiet_on_server(server, request.clone()) {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        self.note_server_failure(server, &err);
                        if !self.inner.config.failover {
                            return Err(err);
                        }
                        last_err = Some(err);
                    },
                }
            }
        }
        Err(last_err.unwrap_or(OpError::Pool(PoolError::Exhausted)))
    }

    fn route_candidates(&self, key: &[u8]) -> Vec<SocketAddr> {
        if self.inner.config.failover {
            let live = self.inner.ring.len();
            self.inner.ring.candidates(key, live.max(1))
        } else {
            self.inner.ring.lookup(key).into_iter().collect()
        }
    }

    fn run_on_server(&self, server: SocketAddr, request: Request) -> Result<Response, OpError> {
        let mut conn = self
            .inner
            .pool
            .borrow(&server, Some(self.inner.config.connect_timeout))?;
        match conn.round_trip(
            request,
            self.inner.config.write_timeout,
            self.inner.config.response_timeout,
        ) {
            Ok(response) => {
                self.inner.pool.return_object(&server, conn);
                Ok(response)
            },
            Err(err) => {
                self.inner.pool.invalidate(&server, conn);
                Err(err)
            },
        }
    }

    fn send_quiet_on_server(&self, server: SocketAddr, request: Request) -> Result<(), OpError> {
        let mut conn = self
            .inner
            .pool
            .borrow(&server, Some(self.inner.config.connect_timeout))?;
        match conn.send_quiet(request, self.inner.config.write_timeout) {
            Ok(()) => {
                self.inner.pool.return_object(&server, conn);
                Ok(())
            },
            Err(err) => {
                self.inner.pool.invalidate(&server, conn);
                Err(err)
            },
        }
    }

    /// Targets one server directly (VERSION, STAT, SASL, ...), without
    /// ring routing or failover.
    fn run_on_address(&self, server: SocketAddr, request: Request) -> Result<Response, OpError> {
        self.ensure_running();
        let mut conn = self.borrow_address(server)?;
        match conn.round_trip(
            request,
            self.inner.config.write_timeout,
            self.inner.config.response_timeout,
        ) {
            Ok(response) => {
                self.inner.pool.return_object(&server, conn);
                Ok(response)
            },
            Err(err) => {
                warn!(server = %server, error = %err, "server command failed");
                self.inner.pool.invalidate(&server, conn);
                Err(err)
            },
        }
    }

    fn quiet_on_address(&self, server: SocketAddr, request: Request) -> Result<(), OpError> {
        self.ensure_running();
        let mut conn = self.borrow_address(server)?;
        match conn.send_quiet(request, self.inner.config.write_timeout) {
            Ok(()) => {
                self.inner.pool.return_object(&server, conn);
                Ok(())
            },
            Err(err) => {
                self.inner.pool.invalidate(&server, conn);
                Err(err)
            },
        }
    }

    fn borrow_address(&self, server: SocketAddr) -> Result<Connection, OpError> {
        self.inner
            .pool
            .borrow(&server, Some(self.inner.config.connect_timeout))
            .map_err(OpError::from)
    }

    /// Quarantines a server after a transport-level failure when failover
    /// is enabled; server-status responses never quarantine.
    pub(crate) fn note_server_failure(&self, server: SocketAddr, err: &OpError) {
        let transport_class = match err {
            OpError::Transport(_) | OpError::Timeout(_) | OpError::Protocol(_) => true,
            OpError::Pool(PoolError::Timeout) | OpError::Pool(PoolError::NoValidObject(_)) => true,
            OpError::Pool(_) | OpError::Server(_) => false,
        };
        if !transport_class || !self.inner.config.failover {
            return;
        }
        if self.inner.monitor.quarantine(server) {
            self.inner.pool.destroy_key(&server);
        }
    }
}

impl std::fmt::Debug for MemcachedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedCache")
            .field("name", &self.inner.name)
            .field("servers", &self.inner.servers.lock().len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds and registers a [`MemcachedCache`] under a manager.
pub struct CacheBuilder {
    name: String,
    transport: Arc<TcpTransport>,
    registry: Arc<CacheRegistry>,
    config: CacheConfig,
    servers: Vec<SocketAddr>,
}

impl CacheBuilder {
    pub(crate) fn new(
        name: String,
        transport: Arc<TcpTransport>,
        registry: Arc<CacheRegistry>,
    ) -> Self {
        Self {
            name,
            transport,
            registry,
            config: CacheConfig::default(),
            servers: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial server membership.
    pub fn servers(mut self, servers: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.servers.extend(servers);
        self
    }

    /// Toggles ring-walk failover.
    pub fn failover(mut self, failover: bool) -> Self {
        self.config.failover = failover;
        self
    }

    /// Toggles the remote-configuration requirement for barrier init.
    pub fn prefer_remote_config(mut self, prefer: bool) -> Self {
        self.config.prefer_remote_config = prefer;
        self
    }

    /// Builds the cache, warms its pools, starts the health monitor, and
    /// registers it under the manager.
    pub fn build(self) -> Result<MemcachedCache, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::new("cache name must not be empty"));
        }
        let ring = Arc::new(HashRing::new());
        let metrics = Arc::new(CacheMetrics::new());
        let monitor = HealthMonitor::new(
            Arc::clone(&self.transport),
            Arc::clone(&ring),
            Arc::clone(&metrics),
            self.config.connect_timeout,
        );
        let factory = ConnectionFactory::new(Arc::clone(&self.transport), self.config.connect_timeout);
        let pool = KeyedObjectPool::new(factory, self.config.pool);

        let mut members = FxHashSet::default();
        for server in &self.servers {
            members.insert(*server);
        }
        let cache = MemcachedCache {
            inner: Arc::new(CacheInner {
                name: self.name,
                config: self.config,
                ring,
                pool,
                monitor,
                metrics,
                servers: Mutex::new(members),
                stopped: AtomicBool::new(false),
            }),
        };
        for server in cache.current_server_list() {
            cache.inner.ring.add(server);
            if let Err(err) = cache.inner.pool.preload_min(&server) {
                debug!(server = %server, error = %err, "could not warm connection pool");
            }
        }
        if let Some(interval) = self.config.health_monitor_interval {
            if !interval.is_zero() {
                cache.inner.monitor.start(interval);
            }
        }
        self.registry.register(cache.clone())?;
        info!(cache = %cache.inner.name, servers = cache.inner.servers.lock().len(), "cache started");
        Ok(cache)
    }
}
