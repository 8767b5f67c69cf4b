//! Health monitor: quarantine bookkeeping and periodic revival probes.
//!
//! Every server is either live (routable through the ring) or quarantined.
//! Quarantine entry removes the server from the ring so no new operation
//! routes to it; the caller additionally closes the server's pool key.
//! When a revival interval is configured, a background thread probes each
//! quarantined server with a fresh connection and a VERSION round trip
//! under a short response timeout, and re-adds the server to the ring on
//! success. With the timer disabled, quarantined servers rejoin only
//! through an explicit membership change.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

use crate::conn::{Connection, TcpTransport};
use crate::metrics::CacheMetrics;
use crate::protocol::{Opcode, Request};
use crate::ring::HashRing;

/// Response timeout for revival probes; deliberately short so one dead
/// server cannot stall a probe sweep.
const PROBE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);

struct MonitorShared {
    transport: Arc<TcpTransport>,
    ring: Arc<HashRing<SocketAddr>>,
    metrics: Arc<CacheMetrics>,
    connect_timeout: Duration,
    quarantined: Mutex<FxHashSet<SocketAddr>>,
    shutdown: Mutex<bool>,
    signal: Condvar,
}

impl MonitorShared {
    /// One probe sweep over the current quarantined set.
    fn probe_all(&self) {
        let snapshot: Vec<SocketAddr> = self.quarantined.lock().iter().copied().collect();
        for server in snapshot {
            if *self.shutdown.lock() {
                return;
            }
            if self.probe(server) {
                // Only revive if nobody removed the server meanwhile.
                if self.quarantined.lock().remove(&server) {
                    self.ring.add(server);
                    self.metrics.record_revival();
                    info!(server = %server, "server revived");
                }
            } else {
                debug!(server = %server, "revival probe failed");
            }
        }
    }

    /// A quarantined server counts as healthy again once a fresh
    /// connection answers VERSION.
    fn probe(&self, server: SocketAddr) -> bool {
        let mut conn = match Connection::connect(&self.transport, server, self.connect_timeout) {
            Ok(conn) => conn,
            Err(_) => return false,
        };
        let ok = conn
            .round_trip(
                Request::new(Opcode::Version),
                PROBE_RESPONSE_TIMEOUT,
                PROBE_RESPONSE_TIMEOUT,
            )
            .map(|response| response.is_ok())
            .unwrap_or(false);
        conn.close();
        ok
    }
}

/// Quarantine set plus the optional revival thread.
pub struct HealthMonitor {
    shared: Arc<MonitorShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(
        transport: Arc<TcpTransport>,
        ring: Arc<HashRing<SocketAddr>>,
        metrics: Arc<CacheMetrics>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                transport,
                ring,
                metrics,
                connect_timeout,
                quarantined: Mutex::new(FxHashSet::default()),
                shutdown: Mutex::new(false),
                signal: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Starts the revival thread with the given probe interval.
    pub fn start(&self, interval: Duration) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("memkit-health-monitor".into())
            .spawn(move || {
                let mut shutdown = shared.shutdown.lock();
                loop {
                    if *shutdown {
                        return;
                    }
                    let timed_out = shared.signal.wait_for(&mut shutdown, interval).timed_out();
                    if *shutdown {
                        return;
                    }
                    if timed_out {
                        drop(shutdown);
                        shared.probe_all();
                        shutdown = shared.shutdown.lock();
                    }
                }
            })
            .expect("spawn health monitor thread");
        *worker = Some(handle);
    }

    /// Moves a server into quarantine and takes it out of routing.
    ///
    /// Returns `true` when the server was live until now; the caller then
    /// closes the server's pool key.
    pub fn quarantine(&self, server: SocketAddr) -> bool {
        let newly = self.shared.quarantined.lock().insert(server);
        if newly {
            self.shared.ring.remove(&server);
            self.shared.metrics.record_quarantine();
            warn!(server = %server, "server quarantined");
        }
        newly
    }

    /// True while `server` is quarantined.
    pub fn is_quarantined(&self, server: &SocketAddr) -> bool {
        self.shared.quarantined.lock().contains(server)
    }

    /// Drops a server from the quarantine set without reviving it, for
    /// explicit membership removal.
    pub fn forget(&self, server: &SocketAddr) {
        self.shared.quarantined.lock().remove(server);
    }

    /// Current quarantined set.
    pub fn quarantined_servers(&self) -> Vec<SocketAddr> {
        self.shared.quarantined.lock().iter().copied().collect()
    }

    /// Stops the revival thread, if running, and waits for it.
    pub fn stop(&self) {
        *self.shared.shutdown.lock() = true;
        self.shared.signal.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;

    use bytes::BytesMut;

    use super::*;
    use crate::protocol::{Response, ResponseStatus};

    fn monitor_with_ring(servers: &[SocketAddr]) -> (HealthMonitor, Arc<HashRing<SocketAddr>>) {
        let ring = Arc::new(HashRing::new());
        for server in servers {
            ring.add(*server);
        }
        let monitor = HealthMonitor::new(
            Arc::new(TcpTransport::new()),
            Arc::clone(&ring),
            Arc::new(CacheMetrics::new()),
            Duration::from_millis(300),
        );
        (monitor, ring)
    }

    /// Accepts one connection and answers a single VERSION request.
    fn serve_one_version(listener: TcpListener) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = BytesMut::new();
            let request = loop {
                let mut chunk = [0u8; 1024];
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(request) = Request::decode(&mut buf).unwrap() {
                    break request;
                }
            };
            assert_eq!(request.opcode, Opcode::Version);
            let mut response =
                Response::new(Opcode::Version, ResponseStatus::NoError, request.opaque);
            response.value = b"1.6.0".to_vec();
            let mut out = BytesMut::new();
            response.encode(&mut out);
            std::io::Write::write_all(&mut stream, &out).unwrap();
        })
    }

    #[test]
    fn quarantine_removes_from_ring_once() {
        let addr: SocketAddr = "127.0.0.1:11211".parse().unwrap();
        let other: SocketAddr = "127.0.0.1:11212".parse().unwrap();
        let (monitor, ring) = monitor_with_ring(&[addr, other]);

        assert!(monitor.quarantine(addr));
        assert!(!ring.contains(&addr));
        assert!(ring.contains(&other));
        assert!(monitor.is_quarantined(&addr));

        // Second quarantine of the same server is a no-op.
        assert!(!monitor.quarantine(addr));
    }

    #[test]
    fn forget_drops_without_reviving() {
        let addr: SocketAddr = "127.0.0.1:11213".parse().unwrap();
        let (monitor, ring) = monitor_with_ring(&[addr]);

        monitor.quarantine(addr);
        monitor.forget(&addr);
        assert!(!monitor.is_quarantined(&addr));
        assert!(!ring.contains(&addr));
    }

    #[test]
    fn probe_succeeds_against_version_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = serve_one_version(listener);

        let (monitor, _ring) = monitor_with_ring(&[addr]);
        assert!(monitor.shared.probe(addr));
        server.join().unwrap();
    }

    #[test]
    fn probe_fails_against_dead_server() {
        // Bind-then-drop: nothing is listening afterwards.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let (monitor, _ring) = monitor_with_ring(&[addr]);
        assert!(!monitor.shared.probe(addr));
    }

    #[test]
    fn revival_sweep_restores_ring_membership() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (monitor, ring) = monitor_with_ring(&[addr]);

        monitor.quarantine(addr);
        assert!(!ring.contains(&addr));

        let server = serve_one_version(listener);
        monitor.shared.probe_all();

        assert!(!monitor.is_quarantined(&addr));
        assert!(ring.contains(&addr));
        server.join().unwrap();
    }
}
