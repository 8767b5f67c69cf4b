//! Connection layer: socket factory and the duplex channel.
//!
//! ## Key Components
//!
//! - [`TcpTransport`]: creates configured TCP sockets and carries the
//!   stopped flag the manager flips at shutdown. The manager owns the
//!   transport unless one was supplied externally; an external transport
//!   is shared between managers and never stopped by any of them.
//! - [`Connection`]: one exclusively-owned duplex byte channel to a
//!   server, with blocking timed I/O, a monotonic opaque generator, and
//!   the in-flight correlation table.
//! - [`ConnectionFactory`]: adapts connections to the pool's
//!   create/destroy/validate capabilities.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub mod connection;
pub mod factory;

pub use connection::Connection;
pub use factory::ConnectionFactory;

/// TCP socket factory shared by every cache under one manager.
#[derive(Debug)]
pub struct TcpTransport {
    nodelay: bool,
    stopped: AtomicBool,
}

impl TcpTransport {
    /// Creates a transport with Nagle's algorithm disabled.
    pub fn new() -> Self {
        Self::with_nodelay(true)
    }

    /// Creates a transport with an explicit nodelay setting.
    pub fn with_nodelay(nodelay: bool) -> Self {
        Self {
            nodelay,
            stopped: AtomicBool::new(false),
        }
    }

    /// Opens a configured socket to `server` within `timeout`.
    ///
    /// Fails immediately once the transport has been stopped.
    pub fn connect(&self, server: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
        if self.is_stopped() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport has been stopped",
            ));
        }
        let stream = TcpStream::connect_timeout(&server, timeout)?;
        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }

    /// Rejects new connections from now on. Existing sockets are owned by
    /// their connections and close when those are destroyed.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// True once [`stop`](Self::stop) has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_transport_refuses_to_connect() {
        let transport = TcpTransport::new();
        transport.stop();
        assert!(transport.is_stopped());

        let addr: SocketAddr = "127.0.0.1:11211".parse().unwrap();
        let err = transport
            .connect(addr, Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
