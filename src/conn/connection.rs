//! One logical duplex channel to a memcached server.
//!
//! A connection is owned exclusively: either it sits in a pool's idle
//! queue or exactly one borrowing thread holds it, so its send/receive
//! state needs no internal locking. Correlation works through the opaque
//! field: every tracked request draws a monotonically-increasing 32-bit
//! opaque and registers it in the in-flight table; responses are matched
//! (and their entries retired) by opaque echo. Responses whose opaque is
//! unknown belong to requests a previous borrower abandoned and are
//! discarded.
//!
//! Any transport error or elapsed deadline marks the connection broken.
//! A broken connection fails pool validation, so it is destroyed instead
//! of being reused; its remaining in-flight entries are drained at that
//! point and reported to the caller as timed out.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::conn::TcpTransport;
use crate::error::{OpError, TimeoutPhase};
use crate::pool::PoolObject;
use crate::protocol::{Request, Response};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const READ_CHUNK: usize = 8 * 1024;

/// An entry in the in-flight table.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    issued_at: Instant,
}

/// A pooled, exclusively-owned connection.
pub struct Connection {
    id: u64,
    server: SocketAddr,
    stream: TcpStream,
    read_buf: BytesMut,
    next_opaque: u32,
    in_flight: FxHashMap<u32, InFlight>,
    broken: bool,
}

impl Connection {
    /// Opens a connection to `server` through `transport`.
    pub fn connect(
        transport: &TcpTransport,
        server: SocketAddr,
        timeout: Duration,
    ) -> std::io::Result<Self> {
        let stream = transport.connect(server, timeout)?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, server = %server, "connection established");
        Ok(Self {
            id,
            server,
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            next_opaque: 0,
            in_flight: FxHashMap::default(),
            broken: false,
        })
    }

    /// The server this connection is bound to.
    #[inline]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// False once a transport error or timeout has poisoned the channel.
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.broken
    }

    /// Draws the next correlation id. Within one connection no two
    /// in-flight requests ever share an opaque.
    pub fn next_opaque(&mut self) -> u32 {
        let opaque = self.next_opaque;
        self.next_opaque = self.next_opaque.wrapping_add(1);
        opaque
    }

    /// Registers an opaque as awaiting a response.
    pub fn track(&mut self, opaque: u32) {
        self.in_flight.insert(
            opaque,
            InFlight {
                issued_at: Instant::now(),
            },
        );
    }

    /// Retires an opaque that will receive no further responses.
    pub fn untrack(&mut self, opaque: u32) {
        self.in_flight.remove(&opaque);
    }

    /// Number of opaques still awaiting responses.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Age of the oldest in-flight entry (diagnostics).
    pub fn oldest_in_flight(&self) -> Option<Duration> {
        self.in_flight
            .values()
            .map(|entry| entry.issued_at.elapsed())
            .max()
    }

    /// Encodes and writes `requests` within `write_timeout`.
    ///
    /// Quiet requests expect no success response; the caller decides which
    /// opaques to [`track`](Self::track) before sending.
    pub fn send(&mut self, requests: &[Request], write_timeout: Duration) -> Result<(), OpError> {
        let mut buf = BytesMut::with_capacity(requests.iter().map(Request::encoded_len).sum());
        for request in requests {
            request.encode(&mut buf);
        }
        if let Err(err) = self.stream.set_write_timeout(Some(write_timeout)) {
            return Err(self.fail(OpError::Transport(err)));
        }
        match self.stream.write_all(&buf) {
            Ok(()) => Ok(()),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(self.fail(OpError::Timeout(TimeoutPhase::Write)))
            },
            Err(err) => Err(self.fail(OpError::Transport(err))),
        }
    }

    /// Reads until a tracked response arrives or `response_timeout`
    /// elapses. Stale responses (unknown opaque) are discarded.
    pub fn receive(&mut self, response_timeout: Duration) -> Result<Response, OpError> {
        let deadline = Instant::now() + response_timeout;
        loop {
            let response = self.next_frame(deadline)?;
            if self.in_flight.remove(&response.opaque).is_some() {
                return Ok(response);
            }
            trace!(
                connection = self.id,
                opaque = response.opaque,
                "discarding stale response"
            );
        }
    }

    /// Like [`receive`](Self::receive), but matches a single opaque and
    /// leaves it tracked, for commands that stream several responses under
    /// one opaque (STAT). The caller ends the stream with
    /// [`untrack`](Self::untrack).
    pub fn receive_keyed(
        &mut self,
        opaque: u32,
        response_timeout: Duration,
    ) -> Result<Response, OpError> {
        let deadline = Instant::now() + response_timeout;
        loop {
            let response = self.next_frame(deadline)?;
            if response.opaque == opaque {
                return Ok(response);
            }
            self.in_flight.remove(&response.opaque);
            trace!(
                connection = self.id,
                opaque = response.opaque,
                "discarding stale response"
            );
        }
    }

    /// Sends one request and awaits its correlated response.
    ///
    /// The request's opaque is assigned here; the caller inspects the
    /// response status.
    pub fn round_trip(
        &mut self,
        mut request: Request,
        write_timeout: Duration,
        response_timeout: Duration,
    ) -> Result<Response, OpError> {
        let opaque = self.next_opaque();
        request.opaque = opaque;
        self.track(opaque);
        self.send(std::slice::from_ref(&request), write_timeout)?;
        loop {
            let response = self.receive(response_timeout)?;
            if response.opaque == opaque {
                return Ok(response);
            }
            // A tracked response for an earlier batch opaque; the caller
            // that owned it has given up, so it is already retired.
            trace!(
                connection = self.id,
                opaque = response.opaque,
                "retiring superseded response"
            );
        }
    }

    /// Sends one quiet request without awaiting any response.
    pub fn send_quiet(
        &mut self,
        mut request: Request,
        write_timeout: Duration,
    ) -> Result<(), OpError> {
        request.opaque = self.next_opaque();
        self.send(std::slice::from_ref(&request), write_timeout)
    }

    /// Marks the channel broken and drains the in-flight table, returning
    /// the orphaned opaques so the caller can report them as timed out.
    pub fn fail_in_flight(&mut self) -> Vec<u32> {
        self.broken = true;
        let orphans: Vec<u32> = self.in_flight.drain().map(|(opaque, _)| opaque).collect();
        if !orphans.is_empty() {
            debug!(
                connection = self.id,
                orphans = orphans.len(),
                "drained in-flight entries from broken connection"
            );
        }
        orphans
    }

    /// Closes the socket. Further operations fail.
    pub fn close(&mut self) {
        self.broken = true;
        self.in_flight.clear();
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Decodes the next frame, reading more bytes as needed up to
    /// `deadline`.
    fn next_frame(&mut self, deadline: Instant) -> Result<Response, OpError> {
        loop {
            match Response::decode(&mut self.read_buf) {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => self.fill_read_buf(deadline)?,
                Err(err) => return Err(self.fail(OpError::Protocol(err))),
            }
        }
    }

    /// One timed read into the accumulator.
    fn fill_read_buf(&mut self, deadline: Instant) -> Result<(), OpError> {
        let now = Instant::now();
        if now >= deadline {
            return Err(self.fail(OpError::Timeout(TimeoutPhase::Response)));
        }
        if let Err(err) = self.stream.set_read_timeout(Some(deadline - now)) {
            return Err(self.fail(OpError::Transport(err)));
        }
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => {
                let err = std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                );
                Err(self.fail(OpError::Transport(err)))
            },
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                Ok(())
            },
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(()),
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(self.fail(OpError::Timeout(TimeoutPhase::Response)))
            },
            Err(err) => Err(self.fail(OpError::Transport(err))),
        }
    }

    fn fail(&mut self, err: OpError) -> OpError {
        self.fail_in_flight();
        err
    }
}

impl PoolObject for Connection {
    fn instance_id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("open", &!self.broken)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn listener_pair() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn opaque_ids_are_unique_while_in_flight() {
        let (listener, addr) = listener_pair();
        let transport = TcpTransport::new();
        let mut conn = Connection::connect(&transport, addr, Duration::from_secs(1)).unwrap();
        let _accepted = listener.accept().unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let opaque = conn.next_opaque();
            conn.track(opaque);
            assert!(seen.insert(opaque));
        }
        assert_eq!(conn.in_flight_len(), 1000);

        let orphans = conn.fail_in_flight();
        assert_eq!(orphans.len(), 1000);
        assert_eq!(conn.in_flight_len(), 0);
        assert!(!conn.is_open());
    }

    #[test]
    fn opaque_counter_wraps() {
        let (listener, addr) = listener_pair();
        let transport = TcpTransport::new();
        let mut conn = Connection::connect(&transport, addr, Duration::from_secs(1)).unwrap();
        let _accepted = listener.accept().unwrap();

        conn.next_opaque = u32::MAX;
        assert_eq!(conn.next_opaque(), u32::MAX);
        assert_eq!(conn.next_opaque(), 0);
    }

    #[test]
    fn receive_times_out_and_breaks_the_connection() {
        let (listener, addr) = listener_pair();
        let transport = TcpTransport::new();
        let mut conn = Connection::connect(&transport, addr, Duration::from_secs(1)).unwrap();
        let _accepted = listener.accept().unwrap();

        conn.track(0);
        let err = conn.receive(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, OpError::Timeout(TimeoutPhase::Response)));
        assert!(!conn.is_open());
        // The orphaned entry was drained when the deadline fired.
        assert_eq!(conn.in_flight_len(), 0);
    }

    #[test]
    fn peer_close_is_a_transport_error() {
        let (listener, addr) = listener_pair();
        let transport = TcpTransport::new();
        let mut conn = Connection::connect(&transport, addr, Duration::from_secs(1)).unwrap();
        let accepted = listener.accept().unwrap();
        drop(accepted);

        conn.track(0);
        let err = conn.receive(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, OpError::Transport(_)));
        assert!(!conn.is_open());
    }

    #[test]
    fn stale_responses_are_discarded() {
        let (listener, addr) = listener_pair();
        let transport = TcpTransport::new();
        let mut conn = Connection::connect(&transport, addr, Duration::from_secs(1)).unwrap();
        let (mut accepted, _) = listener.accept().unwrap();

        // Server sends a response for an opaque nobody is waiting on,
        // followed by the one the client tracks.
        let mut out = BytesMut::new();
        Response::new(
            crate::protocol::Opcode::Get,
            crate::protocol::ResponseStatus::NoError,
            99,
        )
        .encode(&mut out);
        Response::new(
            crate::protocol::Opcode::Get,
            crate::protocol::ResponseStatus::NoError,
            7,
        )
        .encode(&mut out);
        accepted.write_all(&out).unwrap();

        conn.track(7);
        let response = conn.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(response.opaque, 7);
        assert!(conn.is_open());
    }
}
