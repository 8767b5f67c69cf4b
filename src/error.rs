//! Error types for the memkit library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when cache, pool, or manager configuration
//!   parameters are invalid (e.g. an empty server list, `min > max`).
//! - [`ProtocolError`]: Returned when a wire frame cannot be decoded
//!   (bad magic, unknown opcode or status, inconsistent header lengths).
//! - [`PoolError`]: Returned by keyed-pool borrows (exhausted, no valid
//!   object, connect timeout, pool closed).
//! - [`CreateError`]: Returned by poolable-object factories so the pool can
//!   distinguish a connect timeout from any other creation failure.
//! - [`OpError`]: Internal per-operation failure used by the cache
//!   front-end; public commands translate it into `false`/`None`/absent
//!   map entries and never surface it across the API.
//! - [`TopologyError`]: Returned by the external-config barrier plumbing.
//!
//! Expected failures (key not found, CAS miss, pool exhausted) travel as
//! tagged results; panics are reserved for programmer errors such as using
//! a cache after `stop()`.

use std::fmt;
use std::io;

use crate::protocol::ResponseStatus;

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when configuration parameters are invalid.
///
/// Produced by fallible builders such as
/// [`CacheBuilder::build`](crate::cache::CacheBuilder::build). Carries a
/// human-readable description of which parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

/// Error returned when a binary-protocol frame cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First byte of a response was not the response magic (0x81).
    BadMagic(u8),
    /// Opcode byte did not map to any known command.
    UnknownOpcode(u8),
    /// Status field did not map to any known response status.
    UnknownStatus(u16),
    /// Header length fields are mutually inconsistent
    /// (key length + extras length exceed the total body length).
    InconsistentLengths {
        key_len: usize,
        extras_len: usize,
        total_body_len: usize,
    },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadMagic(b) => write!(f, "bad response magic: {:#04x}", b),
            ProtocolError::UnknownOpcode(b) => write!(f, "unknown opcode: {:#04x}", b),
            ProtocolError::UnknownStatus(s) => write!(f, "unknown response status: {:#06x}", s),
            ProtocolError::InconsistentLengths {
                key_len,
                extras_len,
                total_body_len,
            } => write!(
                f,
                "inconsistent frame lengths: key={} extras={} body={}",
                key_len, extras_len, total_body_len
            ),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ---------------------------------------------------------------------------
// CreateError
// ---------------------------------------------------------------------------

/// Error returned by a poolable-object factory's `create`.
///
/// The pool maps `Timeout` to [`PoolError::Timeout`] and everything else to
/// [`PoolError::NoValidObject`], mirroring how a connect timeout is reported
/// differently from a refused connection.
#[derive(Debug)]
pub enum CreateError {
    /// Establishing the underlying resource timed out.
    Timeout,
    /// Creation failed for any other reason.
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl CreateError {
    /// Classifies an I/O error from a connect attempt.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => CreateError::Timeout,
            _ => CreateError::Failed(Box::new(err)),
        }
    }
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::Timeout => f.write_str("object creation timed out"),
            CreateError::Failed(e) => write!(f, "object creation failed: {}", e),
        }
    }
}

impl std::error::Error for CreateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CreateError::Timeout => None,
            CreateError::Failed(e) => Some(e.as_ref()),
        }
    }
}

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

/// Error returned by keyed-pool operations.
#[derive(Debug)]
pub enum PoolError {
    /// The pool is bounded, non-disposable, and the borrow timed out
    /// waiting for an idle object.
    Exhausted,
    /// Creation or validation kept failing; no valid object could be
    /// produced within the retry budget.
    NoValidObject(Option<Box<dyn std::error::Error + Send + Sync>>),
    /// The underlying resource could not be established in time.
    Timeout,
    /// The pool (or the per-key pool) has been destroyed.
    Closed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted => f.write_str("pool is exhausted"),
            PoolError::NoValidObject(Some(e)) => write!(f, "no valid object: {}", e),
            PoolError::NoValidObject(None) => f.write_str("no valid object"),
            PoolError::Timeout => f.write_str("object establish timed out"),
            PoolError::Closed => f.write_str("pool has been destroyed"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::NoValidObject(Some(e)) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<CreateError> for PoolError {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::Timeout => PoolError::Timeout,
            CreateError::Failed(e) => PoolError::NoValidObject(Some(e)),
        }
    }
}

// ---------------------------------------------------------------------------
// OpError
// ---------------------------------------------------------------------------

/// Which timed-out phase of an operation produced a [`OpError::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// The request could not be written within the write timeout.
    Write,
    /// No correlated response arrived within the response timeout.
    Response,
}

/// Internal per-operation failure.
///
/// Never crosses the public cache API: scalar commands translate it into
/// `false`/`None` and multi-ops into per-key failure entries. Transport and
/// timeout variants additionally invalidate the connection and quarantine
/// the server when failover is enabled.
#[derive(Debug)]
pub enum OpError {
    /// Connect/read/write failure on the wire.
    Transport(io::Error),
    /// Write or response deadline elapsed.
    Timeout(TimeoutPhase),
    /// The response could not be decoded.
    Protocol(ProtocolError),
    /// The server answered with a non-`No_Error` status.
    Server(ResponseStatus),
    /// The connection pool could not produce a connection.
    Pool(PoolError),
}

impl OpError {
    /// True for failures that poison the connection and should quarantine
    /// the server (transport errors and timeouts, not server statuses).
    #[inline]
    pub fn is_transport_level(&self) -> bool {
        matches!(self, OpError::Transport(_) | OpError::Timeout(_))
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpError::Transport(e) => write!(f, "transport error: {}", e),
            OpError::Timeout(TimeoutPhase::Write) => f.write_str("write timed out"),
            OpError::Timeout(TimeoutPhase::Response) => f.write_str("response timed out"),
            OpError::Protocol(e) => write!(f, "protocol error: {}", e),
            OpError::Server(status) => write!(f, "server status: {}", status.message()),
            OpError::Pool(e) => write!(f, "pool error: {}", e),
        }
    }
}

impl std::error::Error for OpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpError::Transport(e) => Some(e),
            OpError::Protocol(e) => Some(e),
            OpError::Pool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for OpError {
    fn from(err: ProtocolError) -> Self {
        OpError::Protocol(err)
    }
}

impl From<PoolError> for OpError {
    fn from(err: PoolError) -> Self {
        OpError::Pool(err)
    }
}

// ---------------------------------------------------------------------------
// TopologyError
// ---------------------------------------------------------------------------

/// Error returned by the external-config barrier plumbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyError(String);

impl TopologyError {
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TopologyError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- ConfigError ------------------------------------------------------

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("server list must not be empty");
        assert_eq!(err.to_string(), "server list must not be empty");
    }

    #[test]
    fn config_implements_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<ConfigError>();
    }

    // -- ProtocolError ----------------------------------------------------

    #[test]
    fn protocol_display_includes_hex() {
        assert_eq!(
            ProtocolError::BadMagic(0x42).to_string(),
            "bad response magic: 0x42"
        );
        assert_eq!(
            ProtocolError::UnknownStatus(0x0099).to_string(),
            "unknown response status: 0x0099"
        );
    }

    #[test]
    fn inconsistent_lengths_display() {
        let err = ProtocolError::InconsistentLengths {
            key_len: 10,
            extras_len: 4,
            total_body_len: 8,
        };
        assert!(err.to_string().contains("key=10"));
    }

    // -- CreateError / PoolError ------------------------------------------

    #[test]
    fn create_error_classifies_io_timeout() {
        let err = CreateError::from_io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(err, CreateError::Timeout));

        let err = CreateError::from_io(io::Error::new(io::ErrorKind::ConnectionRefused, "down"));
        assert!(matches!(err, CreateError::Failed(_)));
    }

    #[test]
    fn pool_error_from_create_error() {
        assert!(matches!(
            PoolError::from(CreateError::Timeout),
            PoolError::Timeout
        ));
        let failed = CreateError::Failed("boom".into());
        assert!(matches!(
            PoolError::from(failed),
            PoolError::NoValidObject(Some(_))
        ));
    }

    // -- OpError -----------------------------------------------------------

    #[test]
    fn op_error_transport_level_classification() {
        assert!(OpError::Timeout(TimeoutPhase::Response).is_transport_level());
        assert!(
            OpError::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "x"))
                .is_transport_level()
        );
        assert!(!OpError::Server(ResponseStatus::KeyNotFound).is_transport_level());
        assert!(!OpError::Pool(PoolError::Exhausted).is_transport_level());
    }
}
