//! Pool capabilities for connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::conn::{Connection, TcpTransport};
use crate::error::CreateError;
use crate::pool::{PoolObject, PoolableObjectFactory};

/// Creates, validates, and destroys pooled connections for server keys.
///
/// A connect that exceeds `connect_timeout` is reported as
/// [`CreateError::Timeout`] so the pool surfaces it as a distinct borrow
/// failure. Validation is a cheap liveness check on the broken flag; a
/// connection poisoned by a transport error or timeout never re-enters an
/// idle queue.
pub struct ConnectionFactory {
    transport: Arc<TcpTransport>,
    connect_timeout: Duration,
}

impl ConnectionFactory {
    pub fn new(transport: Arc<TcpTransport>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
        }
    }
}

impl PoolableObjectFactory<SocketAddr, Connection> for ConnectionFactory {
    fn create(&self, key: &SocketAddr) -> Result<Connection, CreateError> {
        Connection::connect(&self.transport, *key, self.connect_timeout).map_err(|err| {
            debug!(server = %key, error = %err, "failed to establish connection");
            CreateError::from_io(err)
        })
    }

    fn destroy(&self, key: &SocketAddr, mut value: Connection) {
        trace!(server = %key, connection = value.instance_id(), "destroying connection");
        value.close();
    }

    fn validate(&self, _key: &SocketAddr, value: &Connection) -> bool {
        value.is_open()
    }
}
