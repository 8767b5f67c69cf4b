//! Convenient re-exports for typical use.

pub use crate::cache::{CacheBuilder, CacheConfig, MemcachedCache, ValueWithCas, ValueWithKey};
pub use crate::conn::{Connection, ConnectionFactory, TcpTransport};
pub use crate::error::{ConfigError, PoolError, ProtocolError, TopologyError};
pub use crate::manager::CacheManager;
pub use crate::metrics::MetricsSnapshot;
pub use crate::pool::{KeyedObjectPool, PoolConfig, PoolObject, PoolableObjectFactory};
pub use crate::protocol::{Opcode, ResponseStatus};
pub use crate::ring::{HashRing, RingHasher};
pub use crate::topology::{
    parse_server_list, BarrierListener, MetadataCoordinator, ServerListBarrierListener,
};
