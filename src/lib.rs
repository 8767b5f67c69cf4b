//! memkit: memcached client toolkit.
//!
//! Multiplexes a set of memcached servers behind one logical cache:
//! consistent-hash routing, per-server connection pooling, the binary
//! wire protocol, health monitoring with failover, and parallel
//! multi-key operations.
//!
//! ```no_run
//! use memkit::prelude::*;
//!
//! let manager = CacheManager::new();
//! let cache = manager
//!     .cache_builder("sessions")
//!     .servers(["127.0.0.1:11211".parse().unwrap()])
//!     .build()
//!     .unwrap();
//!
//! cache.set(b"user:42", b"alice", 300, false);
//! assert_eq!(cache.get(b"user:42"), Some(b"alice".to_vec()));
//! ```

pub mod cache;
pub mod conn;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod protocol;
pub mod ring;
pub mod topology;

pub mod prelude;
