//! Keyed object pool: per-key bounded queues of reusable resources.
//!
//! The pool multiplexes many small pools behind one handle, one per key
//! (for the cache, one per server address). Each per-key pool keeps a
//! blocking idle queue plus a size hint, and the pool as a whole tracks
//! borrowed objects in an active map so a return can tell managed
//! instances apart from disposable overflow.
//!
//! ## Key Components
//!
//! - [`PoolableObjectFactory`]: the three capabilities the pool is
//!   polymorphic over: `create`, `destroy`, and `validate`.
//! - [`PoolObject`]: process-unique identity for the active-object map.
//! - [`PoolConfig`]: `min`/`max` bounds (with `usize::MAX` meaning
//!   unbounded), borrow/return validation, disposable overflow, and the
//!   keep-alive eviction interval.
//! - [`KeyedObjectPool`]: the implementation.
//!
//! ## Example Usage
//!
//! ```
//! use memkit::error::CreateError;
//! use memkit::pool::{KeyedObjectPool, PoolConfig, PoolObject, PoolableObjectFactory};
//!
//! struct Token(u64);
//! impl PoolObject for Token {
//!     fn instance_id(&self) -> u64 {
//!         self.0
//!     }
//! }
//!
//! struct TokenFactory;
//! impl PoolableObjectFactory<String, Token> for TokenFactory {
//!     fn create(&self, _key: &String) -> Result<Token, CreateError> {
//!         Ok(Token(7))
//!     }
//!     fn destroy(&self, _key: &String, _value: Token) {}
//!     fn validate(&self, _key: &String, _value: &Token) -> bool {
//!         true
//!     }
//! }
//!
//! let pool = KeyedObjectPool::new(TokenFactory, PoolConfig::default());
//! let token = pool.borrow(&"a".to_string(), None).unwrap();
//! pool.return_object(&"a".to_string(), token);
//! assert_eq!(pool.pool_size(&"a".to_string()), 1);
//! # pool.destroy();
//! ```

use std::time::Duration;

use crate::error::CreateError;

pub mod keyed;

pub use keyed::KeyedObjectPool;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// The capabilities a pool needs from its resource type: create an instance
/// for a key, destroy one, and judge whether one is still usable.
pub trait PoolableObjectFactory<K, V>: Send + Sync {
    /// Creates a new instance for `key`.
    ///
    /// A connect timeout must be reported as [`CreateError::Timeout`] so
    /// the pool can surface it distinctly from other creation failures.
    fn create(&self, key: &K) -> Result<V, CreateError>;

    /// Destroys an instance. Must not fail; cleanup problems are logged.
    fn destroy(&self, key: &K, value: V);

    /// True if the instance is still usable.
    fn validate(&self, key: &K, value: &V) -> bool;
}

/// Process-unique identity for pooled objects.
///
/// The pool's active map is keyed by this id rather than by the object
/// itself, since a borrowed object is owned by the borrower.
pub trait PoolObject {
    fn instance_id(&self) -> u64;
}

// ---------------------------------------------------------------------------
// PoolConfig
// ---------------------------------------------------------------------------

/// Sentinel for an unbounded per-key pool.
pub const UNBOUNDED: usize = usize::MAX;

/// Pool tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Instances kept alive per key; the eviction task never shrinks a
    /// per-key pool below this.
    pub min: usize,
    /// Upper bound per key; [`UNBOUNDED`] disables the bound.
    pub max: usize,
    /// Validate instances before handing them to a borrower.
    pub borrow_validation: bool,
    /// Validate instances before re-queuing them on return.
    pub return_validation: bool,
    /// When the pool is exhausted, create an untracked one-shot instance
    /// instead of failing; it is destroyed on return.
    pub disposable: bool,
    /// Interval for the idle-eviction task; `None` disables eviction.
    pub keep_alive: Option<Duration>,
}

impl PoolConfig {
    /// Returns the config with `max` raised to `min` if the two crossed.
    pub fn normalized(mut self) -> Self {
        if self.min > self.max {
            self.max = self.min;
        }
        self
    }
}

impl Default for PoolConfig {
    /// Matches the historical defaults: `min = 5`, unbounded `max`,
    /// validations off, disposable off, 30-minute keep-alive.
    fn default() -> Self {
        Self {
            min: 5,
            max: UNBOUNDED,
            borrow_validation: false,
            return_validation: false,
            disposable: false,
            keep_alive: Some(Duration::from_secs(30 * 60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_historical_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min, 5);
        assert_eq!(config.max, UNBOUNDED);
        assert!(!config.borrow_validation);
        assert!(!config.return_validation);
        assert!(!config.disposable);
        assert_eq!(config.keep_alive, Some(Duration::from_secs(1800)));
    }

    #[test]
    fn normalized_raises_crossed_max() {
        let config = PoolConfig {
            min: 10,
            max: 3,
            ..PoolConfig::default()
        }
        .normalized();
        assert_eq!(config.max, 10);
    }
}
