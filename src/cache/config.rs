//! Cache configuration.

use std::time::Duration;

use crate::pool::PoolConfig;

/// Tuning parameters for a [`MemcachedCache`](crate::cache::MemcachedCache).
///
/// The borrow timeout for pooled connections is the connect timeout: a
/// caller never waits longer for a pooled connection than it would for a
/// fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Deadline for establishing a TCP connection.
    pub connect_timeout: Duration,
    /// Deadline for writing one request or batch.
    pub write_timeout: Duration,
    /// Deadline for receiving a correlated response.
    pub response_timeout: Duration,
    /// Revival-probe interval for quarantined servers; `None` disables the
    /// probe thread (quarantined servers then rejoin only via explicit
    /// membership changes).
    pub health_monitor_interval: Option<Duration>,
    /// Walk the ring to alternative servers when the owner fails.
    pub failover: bool,
    /// Whole-walk retries for a failed failover pass.
    pub retry_count: usize,
    /// Require non-empty remote configuration at barrier init.
    pub prefer_remote_config: bool,
    /// Advertise management probes. The probes themselves live outside
    /// this crate; the flag only gates registration.
    pub jmx_enabled: bool,
    /// Connection-pool tuning.
    pub pool: PoolConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(5000),
            write_timeout: Duration::from_millis(5000),
            response_timeout: Duration::from_millis(10_000),
            health_monitor_interval: Some(Duration::from_secs(60)),
            failover: true,
            retry_count: 1,
            prefer_remote_config: false,
            jmx_enabled: false,
            pool: PoolConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
        assert_eq!(config.write_timeout, Duration::from_millis(5000));
        assert_eq!(config.response_timeout, Duration::from_millis(10_000));
        assert_eq!(config.health_monitor_interval, Some(Duration::from_secs(60)));
        assert!(config.failover);
        assert_eq!(config.retry_count, 1);
        assert!(!config.prefer_remote_config);
        assert!(!config.jmx_enabled);
        assert_eq!(config.pool.min, 5);
    }
}
