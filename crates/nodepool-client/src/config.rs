//! Pool tuning knobs.
//!
//! Every threshold and interval the pool uses lives here with a default.
//! The renewal tiers and discovery readiness thresholds have no canonical
//! production values; callers running a small private network will usually
//! want to lower `minimum`, `enough` and the discovery thresholds.

use std::time::Duration;

use nodepool_common::transport::MAX_LINE_LEN;

/// Delay before the next renewal pass, picked by how healthy the pool is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalConfig {
    /// Alive connections below `minimum`
    pub too_few: Duration,
    /// Alive connections between `minimum` and `enough`
    pub few: Duration,
    /// Alive connections at or above `enough`
    pub enough: Duration,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            too_few: Duration::from_secs(5),
            few: Duration::from_secs(60),
            enough: Duration::from_secs(10 * 60),
        }
    }
}

/// Peer exchange limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Stop expanding once this many nodes are connected...
    pub enough_alive_nodes: usize,
    /// ...and this many records are known
    pub enough_records: usize,
    /// Concurrent node visits
    pub max_parallel: usize,
    /// `Count` passed to `Node.List`
    pub peer_list_count: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enough_alive_nodes: 5,
            enough_records: 12,
            max_parallel: 5,
            peer_list_count: 100,
        }
    }
}

/// Per-connection timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Time allowed to establish the secured stream
    pub handshake_timeout: Duration,
    /// Silence after which the connection is torn down
    pub idle_timeout: Duration,
    /// Longest inbound line before the connection is failed
    pub max_line_len: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(10 * 60),
            max_line_len: MAX_LINE_LEN,
        }
    }
}

/// Pool configuration.
///
/// # Default Configuration
///
/// - `minimum`: 3 connections before the pool reports available
/// - `enough`: 5 connections targeted by each renewal pass
/// - `handshake_timeout`: 2s, `idle_timeout`: 10 minutes
/// - `call_timeout`: 10s
/// - `max_dead_retention`: 7 days, `alive_expiry`: 24 hours
/// - `hint_refresh_interval`: 1 hour
///
/// # Example
///
/// ```rust
/// use nodepool_client::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig {
///     minimum: 1,
///     enough: 2,
///     call_timeout: Duration::from_secs(3),
///     ..PoolConfig::default()
/// };
/// assert_eq!(config.connection_options().handshake_timeout, Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Quorum floor: alive connections required for `Available`
    pub minimum: usize,
    /// Target number of open connections
    pub enough: usize,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
    /// Default deadline for calls made through the pool
    pub call_timeout: Duration,
    pub renewal: RenewalConfig,
    pub discovery: DiscoveryConfig,
    /// How long a dead record is kept after it was last seen
    pub max_dead_retention: Duration,
    /// A record not seen alive for this long is no longer counted alive
    pub alive_expiry: Duration,
    /// Minimum spacing between hint resolutions while the pool is healthy
    pub hint_refresh_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            minimum: 3,
            enough: 5,
            handshake_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(10 * 60),
            call_timeout: Duration::from_secs(10),
            renewal: RenewalConfig::default(),
            discovery: DiscoveryConfig::default(),
            max_dead_retention: Duration::from_secs(7 * 24 * 60 * 60),
            alive_expiry: Duration::from_secs(24 * 60 * 60),
            hint_refresh_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl PoolConfig {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            handshake_timeout: self.handshake_timeout,
            idle_timeout: self.idle_timeout,
            ..ConnectionOptions::default()
        }
    }

    /// Renewal delay for the given number of alive connections
    pub fn renewal_delay(&self, alive: usize) -> Duration {
        if alive < self.minimum {
            self.renewal.too_few
        } else if alive < self.enough {
            self.renewal.few
        } else {
            self.renewal.enough
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.minimum, 3);
        assert_eq!(config.enough, 5);
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert_eq!(config.discovery.max_parallel, 5);
        assert_eq!(config.hint_refresh_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_renewal_tiers() {
        let config = PoolConfig {
            minimum: 2,
            enough: 4,
            ..PoolConfig::default()
        };

        assert_eq!(config.renewal_delay(0), config.renewal.too_few);
        assert_eq!(config.renewal_delay(1), config.renewal.too_few);
        assert_eq!(config.renewal_delay(2), config.renewal.few);
        assert_eq!(config.renewal_delay(3), config.renewal.few);
        assert_eq!(config.renewal_delay(4), config.renewal.enough);
        assert_eq!(config.renewal_delay(9), config.renewal.enough);
    }

    #[test]
    fn test_connection_options_follow_pool_config() {
        let config = PoolConfig {
            handshake_timeout: Duration::from_millis(250),
            idle_timeout: Duration::from_secs(30),
            ..PoolConfig::default()
        };
        let options = config.connection_options();
        assert_eq!(options.handshake_timeout, Duration::from_millis(250));
        assert_eq!(options.idle_timeout, Duration::from_secs(30));
    }
}
