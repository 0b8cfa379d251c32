use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// [`Pool`] configuration.
///
/// All durations are carried as milliseconds so the whole structure stays
/// plainly serializable; a value of `0` disables the respective feature.
///
/// [`Pool`]: super::Pool
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of independent partitions the connection set is split into.
    pub partition_count: usize,

    /// Connections pre-created per partition at pool construction.
    pub min_connections_per_partition: usize,

    /// Upper bound of connections per partition; also the capacity of each
    /// partition's free queue.
    pub max_connections_per_partition: usize,

    /// Batch size used by the growth worker when refilling a partition.
    pub acquire_increment: usize,

    /// Period of the idle connection tester, in milliseconds. `0` disables
    /// idle testing entirely.
    pub idle_connection_test_period_ms: u64,

    /// Age after which an idle connection is evicted, in milliseconds.
    /// `0` disables age-based eviction.
    pub idle_max_age_ms: u64,

    /// Statement executed to probe a connection. When absent the probe
    /// falls back to a metadata lookup of a sentinel table name.
    pub connection_test_statement: Option<String>,

    /// Release helper workers started per partition. `0` means releases
    /// run their check-in work on the caller's task.
    pub release_helper_count: usize,

    /// Connection URL handed to the factory.
    pub url: String,

    /// User name handed to the factory.
    pub username: String,

    /// Password handed to the factory.
    pub password: String,
}

impl PoolConfig {
    /// The idle tester period, or `None` when disabled.
    #[must_use]
    pub fn idle_connection_test_period(&self) -> Option<Duration> {
        match self.idle_connection_test_period_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// The idle eviction age, or `None` when disabled.
    #[must_use]
    pub fn idle_max_age(&self) -> Option<Duration> {
        match self.idle_max_age_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Clamps out-of-range values instead of failing construction.
    pub(crate) fn sanitized(mut self) -> Self {
        if self.partition_count == 0 {
            warn!("partition_count of 0 clamped to 1");
            self.partition_count = 1;
        }
        if self.max_connections_per_partition == 0 {
            warn!("max_connections_per_partition of 0 clamped to 1");
            self.max_connections_per_partition = 1;
        }
        if self.min_connections_per_partition > self.max_connections_per_partition {
            warn!(
                min = self.min_connections_per_partition,
                max = self.max_connections_per_partition,
                "min_connections_per_partition exceeds maximum; clamping"
            );
            self.min_connections_per_partition = self.max_connections_per_partition;
        }
        if self.acquire_increment == 0 {
            warn!("acquire_increment of 0 clamped to 1");
            self.acquire_increment = 1;
        }
        self
    }
}

impl Default for PoolConfig {
    /// A modest warm set spread over two partitions, with the per-partition
    /// bound scaled to the physical CPU count and no release helpers.
    fn default() -> Self {
        Self {
            partition_count: 2,
            min_connections_per_partition: 2,
            max_connections_per_partition: num_cpus::get_physical().max(1) * 4,
            acquire_increment: 2,
            idle_connection_test_period_ms: 60_000,
            idle_max_age_ms: 0,
            connection_test_statement: None,
            release_helper_count: 0,
            url: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PoolConfig;

    #[test]
    fn sanitize_clamps_zeros() {
        let cfg = PoolConfig {
            partition_count: 0,
            max_connections_per_partition: 0,
            acquire_increment: 0,
            ..PoolConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.partition_count, 1);
        assert_eq!(cfg.max_connections_per_partition, 1);
        assert_eq!(cfg.acquire_increment, 1);
    }

    #[test]
    fn sanitize_enforces_min_le_max() {
        let cfg = PoolConfig {
            min_connections_per_partition: 10,
            max_connections_per_partition: 4,
            ..PoolConfig::default()
        }
        .sanitized();
        assert_eq!(cfg.min_connections_per_partition, 4);
    }

    #[test]
    fn zero_periods_disable() {
        let cfg = PoolConfig {
            idle_connection_test_period_ms: 0,
            idle_max_age_ms: 0,
            ..PoolConfig::default()
        };
        assert!(cfg.idle_connection_test_period().is_none());
        assert!(cfg.idle_max_age().is_none());
    }

    #[test]
    fn serde_round_trip() {
        let cfg = PoolConfig {
            partition_count: 3,
            connection_test_statement: Some("SELECT 1".into()),
            ..PoolConfig::default()
        };
        let json = serde_json::to_string(&cfg).expect("serialize");
        let back: PoolConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.partition_count, 3);
        assert_eq!(back.connection_test_statement.as_deref(), Some("SELECT 1"));
    }
}
