//! Configuration for the cache engine.
//!
//! # Example
//!
//! ```
//! use replication::CacheConfig;
//!
//! let config = CacheConfig {
//!     bandwidth_per_copy: 1024.0 * 1024.0,
//!     copies_expand_step: 2,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use corelib::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

const MIB: f64 = 1024.0 * 1024.0;

/// Tunables of the cache engine.
///
/// All fields have defaults; a config deserialized from an empty JSON object
/// is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Bandwidth one copy of a key is expected to serve (bytes/second)
    #[serde(default = "default_bandwidth_per_copy")]
    pub bandwidth_per_copy: f64,

    /// Shrink once required copies drop below `ceil(current * factor)`, (0, 1]
    #[serde(default = "default_copies_reduce_factor")]
    pub copies_reduce_factor: f64,

    /// Expand only once required copies exceed current by this many
    #[serde(default = "default_copies_expand_step")]
    pub copies_expand_step: usize,

    /// Groups below this dirty coefficient are not evicted from
    #[serde(default = "default_dirty_threshold")]
    pub dirty_threshold: f64,

    /// Grace period after the last expansion before a key may be evicted
    #[serde(default = "default_expand_threshold_secs")]
    pub expand_threshold_secs: u64,

    /// Transmit ceiling of one cache group (bytes/second)
    #[serde(default = "default_max_group_bandwidth")]
    pub max_group_bandwidth: f64,

    /// Per-node timeout of a top-key statistics request
    #[serde(default = "default_stats_timeout_ms")]
    pub stats_timeout_ms: u64,

    /// Statistics categories requested from nodes
    #[serde(default = "default_top_keys_categories")]
    pub top_keys_categories: Vec<String>,

    /// Timers
    #[serde(default = "default_topology_refresh_secs")]
    pub topology_refresh_secs: u64,
    #[serde(default = "default_health_refresh_secs")]
    pub health_refresh_secs: u64,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

fn default_bandwidth_per_copy() -> f64 {
    5.0 * MIB
}

fn default_copies_reduce_factor() -> f64 {
    0.5
}

fn default_copies_expand_step() -> usize {
    1
}

fn default_dirty_threshold() -> f64 {
    0.6
}

fn default_expand_threshold_secs() -> u64 {
    3600
}

fn default_max_group_bandwidth() -> f64 {
    100.0 * MIB
}

fn default_stats_timeout_ms() -> u64 {
    5000
}

fn default_top_keys_categories() -> Vec<String> {
    vec!["read".to_string()]
}

fn default_topology_refresh_secs() -> u64 {
    60
}

fn default_health_refresh_secs() -> u64 {
    30
}

fn default_cycle_interval_secs() -> u64 {
    300
}

fn default_eviction_interval_secs() -> u64 {
    1800
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bandwidth_per_copy: default_bandwidth_per_copy(),
            copies_reduce_factor: default_copies_reduce_factor(),
            copies_expand_step: default_copies_expand_step(),
            dirty_threshold: default_dirty_threshold(),
            expand_threshold_secs: default_expand_threshold_secs(),
            max_group_bandwidth: default_max_group_bandwidth(),
            stats_timeout_ms: default_stats_timeout_ms(),
            top_keys_categories: default_top_keys_categories(),
            topology_refresh_secs: default_topology_refresh_secs(),
            health_refresh_secs: default_health_refresh_secs(),
            cycle_interval_secs: default_cycle_interval_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl CacheConfig {
    /// Checks the invariants the planner relies on.
    pub fn validate(&self) -> Result<()> {
        if !(self.copies_reduce_factor > 0.0 && self.copies_reduce_factor <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "copies_reduce_factor must be in (0, 1], got {}",
                self.copies_reduce_factor
            )));
        }
        if self.copies_expand_step == 0 {
            return Err(Error::InvalidConfig("copies_expand_step must be positive".to_string()));
        }
        if !(self.bandwidth_per_copy > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "bandwidth_per_copy must be positive, got {}",
                self.bandwidth_per_copy
            )));
        }
        if !(0.0..=1.0).contains(&self.dirty_threshold) {
            return Err(Error::InvalidConfig(format!(
                "dirty_threshold must be in [0, 1], got {}",
                self.dirty_threshold
            )));
        }
        let timers = [
            ("topology_refresh_secs", self.topology_refresh_secs),
            ("health_refresh_secs", self.health_refresh_secs),
            ("cycle_interval_secs", self.cycle_interval_secs),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, secs)| *secs == 0) {
            return Err(Error::InvalidConfig(format!("{} must be positive", name)));
        }
        Ok(())
    }

    pub fn stats_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_timeout_ms)
    }

    pub fn topology_refresh(&self) -> Duration {
        Duration::from_secs(self.topology_refresh_secs)
    }

    pub fn health_refresh(&self) -> Duration {
        Duration::from_secs(self.health_refresh_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}
