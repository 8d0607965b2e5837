//! Hot-key cache placement and eviction engine.
//!
//! This crate decides which hot keys deserve read-only cache replicas, how
//! many, on which cache groups, and when to take them back:
//! - Cluster-wide top-key statistics aggregation
//! - Replica count decisions with hysteresis
//! - Locality-aware placement under space and bandwidth constraints
//! - In-memory per-cycle resource reservation
//! - Dirtiness-driven eviction and defragmentation scheduling

pub mod catalog;
pub mod config;
pub mod engine;
pub mod evictor;
pub mod lookup;
pub mod metrics;
pub mod planner;
pub mod resource;
pub mod stats;
pub mod task;

pub use catalog::{CachedKey, InMemoryCatalog, KeyFilter, ReplicaCatalog};
pub use config::CacheConfig;
pub use engine::{CacheEngine, Collaborators, CycleReport};
pub use evictor::{EvictionReport, Evictor};
pub use lookup::{lookup_key_size, KeySizeSource};
pub use planner::{copies_diff, PlanContext, ReplicationPlanner};
pub use resource::{ResourceGroup, ResourceTable};
pub use stats::{
    RawTopKey, RawTopKeyReport, StatKey, StatsSource, TopKeyStat, TopKeyStatsCollector, TopKeys,
};
pub use task::{Action, InMemoryTaskQueue, Task, TaskQueue};
