//! Background eviction of cache replicas from dirty groups.
//!
//! The evictor runs on a slower cadence than expansion. It only looks at
//! keys whose last expansion is older than the grace period, oldest first,
//! and only removes replicas that sit on groups whose dirty coefficient is at
//! or above the configured threshold. It also queues defragmentation for
//! groups whose node asks for it.

use crate::catalog::{CachedKey, KeyFilter};
use crate::config::CacheConfig;
use crate::metrics;
use crate::planner::{copies_diff, observed_bandwidth, persist, remove_replicas, PlanContext};
use crate::resource::ResourceTable;
use crate::stats::TopKeys;
use crate::task::Task;
use corelib::GroupId;
use tracing::{debug, info, warn};

/// Outcome of one eviction pass.
#[derive(Debug, Default)]
pub struct EvictionReport {
    pub tasks: Vec<Task>,
    pub defrag_jobs: Vec<GroupId>,
}

pub struct Evictor {
    config: CacheConfig,
}

impl Evictor {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Runs one eviction pass. A catalog failure skips the key removals
    /// but defragmentation is still scheduled.
    pub async fn run(&self, top_keys: &TopKeys, ctx: &PlanContext<'_>) -> EvictionReport {
        let cutoff = ctx.now.saturating_sub(self.config.expand_threshold_secs);
        let filter = KeyFilter::all().expanded_before(cutoff);
        let mut candidates = match ctx.catalog.find(&filter).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "cannot list eviction candidates");
                Vec::new()
            }
        };
        candidates.sort_by_key(|k| k.expand_ts);
        debug!(candidates = candidates.len(), cutoff, "eviction pass");

        let mut report = EvictionReport::default();
        for mut key in candidates {
            let bandwidth = observed_bandwidth(&self.config, top_keys, &key);
            let diff = copies_diff(
                &self.config,
                key.data_groups.len(),
                key.cache_groups.len(),
                bandwidth,
            );
            if diff >= 0 {
                continue;
            }

            let victims: Vec<GroupId> = {
                let table = ctx.resources.lock();
                eviction_order(&key, &table, self.config.dirty_threshold)
            };
            if victims.is_empty() {
                continue;
            }
            let victims = victims.into_iter().take(diff.unsigned_abs()).collect();
            let tasks = remove_replicas(&mut key, victims, ctx).await;
            if !tasks.is_empty() {
                persist(&key, ctx.catalog).await;
                report.tasks.extend(tasks);
            }
        }

        report.defrag_jobs = self.schedule_defrag(ctx).await;
        report
    }

    async fn schedule_defrag(&self, ctx: &PlanContext<'_>) -> Vec<GroupId> {
        let wanted: Vec<GroupId> = {
            let table = ctx.resources.lock();
            table.iter().filter(|g| g.want_defrag).map(|g| g.id).collect()
        };

        let mut scheduled = Vec::with_capacity(wanted.len());
        for group in wanted {
            match ctx.queue.schedule_defrag(group).await {
                Ok(()) => {
                    info!(group = %group, "defragmentation scheduled");
                    metrics::record_defrag_scheduled();
                    scheduled.push(group);
                }
                Err(err) => {
                    warn!(group = %group, error = %err, "failed to schedule defragmentation")
                }
            }
        }
        scheduled
    }
}

/// Cache groups of `key` eligible for eviction: dirty coefficient at or
/// above `threshold`, unhealthy groups first, then dirtiest first. Groups
/// missing from the table count as unhealthy and fully dirty.
fn eviction_order(key: &CachedKey, table: &ResourceTable, threshold: f64) -> Vec<GroupId> {
    let mut ranked: Vec<(bool, f64, GroupId)> = key
        .cache_groups
        .iter()
        .map(|g| match table.get(*g) {
            Some(rg) => (rg.healthy, rg.dirty_coefficient(), *g),
            None => (false, 1.0, *g),
        })
        .filter(|(_, dirty, _)| *dirty >= threshold)
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.total_cmp(&a.1)));
    ranked.into_iter().map(|(_, _, g)| g).collect()
}
