//! Replica count decisions and cache placement.
//!
//! For every key that is either cached already or hot this cycle, the
//! planner computes how many copies it deserves and then either expands the
//! replica set onto new cache groups or shrinks it.
//!
//! # Copies decision
//!
//! With `current = data + cache` copies and
//! `required = ceil(bandwidth / bandwidth_per_copy)`:
//!
//! - `required < ceil(current * copies_reduce_factor)`: shrink to
//!   `max(data, required)`; the durable copies are the floor.
//! - `required >= current + copies_expand_step`: expand to `required`.
//! - otherwise: leave the key alone.
//!
//! The band between the two thresholds keeps small bandwidth fluctuations
//! from adding and removing the same replica cycle after cycle.
//!
//! # Placement
//!
//! Candidates are healthy cache groups that do not hold the key yet and have
//! room for its size and its per-copy bandwidth. Each candidate is paired
//! with a source data group (same datacenter if possible, otherwise the one
//! in the least loaded datacenter) and scored by
//! `(unit distance to source, replicas already in its datacenter, weight)`.
//! The lowest score wins; its resources are reserved before the next pick so
//! datacenter counts and headroom stay current.

use crate::catalog::{CachedKey, KeyFilter, ReplicaCatalog};
use crate::config::CacheConfig;
use crate::lookup::{lookup_key_size, KeySizeSource};
use crate::metrics;
use crate::resource::ResourceTable;
use crate::stats::{StatKey, TopKeyStat, TopKeys};
use crate::task::{Action, Task, TaskQueue};
use corelib::{GroupId, Result, Topology};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Everything a planning or eviction pass reads and writes.
pub struct PlanContext<'a> {
    pub topology: &'a Topology,
    pub resources: &'a Mutex<ResourceTable>,
    pub catalog: &'a dyn ReplicaCatalog,
    pub queue: &'a dyn TaskQueue,
    pub sizes: &'a dyn KeySizeSource,
    /// Unix seconds at the start of the pass.
    pub now: u64,
}

/// Signed change in copy count a key deserves.
///
/// Positive means add that many cache replicas, negative means drop that
/// many. Never drives the total below `data_copies`.
pub fn copies_diff(
    config: &CacheConfig,
    data_copies: usize,
    cache_copies: usize,
    bandwidth: f64,
) -> isize {
    let current = data_copies + cache_copies;
    let required = (bandwidth.max(0.0) / config.bandwidth_per_copy).ceil() as usize;
    let reduce_below = (current as f64 * config.copies_reduce_factor).ceil() as usize;

    if required < reduce_below {
        data_copies.max(required) as isize - current as isize
    } else if required >= current.saturating_add(config.copies_expand_step) {
        required as isize - current as isize
    } else {
        0
    }
}

/// Bandwidth of a key this cycle, or 0 if it is unobserved or below the
/// one-copy floor.
pub(crate) fn observed_bandwidth(config: &CacheConfig, top_keys: &TopKeys, key: &CachedKey) -> f64 {
    top_keys
        .get(&key.id, &key.couple_id)
        .map(TopKeyStat::bandwidth)
        .filter(|bw| *bw >= config.bandwidth_per_copy)
        .unwrap_or(0.0)
}

pub struct ReplicationPlanner {
    config: CacheConfig,
}

impl ReplicationPlanner {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Runs one planning pass and returns the tasks handed to the queue.
    ///
    /// Keys already in the catalog are processed before new ones. Failures
    /// are isolated per key and per candidate group; only a failure to
    /// enumerate the catalog aborts the pass.
    pub async fn plan(&self, top_keys: &TopKeys, ctx: &PlanContext<'_>) -> Result<Vec<Task>> {
        let cached = ctx.catalog.find(&KeyFilter::all()).await?;
        let mut tasks = Vec::new();
        let mut seen = HashSet::with_capacity(cached.len());

        for key in cached {
            seen.insert(StatKey::new(key.id.clone(), key.couple_id.clone()));
            let bandwidth = observed_bandwidth(&self.config, top_keys, &key);
            tasks.extend(self.update_key(key, bandwidth, ctx).await);
        }

        let mut fresh: Vec<&TopKeyStat> = top_keys
            .iter()
            .filter(|s| s.bandwidth() >= self.config.bandwidth_per_copy)
            .filter(|s| !seen.contains(&StatKey::new(s.key_id.clone(), s.couple_id.clone())))
            .collect();
        // Hottest first so they get the headroom.
        fresh.sort_by(|a, b| {
            b.bandwidth()
                .total_cmp(&a.bandwidth())
                .then_with(|| (&a.key_id, &a.couple_id).cmp(&(&b.key_id, &b.couple_id)))
        });
        for stat in fresh {
            tasks.extend(self.create_key(stat, ctx).await);
        }

        Ok(tasks)
    }

    async fn update_key(
        &self,
        mut key: CachedKey,
        bandwidth: f64,
        ctx: &PlanContext<'_>,
    ) -> Vec<Task> {
        key.rate = bandwidth;
        let diff = copies_diff(
            &self.config,
            key.data_groups.len(),
            key.cache_groups.len(),
            bandwidth,
        );

        let tasks = if diff > 0 {
            match lookup_key_size(ctx.sizes, &key.id, &key.namespace, &key.data_groups).await {
                Ok(size) => key.size = size,
                Err(err) => debug!(key = %key.id, error = %err, "keeping stale key size"),
            }
            expand(&mut key, diff.unsigned_abs(), bandwidth, ctx).await
        } else if diff < 0 {
            let victims: Vec<GroupId> = {
                let table = ctx.resources.lock();
                shrink_order(&key, &table)
            };
            let victims = victims.into_iter().take(diff.unsigned_abs()).collect();
            remove_replicas(&mut key, victims, ctx).await
        } else {
            Vec::new()
        };

        persist(&key, ctx.catalog).await;
        tasks
    }

    async fn create_key(&self, stat: &TopKeyStat, ctx: &PlanContext<'_>) -> Vec<Task> {
        let Some(couple) = ctx.topology.couple(&stat.couple_id) else {
            warn!(key = %stat.key_id, couple = %stat.couple_id, "hot key on unknown couple");
            return Vec::new();
        };
        let mut key = CachedKey::new(
            stat.key_id.clone(),
            couple.id.clone(),
            stat.namespace.clone(),
            couple.groups.clone(),
        );
        let bandwidth = stat.bandwidth();
        key.rate = bandwidth;

        let diff = copies_diff(&self.config, key.data_groups.len(), 0, bandwidth);
        if diff <= 0 {
            return Vec::new();
        }

        match lookup_key_size(ctx.sizes, &key.id, &key.namespace, &key.data_groups).await {
            Ok(size) => key.size = size,
            Err(err) => {
                warn!(
                    key = %key.id,
                    couple = %key.couple_id,
                    error = %err,
                    "skipping key for this cycle"
                );
                metrics::record_lookup_failure();
                return Vec::new();
            }
        }

        let tasks = expand(&mut key, diff.unsigned_abs(), bandwidth, ctx).await;
        if !key.cache_groups.is_empty() {
            persist(&key, ctx.catalog).await;
        }
        tasks
    }
}

#[derive(Debug)]
struct Candidate {
    id: GroupId,
    datacenter: Option<String>,
    weight: u64,
    source: GroupId,
}

impl Candidate {
    fn score(
        &self,
        topology: &Topology,
        dc_counts: &HashMap<String, usize>,
    ) -> (usize, usize, u64) {
        let in_dc = self
            .datacenter
            .as_ref()
            .and_then(|dc| dc_counts.get(dc))
            .copied()
            .unwrap_or(0);
        (topology.unit_distance(self.id, self.source), in_dc, self.weight)
    }
}

/// Data group a new replica on a group in `datacenter` should copy from.
fn pick_source(
    topology: &Topology,
    datacenter: Option<&str>,
    data_groups: &[GroupId],
    dc_load: &HashMap<String, f64>,
) -> Option<GroupId> {
    if let Some(dc) = datacenter {
        if let Some(local) = data_groups
            .iter()
            .find(|g| topology.group_datacenter(**g) == Some(dc))
        {
            return Some(*local);
        }
    }
    let load = |g: &GroupId| {
        topology
            .group_datacenter(*g)
            .and_then(|dc| dc_load.get(dc))
            .copied()
            .unwrap_or(f64::INFINITY)
    };
    data_groups
        .iter()
        .copied()
        .min_by(|a, b| load(a).total_cmp(&load(b)))
}

/// Places up to `count` new replicas of `key`, updating its cache groups.
async fn expand(
    key: &mut CachedKey,
    count: usize,
    bandwidth: f64,
    ctx: &PlanContext<'_>,
) -> Vec<Task> {
    let per_copy = bandwidth / (key.copies() + count) as f64;
    let dc_load = ctx.topology.datacenter_tx_load();

    let mut candidates: Vec<Candidate> = {
        let table = ctx.resources.lock();
        table
            .iter()
            .filter(|g| g.healthy && !key.holds(g.id) && g.can_host(key.size, per_copy))
            .filter_map(|g| {
                let source = pick_source(
                    ctx.topology,
                    g.datacenter.as_deref(),
                    &key.data_groups,
                    &dc_load,
                )?;
                Some(Candidate {
                    id: g.id,
                    datacenter: g.datacenter.clone(),
                    weight: g.weight,
                    source,
                })
            })
            .collect()
    };

    let mut dc_counts: HashMap<String, usize> = HashMap::new();
    for group in key.data_groups.iter().chain(&key.cache_groups) {
        if let Some(dc) = ctx.topology.group_datacenter(*group) {
            *dc_counts.entry(dc.to_string()).or_default() += 1;
        }
    }

    let mut tasks = Vec::with_capacity(count);
    while tasks.len() < count && !candidates.is_empty() {
        let best = candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.score(ctx.topology, &dc_counts))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let candidate = candidates.remove(best);
        debug!(
            key = %key.id,
            group = %candidate.id,
            source = %candidate.source,
            score = ?candidate.score(ctx.topology, &dc_counts),
            "selected cache candidate"
        );

        match place_replica(key, &candidate, per_copy, ctx).await {
            Ok(task) => {
                if let Some(dc) = &candidate.datacenter {
                    *dc_counts.entry(dc.clone()).or_default() += 1;
                }
                key.cache_groups.push(candidate.id);
                key.expand_ts = ctx.now;
                metrics::record_task(Action::Add);
                info!(
                    key = %key.id,
                    group = %candidate.id,
                    source = %candidate.source,
                    "cache replica scheduled"
                );
                tasks.push(task);
            }
            Err(err) => {
                warn!(
                    key = %key.id,
                    group = %candidate.id,
                    error = %err,
                    "skipping cache candidate"
                );
                metrics::record_reservation_failure();
            }
        }
    }

    if tasks.len() < count {
        debug!(key = %key.id, wanted = count, placed = tasks.len(), "ran out of cache candidates");
    }
    tasks
}

async fn place_replica(
    key: &CachedKey,
    candidate: &Candidate,
    bandwidth: f64,
    ctx: &PlanContext<'_>,
) -> Result<Task> {
    ctx.resources.lock().reserve(candidate.id, key.size, bandwidth)?;
    let task = Task::add(key, candidate.id, candidate.source, bandwidth);
    if let Err(err) = ctx.queue.put(task.clone()).await {
        ctx.resources.lock().release(candidate.id, key.size, bandwidth);
        return Err(err);
    }
    Ok(task)
}

/// Cache groups of `key` in removal order: groups gone or unhealthy first,
/// then healthy groups from fullest to emptiest.
pub(crate) fn shrink_order(key: &CachedKey, table: &ResourceTable) -> Vec<GroupId> {
    let mut ranked: Vec<(bool, f64, GroupId)> = key
        .cache_groups
        .iter()
        .map(|g| match table.get(*g) {
            Some(rg) if rg.healthy => (true, rg.free_ratio(), *g),
            _ => (false, 0.0, *g),
        })
        .collect();
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    ranked.into_iter().map(|(_, _, g)| g).collect()
}

/// Emits a remove task per victim and drops the emitted ones from `key`.
pub(crate) async fn remove_replicas(
    key: &mut CachedKey,
    victims: Vec<GroupId>,
    ctx: &PlanContext<'_>,
) -> Vec<Task> {
    let mut tasks = Vec::with_capacity(victims.len());
    for group in victims {
        let task = Task::remove(key, group);
        if let Err(err) = ctx.queue.put(task.clone()).await {
            warn!(
                key = %key.id,
                group = %group,
                error = %err,
                "failed to schedule replica removal"
            );
            continue;
        }
        key.cache_groups.retain(|g| *g != group);
        ctx.resources.lock().record_removal(group, key.size);
        metrics::record_task(Action::Remove);
        info!(key = %key.id, group = %group, "cache replica removal scheduled");
        tasks.push(task);
    }
    tasks
}

/// Writes `key` back, or deletes it once it has no cache replicas left.
pub(crate) async fn persist(key: &CachedKey, catalog: &dyn ReplicaCatalog) {
    let result = if key.cache_groups.is_empty() {
        catalog.remove(&key.id, &key.couple_id).await
    } else {
        catalog.upsert(key).await
    };
    if let Err(err) = result {
        warn!(
            key = %key.id,
            couple = %key.couple_id,
            error = %err,
            "failed to update replica catalog"
        );
    }
}
