//! Periodic driver of the cache engine.
//!
//! One task owns three timers: topology refresh, node health refresh and the
//! statistics→plan→evict cycle. Timers fire on the same task, so a cycle
//! that overruns its period simply delays the next firing; nothing is
//! interrupted mid-cycle.

use crate::catalog::{KeyFilter, ReplicaCatalog};
use crate::config::CacheConfig;
use crate::evictor::Evictor;
use crate::lookup::KeySizeSource;
use crate::metrics;
use crate::planner::{PlanContext, ReplicationPlanner};
use crate::resource::ResourceTable;
use crate::stats::{StatsSource, TopKeyStatsCollector, TopKeys};
use crate::task::{Action, Task, TaskQueue};
use corelib::{ClusterTopologyView, Error, Result, Topology};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// External systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub topology: Arc<dyn ClusterTopologyView>,
    pub stats: Arc<dyn StatsSource>,
    pub catalog: Arc<dyn ReplicaCatalog>,
    pub queue: Arc<dyn TaskQueue>,
    pub sizes: Arc<dyn KeySizeSource>,
}

/// Summary of one statistics→plan→evict cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub observed_keys: usize,
    pub add_tasks: usize,
    pub remove_tasks: usize,
    pub evicted: usize,
    pub defrag_jobs: usize,
    pub tasks: Vec<Task>,
}

pub struct CacheEngine {
    config: CacheConfig,
    collaborators: Collaborators,
    collector: TopKeyStatsCollector,
    planner: ReplicationPlanner,
    evictor: Evictor,
    topology: RwLock<Arc<Topology>>,
    resources: Mutex<ResourceTable>,
    /// In-flight add tasks found at startup, booked into the next snapshot.
    pending: Mutex<Vec<Task>>,
    last_eviction: Mutex<Option<Instant>>,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl CacheEngine {
    /// Builds an engine; refuses configurations that break planner
    /// invariants.
    pub fn new(config: CacheConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let collector = TopKeyStatsCollector::new(
            Arc::clone(&collaborators.stats),
            config.stats_timeout(),
            config.top_keys_categories.clone(),
        );
        Ok(Self {
            planner: ReplicationPlanner::new(config.clone()),
            evictor: Evictor::new(config.clone()),
            config,
            collaborators,
            collector,
            topology: RwLock::new(Arc::new(Topology::default())),
            resources: Mutex::new(ResourceTable::default()),
            pending: Mutex::new(Vec::new()),
            last_eviction: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(&self.topology.read())
    }

    /// Loads in-flight tasks and the first topology snapshot.
    pub async fn start(&self) -> Result<()> {
        match self.collaborators.queue.list().await {
            Ok(tasks) => {
                let adds: Vec<Task> = tasks
                    .into_iter()
                    .filter(|t| t.action == Action::Add)
                    .collect();
                info!(in_flight = adds.len(), "seeding reservations from task queue");
                *self.pending.lock() = adds;
            }
            Err(err) => warn!(error = %err, "could not list in-flight tasks"),
        }
        self.refresh_topology().await?;
        self.refresh_health().await;
        Ok(())
    }

    /// Replaces the topology snapshot, carrying node statistics over.
    pub async fn refresh_topology(&self) -> Result<()> {
        let view = &self.collaborators.topology;
        let nodes = view.list_nodes().await?;
        let groups = view.list_groups().await?;
        let couples = view.list_couples().await?;

        let previous = self.topology();
        let stats: Vec<_> = previous
            .nodes()
            .filter_map(|n| previous.node_stats(&n.address).cloned())
            .collect();
        let fresh = Topology::new(nodes, groups, couples).with_node_stats(stats);
        debug!(
            nodes = fresh.nodes().count(),
            groups = fresh.groups().count(),
            "topology refreshed"
        );
        *self.topology.write() = Arc::new(fresh);
        Ok(())
    }

    /// Polls every node for load figures, all nodes at once. Nodes that
    /// fail keep their previous figures.
    pub async fn refresh_health(&self) {
        let current = self.topology();
        let timeout = self.config.stats_timeout();
        let mut requests = JoinSet::new();
        for node in current.nodes() {
            let view = Arc::clone(&self.collaborators.topology);
            let address = node.address.clone();
            requests.spawn(async move {
                let result = match tokio::time::timeout(timeout, view.node_stats(&address)).await {
                    Ok(res) => res,
                    Err(_) => Err(Error::Timeout {
                        address: address.clone(),
                    }),
                };
                (address, result)
            });
        }

        let mut fresh = Vec::new();
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok((_, Ok(stats))) => fresh.push(stats),
                Ok((address, Err(err))) => {
                    warn!(node = %address, error = %err, "node stats unavailable")
                }
                Err(err) => warn!(error = %err, "node stats request panicked"),
            }
        }
        let updated = (*current).clone().with_node_stats(fresh);
        *self.topology.write() = Arc::new(updated);
    }

    /// Runs one full cycle. Failures are logged and isolated; a catalog
    /// outage skips planning but eviction and defragmentation still run.
    pub async fn run_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let topology = self.topology();
        {
            let mut table = ResourceTable::snapshot(&topology, self.config.max_group_bandwidth);
            let pending = std::mem::take(&mut *self.pending.lock());
            table.apply_pending(&pending);
            *self.resources.lock() = table;
        }

        let catalog = self.collaborators.catalog.as_ref();
        let top_keys = self.collector.collect(&topology, catalog).await;
        let ctx = PlanContext {
            topology: topology.as_ref(),
            resources: &self.resources,
            catalog,
            queue: self.collaborators.queue.as_ref(),
            sizes: self.collaborators.sizes.as_ref(),
            now: unix_now(),
        };

        let mut report = CycleReport {
            observed_keys: top_keys.len(),
            ..Default::default()
        };
        match self.planner.plan(&top_keys, &ctx).await {
            Ok(planned) => report.tasks.extend(planned),
            Err(err) => warn!(error = %err, "planning pass skipped"),
        }

        if self.eviction_due() {
            self.evict(&top_keys, &ctx, &mut report).await;
        }

        report.add_tasks = report.tasks.iter().filter(|t| t.action == Action::Add).count();
        report.remove_tasks = report.tasks.len() - report.add_tasks;

        let cached_keys = catalog.find(&KeyFilter::all()).await.map(|k| k.len()).unwrap_or(0);
        metrics::record_cycle(started.elapsed(), cached_keys);
        info!(
            observed = report.observed_keys,
            added = report.add_tasks,
            removed = report.remove_tasks,
            evicted = report.evicted,
            defrag = report.defrag_jobs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache cycle complete"
        );
        report
    }

    fn eviction_due(&self) -> bool {
        let last = self.last_eviction.lock();
        match *last {
            Some(at) => at.elapsed() >= self.config.eviction_interval(),
            None => true,
        }
    }

    async fn evict(&self, top_keys: &TopKeys, ctx: &PlanContext<'_>, report: &mut CycleReport) {
        let eviction = self.evictor.run(top_keys, ctx).await;
        report.evicted = eviction.tasks.len();
        report.defrag_jobs = eviction.defrag_jobs.len();
        report.tasks.extend(eviction.tasks);
        *self.last_eviction.lock() = Some(Instant::now());
    }

    /// Drives the three timers until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut topology_timer = tokio::time::interval(self.config.topology_refresh());
        let mut health_timer = tokio::time::interval(self.config.health_refresh());
        let mut cycle_timer = tokio::time::interval(self.config.cycle_interval());
        for timer in [&mut topology_timer, &mut health_timer, &mut cycle_timer] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                _ = topology_timer.tick() => {
                    if let Err(err) = self.refresh_topology().await {
                        warn!(error = %err, "topology refresh failed");
                    }
                }
                _ = health_timer.tick() => self.refresh_health().await,
                _ = cycle_timer.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("cache engine stopping");
                        break;
                    }
                }
            }
        }
    }
}
