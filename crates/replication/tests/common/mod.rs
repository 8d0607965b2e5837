//! Shared fixtures: an in-process fake cluster and a planning harness.

#![allow(dead_code)]

use async_trait::async_trait;
use corelib::{
    ClusterTopologyView, CoupleId, CoupleState, Error, GroupId, GroupKind, GroupState,
    GroupStatus, KeyId, Node, NodeAddress, NodeStats, Result, Topology,
};
use parking_lot::Mutex;
use replication::{
    CacheConfig, InMemoryCatalog, InMemoryTaskQueue, KeySizeSource, PlanContext, RawTopKeyReport,
    ResourceTable, StatsSource, Task, TaskQueue, TopKeyStat,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub const MB: f64 = 1024.0 * 1024.0;
pub const GB: u64 = 1024 * 1024 * 1024;

pub fn node(address: &str, host: &str, dc: &str) -> Node {
    Node::new(address, host, dc)
}

pub fn data_group(id: u32, node: &str, couple: &str) -> GroupState {
    GroupState {
        id: GroupId(id),
        kind: GroupKind::Data,
        status: GroupStatus::Ok,
        nodes: vec![NodeAddress::new(node)],
        couple: Some(CoupleId::new(couple)),
        effective_space: 100 * GB,
        used_space: 10 * GB,
        weight: 0,
    }
}

pub fn cache_group(id: u32, node: &str, effective_space: u64, used_space: u64) -> GroupState {
    GroupState {
        id: GroupId(id),
        kind: GroupKind::Cache,
        status: GroupStatus::Ok,
        nodes: vec![NodeAddress::new(node)],
        couple: None,
        effective_space,
        used_space,
        weight: 0,
    }
}

pub fn couple(groups: &[u32], namespace: &str) -> CoupleState {
    let groups: Vec<GroupId> = groups.iter().map(|g| GroupId(*g)).collect();
    CoupleState {
        id: CoupleId::from_groups(&groups),
        groups,
        namespace: namespace.to_string(),
    }
}

/// Top-key statistic with the given bandwidth in MB/s.
pub fn hot(key: &str, couple: &str, bandwidth_mb: f64) -> TopKeyStat {
    TopKeyStat {
        key_id: KeyId::new(key),
        couple_id: CoupleId::new(couple),
        namespace: "ns".to_string(),
        groups: vec![],
        size: (bandwidth_mb * MB * 60.0) as u64,
        frequency: 100,
        period_seconds: 60,
    }
}

pub fn config() -> CacheConfig {
    CacheConfig {
        bandwidth_per_copy: MB,
        copies_reduce_factor: 0.5,
        copies_expand_step: 1,
        max_group_bandwidth: 100.0 * MB,
        ..Default::default()
    }
}

/// Cluster that answers from in-memory tables.
#[derive(Default)]
pub struct FakeCluster {
    pub nodes: Vec<Node>,
    pub groups: Vec<GroupState>,
    pub couples: Vec<CoupleState>,
    pub node_stats: HashMap<NodeAddress, NodeStats>,
    pub reports: Mutex<HashMap<NodeAddress, RawTopKeyReport>>,
    pub failing: HashSet<NodeAddress>,
    pub slow: HashSet<NodeAddress>,
    pub key_sizes: HashMap<KeyId, u64>,
    pub dead_groups: HashSet<GroupId>,
}

impl FakeCluster {
    pub fn new(nodes: Vec<Node>, groups: Vec<GroupState>, couples: Vec<CoupleState>) -> Self {
        let node_stats = nodes
            .iter()
            .map(|n| (n.address.clone(), NodeStats::idle(n.address.clone())))
            .collect();
        Self {
            nodes,
            groups,
            couples,
            node_stats,
            ..Default::default()
        }
    }

    /// One datacenter per data group of couple 1:2:3, plus five cache groups
    /// with 10 GB free each.
    pub fn standard() -> Self {
        let mut cluster = Self::new(
            vec![
                node("d1", "dh1", "dc1"),
                node("d2", "dh2", "dc2"),
                node("d3", "dh3", "dc3"),
                node("c1", "ch1", "dc1"),
                node("c2", "ch2", "dc2"),
                node("c3", "ch3", "dc3"),
                node("c4", "ch4", "dc1"),
                node("c5", "ch5", "dc2"),
            ],
            vec![
                data_group(1, "d1", "1:2:3"),
                data_group(2, "d2", "1:2:3"),
                data_group(3, "d3", "1:2:3"),
                cache_group(10, "c1", 20 * GB, 10 * GB),
                cache_group(11, "c2", 20 * GB, 10 * GB),
                cache_group(12, "c3", 20 * GB, 10 * GB),
                cache_group(13, "c4", 20 * GB, 10 * GB),
                cache_group(14, "c5", 20 * GB, 10 * GB),
            ],
            vec![couple(&[1, 2, 3], "ns")],
        );
        cluster.key_sizes.insert(KeyId::new("K"), 1024 * 1024);
        cluster
    }

    pub fn topology(&self) -> Topology {
        Topology::new(self.nodes.clone(), self.groups.clone(), self.couples.clone())
            .with_node_stats(self.node_stats.values().cloned())
    }

    pub fn set_report(&self, address: &str, report: RawTopKeyReport) {
        self.reports.lock().insert(NodeAddress::new(address), report);
    }

    fn check(&self, address: &NodeAddress) -> Result<()> {
        if self.failing.contains(address) {
            return Err(Error::Unavailable {
                address: address.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterTopologyView for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.clone())
    }

    async fn list_groups(&self) -> Result<Vec<GroupState>> {
        Ok(self.groups.clone())
    }

    async fn list_couples(&self) -> Result<Vec<CoupleState>> {
        Ok(self.couples.clone())
    }

    async fn node_stats(&self, address: &NodeAddress) -> Result<NodeStats> {
        self.check(address)?;
        if self.slow.contains(address) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        self.node_stats
            .get(address)
            .cloned()
            .ok_or_else(|| Error::Topology(format!("unknown node {}", address)))
    }
}

#[async_trait]
impl StatsSource for FakeCluster {
    async fn top_keys(
        &self,
        address: &NodeAddress,
        _categories: &[String],
    ) -> Result<RawTopKeyReport> {
        self.check(address)?;
        if self.slow.contains(address) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        Ok(self.reports.lock().get(address).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl KeySizeSource for FakeCluster {
    async fn key_size(&self, group: GroupId, _namespace: &str, key: &KeyId) -> Result<u64> {
        if self.dead_groups.contains(&group) {
            return Err(Error::Unavailable {
                address: NodeAddress::new(format!("group-{}", group)),
                reason: "timeout".to_string(),
            });
        }
        self.key_sizes
            .get(key)
            .copied()
            .ok_or_else(|| Error::Internal(format!("no such key {}", key)))
    }
}

/// Queue that refuses tasks targeting some groups.
#[derive(Default)]
pub struct RefusingQueue {
    pub inner: InMemoryTaskQueue,
    pub refuse: HashSet<GroupId>,
}

#[async_trait]
impl TaskQueue for RefusingQueue {
    async fn put(&self, task: Task) -> Result<()> {
        if self.refuse.contains(&task.target_group) {
            return Err(Error::TaskQueue("queue is full".to_string()));
        }
        self.inner.put(task).await
    }

    async fn list(&self) -> Result<Vec<Task>> {
        self.inner.list().await
    }

    async fn schedule_defrag(&self, group: GroupId) -> Result<()> {
        self.inner.schedule_defrag(group).await
    }
}

/// Everything a planning pass needs, owned in one place.
pub struct Harness {
    pub cluster: FakeCluster,
    pub topology: Topology,
    pub resources: Mutex<ResourceTable>,
    pub catalog: InMemoryCatalog,
    pub queue: Arc<dyn TaskQueue>,
    pub now: u64,
}

impl Harness {
    pub fn new(cluster: FakeCluster, config: &CacheConfig) -> Self {
        Self::with_queue(cluster, config, Arc::new(InMemoryTaskQueue::new()))
    }

    pub fn with_queue(
        cluster: FakeCluster,
        config: &CacheConfig,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let topology = cluster.topology();
        let resources = Mutex::new(ResourceTable::snapshot(&topology, config.max_group_bandwidth));
        Self {
            cluster,
            topology,
            resources,
            catalog: InMemoryCatalog::new(),
            queue,
            now: 1_700_000_000,
        }
    }

    pub fn ctx(&self) -> PlanContext<'_> {
        PlanContext {
            topology: &self.topology,
            resources: &self.resources,
            catalog: &self.catalog,
            queue: self.queue.as_ref(),
            sizes: &self.cluster,
            now: self.now,
        }
    }
}
