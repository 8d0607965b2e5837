//! Cluster topology abstractions.
//!
//! A [`Topology`] is an immutable snapshot of the cluster as reported by a
//! [`ClusterTopologyView`]: which nodes exist and where they live, which
//! storage groups they serve, how groups are coupled into durable copy-sets,
//! and the latest per-node load figures. Consumers take a fresh snapshot on
//! every refresh rather than mutating a shared one.

use crate::error::Result;
use crate::node::{Node, NodeAddress, TopologyUnit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Identifier of a storage group.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a couple, the colon-joined ids of its member groups.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoupleId(pub String);

impl CoupleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds the canonical couple id from its member groups.
    pub fn from_groups(groups: &[GroupId]) -> Self {
        let parts: Vec<String> = groups.iter().map(|g| g.to_string()).collect();
        Self(parts.join(":"))
    }
}

impl fmt::Display for CoupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a stored key (as reported by top-key statistics).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(pub String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role a storage group plays in the cluster.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Holds a durable copy of a couple's data.
    Data,
    /// Holds transient read-only replicas of hot keys.
    Cache,
}

/// Health status reported for a group.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Ok,
    /// Read-only; serves reads but accepts no new data.
    Ro,
    Bad,
    Broken,
}

impl GroupStatus {
    pub fn is_healthy(self) -> bool {
        matches!(self, GroupStatus::Ok)
    }
}

/// Placement-relevant state of one storage group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupState {
    pub id: GroupId,
    pub kind: GroupKind,
    pub status: GroupStatus,
    /// Nodes serving this group; the first one is the primary.
    pub nodes: Vec<NodeAddress>,
    /// Couple this group belongs to (data groups only).
    #[serde(default)]
    pub couple: Option<CoupleId>,
    /// Usable capacity in bytes.
    pub effective_space: u64,
    /// Bytes currently occupied.
    pub used_space: u64,
    /// Operator-declared placement weight; lower is preferred.
    #[serde(default)]
    pub weight: u64,
}

/// A couple: the set of groups holding one durable copy-set of a shard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoupleState {
    pub id: CoupleId,
    pub groups: Vec<GroupId>,
    pub namespace: String,
}

/// Load figures reported by one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub address: NodeAddress,
    /// Current transmit rate in bytes/second.
    pub tx_rate: f64,
    /// Disk space left on the node, when the node reports it.
    #[serde(default)]
    pub free_space: Option<u64>,
    /// Bytes removed since the last defragmentation.
    #[serde(default)]
    pub removed_bytes: u64,
    /// Node reports persistent fragmentation.
    #[serde(default)]
    pub want_defrag: bool,
    #[serde(default)]
    pub defrag_in_progress: bool,
}

impl NodeStats {
    pub fn idle(address: NodeAddress) -> Self {
        Self {
            address,
            tx_rate: 0.0,
            free_space: None,
            removed_bytes: 0,
            want_defrag: false,
            defrag_in_progress: false,
        }
    }
}

/// Source of live cluster state.
///
/// Implementations talk to the cluster's metadata service; the engine only
/// reads through this trait.
#[async_trait]
pub trait ClusterTopologyView: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn list_groups(&self) -> Result<Vec<GroupState>>;

    async fn list_couples(&self) -> Result<Vec<CoupleState>>;

    async fn node_stats(&self, address: &NodeAddress) -> Result<NodeStats>;
}

/// Immutable snapshot of the cluster.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    nodes: BTreeMap<NodeAddress, Node>,
    groups: BTreeMap<GroupId, GroupState>,
    couples: BTreeMap<CoupleId, CoupleState>,
    node_stats: HashMap<NodeAddress, NodeStats>,
}

impl Topology {
    pub fn new(nodes: Vec<Node>, groups: Vec<GroupState>, couples: Vec<CoupleState>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.address.clone(), n)).collect(),
            groups: groups.into_iter().map(|g| (g.id, g)).collect(),
            couples: couples.into_iter().map(|c| (c.id.clone(), c)).collect(),
            node_stats: HashMap::new(),
        }
    }

    /// Returns a copy of this snapshot carrying the given node statistics.
    ///
    /// Statistics for nodes that are not part of the snapshot are ignored.
    pub fn with_node_stats(mut self, stats: impl IntoIterator<Item = NodeStats>) -> Self {
        for s in stats {
            if self.nodes.contains_key(&s.address) {
                self.node_stats.insert(s.address.clone(), s);
            }
        }
        self
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_stats(&self, address: &NodeAddress) -> Option<&NodeStats> {
        self.node_stats.get(address)
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupState> {
        self.groups.values()
    }

    pub fn group(&self, id: GroupId) -> Option<&GroupState> {
        self.groups.get(&id)
    }

    pub fn cache_groups(&self) -> impl Iterator<Item = &GroupState> {
        self.groups.values().filter(|g| g.kind == GroupKind::Cache)
    }

    pub fn couple(&self, id: &CoupleId) -> Option<&CoupleState> {
        self.couples.get(id)
    }

    /// Primary node of a group.
    pub fn group_node(&self, id: GroupId) -> Option<&Node> {
        let group = self.groups.get(&id)?;
        group.nodes.first().and_then(|addr| self.nodes.get(addr))
    }

    pub fn group_datacenter(&self, id: GroupId) -> Option<&str> {
        self.group_node(id).map(|n| n.datacenter.as_str())
    }

    /// Summed transmit rate of the nodes serving a group.
    pub fn group_tx_rate(&self, id: GroupId) -> f64 {
        self.groups
            .get(&id)
            .map(|g| {
                g.nodes
                    .iter()
                    .filter_map(|addr| self.node_stats.get(addr))
                    .map(|s| s.tx_rate)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Summed transmit rate of every node, per datacenter.
    pub fn datacenter_tx_load(&self) -> HashMap<String, f64> {
        let mut load: HashMap<String, f64> = HashMap::new();
        for node in self.nodes.values() {
            let tx = self.node_stats.get(&node.address).map_or(0.0, |s| s.tx_rate);
            *load.entry(node.datacenter.clone()).or_insert(0.0) += tx;
        }
        load
    }

    /// Number of classification levels on which the primaries of two groups
    /// differ. Groups without a resolvable node count as maximally distant.
    pub fn unit_distance(&self, a: GroupId, b: GroupId) -> usize {
        match (self.group_node(a), self.group_node(b)) {
            (Some(na), Some(nb)) => na.unit_distance(nb),
            _ => TopologyUnit::ALL.len(),
        }
    }
}
