//! Cluster fixture loaded from JSON.
//!
//! Stands in for the metadata service, the per-node statistics endpoint and
//! the storage backend so the engine can be driven without a live cluster.

use anyhow::Context;
use async_trait::async_trait;
use corelib::{
    ClusterTopologyView, CoupleState, Error, GroupId, GroupState, KeyId, Node, NodeAddress,
    NodeStats, Result,
};
use replication::{KeySizeSource, RawTopKeyReport, StatsSource};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
pub struct StaticCluster {
    pub nodes: Vec<Node>,
    pub groups: Vec<GroupState>,
    pub couples: Vec<CoupleState>,
    /// Nodes without an entry report an idle load.
    #[serde(default)]
    pub node_stats: Vec<NodeStats>,
    #[serde(default)]
    pub top_keys: HashMap<NodeAddress, RawTopKeyReport>,
    #[serde(default)]
    pub key_sizes: HashMap<KeyId, u64>,
}

impl StaticCluster {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading cluster fixture {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing cluster fixture {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    fn known(&self, address: &NodeAddress) -> Result<()> {
        if self.nodes.iter().any(|n| &n.address == address) {
            Ok(())
        } else {
            Err(Error::Unavailable {
                address: address.clone(),
                reason: "not in fixture".to_string(),
            })
        }
    }
}

#[async_trait]
impl ClusterTopologyView for StaticCluster {
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
        self.known(address)?;
        Ok(self
            .node_stats
            .iter()
            .find(|s| &s.address == address)
            .cloned()
            .unwrap_or_else(|| NodeStats::idle(address.clone())))
    }
}

#[async_trait]
impl StatsSource for StaticCluster {
    async fn top_keys(
        &self,
        address: &NodeAddress,
        _categories: &[String],
    ) -> Result<RawTopKeyReport> {
        self.known(address)?;
        Ok(self.top_keys.get(address).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl KeySizeSource for StaticCluster {
    async fn key_size(&self, group: GroupId, _namespace: &str, key: &KeyId) -> Result<u64> {
        let held = self
            .groups
            .iter()
            .any(|g| g.id == group && g.couple.is_some());
        match self.key_sizes.get(key) {
            Some(size) if held => Ok(*size),
            _ => Err(Error::LookupFailed { key: key.clone() }),
        }
    }
}
