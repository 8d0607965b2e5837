//! Cluster-wide top-key statistics.
//!
//! Every cycle each node is asked for its hottest keys. Requests go out
//! together and are harvested as they complete; a node that errors or misses
//! its timeout contributes nothing. The per-node partial views are folded
//! into one [`TopKeyStat`] per `(key, couple)`.

use crate::catalog::{KeyFilter, ReplicaCatalog};
use crate::metrics;
use async_trait::async_trait;
use corelib::{
    CoupleId, Error, GroupId, GroupKind, KeyId, NodeAddress, Result, Topology,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One key as reported by one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawTopKey {
    pub key_id: KeyId,
    pub group: GroupId,
    /// Bytes served for this key during the period.
    pub size: u64,
    pub frequency: u64,
}

/// A node's top-key answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTopKeyReport {
    pub period_seconds: u64,
    pub keys: Vec<RawTopKey>,
}

/// Per-node source of top-key reports.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn top_keys(
        &self,
        address: &NodeAddress,
        categories: &[String],
    ) -> Result<RawTopKeyReport>;
}

/// Aggregation key of a top-key statistic.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StatKey {
    pub key_id: KeyId,
    pub couple_id: CoupleId,
}

impl StatKey {
    pub fn new(key_id: KeyId, couple_id: CoupleId) -> Self {
        Self { key_id, couple_id }
    }
}

/// Cluster-wide view of one hot key for one cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct TopKeyStat {
    pub key_id: KeyId,
    pub couple_id: CoupleId,
    pub namespace: String,
    /// Groups the key was observed on.
    pub groups: Vec<GroupId>,
    pub size: u64,
    pub frequency: u64,
    pub period_seconds: u64,
}

impl TopKeyStat {
    /// Observed bandwidth in bytes/second.
    pub fn bandwidth(&self) -> f64 {
        if self.period_seconds == 0 {
            return 0.0;
        }
        self.size as f64 / self.period_seconds as f64
    }
}

/// The complete top-key table of one cycle.
#[derive(Clone, Debug, Default)]
pub struct TopKeys {
    stats: HashMap<StatKey, TopKeyStat>,
}

impl TopKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stat: TopKeyStat) {
        let key = StatKey::new(stat.key_id.clone(), stat.couple_id.clone());
        self.stats.insert(key, stat);
    }

    pub fn get(&self, key_id: &KeyId, couple_id: &CoupleId) -> Option<&TopKeyStat> {
        self.stats
            .get(&StatKey::new(key_id.clone(), couple_id.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopKeyStat> {
        self.stats.values()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

impl FromIterator<TopKeyStat> for TopKeys {
    fn from_iter<I: IntoIterator<Item = TopKeyStat>>(iter: I) -> Self {
        let mut keys = TopKeys::new();
        for stat in iter {
            keys.insert(stat);
        }
        keys
    }
}

pub struct TopKeyStatsCollector {
    source: Arc<dyn StatsSource>,
    timeout: Duration,
    categories: Vec<String>,
}

impl TopKeyStatsCollector {
    pub fn new(source: Arc<dyn StatsSource>, timeout: Duration, categories: Vec<String>) -> Self {
        Self {
            source,
            timeout,
            categories,
        }
    }

    /// Queries every node of the snapshot and aggregates the answers.
    pub async fn collect(&self, topology: &Topology, catalog: &dyn ReplicaCatalog) -> TopKeys {
        let mut requests = JoinSet::new();
        for node in topology.nodes() {
            let source = Arc::clone(&self.source);
            let address = node.address.clone();
            let categories = self.categories.clone();
            let timeout = self.timeout;
            requests.spawn(async move {
                let result = match tokio::time::timeout(
                    timeout,
                    source.top_keys(&address, &categories),
                )
                .await
                {
                    Ok(res) => res,
                    Err(_) => Err(Error::Timeout {
                        address: address.clone(),
                    }),
                };
                (address, result)
            });
        }

        let mut buckets: HashMap<StatKey, TopKeyStat> = HashMap::new();
        while let Some(joined) = requests.join_next().await {
            let (address, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "top keys request task failed");
                    metrics::record_stats_node_failure("panic");
                    continue;
                }
            };
            match result {
                Ok(report) => {
                    debug!(node = %address, keys = report.keys.len(), "received top keys");
                    self.aggregate(report, topology, catalog, &mut buckets).await;
                }
                Err(err @ Error::Timeout { .. }) => {
                    warn!(node = %address, error = %err, "top keys request timed out");
                    metrics::record_stats_node_failure("timeout");
                }
                Err(err) => {
                    warn!(node = %address, error = %err, "top keys request failed");
                    metrics::record_stats_node_failure("error");
                }
            }
        }

        buckets
            .into_values()
            .map(|mut stat| {
                stat.groups.sort();
                stat.groups.dedup();
                stat
            })
            .collect()
    }

    async fn aggregate(
        &self,
        report: RawTopKeyReport,
        topology: &Topology,
        catalog: &dyn ReplicaCatalog,
        buckets: &mut HashMap<StatKey, TopKeyStat>,
    ) {
        for raw in report.keys {
            let (couple_id, namespace) = match resolve_provenance(&raw, topology, catalog).await {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(err) => {
                    warn!(
                        key = %raw.key_id,
                        group = %raw.group,
                        error = %err,
                        "discarding top key observation"
                    );
                    metrics::record_discarded_observation("provenance");
                    continue;
                }
            };

            let stat = buckets
                .entry(StatKey::new(raw.key_id.clone(), couple_id.clone()))
                .or_insert_with(|| TopKeyStat {
                    key_id: raw.key_id.clone(),
                    couple_id,
                    namespace,
                    groups: Vec::new(),
                    size: 0,
                    frequency: 0,
                    period_seconds: report.period_seconds,
                });
            stat.groups.push(raw.group);
            stat.size += raw.size;
            stat.frequency += raw.frequency;
            stat.period_seconds = report.period_seconds;
        }
    }
}

/// Maps an observation to the couple the key really belongs to.
///
/// Returns `Ok(None)` for observations that are silently irrelevant (unknown
/// group, uncoupled data group) and an error when a cache group hit cannot be
/// attributed to exactly one catalog record.
async fn resolve_provenance(
    raw: &RawTopKey,
    topology: &Topology,
    catalog: &dyn ReplicaCatalog,
) -> Result<Option<(CoupleId, String)>> {
    let Some(group) = topology.group(raw.group) else {
        debug!(key = %raw.key_id, group = %raw.group, "top key on unknown group");
        metrics::record_discarded_observation("unknown_group");
        return Ok(None);
    };

    match group.kind {
        GroupKind::Cache => {
            let filter = KeyFilter::all()
                .key(raw.key_id.clone())
                .cache_group(raw.group);
            let mut matches = catalog.find(&filter).await?;
            if matches.len() != 1 {
                return Err(Error::AmbiguousProvenance {
                    key: raw.key_id.clone(),
                    group: raw.group,
                    matches: matches.len(),
                });
            }
            let record = matches.remove(0);
            Ok(Some((record.couple_id, record.namespace)))
        }
        GroupKind::Data => {
            let Some(couple_id) = group.couple.as_ref() else {
                debug!(key = %raw.key_id, group = %raw.group, "top key on uncoupled group");
                metrics::record_discarded_observation("uncoupled");
                return Ok(None);
            };
            let Some(couple) = topology.couple(couple_id) else {
                debug!(key = %raw.key_id, couple = %couple_id, "top key on unknown couple");
                metrics::record_discarded_observation("unknown_couple");
                return Ok(None);
            };
            Ok(Some((couple.id.clone(), couple.namespace.clone())))
        }
    }
}
