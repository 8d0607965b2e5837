//! Top-key aggregation across nodes, including misbehaving ones.

mod common;

use common::*;
use corelib::{CoupleId, GroupId, KeyId, NodeAddress};
use replication::{CachedKey, InMemoryCatalog, RawTopKey, RawTopKeyReport, TopKeyStatsCollector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn report(keys: Vec<(&str, u32, u64)>) -> RawTopKeyReport {
    RawTopKeyReport {
        period_seconds: 60,
        keys: keys
            .into_iter()
            .map(|(key, group, size)| RawTopKey {
                key_id: KeyId::new(key),
                group: GroupId(group),
                size,
                frequency: 1,
            })
            .collect(),
    }
}

fn cached(key: &str, couple: &str, cache_groups: &[u32]) -> CachedKey {
    let mut record = CachedKey::new(KeyId::new(key), CoupleId::new(couple), "ns", vec![GroupId(1)]);
    record.cache_groups = cache_groups.iter().map(|g| GroupId(*g)).collect();
    record
}

#[tokio::test]
async fn test_aggregates_across_nodes_and_cache_groups() {
    let mut cluster = FakeCluster::standard();
    cluster.failing = HashSet::from([NodeAddress::new("c3")]);
    cluster.slow = HashSet::from([NodeAddress::new("c4")]);
    cluster.set_report("d1", report(vec![("K", 1, 100)]));
    cluster.set_report("d2", report(vec![("K", 2, 200)]));
    // Cache hit, attributed through the catalog
    cluster.set_report("c1", report(vec![("K", 10, 300)]));
    // No catalog record for Z on a cache group
    cluster.set_report("c2", report(vec![("Z", 11, 1000)]));
    // Q is cached on 14 for two couples
    cluster.set_report("c5", report(vec![("Q", 14, 1000)]));
    // Unknown group
    cluster.set_report("d3", report(vec![("U", 99, 1000)]));
    // Would be visible if the slow node answered in time
    cluster.set_report("c4", report(vec![("S", 1, 1000)]));

    let catalog = InMemoryCatalog::with_keys(vec![
        cached("K", "1:2:3", &[10]),
        cached("Q", "1:2:3", &[14]),
        cached("Q", "4:5:6", &[14]),
    ]);
    let topology = cluster.topology();
    let collector = TopKeyStatsCollector::new(
        Arc::new(cluster),
        Duration::from_millis(50),
        vec!["read".to_string()],
    );

    let top = collector.collect(&topology, &catalog).await;
    assert_eq!(top.len(), 1, "unexpected stats: {:?}", top);
    let stat = top.get(&KeyId::new("K"), &CoupleId::new("1:2:3")).unwrap();
    assert_eq!(stat.groups, vec![GroupId(1), GroupId(2), GroupId(10)]);
    assert_eq!(stat.size, 600);
    assert_eq!(stat.frequency, 3);
    assert_eq!(stat.period_seconds, 60);
    assert_eq!(stat.bandwidth(), 10.0);
    assert_eq!(stat.namespace, "ns");
}

#[tokio::test]
async fn test_uncoupled_data_group_is_skipped() {
    let mut cluster = FakeCluster::standard();
    for g in cluster.groups.iter_mut() {
        if g.id == GroupId(1) {
            g.couple = None;
        }
    }
    cluster.set_report("d1", report(vec![("K", 1, 100)]));
    cluster.set_report("d2", report(vec![("K", 2, 100)]));
    let topology = cluster.topology();
    let collector = TopKeyStatsCollector::new(Arc::new(cluster), Duration::from_secs(1), vec![]);

    let top = collector.collect(&topology, &InMemoryCatalog::new()).await;
    let stat = top.get(&KeyId::new("K"), &CoupleId::new("1:2:3")).unwrap();
    assert_eq!(stat.groups, vec![GroupId(2)]);
    assert_eq!(stat.size, 100);
}

#[tokio::test]
async fn test_every_node_failing_yields_empty_table() {
    let mut cluster = FakeCluster::standard();
    cluster.failing = cluster.nodes.iter().map(|n| n.address.clone()).collect();
    let topology = cluster.topology();
    let collector = TopKeyStatsCollector::new(Arc::new(cluster), Duration::from_secs(1), vec![]);

    let top = collector.collect(&topology, &InMemoryCatalog::new()).await;
    assert!(top.is_empty());
}
