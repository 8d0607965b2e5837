//! Per-cycle resource accounting for cache groups.
//!
//! A [`ResourceTable`] is rebuilt from the topology snapshot at the start of
//! every cycle. The planner books space and bandwidth into it as it emits
//! tasks, so later decisions in the same cycle see the reduced headroom. The
//! table is never persisted; the next cycle starts again from what the
//! cluster reports.

use crate::task::{Action, Task};
use corelib::{Error, GroupId, GroupKind, GroupState, NodeStats, Result, Topology};
use std::collections::BTreeMap;
use tracing::debug;

/// Snapshot of one cache group's placement-relevant resources.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceGroup {
    pub id: GroupId,
    pub healthy: bool,
    pub datacenter: Option<String>,
    pub weight: u64,
    pub effective_space: u64,
    pub used_space: u64,
    pub reserved_space: u64,
    /// Bandwidth booked for replicas emitted but not yet serving (bytes/s).
    pub reserved_bandwidth: f64,
    /// Current transmit rate of the group's nodes (bytes/s).
    pub tx_rate: f64,
    /// Transmit ceiling of the group (bytes/s).
    pub max_bandwidth: f64,
    pub removed_bytes_since_defrag: u64,
    /// Node asks for defragmentation and none is running.
    pub want_defrag: bool,
}

impl ResourceGroup {
    pub fn free_space(&self) -> u64 {
        self.effective_space
            .saturating_sub(self.used_space)
            .saturating_sub(self.reserved_space)
    }

    /// Fraction of capacity that is not reclaimable free space.
    pub fn dirty_coefficient(&self) -> f64 {
        if self.effective_space == 0 {
            return 1.0;
        }
        let reclaimable = (self.free_space() + self.removed_bytes_since_defrag) as f64;
        1.0 - (reclaimable / self.effective_space as f64).min(1.0)
    }

    /// Free share of capacity; lower means fuller.
    pub fn free_ratio(&self) -> f64 {
        if self.effective_space == 0 {
            return 0.0;
        }
        self.free_space() as f64 / self.effective_space as f64
    }

    pub fn bandwidth_headroom(&self) -> f64 {
        self.max_bandwidth - self.reserved_bandwidth - self.tx_rate
    }

    /// Whether a replica of `size` bytes serving `bandwidth` fits right now.
    pub fn can_host(&self, size: u64, bandwidth: f64) -> bool {
        self.free_space() >= size && self.bandwidth_headroom() >= bandwidth
    }

    pub fn reserve(&mut self, space: u64, bandwidth: f64) -> Result<()> {
        if self.free_space() < space {
            return Err(Error::Reservation {
                group: self.id,
                reason: format!("{} bytes requested, {} free", space, self.free_space()),
            });
        }
        if self.bandwidth_headroom() < bandwidth {
            return Err(Error::Reservation {
                group: self.id,
                reason: format!(
                    "{:.0} B/s requested, {:.0} B/s headroom",
                    bandwidth,
                    self.bandwidth_headroom()
                ),
            });
        }
        self.reserved_space += space;
        self.reserved_bandwidth += bandwidth;
        Ok(())
    }

    /// Undoes a reservation whose task could not be emitted.
    pub fn release(&mut self, space: u64, bandwidth: f64) {
        self.reserved_space = self.reserved_space.saturating_sub(space);
        self.reserved_bandwidth = (self.reserved_bandwidth - bandwidth).max(0.0);
    }

    /// Accounts a replica removal as reclaimable bytes.
    pub fn record_removal(&mut self, size: u64) {
        self.removed_bytes_since_defrag += size;
    }
}

/// Cache groups of the current cycle, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct ResourceTable {
    groups: BTreeMap<GroupId, ResourceGroup>,
}

/// Used space of a group, raised when one of its nodes reports less free
/// disk than the group accounting leaves.
fn used_space(group: &GroupState, stats: &[&NodeStats]) -> u64 {
    stats
        .iter()
        .filter_map(|s| s.free_space)
        .min()
        .map_or(group.used_space, |free| {
            group.used_space.max(group.effective_space.saturating_sub(free))
        })
}

impl ResourceTable {
    /// Builds the table from a topology snapshot. Only cache groups take part
    /// in placement.
    pub fn snapshot(topology: &Topology, max_group_bandwidth: f64) -> Self {
        let groups = topology
            .groups()
            .filter(|g| g.kind == GroupKind::Cache)
            .map(|g| {
                let stats: Vec<_> = g
                    .nodes
                    .iter()
                    .filter_map(|addr| topology.node_stats(addr))
                    .collect();
                let rg = ResourceGroup {
                    id: g.id,
                    healthy: g.status.is_healthy() && !g.nodes.is_empty(),
                    datacenter: topology.group_datacenter(g.id).map(str::to_string),
                    weight: g.weight,
                    effective_space: g.effective_space,
                    used_space: used_space(g, &stats),
                    reserved_space: 0,
                    reserved_bandwidth: 0.0,
                    tx_rate: topology.group_tx_rate(g.id),
                    max_bandwidth: max_group_bandwidth,
                    // Every node of a group holds the same replicas
                    removed_bytes_since_defrag: stats
                        .iter()
                        .map(|s| s.removed_bytes)
                        .max()
                        .unwrap_or(0),
                    want_defrag: stats.iter().any(|s| s.want_defrag)
                        && !stats.iter().any(|s| s.defrag_in_progress),
                };
                (g.id, rg)
            })
            .collect();
        Self { groups }
    }

    pub fn from_groups(groups: impl IntoIterator<Item = ResourceGroup>) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.id, g)).collect(),
        }
    }

    pub fn get(&self, id: GroupId) -> Option<&ResourceGroup> {
        self.groups.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceGroup> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn reserve(&mut self, id: GroupId, space: u64, bandwidth: f64) -> Result<()> {
        match self.groups.get_mut(&id) {
            Some(group) => group.reserve(space, bandwidth),
            None => Err(Error::Reservation {
                group: id,
                reason: "group is not in the resource table".to_string(),
            }),
        }
    }

    pub fn release(&mut self, id: GroupId, space: u64, bandwidth: f64) {
        if let Some(group) = self.groups.get_mut(&id) {
            group.release(space, bandwidth);
        }
    }

    pub fn record_removal(&mut self, id: GroupId, size: u64) {
        if let Some(group) = self.groups.get_mut(&id) {
            group.record_removal(size);
        }
    }

    /// Books the resources of tasks that were already in flight.
    ///
    /// Used once after startup. Tasks that no longer fit are still booked up
    /// to the group's capacity since they are executing regardless.
    pub fn apply_pending(&mut self, tasks: &[Task]) {
        for task in tasks.iter().filter(|t| t.action == Action::Add) {
            let Some(group) = self.groups.get_mut(&task.target_group) else {
                debug!(
                    group = %task.target_group,
                    key = %task.key_id,
                    "in-flight task targets unknown group"
                );
                continue;
            };
            let space = task.size.unwrap_or(0).min(group.free_space());
            group.reserved_space += space;
            group.reserved_bandwidth += task.reserved_bandwidth.unwrap_or(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{CoupleId, GroupState, GroupStatus, KeyId, Node, NodeAddress, NodeStats};

    fn group(id: u32) -> ResourceGroup {
        ResourceGroup {
            id: GroupId(id),
            healthy: true,
            datacenter: Some("dc1".to_string()),
            weight: 0,
            effective_space: 1000,
            used_space: 200,
            reserved_space: 0,
            reserved_bandwidth: 0.0,
            tx_rate: 10.0,
            max_bandwidth: 100.0,
            removed_bytes_since_defrag: 0,
            want_defrag: false,
        }
    }

    #[test]
    fn test_free_space_never_negative() {
        let mut g = group(1);
        g.used_space = 900;
        g.reserved_space = 500;
        assert_eq!(g.free_space(), 0);
    }

    #[test]
    fn test_dirty_coefficient() {
        let mut g = group(1);
        // 800 free of 1000
        assert!((g.dirty_coefficient() - 0.2).abs() < 1e-9);

        g.used_space = 900;
        g.removed_bytes_since_defrag = 100;
        // 100 free + 100 removed
        assert!((g.dirty_coefficient() - 0.8).abs() < 1e-9);

        g.removed_bytes_since_defrag = 5000;
        assert_eq!(g.dirty_coefficient(), 0.0);

        g.effective_space = 0;
        assert_eq!(g.dirty_coefficient(), 1.0);
    }

    #[test]
    fn test_reserve_updates_headroom() {
        let mut g = group(1);
        g.reserve(500, 50.0).unwrap();
        assert_eq!(g.free_space(), 300);
        assert_eq!(g.bandwidth_headroom(), 40.0);

        assert!(matches!(g.reserve(400, 1.0), Err(Error::Reservation { .. })));
        assert!(matches!(g.reserve(1, 41.0), Err(Error::Reservation { .. })));

        g.release(500, 50.0);
        assert_eq!(g.free_space(), 800);
        assert_eq!(g.bandwidth_headroom(), 90.0);
    }

    #[test]
    fn test_table_reserve_unknown_group() {
        let mut table = ResourceTable::from_groups(vec![group(1)]);
        assert!(table.reserve(GroupId(1), 10, 1.0).is_ok());
        assert!(table.reserve(GroupId(2), 10, 1.0).is_err());
    }

    #[test]
    fn test_snapshot_takes_cache_groups_only() {
        let topology = Topology::new(
            vec![Node::new("n1", "h1", "dc1"), Node::new("n2", "h2", "dc2")],
            vec![
                GroupState {
                    id: GroupId(1),
                    kind: GroupKind::Data,
                    status: GroupStatus::Ok,
                    nodes: vec![NodeAddress::new("n1")],
                    couple: Some(CoupleId::new("1")),
                    effective_space: 100,
                    used_space: 0,
                    weight: 0,
                },
                GroupState {
                    id: GroupId(10),
                    kind: GroupKind::Cache,
                    status: GroupStatus::Bad,
                    nodes: vec![NodeAddress::new("n2")],
                    couple: None,
                    effective_space: 100,
                    used_space: 40,
                    weight: 3,
                },
            ],
            vec![],
        )
        .with_node_stats(vec![NodeStats {
            tx_rate: 7.0,
            removed_bytes: 20,
            want_defrag: true,
            ..NodeStats::idle(NodeAddress::new("n2"))
        }]);

        let table = ResourceTable::snapshot(&topology, 50.0);
        assert_eq!(table.len(), 1);
        let g = table.get(GroupId(10)).unwrap();
        assert!(!g.healthy);
        assert_eq!(g.datacenter.as_deref(), Some("dc2"));
        assert_eq!(g.tx_rate, 7.0);
        assert_eq!(g.removed_bytes_since_defrag, 20);
        assert!(g.want_defrag);
        assert_eq!(g.bandwidth_headroom(), 43.0);
    }

    #[test]
    fn test_snapshot_counts_removed_bytes_once_per_group() {
        let topology = Topology::new(
            vec![Node::new("n1", "h1", "dc1"), Node::new("n2", "h2", "dc1")],
            vec![GroupState {
                id: GroupId(10),
                kind: GroupKind::Cache,
                status: GroupStatus::Ok,
                nodes: vec![NodeAddress::new("n1"), NodeAddress::new("n2")],
                couple: None,
                effective_space: 100,
                used_space: 80,
                weight: 0,
            }],
            vec![],
        )
        .with_node_stats(vec![
            NodeStats {
                removed_bytes: 20,
                ..NodeStats::idle(NodeAddress::new("n1"))
            },
            NodeStats {
                removed_bytes: 50,
                ..NodeStats::idle(NodeAddress::new("n2"))
            },
        ]);

        let table = ResourceTable::snapshot(&topology, 50.0);
        let g = table.get(GroupId(10)).unwrap();
        assert_eq!(g.removed_bytes_since_defrag, 50);
        // 20 free + 50 removed of 100
        assert!((g.dirty_coefficient() - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_honours_node_free_space() {
        let cache = |id: u32, node: &str| GroupState {
            id: GroupId(id),
            kind: GroupKind::Cache,
            status: GroupStatus::Ok,
            nodes: vec![NodeAddress::new(node)],
            couple: None,
            effective_space: 1000,
            used_space: 200,
            weight: 0,
        };
        let topology = Topology::new(
            vec![Node::new("n1", "h1", "dc1"), Node::new("n2", "h2", "dc1")],
            vec![cache(10, "n1"), cache(11, "n2")],
            vec![],
        )
        .with_node_stats(vec![
            NodeStats {
                free_space: Some(300),
                ..NodeStats::idle(NodeAddress::new("n1"))
            },
            NodeStats {
                free_space: Some(5000),
                ..NodeStats::idle(NodeAddress::new("n2"))
            },
        ]);

        let table = ResourceTable::snapshot(&topology, 50.0);
        assert_eq!(table.get(GroupId(10)).unwrap().free_space(), 300);
        assert_eq!(table.get(GroupId(11)).unwrap().free_space(), 800);
    }

    #[test]
    fn test_apply_pending_books_add_tasks() {
        let mut table = ResourceTable::from_groups(vec![group(1)]);
        let add = Task {
            key_id: KeyId::new("k"),
            couple_id: CoupleId::new("1:2"),
            namespace: "ns".to_string(),
            target_group: GroupId(1),
            source_groups: vec![GroupId(2)],
            action: Action::Add,
            reserved_bandwidth: Some(5.0),
            size: Some(100),
        };
        let remove = Task {
            action: Action::Remove,
            reserved_bandwidth: None,
            size: None,
            ..add.clone()
        };
        table.apply_pending(&[add, remove]);
        let g = table.get(GroupId(1)).unwrap();
        assert_eq!(g.reserved_space, 100);
        assert_eq!(g.reserved_bandwidth, 5.0);
    }
}
