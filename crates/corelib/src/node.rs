//! Node abstractions for the storage cluster.
//!
//! Nodes are the physical processes that serve storage groups. They are
//! addressed by a `NodeAddress` and carry the topology labels (datacenter,
//! host) used for locality-aware cache placement.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a storage node (e.g. `"10.0.0.1:1025:10"`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(pub String);

impl NodeAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cluster classification level used to measure placement locality.
///
/// Levels are ordered from the widest failure domain to the narrowest.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyUnit {
    Datacenter,
    Host,
}

impl TopologyUnit {
    /// All levels, widest first.
    pub const ALL: [TopologyUnit; 2] = [TopologyUnit::Datacenter, TopologyUnit::Host];
}

/// Storage node participating in the cluster.
///
/// Keep this struct small and cheap to clone; load figures live in
/// [`crate::topology::NodeStats`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub address: NodeAddress,
    /// Hostname the node runs on.
    pub host: String,
    /// Datacenter label for topology-aware placement.
    pub datacenter: String,
}

impl Node {
    pub fn new(
        address: impl Into<String>,
        host: impl Into<String>,
        datacenter: impl Into<String>,
    ) -> Self {
        Self {
            address: NodeAddress::new(address),
            host: host.into(),
            datacenter: datacenter.into(),
        }
    }

    /// Label of this node at the given classification level.
    pub fn unit(&self, level: TopologyUnit) -> &str {
        match level {
            TopologyUnit::Datacenter => &self.datacenter,
            TopologyUnit::Host => &self.host,
        }
    }

    /// Number of classification levels on which `self` and `other` differ.
    pub fn unit_distance(&self, other: &Node) -> usize {
        TopologyUnit::ALL
            .iter()
            .filter(|level| self.unit(**level) != other.unit(**level))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_distance() {
        let a = Node::new("10.0.0.1:1025", "host-a", "dc1");
        let same_host = Node::new("10.0.0.1:1026", "host-a", "dc1");
        let other_host = Node::new("10.0.0.2:1025", "host-b", "dc1");
        let other_dc = Node::new("10.1.0.1:1025", "host-c", "dc2");

        assert_eq!(a.unit_distance(&same_host), 0);
        assert_eq!(a.unit_distance(&other_host), 1);
        assert_eq!(a.unit_distance(&other_dc), 2);
    }

    #[test]
    fn test_address_serializes_transparently() {
        let addr = NodeAddress::new("10.0.0.1:1025:10");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"10.0.0.1:1025:10\"");
    }
}
