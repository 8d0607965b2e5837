//! Core library for the hot-key cache engine.
//!
//! This crate provides the cluster vocabulary shared by the engine:
//! - Node identity and topology units (datacenter, host)
//! - Storage groups, couples and their identifiers
//! - Immutable topology snapshots and the live topology source trait
//! - The workspace error type

pub mod error;
pub mod node;
pub mod topology;

pub use error::{Error, Result};
pub use node::{Node, NodeAddress, TopologyUnit};
pub use topology::{
    ClusterTopologyView, CoupleId, CoupleState, GroupId, GroupKind, GroupState, GroupStatus,
    KeyId, NodeStats, Topology,
};
