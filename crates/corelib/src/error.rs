//! Error types for the core library.

use crate::node::NodeAddress;
use crate::topology::{GroupId, KeyId};
use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while observing the cluster or planning cache
/// replicas.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Configuration violates an engine invariant
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Topology is missing or inconsistent
    #[error("Topology error: {0}")]
    Topology(String),
    /// A node did not answer or answered with an error
    #[error("Node {address} unavailable: {reason}")]
    Unavailable { address: NodeAddress, reason: String },
    /// A node did not answer within the request timeout
    #[error("Node {address} timed out")]
    Timeout { address: NodeAddress },
    /// A cache group hit could not be mapped to exactly one couple
    #[error("Key {key} on cache group {group} matched {matches} catalog records")]
    AmbiguousProvenance {
        key: KeyId,
        group: GroupId,
        matches: usize,
    },
    /// Every durable group failed to answer a key lookup
    #[error("Lookup of key {key} failed on every data group")]
    LookupFailed { key: KeyId },
    /// Space or bandwidth could not be reserved on a group
    #[error("Reservation on group {group} failed: {reason}")]
    Reservation { group: GroupId, reason: String },
    /// Replica catalog backend error
    #[error("Catalog error: {0}")]
    Catalog(String),
    /// Task queue backend error
    #[error("Task queue error: {0}")]
    TaskQueue(String),
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
