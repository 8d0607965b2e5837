//! Replica tasks and the queue that executes them.
//!
//! Tasks are write-once: the engine hands them to a [`TaskQueue`] and never
//! polls for completion or retries them.

use crate::catalog::CachedKey;
use async_trait::async_trait;
use corelib::{CoupleId, GroupId, KeyId, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a task does to a cache group.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Remove => "remove",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instruction to create or drop one cache replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub key_id: KeyId,
    pub couple_id: CoupleId,
    pub namespace: String,
    pub target_group: GroupId,
    /// Groups to copy from (adds only).
    pub source_groups: Vec<GroupId>,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_bandwidth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Task {
    pub fn add(key: &CachedKey, target: GroupId, source: GroupId, bandwidth: f64) -> Self {
        Self {
            key_id: key.id.clone(),
            couple_id: key.couple_id.clone(),
            namespace: key.namespace.clone(),
            target_group: target,
            source_groups: vec![source],
            action: Action::Add,
            reserved_bandwidth: Some(bandwidth),
            size: Some(key.size),
        }
    }

    pub fn remove(key: &CachedKey, target: GroupId) -> Self {
        Self {
            key_id: key.id.clone(),
            couple_id: key.couple_id.clone(),
            namespace: key.namespace.clone(),
            target_group: target,
            source_groups: Vec::new(),
            action: Action::Remove,
            reserved_bandwidth: None,
            size: None,
        }
    }
}

/// Asynchronous executor of replica tasks on the storage layer.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a task. Delivery is at-most-once.
    async fn put(&self, task: Task) -> Result<()>;

    /// Tasks currently in flight.
    async fn list(&self) -> Result<Vec<Task>>;

    /// Enqueues an out-of-band defragmentation of a group.
    async fn schedule_defrag(&self, group: GroupId) -> Result<()>;
}

/// Queue that only records what it receives.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<Task>>,
    defrag: Mutex<Vec<GroupId>>,
}

impl InMemoryTaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            defrag: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().clone()
    }

    pub fn defrag_jobs(&self) -> Vec<GroupId> {
        self.defrag.lock().clone()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn put(&self, task: Task) -> Result<()> {
        self.tasks.lock().push(task);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Task>> {
        Ok(self.tasks())
    }

    async fn schedule_defrag(&self, group: GroupId) -> Result<()> {
        self.defrag.lock().push(group);
        Ok(())
    }
}
