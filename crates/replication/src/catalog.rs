//! Persisted record of which keys are cached where.

use async_trait::async_trait;
use corelib::{CoupleId, Error, GroupId, KeyId, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A key that currently has (or is about to get) cache replicas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedKey {
    pub id: KeyId,
    pub couple_id: CoupleId,
    pub namespace: String,
    /// Approximate payload size in bytes.
    pub size: u64,
    /// Groups holding the durable copies; fixed for the key's lifetime.
    pub data_groups: Vec<GroupId>,
    /// Groups holding cache replicas.
    pub cache_groups: Vec<GroupId>,
    /// Last observed bandwidth (bytes/s).
    pub rate: f64,
    /// Unix seconds of the last replica addition.
    pub expand_ts: u64,
}

impl CachedKey {
    pub fn new(
        id: KeyId,
        couple_id: CoupleId,
        namespace: impl Into<String>,
        data_groups: Vec<GroupId>,
    ) -> Self {
        Self {
            id,
            couple_id,
            namespace: namespace.into(),
            size: 0,
            data_groups,
            cache_groups: Vec::new(),
            rate: 0.0,
            expand_ts: 0,
        }
    }

    /// Total copies: durable plus cached.
    pub fn copies(&self) -> usize {
        self.data_groups.len() + self.cache_groups.len()
    }

    /// Whether `group` already holds any copy of this key.
    pub fn holds(&self, group: GroupId) -> bool {
        self.data_groups.contains(&group) || self.cache_groups.contains(&group)
    }
}

/// Conjunctive filter over catalog records. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyFilter {
    pub key_id: Option<KeyId>,
    pub cache_group: Option<GroupId>,
    /// Matches records with `expand_ts` strictly below this value.
    pub expanded_before: Option<u64>,
}

impl KeyFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn key(mut self, key_id: KeyId) -> Self {
        self.key_id = Some(key_id);
        self
    }

    pub fn cache_group(mut self, group: GroupId) -> Self {
        self.cache_group = Some(group);
        self
    }

    pub fn expanded_before(mut self, ts: u64) -> Self {
        self.expanded_before = Some(ts);
        self
    }

    pub fn matches(&self, key: &CachedKey) -> bool {
        self.key_id.as_ref().map_or(true, |id| *id == key.id)
            && self.cache_group.map_or(true, |g| key.cache_groups.contains(&g))
            && self.expanded_before.map_or(true, |ts| key.expand_ts < ts)
    }
}

/// Store of [`CachedKey`] records, keyed by `(key id, couple id)`.
#[async_trait]
pub trait ReplicaCatalog: Send + Sync {
    async fn find(&self, filter: &KeyFilter) -> Result<Vec<CachedKey>>;

    async fn upsert(&self, key: &CachedKey) -> Result<()>;

    async fn remove(&self, key_id: &KeyId, couple_id: &CoupleId) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    data: DashMap<(KeyId, CoupleId), CachedKey>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(keys: impl IntoIterator<Item = CachedKey>) -> Self {
        let catalog = Self::new();
        for key in keys {
            catalog
                .data
                .insert((key.id.clone(), key.couple_id.clone()), key);
        }
        catalog
    }

    pub fn get(&self, key_id: &KeyId, couple_id: &CoupleId) -> Option<CachedKey> {
        self.data
            .get(&(key_id.clone(), couple_id.clone()))
            .map(|r| r.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl ReplicaCatalog for InMemoryCatalog {
    async fn find(&self, filter: &KeyFilter) -> Result<Vec<CachedKey>> {
        let mut found: Vec<CachedKey> = self
            .data
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| (&a.id, &a.couple_id).cmp(&(&b.id, &b.couple_id)));
        Ok(found)
    }

    async fn upsert(&self, key: &CachedKey) -> Result<()> {
        if key.cache_groups.is_empty() {
            return Err(Error::Catalog(format!(
                "record {} of couple {} has no cache groups",
                key.id, key.couple_id
            )));
        }
        self.data
            .insert((key.id.clone(), key.couple_id.clone()), key.clone());
        Ok(())
    }

    async fn remove(&self, key_id: &KeyId, couple_id: &CoupleId) -> Result<()> {
        self.data.remove(&(key_id.clone(), couple_id.clone()));
        Ok(())
    }
}
