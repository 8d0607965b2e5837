//! Key size lookups against durable groups.

use async_trait::async_trait;
use corelib::{Error, GroupId, KeyId, Result};
use tracing::debug;

/// Answers how large a stored key is, asking one group at a time.
#[async_trait]
pub trait KeySizeSource: Send + Sync {
    async fn key_size(&self, group: GroupId, namespace: &str, key: &KeyId) -> Result<u64>;
}

/// Asks each data group in turn and returns the first answer.
///
/// Fails with [`Error::LookupFailed`] only when every group fails.
pub async fn lookup_key_size(
    source: &dyn KeySizeSource,
    key: &KeyId,
    namespace: &str,
    data_groups: &[GroupId],
) -> Result<u64> {
    for group in data_groups {
        match source.key_size(*group, namespace, key).await {
            Ok(size) => return Ok(size),
            Err(err) => {
                debug!(key = %key, group = %group, error = %err, "key size lookup failed");
            }
        }
    }
    Err(Error::LookupFailed { key: key.clone() })
}
