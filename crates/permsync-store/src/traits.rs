//! Repository trait: the abstract interface for permission persistence.
//!
//! The sync engine only talks to this trait, so the storage backend can be
//! swapped for an in-memory double in tests.

use std::sync::Arc;

use async_trait::async_trait;
use permsync_core::{PermissionMap, PermissionSet, PrincipalId};

use crate::error::{Result, StoreError};

/// Durable keyed store of principal id → permission set.
///
/// # Design Notes
///
/// - `put_all_new` replaces the complete content of the repository. Ids
///   missing from the mapping are removed. Implementations must make the
///   swap atomic with respect to concurrent readers, or document the window.
/// - Reads may run concurrently with a replace and observe either snapshot.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Every stored permission set, keyed by principal id.
    async fn get_all_by_id(&self) -> Result<PermissionMap>;

    /// A single principal's permission set.
    async fn get(&self, id: &PrincipalId) -> Result<Option<PermissionSet>>;

    /// Insert or replace a single permission set.
    async fn put(&self, set: &PermissionSet) -> Result<()>;

    /// Replace the full id-space with `mapping`.
    async fn put_all_new(&self, mapping: &PermissionMap) -> Result<()>;

    /// Cheap reachability check used by the health probe.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<R: PermissionRepository + ?Sized> PermissionRepository for Arc<R> {
    async fn get_all_by_id(&self) -> Result<PermissionMap> {
        (**self).get_all_by_id().await
    }

    async fn get(&self, id: &PrincipalId) -> Result<Option<PermissionSet>> {
        (**self).get(id).await
    }

    async fn put(&self, set: &PermissionSet) -> Result<()> {
        (**self).put(set).await
    }

    async fn put_all_new(&self, mapping: &PermissionMap) -> Result<()> {
        (**self).put_all_new(mapping).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}

/// Reject mappings whose keys disagree with the sets they hold.
pub(crate) fn check_mapping(mapping: &PermissionMap) -> Result<()> {
    for (id, set) in mapping {
        if id != &set.principal_id {
            return Err(StoreError::InvalidData(format!(
                "mapping key {id} holds permission set of {}",
                set.principal_id
            )));
        }
    }
    Ok(())
}
