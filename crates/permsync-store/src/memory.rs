//! In-memory implementation of the repository.
//!
//! The whole mapping lives behind one `Arc`. Readers clone the `Arc` and
//! work on a stable snapshot; `put_all_new` builds the replacement off to
//! the side and swaps it in under a single write lock.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use permsync_core::{PermissionMap, PermissionSet, PrincipalId};

use crate::error::{Result, StoreError};
use crate::traits::{check_mapping, PermissionRepository};

/// In-memory repository. All data is lost when dropped.
pub struct MemoryRepository {
    inner: RwLock<Arc<PermissionMap>>,
}

impl MemoryRepository {
    /// Create a new empty repository.
    pub fn new() -> Self {
        Self::with_mapping(PermissionMap::new())
    }

    /// Create a repository pre-populated with `mapping`.
    pub fn with_mapping(mapping: PermissionMap) -> Self {
        Self {
            inner: RwLock::new(Arc::new(mapping)),
        }
    }

    /// The current snapshot, without copying it.
    pub fn snapshot(&self) -> Result<Arc<PermissionMap>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(Arc::clone(&*inner))
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionRepository for MemoryRepository {
    async fn get_all_by_id(&self) -> Result<PermissionMap> {
        Ok(self.snapshot()?.as_ref().clone())
    }

    async fn get(&self, id: &PrincipalId) -> Result<Option<PermissionSet>> {
        Ok(self.snapshot()?.get(id).cloned())
    }

    async fn put(&self, set: &PermissionSet) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Arc::make_mut(&mut *inner).insert(set.principal_id.clone(), set.clone());
        Ok(())
    }

    async fn put_all_new(&self, mapping: &PermissionMap) -> Result<()> {
        check_mapping(mapping)?;
        let replacement = Arc::new(mapping.clone());

        let mut inner = self
            .inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        *inner = replacement;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.snapshot().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(sets: &[PermissionSet]) -> PermissionMap {
        sets.iter()
            .map(|s| (s.principal_id.clone(), s.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let repo = MemoryRepository::new();
        let set = PermissionSet::new("user1").with_account("account1");

        repo.put(&set).await.unwrap();

        let loaded = repo.get(&PrincipalId::from("user1")).await.unwrap().unwrap();
        assert_eq!(loaded, set);
        assert!(repo.get(&PrincipalId::from("user2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_all_new_replaces_everything() {
        let repo = MemoryRepository::new();
        repo.put(&PermissionSet::new("stale")).await.unwrap();

        let fresh = mapping(&[
            PermissionSet::new("a").with_account("x"),
            PermissionSet::new("b"),
        ]);
        repo.put_all_new(&fresh).await.unwrap();

        assert_eq!(repo.get_all_by_id().await.unwrap(), fresh);
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_across_replace() {
        let repo = MemoryRepository::with_mapping(mapping(&[PermissionSet::new("old")]));
        let before = repo.snapshot().unwrap();

        repo.put_all_new(&mapping(&[PermissionSet::new("new")]))
            .await
            .unwrap();

        assert!(before.contains_key("old"));
        assert!(!repo.snapshot().unwrap().contains_key("old"));
    }

    #[tokio::test]
    async fn test_put_all_new_rejects_mismatched_keys() {
        let repo = MemoryRepository::new();
        repo.put(&PermissionSet::new("keep")).await.unwrap();

        let mut bad = PermissionMap::new();
        bad.insert(PrincipalId::from("a"), PermissionSet::new("b"));

        let err = repo.put_all_new(&bad).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
        // prior content untouched
        assert!(repo.snapshot().unwrap().contains_key("keep"));
    }
}
