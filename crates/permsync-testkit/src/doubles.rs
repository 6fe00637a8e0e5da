//! Test doubles wrapping the in-memory collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use permsync_core::{PermissionMap, PermissionSet, PrincipalId};
use permsync_store::{MemoryRepository, PermissionRepository, StoreError};
use permsync_sync::{MemoryResolver, PermissionResolver};

/// A repository that can be told to fail, counting bulk writes.
pub struct FlakyRepository {
    inner: Arc<MemoryRepository>,
    fail_writes: AtomicBool,
    fail_pings: AtomicBool,
    bulk_writes: AtomicUsize,
}

impl FlakyRepository {
    pub fn new(inner: Arc<MemoryRepository>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_pings: AtomicBool::new(false),
            bulk_writes: AtomicUsize::new(0),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Successful `put_all_new` calls so far.
    pub fn bulk_writes(&self) -> usize {
        self.bulk_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionRepository for FlakyRepository {
    async fn get_all_by_id(&self) -> permsync_store::Result<PermissionMap> {
        self.inner.get_all_by_id().await
    }

    async fn get(&self, id: &PrincipalId) -> permsync_store::Result<Option<PermissionSet>> {
        self.inner.get(id).await
    }

    async fn put(&self, set: &PermissionSet) -> permsync_store::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        self.inner.put(set).await
    }

    async fn put_all_new(&self, mapping: &PermissionMap) -> permsync_store::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        self.inner.put_all_new(mapping).await?;
        self.bulk_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> permsync_store::Result<()> {
        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("repository unreachable".into()));
        }
        self.inner.ping().await
    }
}

/// A resolver that records how many `resolve` calls overlap.
///
/// Each call is held open for `hold`, widening the window in which a
/// second concurrent cycle would be caught.
pub struct TrackingResolver {
    inner: Arc<MemoryResolver>,
    hold: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl TrackingResolver {
    pub fn new(inner: Arc<MemoryResolver>, hold: Duration) -> Self {
        Self {
            inner,
            hold,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Highest number of simultaneously running `resolve` calls seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionResolver for TrackingResolver {
    async fn resolve(&self, ids: &[PrincipalId]) -> permsync_sync::Result<PermissionMap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.hold).await;
        let result = self.inner.resolve(ids).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn resolve_unrestricted_user(&self) -> permsync_sync::Result<PermissionSet> {
        self.inner.resolve_unrestricted_user().await
    }

    fn batch_size(&self) -> Option<std::num::NonZeroUsize> {
        self.inner.batch_size()
    }

    async fn ping(&self) -> permsync_sync::Result<()> {
        self.inner.ping().await
    }
}
