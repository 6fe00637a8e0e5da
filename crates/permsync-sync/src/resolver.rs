//! Resolver abstraction: the upstream source of truth for permissions.
//!
//! Production implementations call out to directory and role providers.
//! The engine only relies on this trait.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use permsync_core::{PermissionMap, PermissionSet, PrincipalId};

use crate::error::Result;

/// Fetches authoritative permissions for principals.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    /// Resolve a batch of principal ids.
    ///
    /// The result may be a subset of `ids`; an omitted id means the
    /// principal is no longer valid.
    async fn resolve(&self, ids: &[PrincipalId]) -> Result<PermissionMap>;

    /// The baseline permission set granted to every principal.
    async fn resolve_unrestricted_user(&self) -> Result<PermissionSet>;

    /// Maximum ids per `resolve` call. `None` resolves everything in one call.
    fn batch_size(&self) -> Option<NonZeroUsize> {
        None
    }

    /// Cheap reachability check used by the health probe.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<T: PermissionResolver + ?Sized> PermissionResolver for Arc<T> {
    async fn resolve(&self, ids: &[PrincipalId]) -> Result<PermissionMap> {
        (**self).resolve(ids).await
    }

    async fn resolve_unrestricted_user(&self) -> Result<PermissionSet> {
        (**self).resolve_unrestricted_user().await
    }

    fn batch_size(&self) -> Option<NonZeroUsize> {
        (**self).batch_size()
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}

/// An in-memory resolver for tests and single-node setups.
///
/// Holds a table of known principals plus the baseline, and can be told to
/// fail in the ways real providers do.
pub mod memory {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;
    use std::time::Duration;

    use crate::error::SyncError;

    #[derive(Default)]
    struct Failures {
        all: bool,
        unrestricted: bool,
        /// Any batch containing one of these ids errors.
        poisoned_ids: BTreeSet<PrincipalId>,
    }

    /// In-memory resolver implementation.
    pub struct MemoryResolver {
        known: RwLock<PermissionMap>,
        unrestricted: RwLock<PermissionSet>,
        failures: RwLock<Failures>,
        batch_size: Option<NonZeroUsize>,
        delay: Option<Duration>,
        resolve_calls: AtomicUsize,
    }

    impl MemoryResolver {
        /// Create a resolver with the given baseline and no known principals.
        pub fn new(unrestricted: PermissionSet) -> Self {
            Self {
                known: RwLock::new(PermissionMap::new()),
                unrestricted: RwLock::new(unrestricted),
                failures: RwLock::new(Failures::default()),
                batch_size: None,
                delay: None,
                resolve_calls: AtomicUsize::new(0),
            }
        }

        /// Split resolution into batches of at most `size` ids.
        pub fn with_batch_size(mut self, size: NonZeroUsize) -> Self {
            self.batch_size = Some(size);
            self
        }

        /// Sleep for `delay` inside every `resolve` call.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Make `set` the current authoritative answer for its principal.
        pub fn insert(&self, set: PermissionSet) {
            if let Ok(mut known) = self.known.write() {
                known.insert(set.principal_id.clone(), set);
            }
        }

        /// Forget a principal; it will be omitted from future results.
        pub fn remove(&self, id: &PrincipalId) {
            if let Ok(mut known) = self.known.write() {
                known.remove(id);
            }
        }

        pub fn set_unrestricted(&self, set: PermissionSet) {
            if let Ok(mut unrestricted) = self.unrestricted.write() {
                *unrestricted = set;
            }
        }

        /// Fail every `resolve` call.
        pub fn fail_all(&self, fail: bool) {
            if let Ok(mut failures) = self.failures.write() {
                failures.all = fail;
            }
        }

        /// Fail `resolve_unrestricted_user`.
        pub fn fail_unrestricted(&self, fail: bool) {
            if let Ok(mut failures) = self.failures.write() {
                failures.unrestricted = fail;
            }
        }

        /// Fail any batch that contains `id`.
        pub fn fail_batches_containing(&self, id: impl Into<PrincipalId>) {
            if let Ok(mut failures) = self.failures.write() {
                failures.poisoned_ids.insert(id.into());
            }
        }

        /// Number of `resolve` calls made so far.
        pub fn resolve_calls(&self) -> usize {
            self.resolve_calls.load(Ordering::SeqCst)
        }

        fn read_failures<R>(&self, f: impl FnOnce(&Failures) -> R) -> Result<R> {
            self.failures
                .read()
                .map(|failures| f(&failures))
                .map_err(|e| SyncError::Unavailable(format!("resolver state poisoned: {e}")))
        }
    }

    #[async_trait]
    impl PermissionResolver for MemoryResolver {
        async fn resolve(&self, ids: &[PrincipalId]) -> Result<PermissionMap> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let failed = self.read_failures(|f| {
                f.all || ids.iter().any(|id| f.poisoned_ids.contains(id))
            })?;
            if failed {
                return Err(anyhow::anyhow!("provider rejected batch of {} ids", ids.len()).into());
            }

            let known = self
                .known
                .read()
                .map_err(|e| SyncError::Unavailable(format!("resolver state poisoned: {e}")))?;
            Ok(ids
                .iter()
                .filter_map(|id| known.get(id).map(|set| (id.clone(), set.clone())))
                .collect())
        }

        async fn resolve_unrestricted_user(&self) -> Result<PermissionSet> {
            if self.read_failures(|f| f.unrestricted)? {
                return Err(SyncError::Unavailable("baseline provider down".into()));
            }
            self.unrestricted
                .read()
                .map(|set| set.clone())
                .map_err(|e| SyncError::Unavailable(format!("resolver state poisoned: {e}")))
        }

        fn batch_size(&self) -> Option<NonZeroUsize> {
            self.batch_size
        }

        async fn ping(&self) -> Result<()> {
            if self.read_failures(|f| f.all)? {
                return Err(SyncError::Unavailable("resolver unreachable".into()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryResolver;
    use super::*;
    use crate::error::SyncError;

    #[tokio::test]
    async fn test_memory_resolver_returns_subset() {
        let resolver = MemoryResolver::new(PermissionSet::new("$unrestricted"));
        resolver.insert(PermissionSet::new("user1").with_account("account1"));

        let ids = vec![PrincipalId::from("user1"), PrincipalId::from("ghost")];
        let resolved = resolver.resolve(&ids).await.unwrap();

        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("user1"));
        assert_eq!(resolver.resolve_calls(), 1);
    }

    #[tokio::test]
    async fn test_memory_resolver_failure_switches() {
        let resolver = MemoryResolver::new(PermissionSet::new("$unrestricted"));
        resolver.fail_batches_containing("bad");

        assert!(resolver.resolve(&[PrincipalId::from("good")]).await.is_ok());
        let err = resolver
            .resolve(&[PrincipalId::from("good"), PrincipalId::from("bad")])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upstream(_)));
        assert_eq!(err.to_string(), "provider rejected batch of 2 ids");

        resolver.fail_unrestricted(true);
        assert!(resolver.resolve_unrestricted_user().await.is_err());
        assert!(resolver.ping().await.is_ok());

        resolver.fail_all(true);
        assert!(resolver.ping().await.is_err());
    }
}
