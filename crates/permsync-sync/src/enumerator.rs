//! Enumerator abstraction: lists the service-account principals that exist.

use std::sync::Arc;

use async_trait::async_trait;
use permsync_core::ServiceAccountDescriptor;

use crate::error::Result;

/// Lists all currently known service-account principals.
#[async_trait]
pub trait PrincipalEnumerator: Send + Sync {
    /// All service accounts. `force_refresh` bypasses any provider-side cache.
    async fn get_all(&self, force_refresh: bool) -> Result<Vec<ServiceAccountDescriptor>>;

    /// Cheap reachability check used by the health probe.
    async fn ping(&self) -> Result<()>;
}

#[async_trait]
impl<T: PrincipalEnumerator + ?Sized> PrincipalEnumerator for Arc<T> {
    async fn get_all(&self, force_refresh: bool) -> Result<Vec<ServiceAccountDescriptor>> {
        (**self).get_all(force_refresh).await
    }

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }
}

/// A simple in-memory enumerator for testing.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::RwLock;

    use crate::error::SyncError;

    /// In-memory enumerator implementation.
    ///
    /// Without a forced refresh it answers from the list captured at the
    /// last refresh, like a caching provider would.
    pub struct MemoryEnumerator {
        current: RwLock<Vec<ServiceAccountDescriptor>>,
        cached: RwLock<Vec<ServiceAccountDescriptor>>,
        failing: AtomicBool,
        forced_refreshes: AtomicUsize,
    }

    impl MemoryEnumerator {
        pub fn new(accounts: Vec<ServiceAccountDescriptor>) -> Self {
            Self {
                cached: RwLock::new(accounts.clone()),
                current: RwLock::new(accounts),
                failing: AtomicBool::new(false),
                forced_refreshes: AtomicUsize::new(0),
            }
        }

        /// Register a new service account upstream (not yet cached).
        pub fn add(&self, account: ServiceAccountDescriptor) {
            if let Ok(mut current) = self.current.write() {
                current.push(account);
            }
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Number of `get_all(true)` calls seen.
        pub fn forced_refreshes(&self) -> usize {
            self.forced_refreshes.load(Ordering::SeqCst)
        }
    }

    impl Default for MemoryEnumerator {
        fn default() -> Self {
            Self::new(Vec::new())
        }
    }

    #[async_trait]
    impl PrincipalEnumerator for MemoryEnumerator {
        async fn get_all(&self, force_refresh: bool) -> Result<Vec<ServiceAccountDescriptor>> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Unavailable("enumerator unreachable".into()));
            }

            let poisoned = |e: String| SyncError::Unavailable(format!("enumerator state poisoned: {e}"));

            if force_refresh {
                self.forced_refreshes.fetch_add(1, Ordering::SeqCst);
                let current = self
                    .current
                    .read()
                    .map_err(|e| poisoned(e.to_string()))?
                    .clone();
                let mut cached = self.cached.write().map_err(|e| poisoned(e.to_string()))?;
                *cached = current.clone();
                return Ok(current);
            }

            Ok(self
                .cached
                .read()
                .map_err(|e| poisoned(e.to_string()))?
                .clone())
        }

        async fn ping(&self) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Unavailable("enumerator unreachable".into()));
            }
            Ok(())
        }
    }
}
