//! Lock provider abstraction: named leases shared by a fleet of instances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A named, time-bounded lease.
///
/// # Design Notes
///
/// - `try_lock` succeeds only when the lease is free or expired. It is not
///   re-entrant: a holder that already owns the lease is refused too.
/// - `max_hold` bounds how long a lease survives a crashed holder.
/// - `unlock` only releases a lease owned by `holder`.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Try once to take the lease `name` for `holder`.
    async fn try_lock(&self, name: &str, holder: &str, max_hold: Duration) -> Result<bool>;

    /// Release the lease if `holder` owns it. Returns whether a lease was released.
    async fn unlock(&self, name: &str, holder: &str) -> Result<bool>;
}

#[async_trait]
impl<L: LockProvider + ?Sized> LockProvider for Arc<L> {
    async fn try_lock(&self, name: &str, holder: &str, max_hold: Duration) -> Result<bool> {
        (**self).try_lock(name, holder, max_hold).await
    }

    async fn unlock(&self, name: &str, holder: &str) -> Result<bool> {
        (**self).unlock(name, holder).await
    }
}

/// In-process leases for tests and single-node deployments.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Instant;

    use crate::error::ClusterError;

    struct Lease {
        holder: String,
        until: Instant,
    }

    /// In-memory lock provider.
    #[derive(Default)]
    pub struct MemoryLockProvider {
        leases: Mutex<HashMap<String, Lease>>,
    }

    impl MemoryLockProvider {
        pub fn new() -> Self {
            Self::default()
        }

        /// Current holder of `name`, if the lease is live.
        pub fn holder(&self, name: &str) -> Option<String> {
            let leases = self.leases.lock().ok()?;
            leases
                .get(name)
                .filter(|lease| lease.until > Instant::now())
                .map(|lease| lease.holder.clone())
        }
    }

    #[async_trait]
    impl LockProvider for MemoryLockProvider {
        async fn try_lock(&self, name: &str, holder: &str, max_hold: Duration) -> Result<bool> {
            let mut leases = self
                .leases
                .lock()
                .map_err(|e| ClusterError::Poisoned(e.to_string()))?;
            let now = Instant::now();

            if let Some(lease) = leases.get(name) {
                if lease.until > now {
                    return Ok(false);
                }
            }

            leases.insert(
                name.to_string(),
                Lease {
                    holder: holder.to_string(),
                    until: now + max_hold,
                },
            );
            Ok(true)
        }

        async fn unlock(&self, name: &str, holder: &str) -> Result<bool> {
            let mut leases = self
                .leases
                .lock()
                .map_err(|e| ClusterError::Poisoned(e.to_string()))?;
            match leases.get(name) {
                Some(lease) if lease.holder == holder => {
                    leases.remove(name);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }
}
