//! Lock coordinator: runs a job only while holding a named lease.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{ClusterError, Result};
use crate::lock::LockProvider;

/// Default pause between lease attempts, before jitter.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Options for one guarded execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// Lease name; jobs sharing a name never overlap.
    pub name: String,
    /// Lease lifetime, the backstop for a holder that dies mid-job.
    pub max_hold: Duration,
    /// How long to keep retrying before giving up with a skip.
    pub acquire_timeout: Duration,
    /// Base pause between attempts; up to half of it again is added as jitter.
    pub retry_interval: Duration,
}

impl LockOptions {
    pub fn new(name: impl Into<String>, max_hold: Duration, acquire_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_hold,
            acquire_timeout,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClusterError::InvalidOptions("lock name is empty".into()));
        }
        if self.max_hold.is_zero() {
            return Err(ClusterError::InvalidOptions("max_hold must be positive".into()));
        }
        if self.retry_interval.is_zero() {
            return Err(ClusterError::InvalidOptions(
                "retry_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a guarded execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome<T> {
    /// The lease was taken and the job ran to completion.
    Executed(T),
    /// The lease stayed contended for the whole acquire budget.
    Skipped,
}

impl<T> LockOutcome<T> {
    pub fn is_executed(&self) -> bool {
        matches!(self, LockOutcome::Executed(_))
    }

    pub fn executed(self) -> Option<T> {
        match self {
            LockOutcome::Executed(value) => Some(value),
            LockOutcome::Skipped => None,
        }
    }
}

/// Generate a holder id unique to this process instance.
pub fn generate_holder_id() -> String {
    format!("permsync-{:016x}", rand::random::<u64>())
}

/// Runs jobs under a lease from a [`LockProvider`].
#[derive(Clone)]
pub struct LockCoordinator {
    provider: Arc<dyn LockProvider>,
    holder: String,
}

impl LockCoordinator {
    pub fn new(provider: Arc<dyn LockProvider>, holder: impl Into<String>) -> Self {
        Self {
            provider,
            holder: holder.into(),
        }
    }

    /// Identity this instance takes leases under.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Run `job` while holding the lease named in `options`.
    ///
    /// Retries until `acquire_timeout` has elapsed, then returns
    /// [`LockOutcome::Skipped`] without running the job. The lease is
    /// released once the job finishes, whatever it returned. If the job
    /// panics or this future is dropped mid-job, the release is spawned
    /// onto the current runtime instead.
    pub async fn acquire_lock<F, T>(&self, options: &LockOptions, job: F) -> Result<LockOutcome<T>>
    where
        F: Future<Output = T>,
    {
        options.validate()?;

        let deadline = Instant::now() + options.acquire_timeout;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if self
                .provider
                .try_lock(&options.name, &self.holder, options.max_hold)
                .await?
            {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %options.name, attempts, "lock contended, skipping");
                return Ok(LockOutcome::Skipped);
            }
            let pause = jittered(options.retry_interval).min(deadline - now);
            tokio::time::sleep(pause).await;
        }

        debug!(lock = %options.name, holder = %self.holder, attempts, "lock acquired");
        let mut guard = LeaseGuard {
            provider: Arc::clone(&self.provider),
            name: options.name.clone(),
            holder: self.holder.clone(),
            armed: true,
        };
        let value = job.await;
        guard.armed = false;

        match self.provider.unlock(&options.name, &self.holder).await {
            Ok(true) => {}
            Ok(false) => warn!(
                lock = %options.name,
                "lease expired before the job finished"
            ),
            Err(e) => warn!(lock = %options.name, error = %e, "failed to release lease"),
        }

        Ok(LockOutcome::Executed(value))
    }
}

/// Releases a lease whose job never returned.
struct LeaseGuard {
    provider: Arc<dyn LockProvider>,
    name: String,
    holder: String,
    armed: bool,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock = %self.name, "no runtime to release abandoned lease");
            return;
        };
        warn!(lock = %self.name, "job abandoned, releasing lease");
        let provider = Arc::clone(&self.provider);
        let name = std::mem::take(&mut self.name);
        let holder = std::mem::take(&mut self.holder);
        runtime.spawn(async move {
            if let Err(e) = provider.unlock(&name, &holder).await {
                warn!(lock = %name, error = %e, "failed to release abandoned lease");
            }
        });
    }
}

fn jittered(base: Duration) -> Duration {
    let spread = (base.as_millis() / 2) as u64;
    let extra = rand::thread_rng().gen_range(0..=spread);
    base + Duration::from_millis(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::memory::MemoryLockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn options(acquire: Duration) -> LockOptions {
        LockOptions::new("sync", Duration::from_secs(60), acquire)
            .with_retry_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_job_runs_and_lease_is_released() {
        let locks = Arc::new(MemoryLockProvider::new());
        let coordinator = LockCoordinator::new(locks.clone(), "node-1");

        let outcome = coordinator
            .acquire_lock(&options(Duration::ZERO), async { 7 })
            .await
            .unwrap();

        assert_eq!(outcome, LockOutcome::Executed(7));
        assert!(locks.holder("sync").is_none());
    }

    #[tokio::test]
    async fn test_contended_lock_skips_after_budget() {
        let locks = Arc::new(MemoryLockProvider::new());
        locks
            .try_lock("sync", "node-2", Duration::from_secs(60))
            .await
            .unwrap();
        let coordinator = LockCoordinator::new(locks.clone(), "node-1");
        let ran = AtomicUsize::new(0);

        let started = Instant::now();
        let outcome = coordinator
            .acquire_lock(&options(Duration::from_millis(40)), async {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert_eq!(outcome, LockOutcome::Skipped);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(locks.holder("sync").as_deref(), Some("node-2"));
    }

    #[tokio::test]
    async fn test_waits_for_release_within_budget() {
        let locks = Arc::new(MemoryLockProvider::new());
        locks
            .try_lock("sync", "node-2", Duration::from_secs(60))
            .await
            .unwrap();
        let releaser = {
            let locks = locks.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                locks.unlock("sync", "node-2").await.unwrap();
            })
        };

        let outcome = LockCoordinator::new(locks.clone(), "node-1")
            .acquire_lock(&options(Duration::from_secs(2)), async { "done" })
            .await
            .unwrap();

        releaser.await.unwrap();
        assert_eq!(outcome.executed(), Some("done"));
    }

    async fn wait_released(locks: &MemoryLockProvider) {
        for _ in 0..100 {
            if locks.holder("sync").is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("lease still held by {:?}", locks.holder("sync"));
    }

    #[tokio::test]
    async fn test_panicking_job_releases_lease() {
        let locks = Arc::new(MemoryLockProvider::new());
        let coordinator = LockCoordinator::new(locks.clone(), "node-1");

        let task = tokio::spawn(async move {
            coordinator
                .acquire_lock(&options(Duration::ZERO), async {
                    panic!("job blew up");
                })
                .await
        });

        assert!(task.await.unwrap_err().is_panic());
        wait_released(&locks).await;
    }

    #[tokio::test]
    async fn test_cancelled_job_releases_lease() {
        let locks = Arc::new(MemoryLockProvider::new());
        let coordinator = LockCoordinator::new(locks.clone(), "node-1");

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.acquire_lock(
                &options(Duration::ZERO),
                tokio::time::sleep(Duration::from_secs(60)),
            ),
        )
        .await;

        assert!(cancelled.is_err());
        wait_released(&locks).await;
        assert!(locks.try_lock("sync", "node-2", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let coordinator = LockCoordinator::new(Arc::new(MemoryLockProvider::new()), "node-1");
        let bad = LockOptions::new("sync", Duration::ZERO, Duration::ZERO);

        let err = coordinator.acquire_lock(&bad, async {}).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidOptions(_)));
    }

    #[test]
    fn test_holder_ids_differ() {
        assert_ne!(generate_holder_id(), generate_holder_id());
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let pause = jittered(base);
            assert!(pause >= base && pause <= Duration::from_millis(150));
        }
    }
}
