//! The sync engine.
//!
//! One cycle: enumerate → resolve baseline → resolve principals → merge →
//! bulk replace. A cycle either writes the complete new mapping or writes
//! nothing.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use permsync_core::{digest_mapping, Blake3Hash, PermissionMap, PrincipalId};
use permsync_store::PermissionRepository;
use tracing::{debug, info, warn};

use crate::enumerator::PrincipalEnumerator;
use crate::error::{Result, SyncError};
use crate::resolver::PermissionResolver;

/// What to do with principals whose resolution batch errored.
///
/// Principals the resolver simply omits are always evicted; this policy
/// only covers batches that failed outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    /// Drop them from the store, like any other unresolved principal.
    #[default]
    Evict,
    /// Keep their previously stored set, re-merged with the current baseline.
    ///
    /// The stored set already carries the baseline it was last merged with,
    /// so grants since withdrawn from the baseline stay on retained
    /// principals until they resolve again.
    RetainPrevious,
}

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sentinel id under which the unrestricted baseline is stored.
    pub unrestricted_principal: PrincipalId,
    /// Bound on every resolver and enumerator call, and on the repository
    /// read. The bulk write is bounded by the repository backend itself.
    pub upstream_timeout: Duration,
    /// Handling of principals whose resolution batch failed.
    pub unresolved_policy: UnresolvedPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            unrestricted_principal: PrincipalId::unrestricted(),
            upstream_timeout: Duration::from_secs(30),
            unresolved_policy: UnresolvedPolicy::default(),
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Ids sent to the resolver (prior keys ∪ enumerated ∪ sentinel).
    pub considered: usize,
    /// Principals the resolver returned, excluding the sentinel.
    pub resolved: usize,
    /// Entries written, including the sentinel.
    pub written: usize,
    /// Previously stored principals that are gone after the cycle.
    pub evicted: usize,
    /// Principals kept from the prior store under `RetainPrevious`.
    pub retained: usize,
    /// Resolution batches issued.
    pub batches: usize,
    /// Resolution batches that errored.
    pub failed_batches: usize,
    /// Digest of the written mapping.
    pub digest: Blake3Hash,
    /// Wall time of the cycle.
    pub duration: Duration,
}

/// The mapping written by a cycle, plus its report.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub mapping: PermissionMap,
    pub report: SyncReport,
}

/// Orchestrates enumeration, resolution, merge and persistence.
///
/// Holds no cross-instance state. Callers must make sure only one engine in
/// the fleet runs at a time (see the lock coordinator).
pub struct SyncEngine {
    repository: Arc<dyn PermissionRepository>,
    resolver: Arc<dyn PermissionResolver>,
    enumerator: Arc<dyn PrincipalEnumerator>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        repository: Arc<dyn PermissionRepository>,
        resolver: Arc<dyn PermissionResolver>,
        enumerator: Arc<dyn PrincipalEnumerator>,
        config: SyncConfig,
    ) -> Self {
        Self {
            repository,
            resolver,
            enumerator,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn PermissionRepository> {
        &self.repository
    }

    pub fn resolver(&self) -> &Arc<dyn PermissionResolver> {
        &self.resolver
    }

    pub fn enumerator(&self) -> &Arc<dyn PrincipalEnumerator> {
        &self.enumerator
    }

    /// Run one full cycle and return what was written.
    pub async fn run_sync(&self) -> Result<SyncOutcome> {
        let started = Instant::now();
        let sentinel = &self.config.unrestricted_principal;

        // Phase 1: every id worth re-checking
        let prior = self
            .bounded("repository read", async {
                self.repository.get_all_by_id().await.map_err(SyncError::from)
            })
            .await?;

        let enumerated = self
            .bounded("principal enumeration", self.enumerator.get_all(true))
            .await
            .map_err(|e| SyncError::EnumerationFailed(Box::new(e)))?;

        let mut ids: BTreeSet<PrincipalId> = prior.keys().cloned().collect();
        ids.extend(enumerated.into_iter().map(|d| d.id));
        ids.insert(sentinel.clone());
        let ids: Vec<PrincipalId> = ids.into_iter().collect();

        debug!(
            prior = prior.len(),
            considered = ids.len(),
            "collected principals for sync"
        );

        // Phase 2: the baseline gates every merge
        let unrestricted = self
            .bounded(
                "unrestricted resolution",
                self.resolver.resolve_unrestricted_user(),
            )
            .await
            .map_err(|e| SyncError::BaselineUnavailable(Box::new(e)))?
            .for_principal(sentinel.clone());

        // Phase 3: resolve in batches
        let batch_size = self
            .resolver
            .batch_size()
            .map(|n| n.get())
            .unwrap_or(ids.len())
            .max(1);

        let mut resolved = PermissionMap::new();
        let mut errored: BTreeSet<PrincipalId> = BTreeSet::new();
        let mut batches = 0;
        let mut failed_batches = 0;
        let mut last_error = None;

        for chunk in ids.chunks(batch_size) {
            batches += 1;
            match self
                .bounded("permission resolution", self.resolver.resolve(chunk))
                .await
            {
                Ok(found) => {
                    for (id, set) in found {
                        // ids nobody asked for are ignored
                        if chunk.contains(&id) {
                            let set = set.for_principal(id.clone());
                            resolved.insert(id, set);
                        }
                    }
                }
                Err(e) => {
                    warn!(batch = batches, size = chunk.len(), error = %e, "resolution batch failed");
                    failed_batches += 1;
                    errored.extend(chunk.iter().cloned());
                    last_error = Some(e);
                }
            }
        }

        if let Some(source) = last_error.filter(|_| failed_batches == batches) {
            return Err(SyncError::ResolutionFailed {
                batches,
                source: Box::new(source),
            });
        }

        // Phase 4: merge the baseline into everyone but the sentinel
        let mut mapping = PermissionMap::new();
        mapping.insert(sentinel.clone(), unrestricted.clone());

        let resolved_count = resolved.keys().filter(|id| *id != sentinel).count();
        for (id, set) in resolved {
            if &id == sentinel {
                continue;
            }
            let merged = set.merge(&unrestricted);
            mapping.insert(id, merged);
        }

        let mut retained = 0;
        if self.config.unresolved_policy == UnresolvedPolicy::RetainPrevious {
            for id in errored.iter().filter(|id| *id != sentinel) {
                if let Some(previous) = prior.get(id) {
                    mapping.insert(id.clone(), previous.merge(&unrestricted));
                    retained += 1;
                }
            }
        }

        let evicted = prior.keys().filter(|id| !mapping.contains_key(*id)).count();

        // Phase 5: one bulk replace. Not raced against a timer: dropping the
        // future would not stop a backend write already in progress.
        self.repository.put_all_new(&mapping).await?;

        let report = SyncReport {
            considered: ids.len(),
            resolved: resolved_count,
            written: mapping.len(),
            evicted,
            retained,
            batches,
            failed_batches,
            digest: digest_mapping(&mapping),
            duration: started.elapsed(),
        };

        info!(
            written = report.written,
            evicted = report.evicted,
            retained = report.retained,
            failed_batches = report.failed_batches,
            digest = %report.digest,
            elapsed_ms = report.duration.as_millis() as u64,
            "permission sync cycle complete"
        );

        Ok(SyncOutcome { mapping, report })
    }

    /// Bound an upstream call by the configured timeout.
    async fn bounded<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.upstream_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!(
                "{what} exceeded {:?}",
                self.config.upstream_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerator::memory::MemoryEnumerator;
    use crate::resolver::memory::MemoryResolver;
    use permsync_core::{PermissionSet, Role, ServiceAccountDescriptor};
    use permsync_store::MemoryRepository;
    use std::num::NonZeroUsize;

    const SENTINEL: &str = "$unrestricted";

    fn baseline() -> PermissionSet {
        PermissionSet::new(SENTINEL).with_account("unrestrictedAccount")
    }

    fn stored(sets: Vec<PermissionSet>) -> Arc<MemoryRepository> {
        Arc::new(MemoryRepository::with_mapping(
            sets.into_iter()
                .map(|s| (s.principal_id.clone(), s))
                .collect(),
        ))
    }

    fn engine(
        repo: Arc<MemoryRepository>,
        resolver: Arc<MemoryResolver>,
        enumerator: Arc<MemoryEnumerator>,
        config: SyncConfig,
    ) -> SyncEngine {
        SyncEngine::new(repo, resolver, enumerator, config)
    }

    #[tokio::test]
    async fn test_scenario_merges_baseline_and_picks_up_service_accounts() {
        let repo = stored(vec![
            PermissionSet::new("user1")
                .with_account("account1")
                .with_role(Role::external("extRole")),
            PermissionSet::new("user2").with_account("account2"),
            baseline(),
        ]);
        let resolver = Arc::new(MemoryResolver::new(baseline()));
        resolver.insert(
            PermissionSet::new("user1")
                .with_account("account1")
                .with_role(Role::external("extRole")),
        );
        resolver.insert(PermissionSet::new("user2").with_account("account3"));
        resolver.insert(PermissionSet::new("abc"));
        resolver.insert(PermissionSet::new("xyz@domain.com"));
        let enumerator = Arc::new(MemoryEnumerator::new(vec![
            ServiceAccountDescriptor::new("abc"),
            ServiceAccountDescriptor::new("xyz@domain.com"),
        ]));

        let engine = engine(repo.clone(), resolver, enumerator.clone(), SyncConfig::default());
        let outcome = engine.run_sync().await.unwrap();

        let all = repo.get_all_by_id().await.unwrap();
        assert_eq!(all, outcome.mapping);
        assert_eq!(all.len(), 5);
        assert_eq!(all["user1"].account_names(), vec!["account1", "unrestrictedAccount"]);
        assert!(all["user1"].roles.contains(&Role::external("extRole")));
        assert_eq!(all["user2"].account_names(), vec!["account3", "unrestrictedAccount"]);
        assert_eq!(all["abc"].account_names(), vec!["unrestrictedAccount"]);
        assert_eq!(all["xyz@domain.com"].account_names(), vec!["unrestrictedAccount"]);
        assert_eq!(all[SENTINEL], baseline());
        assert_eq!(enumerator.forced_refreshes(), 1);
        assert_eq!(outcome.report.evicted, 0);
    }

    #[tokio::test]
    async fn test_stale_principal_is_evicted() {
        let repo = stored(vec![PermissionSet::new("gone").with_account("old")]);
        let resolver = Arc::new(MemoryResolver::new(baseline()));
        let enumerator = Arc::new(MemoryEnumerator::default());

        let outcome = engine(repo.clone(), resolver, enumerator, SyncConfig::default())
            .run_sync()
            .await
            .unwrap();

        assert!(!repo.snapshot().unwrap().contains_key("gone"));
        assert_eq!(outcome.report.evicted, 1);
        assert_eq!(outcome.mapping.len(), 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_leaves_store_untouched() {
        let repo = stored(vec![PermissionSet::new("user1").with_account("a"), baseline()]);
        let before = repo.get_all_by_id().await.unwrap();
        let resolver = Arc::new(MemoryResolver::new(baseline()));
        resolver.fail_all(true);

        let err = engine(repo.clone(), resolver, Arc::default(), SyncConfig::default())
            .run_sync()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::ResolutionFailed { batches: 1, .. }));
        assert_eq!(repo.get_all_by_id().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_baseline_failure_aborts_before_resolution() {
        let repo = stored(vec![PermissionSet::new("user1")]);
        let resolver = Arc::new(MemoryResolver::new(baseline()));
        resolver.fail_unrestricted(true);

        let err = engine(repo.clone(), resolver.clone(), Arc::default(), SyncConfig::default())
            .run_sync()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::BaselineUnavailable(_)));
        assert_eq!(resolver.resolve_calls(), 0);
        assert!(repo.snapshot().unwrap().contains_key("user1"));
    }

    #[tokio::test]
    async fn test_enumerator_failure_aborts() {
        let repo = stored(vec![PermissionSet::new("user1")]);
        let enumerator = Arc::new(MemoryEnumerator::default());
        enumerator.set_failing(true);

        let err = engine(
            repo.clone(),
            Arc::new(MemoryResolver::new(baseline())),
            enumerator,
            SyncConfig::default(),
        )
        .run_sync()
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::EnumerationFailed(_)));
        assert!(repo.snapshot().unwrap().contains_key("user1"));
    }

    fn partial_failure_setup() -> (Arc<MemoryRepository>, Arc<MemoryResolver>) {
        // ids sort as: "$unrestricted", "a", "b", "c" → batches [$u, a] [b, c]
        let repo = stored(vec![
            PermissionSet::new("a").with_account("a1"),
            PermissionSet::new("b").with_account("b-old"),
            PermissionSet::new("c").with_account("c-old"),
        ]);
        let resolver = Arc::new(
            MemoryResolver::new(baseline()).with_batch_size(NonZeroUsize::new(2).unwrap()),
        );
        resolver.insert(PermissionSet::new("a").with_account("a1"));
        resolver.insert(PermissionSet::new("b").with_account("b-new"));
        resolver.insert(PermissionSet::new("c").with_account("c-new"));
        resolver.fail_batches_containing("c");
        (repo, resolver)
    }

    #[tokio::test]
    async fn test_partial_failure_evicts_by_default() {
        let (repo, resolver) = partial_failure_setup();

        let outcome = engine(repo.clone(), resolver.clone(), Arc::default(), SyncConfig::default())
            .run_sync()
            .await
            .unwrap();

        assert_eq!(resolver.resolve_calls(), 2);
        assert_eq!(outcome.report.batches, 2);
        assert_eq!(outcome.report.failed_batches, 1);
        let all = repo.get_all_by_id().await.unwrap();
        assert!(all.contains_key("a"));
        assert!(!all.contains_key("b"));
        assert!(!all.contains_key("c"));
    }

    #[tokio::test]
    async fn test_partial_failure_retains_previous_when_configured() {
        let (repo, resolver) = partial_failure_setup();
        let config = SyncConfig {
            unresolved_policy: UnresolvedPolicy::RetainPrevious,
            ..SyncConfig::default()
        };

        let outcome = engine(repo.clone(), resolver, Arc::default(), config)
            .run_sync()
            .await
            .unwrap();

        assert_eq!(outcome.report.retained, 2);
        let all = repo.get_all_by_id().await.unwrap();
        assert_eq!(all["b"].account_names(), vec!["b-old", "unrestrictedAccount"]);
        assert_eq!(all["c"].account_names(), vec!["c-old", "unrestrictedAccount"]);
    }

    #[tokio::test]
    async fn test_retained_entry_keeps_grants_of_old_baseline() {
        let (repo, resolver) = partial_failure_setup();
        repo.put(&PermissionSet::new("c").with_account("c-old").with_account("legacyShared"))
            .await
            .unwrap();
        let config = SyncConfig {
            unresolved_policy: UnresolvedPolicy::RetainPrevious,
            ..SyncConfig::default()
        };

        engine(repo.clone(), resolver, Arc::default(), config)
            .run_sync()
            .await
            .unwrap();

        let all = repo.get_all_by_id().await.unwrap();
        assert_eq!(
            all["c"].account_names(),
            vec!["c-old", "legacyShared", "unrestrictedAccount"]
        );
        assert!(!all[SENTINEL].account_names().contains(&"legacyShared"));
    }

    #[tokio::test]
    async fn test_slow_resolver_times_out() {
        let repo = stored(vec![PermissionSet::new("user1")]);
        let resolver = Arc::new(
            MemoryResolver::new(baseline()).with_delay(Duration::from_millis(200)),
        );
        let config = SyncConfig {
            upstream_timeout: Duration::from_millis(20),
            ..SyncConfig::default()
        };

        let err = engine(repo.clone(), resolver, Arc::default(), config)
            .run_sync()
            .await
            .unwrap_err();

        match err {
            SyncError::ResolutionFailed { source, .. } => {
                assert!(matches!(*source, SyncError::Timeout(_)))
            }
            other => panic!("expected resolution failure, got {other:?}"),
        }
        assert!(repo.snapshot().unwrap().contains_key("user1"));
    }

    #[tokio::test]
    async fn test_sqlite_store_holds_written_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.db");
        let repo = Arc::new(permsync_store::SqliteRepository::open(&path).unwrap());
        let resolver = Arc::new(MemoryResolver::new(baseline()));
        resolver.insert(PermissionSet::new("svc").with_application("billing"));
        let enumerator = Arc::new(MemoryEnumerator::new(vec![ServiceAccountDescriptor::new(
            "svc",
        )]));

        let engine = SyncEngine::new(repo.clone(), resolver, enumerator, SyncConfig::default());
        let outcome = engine.run_sync().await.unwrap();

        drop(engine);
        drop(repo);
        let reopened = permsync_store::SqliteRepository::open(&path).unwrap();
        let stored = reopened.get_all_by_id().await.unwrap();
        assert_eq!(stored, outcome.mapping);
        assert!(stored["svc"].applications.contains("billing"));
        assert_eq!(digest_mapping(&stored), outcome.report.digest);
    }

    fn sqlite_fixture(
        busy_timeout: Duration,
    ) -> (tempfile::TempDir, std::path::PathBuf, SyncEngine, Arc<MemoryResolver>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("permissions.db");
        let repo = Arc::new(
            permsync_store::SqliteRepository::open_with_busy_timeout(&path, busy_timeout).unwrap(),
        );
        let resolver = Arc::new(MemoryResolver::new(baseline()));
        let config = SyncConfig {
            upstream_timeout: Duration::from_millis(100),
            ..SyncConfig::default()
        };
        let engine = SyncEngine::new(repo, resolver.clone(), Arc::new(MemoryEnumerator::default()), config);
        (dir, path, engine, resolver)
    }

    #[tokio::test]
    async fn test_locked_sqlite_write_fails_without_committing_later() {
        let (_dir, path, engine, resolver) = sqlite_fixture(Duration::from_millis(150));
        let old: PermissionMap = [PermissionSet::new("old")]
            .into_iter()
            .map(|s| (s.principal_id.clone(), s))
            .collect();
        engine.repository().put_all_new(&old).await.unwrap();
        resolver.insert(PermissionSet::new("old").with_account("changed"));

        let other = rusqlite::Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = engine.run_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::StoreError(_)), "{err:?}");

        other.execute_batch("COMMIT").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.repository().get_all_by_id().await.unwrap(), old);
    }

    #[tokio::test]
    async fn test_slow_sqlite_write_outlasting_upstream_timeout_completes() {
        let (_dir, path, engine, resolver) = sqlite_fixture(Duration::from_secs(5));
        resolver.insert(PermissionSet::new("svc"));
        engine
            .repository()
            .put(&PermissionSet::new("svc"))
            .await
            .unwrap();

        let other = rusqlite::Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            other.execute_batch("COMMIT").unwrap();
        });

        // the write waits past the 100ms upstream timeout, then lands
        let outcome = engine.run_sync().await.unwrap();
        release.await.unwrap();

        let stored = engine.repository().get_all_by_id().await.unwrap();
        assert_eq!(stored, outcome.mapping);
        assert_eq!(stored["svc"].account_names(), vec!["unrestrictedAccount"]);
    }

    #[tokio::test]
    async fn test_repeated_cycles_are_idempotent() {
        let repo = stored(vec![]);
        let resolver = Arc::new(MemoryResolver::new(baseline()));
        resolver.insert(PermissionSet::new("user1").with_account("a"));
        let enumerator = Arc::new(MemoryEnumerator::new(vec![ServiceAccountDescriptor::new(
            "user1",
        )]));
        let engine = engine(repo, resolver, enumerator, SyncConfig::default());

        let first = engine.run_sync().await.unwrap();
        let second = engine.run_sync().await.unwrap();

        assert_eq!(first.mapping, second.mapping);
        assert_eq!(first.report.digest, second.report.digest);
    }
}
