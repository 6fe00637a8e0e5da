//! The permission sync service: gate → lock → engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use permsync_cluster::{
    generate_holder_id, DiscoveryStatus, EligibilityGate, HealthIndicator, LockCoordinator,
    LockOptions, LockOutcome, LockProvider,
};
use permsync_core::PermissionMap;
use permsync_store::PermissionRepository;
use permsync_sync::{
    HealthProbe, HealthReport, PermissionResolver, PrincipalEnumerator, SyncEngine, SyncOutcome,
    SyncReport,
};
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, ServiceConfig};
use crate::error::{Result, ServiceError};
use crate::scheduler::{self, SchedulerHandle};

/// What a scheduled tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The scheduler has not been started.
    Disabled,
    /// The gate said no.
    Ineligible,
    /// Another cycle held the lock for the whole acquire budget.
    Skipped,
    /// A cycle ran and wrote the store.
    Synced(SyncReport),
    /// A cycle ran and failed; the store is untouched.
    Failed,
}

struct Inner {
    engine: SyncEngine,
    probe: HealthProbe,
    gate: EligibilityGate,
    coordinator: LockCoordinator,
    lock: LockOptions,
    scheduler: SchedulerConfig,
    enabled: AtomicBool,
    started: AtomicBool,
    last_report: RwLock<Option<SyncReport>>,
}

/// Periodic permission synchronization for one service instance.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PermissionSyncService {
    inner: Arc<Inner>,
}

impl PermissionSyncService {
    /// Wire a service from its configuration and collaborators.
    pub fn new(
        config: &ServiceConfig,
        repository: Arc<dyn PermissionRepository>,
        resolver: Arc<dyn PermissionResolver>,
        enumerator: Arc<dyn PrincipalEnumerator>,
        locks: Arc<dyn LockProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let sync_config = config.sync_config()?;

        let probe = HealthProbe::new(
            repository.clone(),
            resolver.clone(),
            enumerator.clone(),
            sync_config.upstream_timeout,
        );
        let health = HealthIndicator::default();
        let gate = if config.discovery_enabled {
            EligibilityGate::with_discovery(health)
        } else {
            EligibilityGate::without_discovery(health)
        };
        let holder = config
            .instance_id
            .clone()
            .unwrap_or_else(generate_holder_id);

        info!(
            holder = %holder,
            lock = %config.lock.name,
            discovery = config.discovery_enabled,
            "permission sync service configured"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                engine: SyncEngine::new(repository, resolver, enumerator, sync_config),
                probe,
                gate,
                coordinator: LockCoordinator::new(locks, holder),
                lock: config.lock.options(),
                scheduler: config.scheduler.clone(),
                enabled: AtomicBool::new(false),
                started: AtomicBool::new(false),
                last_report: RwLock::new(None),
            }),
        })
    }

    /// Enable ticking and spawn the periodic timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<SchedulerHandle> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServiceError::Scheduler("scheduler already started".into()));
        }
        self.inner.enabled.store(true, Ordering::SeqCst);
        info!(
            initial_delay_ms = self.inner.scheduler.initial_delay.as_millis() as u64,
            period_ms = self.inner.scheduler.period.as_millis() as u64,
            "permission sync scheduler started"
        );
        Ok(scheduler::spawn(self.clone(), self.inner.scheduler.clone()))
    }

    pub(crate) fn stopped(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        self.inner.started.store(false, Ordering::SeqCst);
        info!("permission sync scheduler stopped");
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// One scheduled run. Never fails; every error is logged.
    pub async fn tick(&self) -> TickOutcome {
        if !self.is_enabled() {
            return TickOutcome::Disabled;
        }

        self.refresh_health().await;
        if !self.inner.gate.eligible() {
            debug!(
                healthy = self.is_healthy(),
                discovery = ?self.inner.gate.discovery_status(),
                "instance not eligible, skipping sync"
            );
            return TickOutcome::Ineligible;
        }

        match self.locked_sync().await {
            Ok(LockOutcome::Executed(Ok(outcome))) => TickOutcome::Synced(outcome.report),
            Ok(LockOutcome::Executed(Err(e))) => {
                error!(error = %e, "scheduled sync failed");
                TickOutcome::Failed
            }
            Ok(LockOutcome::Skipped) => TickOutcome::Skipped,
            Err(e) => {
                warn!(lock = %self.inner.lock.name, error = %e, "sync lock unavailable");
                TickOutcome::Failed
            }
        }
    }

    /// Run a cycle now, bypassing the gate, and return the written mapping.
    pub async fn sync_and_return(&self) -> Result<PermissionMap> {
        info!("on-demand permission sync requested");
        match self.locked_sync().await? {
            LockOutcome::Executed(result) => result.map(|outcome| outcome.mapping),
            LockOutcome::Skipped => Err(ServiceError::LockContended(self.inner.lock.name.clone())),
        }
    }

    async fn locked_sync(&self) -> Result<LockOutcome<Result<SyncOutcome>>> {
        let job = async {
            info!(lock = %self.inner.lock.name, "permission sync cycle starting");
            let outcome = self.inner.engine.run_sync().await?;
            if let Ok(mut last) = self.inner.last_report.write() {
                *last = Some(outcome.report.clone());
            }
            Ok::<_, ServiceError>(outcome)
        };
        Ok(self.inner.coordinator.acquire_lock(&self.inner.lock, job).await?)
    }

    /// Feed a membership status change to the gate.
    pub fn on_discovery_status_change(&self, status: DiscoveryStatus) {
        self.inner.gate.on_status_change(status);
    }

    /// Probe the collaborators and record the result.
    pub async fn refresh_health(&self) -> HealthReport {
        let report = self.inner.probe.check().await;
        self.inner.gate.health().set(report.is_healthy());
        if !report.is_healthy() {
            warn!(
                repository = report.repository,
                resolver = report.resolver,
                enumerator = report.enumerator,
                "permission sync collaborators unhealthy"
            );
        }
        report
    }

    /// Health as of the last probe. False before the first probe.
    pub fn is_healthy(&self) -> bool {
        self.inner.gate.health().is_healthy()
    }

    pub fn eligible(&self) -> bool {
        self.inner.gate.eligible()
    }

    /// Report of the last successful cycle on this instance.
    pub fn last_report(&self) -> Option<SyncReport> {
        self.inner
            .last_report
            .read()
            .ok()
            .and_then(|last| last.clone())
    }

    pub fn holder(&self) -> &str {
        self.inner.coordinator.holder()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }
}
