//! Health probe over the sync collaborators.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use permsync_store::PermissionRepository;
use tracing::debug;

use crate::enumerator::PrincipalEnumerator;
use crate::error::{Result, SyncError};
use crate::resolver::PermissionResolver;

/// Reachability of each collaborator at probe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub repository: bool,
    pub resolver: bool,
    pub enumerator: bool,
}

impl HealthReport {
    /// True when every collaborator answered.
    pub fn is_healthy(&self) -> bool {
        self.repository && self.resolver && self.enumerator
    }
}

/// Pings the repository, resolver and enumerator.
pub struct HealthProbe {
    repository: Arc<dyn PermissionRepository>,
    resolver: Arc<dyn PermissionResolver>,
    enumerator: Arc<dyn PrincipalEnumerator>,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(
        repository: Arc<dyn PermissionRepository>,
        resolver: Arc<dyn PermissionResolver>,
        enumerator: Arc<dyn PrincipalEnumerator>,
        timeout: Duration,
    ) -> Self {
        Self {
            repository,
            resolver,
            enumerator,
            timeout,
        }
    }

    pub async fn check(&self) -> HealthReport {
        let (repository, resolver, enumerator) = tokio::join!(
            self.ping("repository", async {
                self.repository.ping().await.map_err(SyncError::from)
            }),
            self.ping("resolver", self.resolver.ping()),
            self.ping("enumerator", self.enumerator.ping()),
        );
        HealthReport {
            repository,
            resolver,
            enumerator,
        }
    }

    async fn ping(&self, what: &'static str, call: impl Future<Output = Result<()>>) -> bool {
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(format!("{what} ping exceeded {:?}", self.timeout))),
        };
        if let Err(e) = &result {
            debug!(collaborator = what, error = %e, "health ping failed");
        }
        result.is_ok()
    }
}
