//! Test fixtures and helpers.
//!
//! Common setup code for engine and service tests.

use std::sync::Arc;

use permsync::{PermissionSyncService, ServiceConfig};
use permsync_cluster::MemoryLockProvider;
use permsync_core::{PermissionMap, PermissionSet, Role, ServiceAccountDescriptor};
use permsync_store::MemoryRepository;
use permsync_sync::{MemoryEnumerator, MemoryResolver, SyncConfig, SyncEngine};

/// Sentinel id used by all fixtures.
pub const UNRESTRICTED: &str = "$unrestricted";

/// The baseline granted to everyone in the fixtures.
pub fn unrestricted() -> PermissionSet {
    PermissionSet::new(UNRESTRICTED).with_account("unrestrictedAccount")
}

/// Build a mapping keyed by each set's owner.
pub fn mapping(sets: impl IntoIterator<Item = PermissionSet>) -> PermissionMap {
    sets.into_iter()
        .map(|set| (set.principal_id.clone(), set))
        .collect()
}

/// In-memory collaborators for one sync deployment.
pub struct SyncFixture {
    pub repository: Arc<MemoryRepository>,
    pub resolver: Arc<MemoryResolver>,
    pub enumerator: Arc<MemoryEnumerator>,
    pub locks: Arc<MemoryLockProvider>,
}

impl SyncFixture {
    /// Empty store, resolver knowing only the baseline, no service accounts.
    pub fn new() -> Self {
        Self::with_resolver(MemoryResolver::new(unrestricted()))
    }

    pub fn with_resolver(resolver: MemoryResolver) -> Self {
        Self {
            repository: Arc::new(MemoryRepository::new()),
            resolver: Arc::new(resolver),
            enumerator: Arc::new(MemoryEnumerator::default()),
            locks: Arc::new(MemoryLockProvider::new()),
        }
    }

    /// The two-users-plus-two-service-accounts deployment.
    ///
    /// Stored: `user1={account1},{extRole}`, `user2={account2}` and the
    /// baseline. Upstream: `user1` unchanged, `user2={account3}`, and the
    /// empty service accounts `abc` and `xyz@domain.com`.
    pub fn scenario() -> Self {
        let user1 = PermissionSet::new("user1")
            .with_account("account1")
            .with_role(Role::external("extRole"));

        let fixture = Self::new().with_store(mapping([
            user1.clone(),
            PermissionSet::new("user2").with_account("account2"),
            unrestricted(),
        ]));

        fixture.resolver.insert(user1);
        fixture
            .resolver
            .insert(PermissionSet::new("user2").with_account("account3"));
        fixture.resolver.insert(PermissionSet::new("abc"));
        fixture.resolver.insert(PermissionSet::new("xyz@domain.com"));

        fixture.enumerator.add(ServiceAccountDescriptor::new("abc"));
        fixture
            .enumerator
            .add(ServiceAccountDescriptor::new("xyz@domain.com"));
        fixture
    }

    /// Start from a store holding `mapping`.
    pub fn with_store(mut self, mapping: PermissionMap) -> Self {
        self.repository = Arc::new(MemoryRepository::with_mapping(mapping));
        self
    }

    pub fn engine(&self, config: SyncConfig) -> SyncEngine {
        SyncEngine::new(
            self.repository.clone(),
            self.resolver.clone(),
            self.enumerator.clone(),
            config,
        )
    }

    /// A service instance over these collaborators.
    pub fn service(&self, config: &ServiceConfig) -> permsync::Result<PermissionSyncService> {
        PermissionSyncService::new(
            config,
            self.repository.clone(),
            self.resolver.clone(),
            self.enumerator.clone(),
            self.locks.clone(),
        )
    }
}

impl Default for SyncFixture {
    fn default() -> Self {
        Self::new()
    }
}
