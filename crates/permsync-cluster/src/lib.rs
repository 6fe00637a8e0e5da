//! # Permsync Cluster
//!
//! Coordination between redundant instances.
//!
//! - [`LockCoordinator`] runs a job only while holding a named lease from a
//!   [`LockProvider`], so at most one instance syncs at a time.
//! - [`EligibilityGate`] decides whether this instance should try at all,
//!   from local health and the last discovery status.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use permsync_cluster::{LockCoordinator, LockOptions, SqliteLockProvider};
//!
//! async fn example() {
//!     let locks = SqliteLockProvider::open("locks.db").unwrap();
//!     let coordinator = LockCoordinator::new(Arc::new(locks), "node-1");
//!     let options = LockOptions::new("sync", Duration::from_secs(600), Duration::from_secs(5));
//!
//!     let outcome = coordinator.acquire_lock(&options, async { 42 }).await.unwrap();
//!     assert!(outcome.is_executed());
//! }
//! ```

pub mod coordinator;
pub mod eligibility;
pub mod error;
pub mod lock;
pub mod sqlite;

pub use coordinator::{generate_holder_id, LockCoordinator, LockOptions, LockOutcome};
pub use eligibility::{is_eligible, DiscoveryStatus, EligibilityGate, HealthIndicator};
pub use error::{ClusterError, Result};
pub use lock::{memory::MemoryLockProvider, LockProvider};
pub use sqlite::SqliteLockProvider;
