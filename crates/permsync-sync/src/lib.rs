//! # Permsync Sync
//!
//! The periodic sync cycle that rebuilds the permission store from the
//! upstream providers.
//!
//! ## Overview
//!
//! A cycle collects every principal worth re-checking (stored ids, all
//! service accounts from the enumerator, and the unrestricted sentinel),
//! resolves the unrestricted baseline, resolves everyone else, merges the
//! baseline into each result and replaces the store in one bulk write.
//!
//! ## Key Properties
//!
//! - **All or nothing**: a cycle that aborts writes nothing
//! - **Eviction by omission**: principals the resolver no longer returns are removed
//! - **Idempotent**: unchanged upstream state yields an identical store
//! - **Bounded**: every upstream call carries a timeout
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use permsync_core::PermissionSet;
//! use permsync_store::MemoryRepository;
//! use permsync_sync::{MemoryEnumerator, MemoryResolver, SyncConfig, SyncEngine};
//!
//! async fn example() {
//!     let resolver = MemoryResolver::new(PermissionSet::new("$unrestricted"));
//!     let engine = SyncEngine::new(
//!         Arc::new(MemoryRepository::new()),
//!         Arc::new(resolver),
//!         Arc::new(MemoryEnumerator::default()),
//!         SyncConfig::default(),
//!     );
//!
//!     let outcome = engine.run_sync().await.unwrap();
//!     println!("wrote {} principals", outcome.report.written);
//! }
//! ```
//!
//! ## Cycle
//!
//! ```text
//! repository.get_all_by_id ─┐
//! enumerator.get_all(true) ─┼─> ids ─> resolve_unrestricted_user ─> resolve (batched)
//! sentinel ─────────────────┘                                          │
//!                                 repository.put_all_new <─ merge <─────┘
//! ```

pub mod engine;
pub mod enumerator;
pub mod error;
pub mod health;
pub mod resolver;

pub use engine::{SyncConfig, SyncEngine, SyncOutcome, SyncReport, UnresolvedPolicy};
pub use enumerator::{memory::MemoryEnumerator, PrincipalEnumerator};
pub use error::{Result, SyncError};
pub use health::{HealthProbe, HealthReport};
pub use resolver::{memory::MemoryResolver, PermissionResolver};
