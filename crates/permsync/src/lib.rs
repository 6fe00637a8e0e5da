//! # Permsync
//!
//! Keeps a shared store of every principal's effective permissions up to
//! date across a fleet of redundant service instances.
//!
//! ## Overview
//!
//! Each instance runs a [`PermissionSyncService`]. On every scheduler tick
//! it probes its collaborators, asks the eligibility gate whether it may
//! run, takes the fleet-wide sync lease and runs one sync cycle:
//!
//! ```text
//! tick → health probe → eligibility gate → lock coordinator → sync engine
//!                                                         ↘ resolver, enumerator
//!                                                         ↘ repository (bulk replace)
//! ```
//!
//! Operators can force a cycle with
//! [`PermissionSyncService::sync_and_return`], which bypasses the gate but
//! still takes the lease.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use permsync::{PermissionSyncService, ServiceConfig};
//! use permsync::cluster::SqliteLockProvider;
//! use permsync::core::PermissionSet;
//! use permsync::store::SqliteRepository;
//! use permsync::sync::{MemoryEnumerator, MemoryResolver};
//!
//! async fn example() {
//!     let config = ServiceConfig::from_json_str(r#"{ "scheduler": { "period_ms": 60000 } }"#)
//!         .unwrap();
//!
//!     let service = PermissionSyncService::new(
//!         &config,
//!         Arc::new(SqliteRepository::open("permissions.db").unwrap()),
//!         Arc::new(MemoryResolver::new(PermissionSet::new("$unrestricted"))),
//!         Arc::new(MemoryEnumerator::default()),
//!         Arc::new(SqliteLockProvider::open("permissions.db").unwrap()),
//!     )
//!     .unwrap();
//!
//!     let scheduler = service.start().unwrap();
//!     let mapping = service.sync_and_return().await.unwrap();
//!     println!("{} principals", mapping.len());
//!     scheduler.shutdown().await.unwrap();
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `permsync::core` - Permission sets, merge, digests
//! - `permsync::store` - Repository trait, SQLite and memory backends
//! - `permsync::sync` - Resolver/enumerator traits and the sync engine
//! - `permsync::cluster` - Lease locks and the eligibility gate

pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;

pub use permsync_cluster as cluster;
pub use permsync_core as core;
pub use permsync_store as store;
pub use permsync_sync as sync;

pub use config::{LockConfig, SchedulerConfig, ServiceConfig, SyncOptions};
pub use error::{Result, ServiceError};
pub use scheduler::{SchedulerCommand, SchedulerHandle};
pub use service::{PermissionSyncService, TickOutcome};

pub use permsync_cluster::DiscoveryStatus;
pub use permsync_core::{PermissionMap, PermissionSet, PrincipalId};
pub use permsync_sync::{SyncReport, UnresolvedPolicy};
