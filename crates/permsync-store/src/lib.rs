//! # Permsync Store
//!
//! Storage abstraction for synchronized permission sets. Provides the
//! [`PermissionRepository`] trait with SQLite and in-memory implementations.
//!
//! ## Key Types
//!
//! - [`PermissionRepository`] - The async trait for all repository operations
//! - [`SqliteRepository`] - SQLite-based persistent storage
//! - [`MemoryRepository`] - In-memory storage with snapshot swaps
//!
//! ## Usage
//!
//! ```rust,no_run
//! use permsync_core::{PermissionMap, PermissionSet, PrincipalId};
//! use permsync_store::{PermissionRepository, SqliteRepository};
//!
//! async fn example() {
//!     let repo = SqliteRepository::open("permissions.db").unwrap();
//!
//!     let mut mapping = PermissionMap::new();
//!     mapping.insert(PrincipalId::from("user1"), PermissionSet::new("user1").with_account("a"));
//!     repo.put_all_new(&mapping).await.unwrap();
//!
//!     let all = repo.get_all_by_id().await.unwrap();
//!     assert_eq!(all.len(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Whole-keyspace replace**: `put_all_new` swaps the entire content in one
//!   step. Readers see either the old or the new mapping, never a mix.
//! - **Key consistency**: every mapping key must equal its set's principal id.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;
pub use traits::PermissionRepository;
