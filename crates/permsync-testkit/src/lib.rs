//! # Permsync Testkit
//!
//! Testing utilities for permsync.
//!
//! - **Fixtures**: in-memory collaborators wired into engines and services
//! - **Doubles**: repository and resolver wrappers that fail or record on demand
//! - **Generators**: proptest strategies for permission sets and mappings
//!
//! ```rust
//! use permsync_testkit::fixtures::SyncFixture;
//! use permsync_sync::SyncConfig;
//!
//! let fixture = SyncFixture::scenario();
//! let engine = fixture.engine(SyncConfig::default());
//! ```

pub mod doubles;
pub mod fixtures;
pub mod generators;

pub use doubles::{FlakyRepository, TrackingResolver};
pub use fixtures::{mapping, unrestricted, SyncFixture, UNRESTRICTED};
pub use generators::{permission_map, permission_set, permission_set_for, principal_id};
