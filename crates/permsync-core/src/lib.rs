//! # Permsync Core
//!
//! Pure primitives for permission synchronization: principal identifiers,
//! permission sets, and the merge algebra used to fold the unrestricted
//! baseline into every principal.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`PrincipalId`] - Case-sensitive identifier of a user or service account
//! - [`PermissionSet`] - The accounts, roles, applications and service accounts of one principal
//! - [`Account`] / [`Role`] - Named members of a permission set
//! - [`ServiceAccountDescriptor`] - What the principal enumerator hands back
//!
//! ## Merge
//!
//! [`PermissionSet::merge`] is a pure set union keyed by name. It is
//! idempotent and commutative in membership; the result always keeps the
//! principal id of the receiver.
//!
//! ## Canonicalization
//!
//! Permission sets are encoded as deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod error;
pub mod permission;
pub mod types;

pub use canonical::{canonical_bytes, decode_permission_set, digest_mapping, Blake3Hash};
pub use error::{CoreError, Result};
pub use permission::{Account, PermissionMap, PermissionSet, Role, RoleSource};
pub use types::{PrincipalId, ServiceAccountDescriptor, DEFAULT_UNRESTRICTED_PRINCIPAL};
