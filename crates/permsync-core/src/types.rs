//! Identifier types.
//!
//! Principal ids are opaque, case-sensitive strings. They are wrapped in a
//! newtype so a principal id is never confused with an account or role name.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

use crate::error::CoreError;

/// Default sentinel id under which the unrestricted permission set is stored.
pub const DEFAULT_UNRESTRICTED_PRINCIPAL: &str = "$unrestricted";

/// Identifier of a principal (human user or service account).
///
/// Comparison is exact: `Alice` and `alice` are different principals.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Create a principal id, rejecting empty or whitespace-only input.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CoreError::InvalidPrincipalId(id));
        }
        Ok(Self(id))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sentinel id used by default for the unrestricted permission set.
    pub fn unrestricted() -> Self {
        Self(DEFAULT_UNRESTRICTED_PRINCIPAL.to_string())
    }
}

impl fmt::Debug for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrincipalId({})", self.0)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PrincipalId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for PrincipalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PrincipalId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A service-account style principal as listed by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAccountDescriptor {
    /// Principal id of the service account.
    pub id: PrincipalId,
}

impl ServiceAccountDescriptor {
    pub fn new(id: impl Into<PrincipalId>) -> Self {
        Self { id: id.into() }
    }
}
