//! Permission sets and the merge algebra.
//!
//! A permission set is a bag of named, set-valued collections owned by one
//! principal. Members are identified by name (roles by name and source), so
//! merging two sets is a plain union and the result does not depend on
//! which side contributed a given member.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::types::PrincipalId;

/// Mapping from principal id to its permission set, ordered by id.
pub type PermissionMap = BTreeMap<PrincipalId, PermissionSet>;

/// An account reachable by a principal.
///
/// Identity is the name alone; `cloud_provider` is descriptive and does not
/// participate in equality or ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
}

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cloud_provider: None,
        }
    }

    pub fn with_cloud_provider(mut self, provider: impl Into<String>) -> Self {
        self.cloud_provider = Some(provider.into());
        self
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Account {}

impl PartialOrd for Account {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Account {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Account {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Where a role assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    /// Sourced from an external directory or role provider.
    External,
    /// Explicitly assigned inside the authorization service.
    Explicit,
}

impl RoleSource {
    pub fn to_u8(self) -> u8 {
        match self {
            RoleSource::External => 0,
            RoleSource::Explicit => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RoleSource::External),
            1 => Some(RoleSource::Explicit),
            _ => None,
        }
    }
}

/// A role held by a principal, identified by name and provenance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub source: RoleSource,
}

impl Role {
    pub fn new(name: impl Into<String>, source: RoleSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    pub fn external(name: impl Into<String>) -> Self {
        Self::new(name, RoleSource::External)
    }

    pub fn explicit(name: impl Into<String>) -> Self {
        Self::new(name, RoleSource::Explicit)
    }
}

/// The effective permissions of one principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub principal_id: PrincipalId,
    #[serde(default)]
    pub accounts: BTreeSet<Account>,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub applications: BTreeSet<String>,
    #[serde(default)]
    pub service_accounts: BTreeSet<String>,
}

impl PermissionSet {
    /// An empty permission set for `principal_id`.
    pub fn new(principal_id: impl Into<PrincipalId>) -> Self {
        Self {
            principal_id: principal_id.into(),
            accounts: BTreeSet::new(),
            roles: BTreeSet::new(),
            applications: BTreeSet::new(),
            service_accounts: BTreeSet::new(),
        }
    }

    pub fn with_account(mut self, account: impl Into<Account>) -> Self {
        self.accounts.insert(account.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn with_application(mut self, name: impl Into<String>) -> Self {
        self.applications.insert(name.into());
        self
    }

    pub fn with_service_account(mut self, name: impl Into<String>) -> Self {
        self.service_accounts.insert(name.into());
        self
    }

    /// Union of `self` and `other`, owned by `self.principal_id`.
    ///
    /// On a name collision the member already present in `self` is kept.
    /// Neither input is modified.
    pub fn merge(&self, other: &PermissionSet) -> PermissionSet {
        let mut merged = self.clone();
        merged.accounts.extend(other.accounts.iter().cloned());
        merged.roles.extend(other.roles.iter().cloned());
        merged.applications.extend(other.applications.iter().cloned());
        merged
            .service_accounts
            .extend(other.service_accounts.iter().cloned());
        merged
    }

    /// The same permissions re-owned by another principal.
    pub fn for_principal(&self, principal_id: impl Into<PrincipalId>) -> PermissionSet {
        PermissionSet {
            principal_id: principal_id.into(),
            ..self.clone()
        }
    }

    /// True if every member of `other` is also a member of `self`.
    pub fn includes(&self, other: &PermissionSet) -> bool {
        other.accounts.is_subset(&self.accounts)
            && other.roles.is_subset(&self.roles)
            && other.applications.is_subset(&self.applications)
            && other.service_accounts.is_subset(&self.service_accounts)
    }

    /// True if both sets hold the same members, ignoring principal ids.
    pub fn same_membership(&self, other: &PermissionSet) -> bool {
        self.accounts == other.accounts
            && self.roles == other.roles
            && self.applications == other.applications
            && self.service_accounts == other.service_accounts
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.roles.is_empty()
            && self.applications.is_empty()
            && self.service_accounts.is_empty()
    }

    /// Account names in order.
    pub fn account_names(&self) -> Vec<&str> {
        self.accounts.iter().map(|a| a.name.as_str()).collect()
    }
}

impl From<&str> for Account {
    fn from(name: &str) -> Self {
        Account::new(name)
    }
}

impl From<String> for Account {
    fn from(name: String) -> Self {
        Account::new(name)
    }
}
