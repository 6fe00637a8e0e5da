//! Proptest generators for property-based testing.

use proptest::prelude::*;

use permsync_core::{Account, PermissionMap, PermissionSet, PrincipalId, Role, RoleSource};

/// Generate a principal id.
pub fn principal_id() -> impl Strategy<Value = PrincipalId> {
    "[a-z][a-z0-9._@-]{0,15}".prop_map(PrincipalId::from)
}

/// Generate an account, sometimes with a cloud provider.
pub fn account() -> impl Strategy<Value = Account> {
    ("acct-[a-f]{1,2}", prop::option::of(prop_oneof![Just("aws"), Just("gcp")])).prop_map(
        |(name, provider)| match provider {
            Some(provider) => Account::new(name).with_cloud_provider(provider),
            None => Account::new(name),
        },
    )
}

/// Generate a role with either provenance.
pub fn role() -> impl Strategy<Value = Role> {
    (
        "role-[a-d]",
        prop_oneof![Just(RoleSource::External), Just(RoleSource::Explicit)],
    )
        .prop_map(|(name, source)| Role::new(name, source))
}

fn names(prefix: &'static str) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-c]{1,2}", 0..3)
        .prop_map(move |names| names.into_iter().map(|n| format!("{prefix}-{n}")).collect())
}

/// Generate a permission set owned by `id`.
pub fn permission_set_for(id: PrincipalId) -> impl Strategy<Value = PermissionSet> {
    (
        prop::collection::vec(account(), 0..4),
        prop::collection::vec(role(), 0..3),
        names("app"),
        names("sa"),
    )
        .prop_map(move |(accounts, roles, apps, sas)| {
            let mut set = PermissionSet::new(id.clone());
            set.accounts.extend(accounts);
            set.roles.extend(roles);
            set.applications.extend(apps);
            set.service_accounts.extend(sas);
            set
        })
}

/// Generate a permission set with a random owner.
pub fn permission_set() -> impl Strategy<Value = PermissionSet> {
    principal_id().prop_flat_map(permission_set_for)
}

/// Generate a consistent mapping of up to `max` principals.
pub fn permission_map(max: usize) -> impl Strategy<Value = PermissionMap> {
    prop::collection::vec(permission_set(), 0..=max).prop_map(|sets| {
        sets.into_iter()
            .map(|set| (set.principal_id.clone(), set))
            .collect()
    })
}
