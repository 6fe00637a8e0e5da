//! Canonical CBOR encoding for permission sets.
//!
//! Deterministic encoding (RFC 8949 core rules) so the same permission set
//! always produces the same bytes, and therefore the same digest, on every
//! instance:
//! - Map keys are small integers, sorted by encoded bytes
//! - Integers use the smallest valid encoding
//! - Definite lengths only
//! - Set members are written in their `Ord` order

use ciborium::value::{Integer, Value};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::permission::{Account, PermissionMap, PermissionSet, Role, RoleSource};
use crate::types::PrincipalId;

/// Encoding version written under key 0.
pub const ENCODING_VERSION: u64 = 1;

mod keys {
    pub const VERSION: u64 = 0;
    pub const PRINCIPAL_ID: u64 = 1;
    pub const ACCOUNTS: u64 = 2;
    pub const ROLES: u64 = 3;
    pub const APPLICATIONS: u64 = 4;
    pub const SERVICE_ACCOUNTS: u64 = 5;
}

/// A 32-byte Blake3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blake3Hash(pub [u8; 32]);

impl Blake3Hash {
    /// Compute the Blake3 hash of the given data.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Encode a permission set to canonical bytes.
pub fn canonical_bytes(set: &PermissionSet) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &set_to_cbor_value(set));
    buf
}

/// Digest of a whole mapping: Blake3 over `(id, canonical set)` pairs in id order.
pub fn digest_mapping(mapping: &PermissionMap) -> Blake3Hash {
    let mut hasher = blake3::Hasher::new();
    for (id, set) in mapping {
        let mut key = Vec::new();
        encode_text(&mut key, id.as_str());
        hasher.update(&key);
        hasher.update(&canonical_bytes(set));
    }
    Blake3Hash(*hasher.finalize().as_bytes())
}

fn int(n: u64) -> Value {
    Value::Integer(Integer::from(n))
}

fn set_to_cbor_value(set: &PermissionSet) -> Value {
    let accounts = set
        .accounts
        .iter()
        .map(|a| {
            Value::Array(vec![
                Value::Text(a.name.clone()),
                match &a.cloud_provider {
                    Some(p) => Value::Text(p.clone()),
                    None => Value::Null,
                },
            ])
        })
        .collect();

    let roles = set
        .roles
        .iter()
        .map(|r| {
            Value::Array(vec![
                Value::Text(r.name.clone()),
                int(u64::from(r.source.to_u8())),
            ])
        })
        .collect();

    let texts = |names: &std::collections::BTreeSet<String>| {
        Value::Array(names.iter().cloned().map(Value::Text).collect())
    };

    Value::Map(vec![
        (int(keys::VERSION), int(ENCODING_VERSION)),
        (
            int(keys::PRINCIPAL_ID),
            Value::Text(set.principal_id.as_str().to_string()),
        ),
        (int(keys::ACCOUNTS), Value::Array(accounts)),
        (int(keys::ROLES), Value::Array(roles)),
        (int(keys::APPLICATIONS), texts(&set.applications)),
        (int(keys::SERVICE_ACCOUNTS), texts(&set.service_accounts)),
    ])
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Text(s) => encode_text(buf, s),
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        // Only the kinds built by `set_to_cbor_value` reach here.
        _ => buf.push(0xf6),
    }
}

fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n = i128::from(i);
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

/// Decode a permission set from canonical bytes.
pub fn decode_permission_set(bytes: &[u8]) -> Result<PermissionSet> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    let map = match &value {
        Value::Map(m) => m,
        _ => return Err(CoreError::DecodingError("expected map".into())),
    };

    let get = |key: u64| -> Option<&Value> {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
            .map(|(_, v)| v)
    };

    match get(keys::VERSION) {
        Some(Value::Integer(i)) => {
            let version = i128::from(*i);
            if version != ENCODING_VERSION as i128 {
                return Err(CoreError::UnsupportedVersion(version.max(0) as u64));
            }
        }
        _ => return Err(CoreError::DecodingError("missing version".into())),
    }

    let principal_id = match get(keys::PRINCIPAL_ID) {
        Some(Value::Text(s)) => PrincipalId::new(s.clone())?,
        _ => return Err(CoreError::DecodingError("missing principal id".into())),
    };

    let mut set = PermissionSet::new(principal_id);

    for item in array(get(keys::ACCOUNTS), "accounts")? {
        match item.as_array().map(Vec::as_slice) {
            Some([Value::Text(name), provider]) => {
                let mut account = Account::new(name.clone());
                if let Value::Text(p) = provider {
                    account.cloud_provider = Some(p.clone());
                }
                set.accounts.insert(account);
            }
            _ => return Err(CoreError::DecodingError("malformed account".into())),
        }
    }

    for item in array(get(keys::ROLES), "roles")? {
        match item.as_array().map(Vec::as_slice) {
            Some([Value::Text(name), Value::Integer(source)]) => {
                let source = u8::try_from(i128::from(*source))
                    .ok()
                    .and_then(RoleSource::from_u8)
                    .ok_or_else(|| CoreError::DecodingError("unknown role source".into()))?;
                set.roles.insert(Role::new(name.clone(), source));
            }
            _ => return Err(CoreError::DecodingError("malformed role".into())),
        }
    }

    set.applications = texts(get(keys::APPLICATIONS), "applications")?;
    set.service_accounts = texts(get(keys::SERVICE_ACCOUNTS), "service_accounts")?;

    Ok(set)
}

fn array<'a>(value: Option<&'a Value>, field: &str) -> Result<&'a [Value]> {
    match value {
        Some(Value::Array(items)) => Ok(items),
        None => Ok(&[]),
        _ => Err(CoreError::DecodingError(format!("{field} is not an array"))),
    }
}

fn texts(value: Option<&Value>, field: &str) -> Result<std::collections::BTreeSet<String>> {
    array(value, field)?
        .iter()
        .map(|v| match v {
            Value::Text(s) => Ok(s.clone()),
            _ => Err(CoreError::DecodingError(format!("{field} member is not text"))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PermissionSet {
        PermissionSet::new("user1")
            .with_account(Account::new("account1").with_cloud_provider("aws"))
            .with_account("account2")
            .with_role(Role::external("extRole"))
            .with_role(Role::explicit("admin"))
            .with_application("billing")
            .with_service_account("svc-reporting")
    }

    #[test]
    fn test_decode_restores_all_fields() {
        let set = sample();
        let decoded = decode_permission_set(&canonical_bytes(&set)).unwrap();
        assert_eq!(decoded, set);
        let first = decoded.accounts.iter().next().unwrap();
        assert_eq!(first.cloud_provider.as_deref(), Some("aws"));
    }

    #[test]
    fn test_encoding_is_independent_of_insertion_order() {
        let a = PermissionSet::new("p").with_account("x").with_account("y");
        let b = PermissionSet::new("p").with_account("y").with_account("x");
        assert_eq!(canonical_bytes(&a), canonical_bytes(&b));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_permission_set(&[0xff, 0x00]).is_err());
        // a bare integer is valid CBOR but not a permission set
        assert!(decode_permission_set(&[0x01]).is_err());
    }

    #[test]
    fn test_mapping_digest_changes_with_content() {
        let mut mapping = PermissionMap::new();
        mapping.insert(PrincipalId::from("user1"), sample());
        let before = digest_mapping(&mapping);

        mapping.insert(PrincipalId::from("abc"), PermissionSet::new("abc"));
        let after = digest_mapping(&mapping);

        assert_ne!(before, after);
        assert_eq!(after.to_hex().len(), 64);
    }
}
