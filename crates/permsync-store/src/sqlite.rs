//! SQLite implementation of the repository.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`. `put_all_new` diffs the new mapping
//! against the stored per-row digests and applies the deletes and changed
//! rows inside one immediate transaction, so concurrent readers on other
//! connections see either the old or the new content.
//!
//! Writes are bounded by the connection's busy timeout, not by the caller.
//! A write that cannot take the database lock in time fails inside the
//! blocking task and its transaction rolls back before the error is
//! returned, so an abandoned caller never leaves a write in flight.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use permsync_core::{
    canonical_bytes, decode_permission_set, Blake3Hash, PermissionMap, PermissionSet, PrincipalId,
};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{check_mapping, PermissionRepository};

/// How long a write waits on another connection's lock before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based repository.
///
/// Thread-safe via an internal mutex around the connection.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open a SQLite database at the given path, running migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit bound on waiting for other writers.
    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }
}

fn row_to_set(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Vec<u8>)> {
    Ok((row.get("principal_id")?, row.get("encoded")?))
}

fn decode_row(principal_id: String, encoded: &[u8]) -> Result<PermissionSet> {
    let set = decode_permission_set(encoded)?;
    if set.principal_id.as_str() != principal_id {
        return Err(StoreError::InvalidData(format!(
            "row {principal_id} holds permission set of {}",
            set.principal_id
        )));
    }
    Ok(set)
}

/// Stored digest per principal id; `None` for rows written before digests.
fn stored_digests(conn: &Connection) -> Result<HashMap<String, Option<Vec<u8>>>> {
    let mut stmt = conn.prepare("SELECT principal_id, digest FROM permission_sets")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(rows)
}

fn upsert(conn: &Connection, set: &PermissionSet, now: i64) -> Result<()> {
    let encoded = canonical_bytes(set);
    let digest = Blake3Hash::hash(&encoded);
    write_row(conn, set, &encoded, &digest, now)
}

fn write_row(
    conn: &Connection,
    set: &PermissionSet,
    encoded: &[u8],
    digest: &Blake3Hash,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO permission_sets (principal_id, encoded, digest, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(principal_id) DO UPDATE SET
            encoded = excluded.encoded,
            digest = excluded.digest,
            updated_at = excluded.updated_at",
        params![
            set.principal_id.as_str(),
            encoded,
            digest.as_bytes().as_slice(),
            now
        ],
    )?;
    Ok(())
}

#[async_trait]
impl PermissionRepository for SqliteRepository {
    async fn get_all_by_id(&self) -> Result<PermissionMap> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT principal_id, encoded FROM permission_sets ORDER BY principal_id",
            )?;
            let rows = stmt
                .query_map([], row_to_set)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut mapping = PermissionMap::new();
            for (principal_id, encoded) in rows {
                let set = decode_row(principal_id, &encoded)?;
                mapping.insert(set.principal_id.clone(), set);
            }
            Ok(mapping)
        })
        .await
    }

    async fn get(&self, id: &PrincipalId) -> Result<Option<PermissionSet>> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT principal_id, encoded FROM permission_sets WHERE principal_id = ?1",
                    params![id.as_str()],
                    row_to_set,
                )
                .optional()?;
            row.map(|(principal_id, encoded)| decode_row(principal_id, &encoded))
                .transpose()
        })
        .await
    }

    async fn put(&self, set: &PermissionSet) -> Result<()> {
        let set = set.clone();
        self.with_conn(move |conn| upsert(conn, &set, now_millis()))
            .await
    }

    async fn put_all_new(&self, mapping: &PermissionMap) -> Result<()> {
        check_mapping(mapping)?;
        let mapping = mapping.clone();

        self.with_conn(move |conn| {
            let now = now_millis();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let stored = stored_digests(&tx)?;

            let mut removed = 0;
            for id in stored.keys() {
                if !mapping.contains_key(id.as_str()) {
                    tx.execute(
                        "DELETE FROM permission_sets WHERE principal_id = ?1",
                        params![id],
                    )?;
                    removed += 1;
                }
            }

            let mut changed = 0;
            for set in mapping.values() {
                let encoded = canonical_bytes(set);
                let digest = Blake3Hash::hash(&encoded);
                let current = stored
                    .get(set.principal_id.as_str())
                    .and_then(|d| d.as_deref());
                if current == Some(digest.as_bytes().as_slice()) {
                    continue;
                }
                write_row(&tx, set, &encoded, &digest, now)?;
                changed += 1;
            }

            tx.commit()?;
            tracing::debug!(
                principals = mapping.len(),
                changed,
                removed,
                "replaced permission sets"
            );
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}
