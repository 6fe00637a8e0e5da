//! SQLite lease table.
//!
//! Instances that open the same database file share the leases. Taking a
//! lease is one conditional upsert, so two instances racing for an expired
//! lease cannot both win.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{ClusterError, Result};
use crate::lock::LockProvider;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sync_locks (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    locked_at INTEGER NOT NULL,
    lock_until INTEGER NOT NULL
);
";

/// SQLite-backed lock provider.
pub struct SqliteLockProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLockProvider {
    /// Open (or create) the lease table in the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| ClusterError::Poisoned(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| ClusterError::TaskFailed(e.to_string()))?
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl LockProvider for SqliteLockProvider {
    async fn try_lock(&self, name: &str, holder: &str, max_hold: Duration) -> Result<bool> {
        let name = name.to_string();
        let holder = holder.to_string();
        let hold_ms = i64::try_from(max_hold.as_millis()).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let now = now_millis();
            let changed = conn.execute(
                "INSERT INTO sync_locks (name, holder, locked_at, lock_until)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    holder = excluded.holder,
                    locked_at = excluded.locked_at,
                    lock_until = excluded.lock_until
                 WHERE sync_locks.lock_until <= excluded.locked_at",
                params![name, holder, now, now.saturating_add(hold_ms)],
            )?;
            debug!(lock = %name, holder = %holder, acquired = changed == 1, "lease attempt");
            Ok(changed == 1)
        })
        .await
    }

    async fn unlock(&self, name: &str, holder: &str) -> Result<bool> {
        let name = name.to_string();
        let holder = holder.to_string();

        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM sync_locks WHERE name = ?1 AND holder = ?2",
                params![name, holder],
            )?;
            Ok(deleted == 1)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HOLD: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_sqlite_lease_exclusive_and_released() {
        let locks = SqliteLockProvider::open_memory().unwrap();

        assert!(locks.try_lock("sync", "a", HOLD).await.unwrap());
        assert!(!locks.try_lock("sync", "b", HOLD).await.unwrap());
        assert!(!locks.unlock("sync", "b").await.unwrap());
        assert!(locks.unlock("sync", "a").await.unwrap());
        assert!(locks.try_lock("sync", "b", HOLD).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_expired_lease_is_taken_over() {
        let locks = SqliteLockProvider::open_memory().unwrap();
        locks
            .try_lock("sync", "a", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(locks.try_lock("sync", "b", HOLD).await.unwrap());
        assert!(!locks.unlock("sync", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_instances_share_leases_through_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locks.db");
        let first = SqliteLockProvider::open(&path).unwrap();
        let second = SqliteLockProvider::open(&path).unwrap();

        assert!(first.try_lock("sync", "node-1", HOLD).await.unwrap());
        assert!(!second.try_lock("sync", "node-2", HOLD).await.unwrap());

        first.unlock("sync", "node-1").await.unwrap();
        assert!(second.try_lock("sync", "node-2", HOLD).await.unwrap());
    }
}
