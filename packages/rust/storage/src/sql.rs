//! libSQL-backed cache (embedded, offline mode).
//!
//! Values and counters live in two tables with an absolute `expires_at`
//! (unix millis). Reads filter on it; [`SqlCache::purge_expired`] deletes
//! dead rows. Counter increments are a single upsert statement, so
//! concurrent writers never lose updates.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};
use paperbrief_shared::{PaperBriefError, Result};

use crate::{CacheStore, migrations};

/// Writes between expired-row purges.
const PURGE_EVERY: u64 = 1000;

fn storage_err(e: libsql::Error) -> PaperBriefError {
    PaperBriefError::Storage(e.to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// Durable [`CacheStore`] on a local libSQL database file.
pub struct SqlCache {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    writes: AtomicU64,
    purge_every: u64,
}

impl SqlCache {
    /// Open or create a database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PaperBriefError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let cache = Self {
            db,
            conn,
            writes: AtomicU64::new(0),
            purge_every: PURGE_EVERY,
        };
        cache.run_migrations().await?;
        let purged = cache.purge_expired().await?;
        if purged > 0 {
            tracing::debug!(purged, "removed expired cache rows");
        }
        Ok(cache)
    }

    /// Purge expired rows every `writes` writes instead of the default.
    pub fn with_purge_interval(mut self, writes: u64) -> Self {
        self.purge_every = writes.max(1);
        self
    }

    /// Count a write and purge when the interval is reached. Purge failures
    /// are logged, never surfaced to the writer.
    async fn note_write(&self) {
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.purge_every != 0 {
            return;
        }
        match self.purge_expired().await {
            Ok(purged) => tracing::debug!(purged, "removed expired cache rows"),
            Err(e) => tracing::warn!(error = %e, "expired row purge failed"),
        }
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    PaperBriefError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    /// Delete every expired value and counter. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = now_millis();
        let values = self
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE expires_at <= ?1",
                params![now],
            )
            .await
            .map_err(storage_err)?;
        let counters = self
            .conn
            .execute(
                "DELETE FROM cache_counters WHERE expires_at <= ?1",
                params![now],
            )
            .await
            .map_err(storage_err)?;
        Ok(values + counters)
    }
}

#[async_trait]
impl CacheStore for SqlCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
                params![key, now_millis()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row.get::<Vec<u8>>(0).map_err(storage_err)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   expires_at = excluded.expires_at",
                params![key, value.to_vec(), expiry(ttl)],
            )
            .await
            .map_err(storage_err)?;
        self.note_write().await;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        // An expired row is taken over; a live one blocks the write.
        let changed = self
            .conn
            .execute(
                "INSERT INTO cache_entries (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   expires_at = excluded.expires_at
                 WHERE cache_entries.expires_at <= ?4",
                params![key, value.to_vec(), expiry(ttl), now_millis()],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        self.conn
            .execute("DELETE FROM cache_counters WHERE key = ?1", params![key])
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn delete_if(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE key = ?1 AND value = ?2",
                params![key, expected.to_vec()],
            )
            .await
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn incr_by(&self, key: &str, field: &str, amount: f64, ttl: Duration) -> Result<f64> {
        let mut rows = self
            .conn
            .query(
                "INSERT INTO cache_counters (key, field, value, expires_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key, field) DO UPDATE SET
                   value = CASE
                     WHEN cache_counters.expires_at <= ?5 THEN excluded.value
                     ELSE cache_counters.value + excluded.value
                   END,
                   expires_at = excluded.expires_at
                 RETURNING value",
                params![key, field, amount, expiry(ttl), now_millis()],
            )
            .await
            .map_err(storage_err)?;

        let updated = match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<f64>(0).map_err(storage_err)?,
            None => {
                return Err(PaperBriefError::Storage(format!(
                    "increment of {key}.{field} returned no row"
                )));
            }
        };
        drop(rows);
        self.note_write().await;
        Ok(updated)
    }

    async fn get_fields(&self, key: &str) -> Result<BTreeMap<String, f64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT field, value FROM cache_counters WHERE key = ?1 AND expires_at > ?2",
                params![key, now_millis()],
            )
            .await
            .map_err(storage_err)?;

        let mut fields = BTreeMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let field: String = row.get(0).map_err(storage_err)?;
            let value: f64 = row.get(1).map_err(storage_err)?;
            fields.insert(field, value);
        }
        Ok(fields)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = now_millis();
        let mut rows = self
            .conn
            .query(
                "SELECT expires_at FROM cache_entries WHERE key = ?1 AND expires_at > ?2
                 UNION ALL
                 SELECT expires_at FROM cache_counters WHERE key = ?1 AND expires_at > ?2
                 ORDER BY expires_at DESC LIMIT 1",
                params![key, now],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let expires_at: i64 = row.get(0).map_err(storage_err)?;
                let remaining = u64::try_from(expires_at - now).unwrap_or(0);
                Ok(Some(Duration::from_millis(remaining)))
            }
            None => Ok(None),
        }
    }
}
