//! Cache layer for paperbrief.
//!
//! The pipeline only sees the [`CacheStore`] trait: byte values with a TTL,
//! an atomic set-if-absent for in-flight markers, and additive numeric
//! counters for rate windows and cost aggregates. Two backends ship here:
//!
//! - [`MemoryCache`]: process-local, used by tests and one-shot runs
//! - [`SqlCache`]: libSQL file, shared by every process on the machine
//!
//! Key construction and TTLs live in [`keys`].

pub mod keys;
mod memory;
mod migrations;
mod sql;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paperbrief_shared::{CacheBackend, CacheConfig, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use memory::MemoryCache;
pub use sql::SqlCache;

/// Key-value store with TTL, consumed by the pipeline.
///
/// Expired entries behave exactly like absent ones.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Write only if the key is absent. Returns whether the write happened.
    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool>;

    /// Remove a value or counter hash.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove a value only while it still equals `expected`. Returns whether
    /// it was removed.
    async fn delete_if(&self, key: &str, expected: &[u8]) -> Result<bool>;

    /// Atomically add `amount` to `field` of the counter hash at `key` and
    /// return the new value. Missing fields start at zero. The TTL is
    /// refreshed on every increment.
    async fn incr_by(&self, key: &str, field: &str, amount: f64, ttl: Duration) -> Result<f64>;

    /// Read every live field of a counter hash.
    async fn get_fields(&self, key: &str) -> Result<BTreeMap<String, f64>>;

    /// Remaining lifetime of a key, `None` when absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
}

/// Read and deserialize a JSON value. Undecodable entries count as misses.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    let Some(bytes) = cache.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding undecodable cache entry");
            Ok(None)
        }
    }
}

/// Serialize a value as JSON and store it.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| paperbrief_shared::PaperBriefError::internal(format!("serialize {key}: {e}")))?;
    cache.set(key, &bytes, ttl).await
}

/// Open the backend selected in the config.
pub async fn open_cache(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheBackend::Libsql => {
            let path = config.resolved_path()?;
            Ok(Arc::new(SqlCache::open(&path).await?))
        }
    }
}
