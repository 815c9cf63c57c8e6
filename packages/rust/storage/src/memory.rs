//! Process-local cache backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use paperbrief_shared::{PaperBriefError, Result};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::CacheStore;

/// Map size below which expired entries are left in place.
const SWEEP_MIN: usize = 256;

#[derive(Debug)]
enum Slot {
    Bytes(Vec<u8>),
    Fields(BTreeMap<String, f64>),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-memory [`CacheStore`] guarded by a single mutex.
///
/// Uses `tokio::time::Instant`, so tests can pause and advance the clock.
/// Expired entries are dropped by a sweep on write once the map has doubled
/// since the last sweep.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    sweep_at: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let threshold = self.sweep_at.load(Ordering::Relaxed).max(SWEEP_MIN);
        if entries.len() < threshold {
            return;
        }
        let before = entries.len();
        entries.retain(|_, e| e.live(now));
        tracing::trace!(removed = before - entries.len(), "swept expired cache entries");
        self.sweep_at
            .store(entries.len().saturating_mul(2), Ordering::Relaxed);
    }

    #[cfg(test)]
    async fn retained(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(Entry {
                slot: Slot::Bytes(bytes),
                expires_at,
            }) if *expires_at > now => Ok(Some(bytes.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        self.sweep(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.live(now)) {
            return Ok(false);
        }
        self.sweep(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn delete_if(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let owned = matches!(
            entries.get(key),
            Some(Entry { slot: Slot::Bytes(bytes), .. }) if bytes.as_slice() == expected
        );
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }

    async fn incr_by(&self, key: &str, field: &str, amount: f64, ttl: Duration) -> Result<f64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        self.sweep(&mut entries, now);

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Fields(BTreeMap::new()),
            expires_at: now,
        });
        if !entry.live(now) {
            entry.slot = Slot::Fields(BTreeMap::new());
        }

        let Slot::Fields(fields) = &mut entry.slot else {
            return Err(PaperBriefError::Storage(format!(
                "{key} holds a value, not counters"
            )));
        };
        let value = fields.entry(field.to_string()).or_insert(0.0);
        *value += amount;
        let updated = *value;
        entry.expires_at = now + ttl;
        Ok(updated)
    }

    async fn get_fields(&self, key: &str) -> Result<BTreeMap<String, f64>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(Entry {
                slot: Slot::Fields(fields),
                expires_at,
            }) if *expires_at > now => Ok(fields.clone()),
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.expires_at - now))
    }
}
