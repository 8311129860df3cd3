//! In-memory TTL cache for analysis responses and vulnerability scores

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use super::clock::{Clock, SharedClock, SystemClock};
use crate::model::{AnalysisResponse, VulnerabilityScore};

const DEFAULT_MAX_ENTRIES: usize = 1000;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded key/value store with per-entry time-to-live
///
/// Reads hand out clones so callers never observe later mutation of the
/// stored value. Expiry is lazy: an expired entry is dropped when read or
/// when space is needed. When full, expired entries are purged first and then
/// the entry inserted longest ago is evicted.
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    max_entries: usize,
    clock: SharedClock,
}

pub type ResponseCache = TtlCache<AnalysisResponse>;
pub type ScoreCache = TtlCache<VulnerabilityScore>;

impl<V: Clone> TtlCache<V> {
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let lookup = inner
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => {
                inner.hits += 1;
                return Some(value);
            }
            Some(None) => {
                inner.entries.remove(key);
                tracing::debug!(key = %key, "Cache entry expired");
            }
            None => {}
        }

        inner.misses += 1;
        None
    }

    /// Store a value, replacing any previous entry for the key
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            Self::make_room(&mut inner, now, self.max_entries);
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
    }

    fn make_room(inner: &mut Inner<V>, now: Instant, max_entries: usize) {
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        inner.evictions += (before - inner.entries.len()) as u64;

        if inner.entries.len() < max_entries {
            return;
        }

        let oldest = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            inner.entries.remove(&key);
            inner.evictions += 1;
            tracing::debug!(key = %key, "Evicted oldest cache entry");
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.evictions += removed as u64;
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
