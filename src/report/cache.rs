//! Time-stamped cache of report sections.

use std::time::Duration;

use hashbrown::HashMap;

use crate::types::UnixMillis;

#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    stored_at_ms: UnixMillis,
}

/// Keyed cache of computed report sections, each stamped with the time it
/// was stored. Freshness is decided per lookup by the caller's TTL.
#[derive(Debug, Clone)]
pub struct ReportCache<V> {
    entries: HashMap<String, CachedEntry<V>>,
}

impl<V> Default for ReportCache<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V: Clone> ReportCache<V> {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries held, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the value for `key` if it was stored less than `ttl` ago.
    pub fn get(&self, key: &str, ttl: Duration, now_ms: UnixMillis) -> Option<&V> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.entries
            .get(key)
            .filter(|entry| now_ms.saturating_sub(entry.stored_at_ms) < ttl_ms)
            .map(|entry| &entry.value)
    }

    /// Stores `value` as computed at `now_ms`.
    pub fn insert(&mut self, key: &str, value: V, now_ms: UnixMillis) {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                value,
                stored_at_ms: now_ms,
            },
        );
    }

    /// Returns the fresh cached value or computes, stores and returns a new
    /// one. Errors are not cached.
    pub fn get_or_try_insert_with<E, F>(
        &mut self,
        key: &str,
        ttl: Duration,
        now_ms: UnixMillis,
        compute: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(key, ttl, now_ms) {
            return Ok(value.clone());
        }
        let value = compute()?;
        self.insert(key, value.clone(), now_ms);
        Ok(value)
    }

    /// Drops `key`; true if it was present.
    pub fn invalidate(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}
