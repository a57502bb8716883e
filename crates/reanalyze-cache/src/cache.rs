use dashmap::DashMap;
use reanalyze_core::{CacheComputeError, ScopeId};
use serde::Serialize;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Identifies the kind of value a provider computes for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderId(Cow<'static, str>);

impl ProviderId {
    pub const FILE_LISTING: ProviderId = ProviderId(Cow::Borrowed("file-listing"));
    pub const STRUCTURAL: ProviderId = ProviderId(Cow::Borrowed("structural-metadata"));

    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A computed value and the instant it was computed. Never mutated in
/// place; a refresh replaces the whole entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub computed_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            computed_at: Instant::now(),
        }
    }

    pub fn is_fresh(&self, duration: Duration) -> bool {
        self.computed_at.elapsed() < duration
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub compute_failures: u64,
    pub invalidations: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    compute_failures: AtomicU64,
    invalidations: AtomicU64,
}

type CacheKey = (ScopeId, ProviderId);
type Slot = Arc<dyn Any + Send + Sync>;

/// Invalidation counts observed when a computation started. A value is only
/// stored if none of them moved while it was being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Epoch {
    cleared: u64,
    scope: u64,
    key: u64,
}

/// TTL-bounded cache of expensive per-scope values, keyed by
/// (scope, provider).
///
/// Entries live in a sharded map, so lookups for different scopes never
/// contend on one lock. Values are computed on the calling thread with no
/// lock held; two callers racing a miss on the same key both compute and
/// the last insert wins. A value whose computation overlapped an
/// invalidation of its key is returned to its caller but never stored.
#[derive(Default)]
pub struct ConfigScopeCache {
    entries: DashMap<CacheKey, CacheEntry<Slot>>,
    scope_epochs: DashMap<ScopeId, u64>,
    key_epochs: DashMap<CacheKey, u64>,
    cleared: AtomicU64,
    counters: Counters,
}

impl ConfigScopeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value if younger than `duration`, otherwise `compute()`'s
    /// result, which is stored before being returned.
    pub fn get_or_compute<V, F>(
        &self,
        scope: &ScopeId,
        provider: &ProviderId,
        duration: Duration,
        compute: F,
    ) -> V
    where
        V: Clone + Send + Sync + 'static,
        F: FnOnce() -> V,
    {
        let key = (scope.clone(), provider.clone());
        if let Some(value) = self.lookup::<V>(&key, duration) {
            return value;
        }

        let seen = self.epoch(&key);
        let value = compute();
        self.store(key, value.clone(), seen);
        value
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for providers that can
    /// fail. A failed computation caches nothing.
    pub fn try_get_or_compute<V, E, F>(
        &self,
        scope: &ScopeId,
        provider: &ProviderId,
        duration: Duration,
        compute: F,
    ) -> Result<V, CacheComputeError>
    where
        V: Clone + Send + Sync + 'static,
        E: fmt::Display,
        F: FnOnce() -> Result<V, E>,
    {
        let key = (scope.clone(), provider.clone());
        if let Some(value) = self.lookup::<V>(&key, duration) {
            return Ok(value);
        }

        let seen = self.epoch(&key);
        match compute() {
            Ok(value) => {
                self.store(key, value.clone(), seen);
                Ok(value)
            }
            Err(e) => {
                self.counters.compute_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Provider {} failed for scope {}: {}", provider, scope, e);
                Err(CacheComputeError::ProviderFailed {
                    scope: scope.clone(),
                    provider: provider.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Drop every entry of a scope. Returns the number removed.
    pub fn invalidate(&self, scope: &ScopeId) -> usize {
        *self.scope_epochs.entry(scope.clone()).or_insert(0) += 1;
        let before = self.entries.len();
        self.entries.retain(|(s, _), _| s != scope);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.counters
                .invalidations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Invalidated {} cache entries for scope {}", removed, scope);
        }
        removed
    }

    /// Drop one provider's entry for a scope.
    pub fn invalidate_provider(&self, scope: &ScopeId, provider: &ProviderId) -> bool {
        let key = (scope.clone(), provider.clone());
        *self.key_epochs.entry(key.clone()).or_insert(0) += 1;
        let removed = self.entries.remove(&key).is_some();
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
            debug!("Invalidated {} for scope {}", provider, scope);
        }
        removed
    }

    pub fn contains(&self, scope: &ScopeId, provider: &ProviderId) -> bool {
        self.entries.contains_key(&(scope.clone(), provider.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            compute_failures: self.counters.compute_failures.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn lookup<V>(&self, key: &CacheKey, duration: Duration) -> Option<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let slot = self
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(duration))
            .map(|entry| entry.value.clone());

        let value = slot.and_then(|slot| match slot.downcast_ref::<V>() {
            Some(v) => Some(v.clone()),
            None => {
                warn!(
                    "Cache entry {}/{} holds a different type, recomputing",
                    key.0, key.1
                );
                None
            }
        });

        match value {
            Some(v) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn epoch(&self, key: &CacheKey) -> Epoch {
        Epoch {
            cleared: self.cleared.load(Ordering::Acquire),
            scope: self.scope_epochs.get(&key.0).map_or(0, |e| *e),
            key: self.key_epochs.get(key).map_or(0, |e| *e),
        }
    }

    /// Insert unless the key was invalidated after `seen` was taken. The
    /// check runs under the entry's shard lock, so an invalidation either
    /// moves the epoch first or removes the inserted value afterwards.
    fn store<V>(&self, key: CacheKey, value: V, seen: Epoch) -> bool
    where
        V: Send + Sync + 'static,
    {
        let entry = self.entries.entry(key);
        if self.epoch(entry.key()) != seen {
            debug!(
                "Discarding {}/{}: invalidated while computing",
                entry.key().0,
                entry.key().1
            );
            return false;
        }
        let slot: Slot = Arc::new(value);
        entry.insert(CacheEntry::new(slot));
        true
    }
}
