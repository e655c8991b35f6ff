use super::currency::{RateSource, RateTable, normalize_code};
use super::error::RateResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    table: Arc<RateTable>,
    fetched_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// One slot per base currency. Holding the slot lock is what makes a fill
/// single-flight: concurrent readers of the same base queue behind the fetch
/// and then observe its result.
type Slot = Arc<Mutex<Option<CacheEntry>>>;

/// Counters since creation. `entries` is the number of fresh tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub failures: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

/// Time-bounded cache of whole rate tables keyed by base currency.
///
/// Expired entries are never served, even when the source is down.
pub struct RateCache {
    source: Arc<dyn RateSource>,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
    counters: Counters,
}

impl RateCache {
    pub fn new(source: Arc<dyn RateSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            slots: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    async fn slot(&self, base: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(base.to_string()).or_default())
    }

    /// Returns the fresh table for `base`, fetching it on a miss.
    ///
    /// A failed fetch is propagated and leaves any stale entry untouched.
    pub async fn get_rates(&self, base: &str) -> RateResult<Arc<RateTable>> {
        let base = normalize_code(base);
        let slot = self.slot(&base).await;
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref().filter(|e| e.is_fresh(self.ttl)) {
            debug!(base = %base, "Cache HIT");
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&cached.table));
        }

        debug!(base = %base, stale = entry.is_some(), "Cache MISS");
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        match self.source.fetch_rates(&base).await {
            Ok(table) => {
                let table = Arc::new(table);
                debug!(base = %base, count = table.len(), "Cache PUT");
                *entry = Some(CacheEntry {
                    table: Arc::clone(&table),
                    fetched_at: Instant::now(),
                });
                Ok(table)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let never_filled = entry.is_none();
                drop(entry);
                if never_filled {
                    self.forget(&base, slot).await;
                }
                Err(e)
            }
        }
    }

    /// Removes a slot that never held a table, unless another lookup is
    /// already queued on it.
    async fn forget(&self, base: &str, slot: Slot) {
        let mut slots = self.slots.lock().await;
        // One reference in the map plus ours means nobody else is waiting
        if slots.get(base).is_some_and(|s| Arc::ptr_eq(s, &slot))
            && Arc::strong_count(&slot) == 2
        {
            slots.remove(base);
            debug!(base = %base, "Dropped empty cache slot");
        }
    }

    /// Drops every entry so the next lookups refetch.
    pub async fn invalidate(&self) {
        let mut slots = self.slots.lock().await;
        slots.clear();
        debug!("Cache CLEAR");
    }

    pub async fn stats(&self) -> CacheStats {
        let mut entries = 0;
        let slots: Vec<Slot> = self.slots.lock().await.values().cloned().collect();
        // Waits for fills in progress so they are counted
        for slot in slots {
            if slot
                .lock()
                .await
                .as_ref()
                .is_some_and(|e| e.is_fresh(self.ttl))
            {
                entries += 1;
            }
        }
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            entries,
        }
    }
}

#[async_trait]
impl RateSource for RateCache {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn fetch_rates(&self, base: &str) -> RateResult<RateTable> {
        self.get_rates(base).await.map(|table| (*table).clone())
    }
}
