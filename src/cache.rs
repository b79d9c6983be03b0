//! Generic per-key, per-entry-TTL cache with periodic sweep and hit-rate
//! statistics, shared by the stat cache and the directory listing cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Snapshot of hit-rate counters, reported at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatistics {
    pub total_cache_hits: u64,
    pub total_lookups: u64,
}

impl CacheStatistics {
    pub fn hit_rate(&self) -> f64 {
        if self.total_lookups == 0 {
            return 0.0;
        }
        self.total_cache_hits as f64 / self.total_lookups as f64
    }
}

impl std::fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total hits: {}, total lookups: {}, hit rate: {:.1}%",
            self.total_cache_hits,
            self.total_lookups,
            self.hit_rate() * 100.0
        )
    }
}

struct Entry<T> {
    data: T,
    fetched_at: Instant,
}

struct Inner<T> {
    data: HashMap<String, Entry<T>>,
    last_sweep: Instant,
}

/// A `key(String) -> T` store where every entry expires `ttl` after it was
/// inserted, with a background-free sweep that piggybacks on `put`.
pub struct TimedCache<T> {
    ttl: Duration,
    scan_period: Duration,
    hits: AtomicU64,
    lookups: AtomicU64,
    inner: RwLock<Inner<T>>,
}

impl<T: Clone> TimedCache<T> {
    pub fn new(ttl: Duration, scan_period: Duration) -> Self {
        Self {
            ttl,
            scan_period,
            hits: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            inner: RwLock::new(Inner { data: HashMap::new(), last_sweep: Instant::now() }),
        }
    }

    /// Returns the cached value for `key` if present and not expired. Never
    /// mutates the map on an expired hit — lazy expiry happens on `put`'s
    /// periodic sweep and on a subsequent `invalidate`.
    pub fn get(&self, key: &str) -> Option<T> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let guard = self.inner.read();
        let entry = guard.data.get(key)?;
        if entry.fetched_at.elapsed() <= self.ttl {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.data.clone())
        } else {
            None
        }
    }

    /// Inserts `value` for `key`, recording the current instant as its
    /// fetch time. Sweeps expired entries if `scan_period` has elapsed since
    /// the last sweep.
    pub fn put(&self, key: String, value: T) {
        let mut guard = self.inner.write();
        let now = Instant::now();
        guard.data.insert(key, Entry { data: value, fetched_at: now });

        if now.duration_since(guard.last_sweep) > self.scan_period {
            guard.last_sweep = now;
            let ttl = self.ttl;
            guard.data.retain(|_, entry| entry.fetched_at.elapsed() <= ttl);
        }
    }

    /// Removes `key` if present. Takes a shared lock first so a miss never
    /// promotes to an exclusive lock.
    pub fn invalidate(&self, key: &str) {
        {
            let guard = self.inner.read();
            if !guard.data.contains_key(key) {
                return;
            }
        }
        self.inner.write().data.remove(key);
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            total_cache_hits: self.hits.load(Ordering::Relaxed),
            total_lookups: self.lookups.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn hit_then_miss_after_ttl() {
        let cache: TimedCache<u32> = TimedCache::new(Duration::from_millis(20), Duration::from_secs(5));
        cache.put("a".into(), 1);
        assert_eq!(cache.get("a"), Some(1));
        sleep(Duration::from_millis(30));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache: TimedCache<u32> = TimedCache::new(Duration::from_secs(1), Duration::from_secs(5));
        cache.put("a".into(), 1);
        cache.invalidate("a");
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn sweep_drops_expired_entries_on_put() {
        let cache: TimedCache<u32> =
            TimedCache::new(Duration::from_millis(5), Duration::from_millis(10));
        cache.put("a".into(), 1);
        sleep(Duration::from_millis(20));
        cache.put("b".into(), 2);
        assert_eq!(cache.inner.read().data.len(), 1);
        assert!(cache.inner.read().data.contains_key("b"));
    }

    #[test]
    fn statistics_track_hits_and_lookups() {
        let cache: TimedCache<u32> = TimedCache::new(Duration::from_secs(5), Duration::from_secs(5));
        cache.put("a".into(), 1);
        cache.get("a");
        cache.get("missing");
        let stats = cache.statistics();
        assert_eq!(stats.total_lookups, 2);
        assert_eq!(stats.total_cache_hits, 1);
    }
}
