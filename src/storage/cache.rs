use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::source::Post;

/// Cache entry with expiration tracking
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub access_count: u64,
    pub last_accessed: SystemTime,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        let now = SystemTime::now();
        Self {
            data,
            created_at: now,
            expires_at: now + ttl,
            access_count: 0,
            last_accessed: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() > self.expires_at
    }

    pub fn access(&mut self) -> &T {
        self.access_count += 1;
        self.last_accessed = SystemTime::now();
        &self.data
    }

    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }
}

/// TTL cache of fetched listings keyed by source name, with LRU eviction.
///
/// The TTL runs independently of the poll interval; with the defaults a
/// listing fetched on one cycle is reused by the next few cycles, which keeps
/// the request volume seen by the source bounded.
#[derive(Clone)]
pub struct ListingCache {
    entries: Arc<RwLock<LruCache<String, CacheEntry<Arc<Vec<Post>>>>>>,
    stats: Arc<RwLock<CacheStats>>,
    ttl: Duration,
}

impl ListingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(64).unwrap());

        Self {
            entries: Arc::new(RwLock::new(LruCache::new(capacity))),
            stats: Arc::new(RwLock::new(CacheStats::default())),
            ttl,
        }
    }

    /// Get a listing from the cache. Expired entries are evicted on lookup
    /// and count as misses.
    pub fn get(&self, source: &str) -> Option<Arc<Vec<Post>>> {
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();

        if let Some(entry) = entries.get_mut(source) {
            if entry.is_expired() {
                entries.pop(source);
                stats.record_expiration();
                stats.record_miss();
                stats.total_entries = entries.len();
                return None;
            }

            stats.record_hit();
            Some(Arc::clone(entry.access()))
        } else {
            stats.record_miss();
            None
        }
    }

    /// Put a listing into the cache, replacing any previous entry for the
    /// same source. Returns the stored listing.
    pub fn insert(&self, source: &str, posts: Vec<Post>) -> Arc<Vec<Post>> {
        let listing = Arc::new(posts);
        let entry = CacheEntry::new(Arc::clone(&listing), self.ttl);
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();

        if let Some((evicted, _)) = entries.push(source.to_string(), entry) {
            if evicted != source {
                stats.record_eviction();
            }
        }

        stats.total_entries = entries.len();
        listing
    }

    /// Drop all cached listings.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();

        entries.clear();
        stats.total_entries = 0;
    }

    /// Clean up expired entries without touching fresh ones.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let mut stats = self.stats.write();
        let mut expired_keys = Vec::new();

        for (key, entry) in entries.iter() {
            if entry.is_expired() {
                expired_keys.push(key.clone());
            }
        }

        let count = expired_keys.len();
        for key in expired_keys {
            entries.pop(&key);
            stats.record_expiration();
        }

        stats.total_entries = entries.len();
        count
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn make_posts(source: &str, count: usize) -> Vec<Post> {
        (0..count)
            .map(|i| Post {
                id: format!("t3_{}{}", source, i),
                title: format!("Post {} in r/{}", i, source),
                permalink: format!("/r/{}/comments/{}/post/", source, i),
                created_at: Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
                author: Some("tester".to_string()),
                subreddit: Some(source.to_string()),
            })
            .collect()
    }

    #[test]
    fn test_cache_basic_operations() {
        let cache = ListingCache::new(10, Duration::from_secs(60));

        cache.insert("rust", make_posts("rust", 3));
        let listing = cache.get("rust").unwrap();
        assert_eq!(listing.len(), 3);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_cache_miss() {
        let cache = ListingCache::new(10, Duration::from_secs(60));

        assert!(cache.get("nonexistent").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cache_eviction_at_capacity() {
        let cache = ListingCache::new(2, Duration::from_secs(60));

        cache.insert("one", make_posts("one", 1));
        cache.insert("two", make_posts("two", 1));
        cache.insert("three", make_posts("three", 1));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("one").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_same_source_is_not_an_eviction() {
        let cache = ListingCache::new(2, Duration::from_secs(60));

        cache.insert("rust", make_posts("rust", 1));
        cache.insert("rust", make_posts("rust", 5));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("rust").unwrap().len(), 5);
    }

    #[test]
    fn test_cache_expiration() {
        let cache = ListingCache::new(10, Duration::from_millis(10));

        cache.insert("rust", make_posts("rust", 2));
        assert!(cache.get("rust").is_some());

        std::thread::sleep(Duration::from_millis(20));

        assert!(cache.get("rust").is_none());
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_cache_clear() {
        let cache = ListingCache::new(10, Duration::from_secs(60));

        cache.insert("one", make_posts("one", 1));
        cache.insert("two", make_posts("two", 1));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_cache_cleanup_expired() {
        let cache = ListingCache::new(10, Duration::from_millis(10));

        cache.insert("one", make_posts("one", 1));
        cache.insert("two", make_posts("two", 1));

        std::thread::sleep(Duration::from_millis(20));

        cache.insert("three", make_posts("three", 1));

        let expired = cache.cleanup_expired();
        assert_eq!(expired, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("three").is_some());
    }

    #[test]
    fn test_cache_entry_access_tracking() {
        let mut entry = CacheEntry::new(make_posts("rust", 1), Duration::from_secs(60));

        assert_eq!(entry.access_count, 0);
        entry.access();
        entry.access();
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let mut stats = CacheStats::default();

        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
