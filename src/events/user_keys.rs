//! Tracks which user keys have been seen recently so the event
//! processor only emits one `index` event per user per cache window,
//! instead of one per evaluation.

use lru::LruCache;

/// Not thread-safe; owned exclusively by the event processor's
/// background task.
pub struct UserKeyCache {
    seen: LruCache<String, ()>,
}

impl UserKeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: LruCache::new(capacity.max(1)),
        }
    }

    /// Records `key` as seen and returns `true` if it was *not*
    /// already present (i.e. an `index` event should be emitted).
    pub fn notice(&mut self, key: &str) -> bool {
        if self.seen.get(key).is_some() {
            false
        } else {
            self.seen.put(key.to_string(), ());
            true
        }
    }

    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_reports_new_user() {
        let mut cache = UserKeyCache::new(10);
        assert!(cache.notice("u1"));
        assert!(!cache.notice("u1"));
    }

    #[test]
    fn eviction_forgets_least_recently_used() {
        let mut cache = UserKeyCache::new(1);
        assert!(cache.notice("u1"));
        assert!(cache.notice("u2"));
        // u1 was evicted to make room for u2.
        assert!(cache.notice("u1"));
    }

    #[test]
    fn clear_resets_known_users() {
        let mut cache = UserKeyCache::new(10);
        cache.notice("u1");
        cache.clear();
        assert!(cache.notice("u1"));
    }
}
