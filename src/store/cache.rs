//! Optional TTL caching decorator for a [`Store`].
//!
//! Exists for the case where the inner store is a remote/persistent
//! backend with its own latency (the kind of backing store this crate
//! treats as an external collaborator) and reads want to be insulated
//! from that latency. Wrapping [`MemoryStore`](super::MemoryStore)
//! with this is harmless but pointless, since its reads are already
//! lock-free.

use super::Store;
use crate::models::{FeatureFlag, Segment};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StalePolicy {
    /// Drop the entry on expiry; the next reader pays for a fresh load.
    Evict,
    /// Block the reader that notices the expiry while it reloads.
    Refresh,
    /// Return the stale value immediately and reload in the background.
    RefreshAsync,
}

struct Entry<T> {
    value: Option<T>,
    expires_at: Instant,
}

/// Cheaply cloneable: every field is already behind an `Arc`, so a
/// clone shares the same cache rather than copying it. This lets the
/// `RefreshAsync` policy move a handle into a spawned background task.
struct Cache<T> {
    entries: Arc<Mutex<HashMap<String, Entry<T>>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl<T> Clone for Cache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T: Clone> Cache<T> {
    fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn fresh(&self, key: &str) -> Option<Option<T>> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value.clone())
            } else {
                None
            }
        })
    }

    fn stale(&self, key: &str) -> Option<Option<T>> {
        self.entries.lock().unwrap().get(key).map(|e| e.value.clone())
    }

    fn store(&self, key: String, value: Option<T>, ttl: Duration) {
        self.entries.lock().unwrap().insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn evict(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Single-flight guard: returns `true` if this caller is the one
    /// that should perform the reload.
    fn claim_reload(&self, key: &str) -> bool {
        self.in_flight.lock().unwrap().insert(key.to_string())
    }

    fn release_reload(&self, key: &str) {
        self.in_flight.lock().unwrap().remove(key);
    }
}

/// Wraps any [`Store`] with a read-through TTL cache.
pub struct CachingStore<S> {
    inner: Arc<S>,
    ttl: Duration,
    policy: StalePolicy,
    flags: Cache<FeatureFlag>,
    segments: Cache<Segment>,
}

impl<S: Store + 'static> CachingStore<S> {
    pub fn new(inner: Arc<S>, ttl: Duration, policy: StalePolicy) -> Self {
        Self {
            inner,
            ttl,
            policy,
            flags: Cache::new(),
            segments: Cache::new(),
        }
    }

    fn get_flag(&self, key: &str) -> Option<FeatureFlag> {
        if let Some(hit) = self.flags.fresh(key) {
            return hit;
        }
        match self.policy {
            StalePolicy::Evict => {
                self.flags.evict(key);
                let fresh = self.inner.flag(key);
                self.flags.store(key.to_string(), fresh.clone(), self.ttl);
                fresh
            }
            StalePolicy::Refresh => {
                let fresh = self.inner.flag(key);
                self.flags.store(key.to_string(), fresh.clone(), self.ttl);
                fresh
            }
            StalePolicy::RefreshAsync => {
                let stale = self.flags.stale(key).flatten();
                if self.flags.claim_reload(key) {
                    let cache = self.flags.clone();
                    let inner = Arc::clone(&self.inner);
                    let key_owned = key.to_string();
                    let ttl = self.ttl;
                    let reload = async move {
                        let fresh = inner.flag(&key_owned);
                        cache.store(key_owned.clone(), fresh, ttl);
                        cache.release_reload(&key_owned);
                    };
                    // Best-effort: without an active Tokio runtime (e.g. a
                    // plain unit test) the reload just doesn't happen and
                    // the entry stays stale until the next caller retries.
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(reload);
                    } else {
                        self.flags.release_reload(key);
                    }
                }
                stale
            }
        }
    }

    fn get_segment(&self, key: &str) -> Option<Segment> {
        if let Some(hit) = self.segments.fresh(key) {
            return hit;
        }
        match self.policy {
            StalePolicy::Evict => {
                self.segments.evict(key);
                let fresh = self.inner.segment(key);
                self.segments.store(key.to_string(), fresh.clone(), self.ttl);
                fresh
            }
            StalePolicy::Refresh => {
                let fresh = self.inner.segment(key);
                self.segments.store(key.to_string(), fresh.clone(), self.ttl);
                fresh
            }
            StalePolicy::RefreshAsync => {
                let stale = self.segments.stale(key).flatten();
                if self.segments.claim_reload(key) {
                    let cache = self.segments.clone();
                    let inner = Arc::clone(&self.inner);
                    let key_owned = key.to_string();
                    let ttl = self.ttl;
                    let reload = async move {
                        let fresh = inner.segment(&key_owned);
                        cache.store(key_owned.clone(), fresh, ttl);
                        cache.release_reload(&key_owned);
                    };
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(reload);
                    } else {
                        self.segments.release_reload(key);
                    }
                }
                stale
            }
        }
    }
}

impl<S: Store + 'static> Store for CachingStore<S> {
    fn flag(&self, key: &str) -> Option<FeatureFlag> {
        self.get_flag(key)
    }

    fn segment(&self, key: &str) -> Option<Segment> {
        self.get_segment(key)
    }

    fn all_flags(&self) -> HashMap<String, FeatureFlag> {
        self.inner.all_flags()
    }

    fn all_segments(&self) -> HashMap<String, Segment> {
        self.inner.all_segments()
    }

    fn init(&self, flags: HashMap<String, FeatureFlag>, segments: HashMap<String, Segment>) {
        self.inner.init(flags, segments);
    }

    fn upsert_flag(&self, flag: FeatureFlag) -> bool {
        // Write-through: accept into the backing store first, then
        // make sure the cache doesn't keep serving a now-stale miss.
        let accepted = self.inner.upsert_flag(flag.clone());
        if accepted {
            self.flags.store(flag.key.clone(), Some(flag), self.ttl);
        }
        accepted
    }

    fn upsert_segment(&self, segment: Segment) -> bool {
        let accepted = self.inner.upsert_segment(segment.clone());
        if accepted {
            self.segments
                .store(segment.key.clone(), Some(segment), self.ttl);
        }
        accepted
    }

    fn initialized(&self) -> bool {
        self.inner.initialized()
    }
}
