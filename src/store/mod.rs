//! Versioned keyed store of flags and segments, consumed concurrently
//! by the evaluator while being written to by a data source.

mod cache;
mod memory;

pub use cache::{CachingStore, StalePolicy};
pub use memory::MemoryStore;

use crate::models::{FeatureFlag, Segment};
use std::collections::HashMap;

/// Contract every data store implementation must satisfy.
///
/// `get`/`all` must give readers a consistent per-key view even while
/// `init`/`upsert` run concurrently on another thread/task; tombstoned
/// items (`deleted == true`) are invisible to `get`/`all` but still
/// occupy their version slot for the purposes of `upsert`'s
/// strictly-newer-version rule.
pub trait Store: Send + Sync {
    fn flag(&self, key: &str) -> Option<FeatureFlag>;
    fn segment(&self, key: &str) -> Option<Segment>;
    fn all_flags(&self) -> HashMap<String, FeatureFlag>;
    fn all_segments(&self) -> HashMap<String, Segment>;

    /// Atomically replace the store's full contents. `initialized()`
    /// becomes true as a result.
    fn init(&self, flags: HashMap<String, FeatureFlag>, segments: HashMap<String, Segment>);

    /// Apply one flag update. Returns `true` iff the item's version
    /// was strictly newer than what was stored (or nothing was
    /// stored yet) and the write was accepted.
    fn upsert_flag(&self, flag: FeatureFlag) -> bool;

    /// Apply one segment update, same acceptance rule as
    /// [`Store::upsert_flag`].
    fn upsert_segment(&self, segment: Segment) -> bool;

    fn initialized(&self) -> bool;
}

impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    fn flag(&self, key: &str) -> Option<FeatureFlag> {
        self.as_ref().flag(key)
    }

    fn segment(&self, key: &str) -> Option<Segment> {
        self.as_ref().segment(key)
    }

    fn all_flags(&self) -> HashMap<String, FeatureFlag> {
        self.as_ref().all_flags()
    }

    fn all_segments(&self) -> HashMap<String, Segment> {
        self.as_ref().all_segments()
    }

    fn init(&self, flags: HashMap<String, FeatureFlag>, segments: HashMap<String, Segment>) {
        self.as_ref().init(flags, segments)
    }

    fn upsert_flag(&self, flag: FeatureFlag) -> bool {
        self.as_ref().upsert_flag(flag)
    }

    fn upsert_segment(&self, segment: Segment) -> bool {
        self.as_ref().upsert_segment(segment)
    }

    fn initialized(&self) -> bool {
        self.as_ref().initialized()
    }
}
