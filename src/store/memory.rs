use super::Store;
use crate::consumer::InitState;
use crate::message::{InitData, Message, PathKind, Update};
use crate::models::{FeatureFlag, Segment};
use crate::requestor::Requestor;
use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tracing::warn;

struct Inner {
    flags: ArcSwap<HashMap<String, FeatureFlag>>,
    segments: ArcSwap<HashMap<String, Segment>>,
    init: AtomicBool,
    write_lock: Mutex<()>,
    requestor: Option<Arc<dyn Requestor>>,
}

/// In-memory [`Store`]. Reads go through [`ArcSwap`] and never block;
/// writes are serialized by an internal mutex so that `init`/`upsert`
/// calls from the data source don't race each other (there is still
/// only ever one writer in practice, but the store shouldn't assume
/// that to stay correct).
///
/// Cheaply `Clone`: the mutable state lives behind one `Arc`, which is
/// what lets [`Consumer::consume`](crate::consumer::Consumer::consume)
/// hand out a `'static` future without borrowing `&self`.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a [`Requestor`] so `indirect/put`/`indirect/patch`
    /// messages (which name a path but carry no payload) can be
    /// resolved with a follow-up fetch.
    pub fn with_requestor(requestor: Arc<dyn Requestor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                flags: ArcSwap::new(Arc::new(HashMap::new())),
                segments: ArcSwap::new(Arc::new(HashMap::new())),
                init: AtomicBool::new(false),
                write_lock: Mutex::new(()),
                requestor: Some(requestor),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                flags: ArcSwap::new(Arc::new(HashMap::new())),
                segments: ArcSwap::new(Arc::new(HashMap::new())),
                init: AtomicBool::new(false),
                write_lock: Mutex::new(()),
                requestor: None,
            }),
        }
    }
}

impl Store for MemoryStore {
    fn flag(&self, key: &str) -> Option<FeatureFlag> {
        self.inner.flags.load().get(key).filter(|f| !f.deleted).cloned()
    }

    fn segment(&self, key: &str) -> Option<Segment> {
        self.inner
            .segments
            .load()
            .get(key)
            .filter(|s| !s.deleted)
            .cloned()
    }

    fn all_flags(&self) -> HashMap<String, FeatureFlag> {
        self.inner
            .flags
            .load()
            .iter()
            .filter(|(_, f)| !f.deleted)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn all_segments(&self) -> HashMap<String, Segment> {
        self.inner
            .segments
            .load()
            .iter()
            .filter(|(_, s)| !s.deleted)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn init(&self, flags: HashMap<String, FeatureFlag>, segments: HashMap<String, Segment>) {
        let _guard = self.inner.write_lock.lock().unwrap();
        self.inner.flags.store(Arc::new(flags));
        self.inner.segments.store(Arc::new(segments));
        self.inner.init.store(true, Ordering::SeqCst);
    }

    fn upsert_flag(&self, flag: FeatureFlag) -> bool {
        let _guard = self.inner.write_lock.lock().unwrap();
        let current = self.inner.flags.load();
        if let Some(existing) = current.get(&flag.key) {
            if flag.version <= existing.version {
                return false;
            }
        }
        let mut updated = current.as_ref().clone();
        updated.insert(flag.key.clone(), flag);
        self.inner.flags.store(Arc::new(updated));
        true
    }

    fn upsert_segment(&self, segment: Segment) -> bool {
        let _guard = self.inner.write_lock.lock().unwrap();
        let current = self.inner.segments.load();
        if let Some(existing) = current.get(&segment.key) {
            if segment.version <= existing.version {
                return false;
            }
        }
        let mut updated = current.as_ref().clone();
        updated.insert(segment.key.clone(), segment);
        self.inner.segments.store(Arc::new(updated));
        true
    }

    fn initialized(&self) -> bool {
        self.inner.init.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("received an indirect update but no requestor is configured")]
    NoRequestor,
    #[error("failed to resolve indirect update: {0}")]
    Fetch(String),
}

fn apply_flag_update(inner: &Inner, key: String, item: FeatureFlag) -> InitState {
    if !inner.init.load(Ordering::SeqCst) {
        warn!("ignoring flag update sent before init");
        return InitState::Pending;
    }
    let _guard = inner.write_lock.lock().unwrap();
    let current = inner.flags.load();
    if let Some(existing) = current.get(&key) {
        if item.version <= existing.version {
            return InitState::Done;
        }
    }
    let mut updated = current.as_ref().clone();
    updated.insert(key, item);
    inner.flags.store(Arc::new(updated));
    InitState::Done
}

fn apply_segment_update(inner: &Inner, key: String, item: Segment) -> InitState {
    if !inner.init.load(Ordering::SeqCst) {
        warn!("ignoring segment update sent before init");
        return InitState::Pending;
    }
    let _guard = inner.write_lock.lock().unwrap();
    let current = inner.segments.load();
    if let Some(existing) = current.get(&key) {
        if item.version <= existing.version {
            return InitState::Done;
        }
    }
    let mut updated = current.as_ref().clone();
    updated.insert(key, item);
    inner.segments.store(Arc::new(updated));
    InitState::Done
}

impl<S> crate::consumer::Consumer<S> for MemoryStore {
    type Error = ConsumeError;
    type Future = BoxFuture<'static, Result<InitState, Self::Error>>;

    fn consume(&self, msg: Message) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            match msg {
                Message::Put(InitData { flags, segments }) => {
                    inner.flags.store(Arc::new(flags));
                    inner.segments.store(Arc::new(segments));
                    inner.init.store(true, Ordering::SeqCst);
                    Ok(InitState::Done)
                }
                Message::Patch(Update::Flag { key, data: Some(flag), .. }) => Ok(apply_flag_update(&inner, key, flag)),
                Message::Patch(Update::Flag { data: None, .. }) => Ok(InitState::Done),
                Message::Delete(Update::Flag { key, version, .. }) => Ok(apply_flag_update(
                    &inner,
                    key.clone(),
                    FeatureFlag::tombstone(key, version.unwrap_or(0)),
                )),
                Message::Patch(Update::Segment { key, data: Some(segment), .. }) => {
                    Ok(apply_segment_update(&inner, key, segment))
                }
                Message::Patch(Update::Segment { data: None, .. }) => Ok(InitState::Done),
                Message::Delete(Update::Segment { key, version, .. }) => Ok(apply_segment_update(
                    &inner,
                    key.clone(),
                    Segment::tombstone(key, version.unwrap_or(0)),
                )),
                Message::Patch(Update::Unknown) | Message::Delete(Update::Unknown) => {
                    warn!("update named an unrecognized path, ignoring");
                    Ok(InitState::Done)
                }
                Message::IndirectPut => {
                    let requestor = inner.requestor.clone().ok_or(ConsumeError::NoRequestor)?;
                    let data = requestor.fetch_all().await.map_err(|e| ConsumeError::Fetch(e.to_string()))?;
                    if let Some(data) = data {
                        inner.flags.store(Arc::new(data.flags));
                        inner.segments.store(Arc::new(data.segments));
                    }
                    inner.init.store(true, Ordering::SeqCst);
                    Ok(InitState::Done)
                }
                Message::IndirectPatch { kind: PathKind::Flag, key } => {
                    let requestor = inner.requestor.clone().ok_or(ConsumeError::NoRequestor)?;
                    match requestor.fetch_flag(&key).await.map_err(|e| ConsumeError::Fetch(e.to_string()))? {
                        Some(flag) => Ok(apply_flag_update(&inner, key, flag)),
                        None => Ok(InitState::Done),
                    }
                }
                Message::IndirectPatch { kind: PathKind::Segment, key } => {
                    let requestor = inner.requestor.clone().ok_or(ConsumeError::NoRequestor)?;
                    match requestor.fetch_segment(&key).await.map_err(|e| ConsumeError::Fetch(e.to_string()))? {
                        Some(segment) => Ok(apply_segment_update(&inner, key, segment)),
                        None => Ok(InitState::Done),
                    }
                }
                Message::Unknown => {
                    warn!("unrecognized message, ignoring");
                    Ok(InitState::Done)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureFlag;

    fn flag(key: &str, version: u64) -> FeatureFlag {
        FeatureFlag {
            key: key.into(),
            version,
            ..Default::default()
        }
    }

    #[test]
    fn init_replaces_contents_and_marks_initialized() {
        let store = MemoryStore::new();
        assert!(!store.initialized());
        let mut flags = HashMap::new();
        flags.insert("a".into(), flag("a", 1));
        store.init(flags, HashMap::new());
        assert!(store.initialized());
        assert_eq!(store.all_flags().len(), 1);
    }

    #[test]
    fn upsert_rejects_stale_version() {
        let store = MemoryStore::new();
        assert!(store.upsert_flag(flag("a", 2)));
        assert!(!store.upsert_flag(flag("a", 2)));
        assert!(!store.upsert_flag(flag("a", 1)));
        assert!(store.upsert_flag(flag("a", 3)));
        assert_eq!(store.flag("a").unwrap().version, 3);
    }

    #[test]
    fn tombstone_hides_item_but_occupies_version_slot() {
        let store = MemoryStore::new();
        store.upsert_flag(flag("a", 1));
        assert!(store.upsert_flag(FeatureFlag::tombstone("a", 2)));
        assert!(store.flag("a").is_none());
        assert!(!store.all_flags().contains_key("a"));
        // A stale re-add behind the tombstone's version is rejected.
        assert!(!store.upsert_flag(flag("a", 2)));
        assert!(store.upsert_flag(flag("a", 3)));
        assert!(store.flag("a").is_some());
    }

    #[tokio::test]
    async fn consume_put_initializes_store() {
        use crate::consumer::Consumer;
        let store = MemoryStore::new();
        let mut flags = HashMap::new();
        flags.insert("a".to_string(), flag("a", 1));
        let state = Consumer::<crate::source::SseSource>::consume(&store, Message::Put(InitData { flags, segments: HashMap::new() }))
            .await
            .unwrap();
        assert!(matches!(state, InitState::Done));
        assert!(store.initialized());
        assert!(store.flag("a").is_some());
    }

    #[tokio::test]
    async fn consume_indirect_patch_without_requestor_errors() {
        use crate::consumer::Consumer;
        let store = MemoryStore::new();
        store.init(HashMap::new(), HashMap::new());
        let result = Consumer::<crate::source::SseSource>::consume(
            &store,
            Message::IndirectPatch {
                kind: PathKind::Flag,
                key: "a".to_string(),
            },
        )
        .await;
        assert!(matches!(result, Err(ConsumeError::NoRequestor)));
    }
}
