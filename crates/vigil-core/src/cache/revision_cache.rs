use arc_swap::ArcSwap;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    future::Future,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

use super::{
    config::{CacheError, RevisionCacheConfig},
    fetch_guard::{FetchGuard, InflightMap},
    CacheKind,
};
use crate::{
    chain::{BeatBloom, BloomPredicate},
    types::Head,
    utils::normalize_hex,
};

/// A head-relative entry.
#[derive(Debug, Clone)]
struct TiedEntry {
    value: Arc<Value>,
    head_id: String,
    ties: Option<Arc<[String]>>,
}

/// Both LRUs of one kind. `None` when the kind's capacity is zero.
#[derive(Debug)]
struct KindSlot {
    pinned: Mutex<Option<LruCache<(String, String), Arc<Value>>>>,
    tied: Mutex<Option<LruCache<String, TiedEntry>>>,
}

impl KindSlot {
    fn new(capacity: usize) -> Self {
        Self {
            pinned: Mutex::new(NonZeroUsize::new(capacity).map(LruCache::new)),
            tied: Mutex::new(NonZeroUsize::new(capacity).map(LruCache::new)),
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub evictions: u64,
}

/// Response cache of one driver instance.
///
/// All mutation happens inside short `parking_lot` critical sections; values
/// are published as whole `Arc<Value>`s, so a reader never observes a partial
/// entry.
#[derive(Debug)]
pub struct RevisionCache {
    slots: Vec<KindSlot>,
    inflight: InflightMap,
    head_id: ArcSwap<String>,
    predicate: Arc<dyn BloomPredicate>,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    evictions: AtomicU64,
}

impl RevisionCache {
    /// Creates a cache positioned at `head_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        config: &RevisionCacheConfig,
        head_id: &str,
        predicate: Arc<dyn BloomPredicate>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            slots: CacheKind::ALL.iter().map(|kind| KindSlot::new(config.capacity(*kind))).collect(),
            inflight: InflightMap::default(),
            head_id: ArcSwap::from_pointee(normalize_hex(head_id)),
            predicate,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    fn slot(&self, kind: CacheKind) -> &KindSlot {
        &self.slots[kind.index()]
    }

    /// Returns the head id tied entries are currently valid for.
    #[must_use]
    pub fn head_id(&self) -> Arc<String> {
        self.head_id.load_full()
    }

    /// Returns the cached value for `(kind, key, revision)` if present.
    #[must_use]
    pub fn get_pinned(&self, kind: CacheKind, key: &str, revision: &str) -> Option<Arc<Value>> {
        let found = self.peek_pinned(kind, &normalize_hex(key), &normalize_hex(revision));
        self.record_lookup(found.is_some());
        found
    }

    /// Like [`get_pinned`](Self::get_pinned) but only a hit is counted; the
    /// caller's fallback lookup records the miss.
    pub(crate) fn probe_pinned(
        &self,
        kind: CacheKind,
        key: &str,
        revision: &str,
    ) -> Option<Arc<Value>> {
        let found = self.peek_pinned(kind, &normalize_hex(key), &normalize_hex(revision));
        if found.is_some() {
            self.record_lookup(true);
        }
        found
    }

    fn peek_pinned(&self, kind: CacheKind, key: &str, revision: &str) -> Option<Arc<Value>> {
        let mut guard = self.slot(kind).pinned.lock();
        let lru = guard.as_mut()?;
        lru.get(&(key.to_string(), revision.to_string())).cloned()
    }

    /// Stores `value` under `(kind, key, revision)`.
    pub fn insert_pinned(&self, kind: CacheKind, key: &str, revision: &str, value: Arc<Value>) {
        let mut guard = self.slot(kind).pinned.lock();
        let Some(lru) = guard.as_mut() else { return };
        let entry_key = (normalize_hex(key), normalize_hex(revision));
        if lru.push(entry_key.clone(), value).is_some_and(|(k, _)| k != entry_key) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        trace!(kind = %kind, key = key, revision = revision, "pinned entry stored");
    }

    /// Returns the cached value for `(kind, key, revision)` or fetches it.
    ///
    /// Concurrent calls for the same key share one fetch. A failed fetch is not
    /// cached; queued callers then fetch in turn.
    ///
    /// # Errors
    ///
    /// Propagates the fetcher's error.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        kind: CacheKind,
        key: &str,
        revision: &str,
        fetcher: F,
    ) -> Result<Arc<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let key = normalize_hex(key);
        let revision = normalize_hex(revision);

        if let Some(value) = self.peek_pinned(kind, &key, &revision) {
            self.record_lookup(true);
            return Ok(value);
        }

        let _guard =
            FetchGuard::acquire(&self.inflight, format!("pinned|{kind}|{key}|{revision}")).await;
        if let Some(value) = self.peek_pinned(kind, &key, &revision) {
            self.record_lookup(true);
            return Ok(value);
        }

        self.record_lookup(false);
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(fetcher().await?);
        self.insert_pinned(kind, &key, &revision, Arc::clone(&value));
        Ok(value)
    }

    /// Returns the tied value for `(kind, key)` if it is valid at `head_id`.
    #[must_use]
    pub fn get_tied(&self, kind: CacheKind, key: &str, head_id: &str) -> Option<Arc<Value>> {
        let found = self.peek_tied(kind, &normalize_hex(key), &normalize_hex(head_id));
        self.record_lookup(found.is_some());
        found
    }

    fn peek_tied(&self, kind: CacheKind, key: &str, head_id: &str) -> Option<Arc<Value>> {
        let mut guard = self.slot(kind).tied.lock();
        let lru = guard.as_mut()?;
        lru.get(key).filter(|entry| entry.head_id == head_id).map(|entry| Arc::clone(&entry.value))
    }

    /// Stores a tied entry created at `head_id`.
    ///
    /// Nothing is stored when the cache has already moved past `head_id`.
    pub fn insert_tied(
        &self,
        kind: CacheKind,
        key: &str,
        head_id: &str,
        value: Arc<Value>,
        ties: Option<&[String]>,
    ) {
        let head_id = normalize_hex(head_id);
        let mut guard = self.slot(kind).tied.lock();
        let Some(lru) = guard.as_mut() else { return };

        if *self.head_id.load_full() != head_id {
            trace!(kind = %kind, key = key, head = %head_id, "stale tied entry discarded");
            return;
        }

        let ties = ties
            .filter(|ties| !ties.is_empty())
            .map(|ties| ties.iter().map(|tie| normalize_hex(tie)).collect::<Arc<[String]>>());
        let key = normalize_hex(key);
        if lru.push(key.clone(), TiedEntry { value, head_id, ties }).is_some_and(|(k, _)| k != key)
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        trace!(kind = %kind, key = %key, "tied entry stored");
    }

    /// Returns the tied value for `(kind, key)` at `head_id` or fetches it.
    ///
    /// # Errors
    ///
    /// Propagates the fetcher's error.
    pub async fn get_or_fetch_tied<F, Fut, E>(
        &self,
        kind: CacheKind,
        key: &str,
        head_id: &str,
        fetcher: F,
        ties: Option<&[String]>,
    ) -> Result<Arc<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let key = normalize_hex(key);
        let head_id = normalize_hex(head_id);

        if let Some(value) = self.peek_tied(kind, &key, &head_id) {
            self.record_lookup(true);
            return Ok(value);
        }

        let _guard =
            FetchGuard::acquire(&self.inflight, format!("tied|{kind}|{key}|{head_id}")).await;
        if let Some(value) = self.peek_tied(kind, &key, &head_id) {
            self.record_lookup(true);
            return Ok(value);
        }

        self.record_lookup(false);
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let value = Arc::new(fetcher().await?);
        self.insert_tied(kind, &key, &head_id, Arc::clone(&value), ties);
        Ok(value)
    }

    /// Moves tied entries to `head`.
    ///
    /// An entry created at `head.parent_id` whose ties the block's filter rules
    /// out is re-stamped with `head.id`; every other entry not already at
    /// `head.id` is evicted. Without a filter (polled heads) all of them are
    /// evicted.
    pub fn handle_new_head(&self, head: &Head, filter: Option<&BeatBloom>) {
        let head_id = normalize_hex(&head.id);
        let parent_id = normalize_hex(&head.parent_id);
        self.head_id.store(Arc::new(head_id.clone()));

        let mut retained = 0usize;
        let mut evicted = 0usize;

        for slot in &self.slots {
            let mut guard = slot.tied.lock();
            let Some(lru) = guard.as_mut() else { continue };

            let mut stale = Vec::new();
            for (key, entry) in lru.iter_mut() {
                if entry.head_id == head_id {
                    continue;
                }
                let untouched = entry.head_id == parent_id &&
                    match (filter, entry.ties.as_deref()) {
                        (Some(filter), Some(ties)) => {
                            !ties.iter().any(|tie| self.predicate.could_contain(filter, tie))
                        }
                        _ => false,
                    };
                if untouched {
                    entry.head_id.clone_from(&head_id);
                    retained += 1;
                } else {
                    stale.push(key.clone());
                }
            }

            for key in stale {
                lru.pop(&key);
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(
            head = %head.id,
            number = head.number,
            has_filter = filter.is_some(),
            retained,
            evicted,
            "cache advanced to new head"
        );
    }

    /// Returns the number of entries of `kind` across both families.
    #[must_use]
    pub fn len(&self, kind: CacheKind) -> usize {
        let slot = self.slot(kind);
        let pinned = slot.pinned.lock().as_ref().map_or(0, LruCache::len);
        let tied = slot.tied.lock().as_ref().map_or(0, LruCache::len);
        pinned + tied
    }

    /// Returns `true` if no entry of any kind is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        CacheKind::ALL.iter().all(|kind| self.len(*kind) == 0)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        for slot in &self.slots {
            if let Some(lru) = slot.pinned.lock().as_mut() {
                lru.clear();
            }
            if let Some(lru) = slot.tied.lock().as_mut() {
                lru.clear();
            }
        }
        debug!("revision cache cleared");
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}
