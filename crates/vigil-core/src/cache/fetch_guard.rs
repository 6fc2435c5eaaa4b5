//! Single-flight coordination for cache-miss fetches.
//!
//! Every miss acquires the single permit of a per-key semaphore before
//! fetching. Later callers for the same key queue on that semaphore and
//! re-check the cache once they get the permit, so at most one fetch per key is
//! in flight.
//!
//! ```text
//! lookup ── hit ──► value
//!   │ miss
//!   ▼
//! inflight.entry(key) ─► clone semaphore, release shard lock
//!   │
//!   ▼
//! acquire permit (queue behind the current fetcher)
//!   │
//!   ▼
//! lookup again ── hit ──► value (FetchGuard dropped)
//!   │ miss
//!   ▼
//! fetch, store, FetchGuard dropped ─► inflight entry removed when unused
//! ```

use ahash::RandomState;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One-permit semaphore per cache key with a fetch in flight.
pub(crate) type InflightMap = DashMap<String, Arc<Semaphore>, RandomState>;

/// RAII guard holding the fetch permit of one key.
///
/// On drop the inflight entry is removed unless other callers are still
/// queued on it.
#[derive(Debug)]
pub struct FetchGuard<'a> {
    inflight: &'a InflightMap,
    key: String,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<'a> FetchGuard<'a> {
    /// Waits for the fetch permit of `key`.
    pub(crate) async fn acquire(inflight: &'a InflightMap, key: String) -> Self {
        let semaphore = Arc::clone(
            &inflight.entry(key.clone()).or_insert_with(|| Arc::new(Semaphore::new(1))),
        );
        let permit = semaphore.acquire_owned().await.ok();
        Self { inflight, key, _permit: permit }
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        // The map and our permit hold two references; more means someone is queued.
        self.inflight.remove_if(&self.key, |_, semaphore| Arc::strong_count(semaphore) <= 2);
    }
}
