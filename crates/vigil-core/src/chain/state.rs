//! Current-head cell of one driver instance.
//!
//! `HeadState` is the single owner of the head value. Readers take lock-free
//! snapshots; the tracker is the only writer and every accepted head is
//! broadcast to waiters registered before the update.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::Head;

/// Number of accepted heads buffered per waiter before it falls back to the
/// latest snapshot.
const HEAD_CHANNEL_CAPACITY: usize = 64;

/// Returns the current unix timestamp in seconds.
pub(crate) fn current_unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Shared head cell with update notification.
///
/// # Thread Safety
///
/// The head is an `Arc<Head>` behind an `ArcSwap`, so readers always observe a
/// whole head (`id`, `number` and `parentID` swap together). Writers are
/// serialized by a mutex that is never held across an await point.
///
/// # Example
///
/// ```no_run
/// use vigil_core::{chain::HeadState, types::Head};
///
/// # async fn example(genesis: Head, next: Head) {
/// let state = HeadState::new(genesis);
///
/// let waiter = state.waiter();
/// state.advance(next, |_| {});
///
/// let head = waiter.next().await;
/// assert_eq!(head.number, state.current().number);
/// # }
/// ```
#[derive(Debug)]
pub struct HeadState {
    head: ArcSwap<Head>,
    write_lock: Mutex<()>,
    notify: broadcast::Sender<Arc<Head>>,
    accepted: AtomicU64,
}

impl HeadState {
    /// Creates the cell holding `initial`.
    #[must_use]
    pub fn new(initial: Head) -> Self {
        let (notify, _) = broadcast::channel(HEAD_CHANNEL_CAPACITY);
        Self {
            head: ArcSwap::from_pointee(initial),
            write_lock: Mutex::new(()),
            notify,
            accepted: AtomicU64::new(0),
        }
    }

    /// Returns a snapshot of the current head.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Arc<Head> {
        self.head.load_full()
    }

    /// Offers `candidate` as the new head.
    ///
    /// The candidate is accepted iff its id differs from the current head and
    /// its number is not lower. On accept the head is stored, `on_accept` runs
    /// (still under the writer lock) and then every registered waiter is
    /// notified.
    ///
    /// Returns the accepted head, or `None` if the candidate was rejected.
    pub fn advance<F>(&self, candidate: Head, on_accept: F) -> Option<Arc<Head>>
    where
        F: FnOnce(&Arc<Head>),
    {
        let _guard = self.write_lock.lock();

        let current = self.head.load();
        if !current.is_superseded_by(&candidate) {
            return None;
        }

        let next = Arc::new(candidate);
        self.head.store(Arc::clone(&next));
        self.accepted.fetch_add(1, Ordering::Relaxed);

        on_accept(&next);

        let _ = self.notify.send(Arc::clone(&next));
        trace!(head = %next.id, number = next.number, "head updated");
        Some(next)
    }

    /// Registers a waiter for the next accepted head.
    ///
    /// The waiter observes every head accepted after this call, in order.
    #[must_use]
    pub fn waiter(&self) -> HeadWaiter<'_> {
        HeadWaiter { state: self, rx: self.notify.subscribe() }
    }

    /// Waits for the next accepted head.
    pub async fn next_head(&self) -> Arc<Head> {
        self.waiter().next().await
    }

    /// Returns the number of heads accepted since creation.
    #[must_use]
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Returns the number of currently registered waiters.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.notify.receiver_count()
    }
}

/// Registration for the next accepted head; dropping it unregisters.
#[derive(Debug)]
pub struct HeadWaiter<'a> {
    state: &'a HeadState,
    rx: broadcast::Receiver<Arc<Head>>,
}

impl HeadWaiter<'_> {
    /// Resolves with the first head accepted after registration.
    ///
    /// A waiter that fell behind by more than the channel capacity resolves
    /// with the latest head instead.
    pub async fn next(mut self) -> Arc<Head> {
        match self.rx.recv().await {
            Ok(head) => head,
            Err(_) => self.state.current(),
        }
    }
}

const _: () = {
    const fn assert_send<T: Send>() {}
    const fn assert_sync<T: Sync>() {}
    let _ = assert_send::<HeadState>;
    let _ = assert_sync::<HeadState>;
};
