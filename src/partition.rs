use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::Notify;

use crate::{connection::ConnInner, queue::ItemQueue, PartitionStatus};

/// Grow a partition when its free queue drops below this percentage of
/// capacity.
pub(crate) const HIT_THRESHOLD: usize = 20;

/// One shard of the pool: its own free queue, pending-release queue and
/// accounting, so concurrent callers mostly touch disjoint state.
///
/// Accounting identity: `free.len() + pending_release.len() + connections
/// held by callers == created`, with `0 <= created <= max_connections`.
pub(crate) struct Partition<C> {
    pub(crate) index: usize,

    /// Idle connections ready to be handed out.
    pub(crate) free: ItemQueue<ConnInner<C>>,

    /// Connections awaiting asynchronous check-in by a release helper.
    pub(crate) pending_release: ItemQueue<ConnInner<C>>,

    /// Connections currently accounted against this partition.
    created: AtomicUsize,

    pub(crate) max_connections: usize,
    pub(crate) acquire_increment: usize,

    /// Latched when the factory fails so only the next destroy re-enables
    /// growth; prevents every starved caller from hammering a dead server.
    unable_to_create_more: AtomicBool,

    /// Lazy wake-up for the growth worker. Missed or spurious notifies are
    /// fine; the worker re-checks the predicate after waking.
    pub(crate) almost_full: Arc<Notify>,
}

impl<C> Partition<C> {
    pub(crate) fn new(index: usize, max_connections: usize, acquire_increment: usize) -> Self {
        Self {
            index,
            free: ItemQueue::new(max_connections),
            pending_release: ItemQueue::new(max_connections),
            created: AtomicUsize::new(0),
            max_connections,
            acquire_increment,
            unable_to_create_more: AtomicBool::new(false),
            almost_full: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub(crate) fn record_created(&self) {
        let prev = self.created.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev < self.max_connections, "created count exceeds bound");
    }

    pub(crate) fn record_destroyed(&self) {
        let prev = self.created.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "created count went negative");
        // A destroy frees capacity, so growth may be possible again even
        // if the factory recently failed.
        self.unable_to_create_more.store(false, Ordering::Release);
    }

    pub(crate) fn is_unable_to_create_more(&self) -> bool {
        self.unable_to_create_more.load(Ordering::Acquire)
    }

    pub(crate) fn set_unable_to_create_more(&self) {
        self.unable_to_create_more.store(true, Ordering::Release);
    }

    /// Whether the free queue has dropped below the growth threshold.
    pub(crate) fn below_threshold(&self) -> bool {
        self.free.len() * 100 / self.max_connections < HIT_THRESHOLD
    }

    /// Nudges the growth worker if this partition is running low. Never
    /// waits; called from the acquire fast path.
    pub(crate) fn maybe_signal_for_more(&self) {
        if !self.is_unable_to_create_more() && self.below_threshold() {
            self.almost_full.notify_one();
        }
    }

    pub(crate) fn status(&self) -> PartitionStatus {
        let created = self.created();
        let free = self.free.len();
        PartitionStatus {
            created,
            free,
            leased: created.saturating_sub(free),
        }
    }
}

impl<C> std::fmt::Debug for Partition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("index", &self.index)
            .field("created", &self.created())
            .field("free", &self.free.len())
            .field("max_connections", &self.max_connections)
            .field(
                "unable_to_create_more",
                &self.is_unable_to_create_more(),
            )
            .finish()
    }
}
