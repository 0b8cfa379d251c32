use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Weak},
};

use tokio::time::Instant;

use crate::{pool::PoolInner, ConnectionFactory, Pool};

/// A raw connection together with its pool bookkeeping.
///
/// At any point in time a live `ConnInner` is in exactly one place: held
/// by a caller through a [`Pooled`] guard, sitting in one partition's free
/// queue, or sitting in one partition's pending-release queue.
pub(crate) struct ConnInner<C> {
    pub(crate) raw: C,

    /// Index of the partition this connection is accounted against.
    pub(crate) origin: usize,

    pub(crate) created_at: Instant,
    pub(crate) last_used: Instant,

    /// Set by the holder when an operation suggests the connection may no
    /// longer be usable; checked on release.
    pub(crate) possibly_broken: bool,
}

impl<C> ConnInner<C> {
    pub(crate) fn new(raw: C, origin: usize) -> Self {
        let now = Instant::now();
        Self {
            raw,
            origin,
            created_at: now,
            last_used: now,
            possibly_broken: false,
        }
    }

    /// Resets per-checkout state when the connection is handed out.
    pub(crate) fn renew(&mut self) {
        self.possibly_broken = false;
        self.last_used = Instant::now();
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

impl<C> fmt::Debug for ConnInner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnInner")
            .field("origin", &self.origin)
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .field("possibly_broken", &self.possibly_broken)
            .finish()
    }
}

/// A connection checked out of a [`Pool`], implementing [`Deref`] and
/// [`DerefMut`] to the raw connection.
///
/// Prefer returning it with [`Pool::release`], which runs the full
/// check-in path (hooks, health probe of possibly broken connections).
/// Dropping the guard instead performs a best-effort plain return to the
/// origin partition without a probe.
///
/// [`Pool::release`]: super::Pool::release
#[must_use]
pub struct Pooled<F: ConnectionFactory> {
    inner: Option<ConnInner<F::Conn>>,

    /// Pool to return the connection to.
    pool: Weak<PoolInner<F>>,
}

impl<F: ConnectionFactory> Pooled<F> {
    pub(crate) fn new(inner: ConnInner<F::Conn>, pool: &Arc<PoolInner<F>>) -> Self {
        Self {
            inner: Some(inner),
            pool: Arc::downgrade(pool),
        }
    }

    /// Flags the connection as possibly unusable. On release the pool will
    /// probe it and destroy it if the probe fails.
    pub fn mark_broken(this: &mut Self) {
        if let Some(inner) = this.inner.as_mut() {
            inner.possibly_broken = true;
        }
    }

    /// Returns the [`Pool`] this connection was checked out of, unless the
    /// pool has already been dropped.
    pub fn pool(this: &Self) -> Option<Pool<F>> {
        this.pool.upgrade().map(|inner| Pool { inner })
    }

    pub(crate) fn take_inner(mut this: Self) -> ConnInner<F::Conn> {
        this.inner.take().expect("connection already taken")
    }

    pub(crate) fn belongs_to(this: &Self, pool: &Arc<PoolInner<F>>) -> bool {
        this.pool
            .upgrade()
            .is_some_and(|owner| Arc::ptr_eq(&owner, pool))
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("inner", &self.inner).finish()
    }
}

impl<F: ConnectionFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.return_dropped(inner);
            }
        }
    }
}

impl<F: ConnectionFactory> Deref for Pooled<F> {
    type Target = F::Conn;
    fn deref(&self) -> &F::Conn {
        &self.inner.as_ref().expect("connection already taken").raw
    }
}

impl<F: ConnectionFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut F::Conn {
        &mut self.inner.as_mut().expect("connection already taken").raw
    }
}

impl<F: ConnectionFactory> AsRef<F::Conn> for Pooled<F> {
    fn as_ref(&self) -> &F::Conn {
        self
    }
}

impl<F: ConnectionFactory> AsMut<F::Conn> for Pooled<F> {
    fn as_mut(&mut self) -> &mut F::Conn {
        self
    }
}
