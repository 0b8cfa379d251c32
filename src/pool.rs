use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    connection::{ConnInner, Pooled},
    partition::Partition,
    workers, ConnectionFactory, ConnectionHook, PoolBuilder, PoolConfig, PoolError, PoolStatus,
    PartitionStatus, RawConnection, Statement,
};

/// Sentinel table name used by the metadata liveness probe. The lookup
/// need not find anything; any successful round-trip counts as alive.
const KEEPALIVE_TABLE: &str = "BONECPKEEPALIVE";

/// Partitioned connection pool.
///
/// This struct can be cloned and transferred across task boundaries and
/// uses reference counting for its internal state.
pub struct Pool<F: ConnectionFactory> {
    pub(crate) inner: Arc<PoolInner<F>>,
}

// Implemented manually to avoid unnecessary trait bounds on `F`.
impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("partitions", &self.inner.partitions)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Instantiates a builder for a new [`Pool`].
    ///
    /// This is the only way to create a [`Pool`] instance.
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder::new(factory)
    }

    pub(crate) async fn from_builder(builder: PoolBuilder<F>) -> Result<Self, PoolError<F::Error>> {
        let PoolBuilder { factory, config, hook } = builder;
        let config = config.sanitized();

        let partitions: Box<[Arc<Partition<F::Conn>>]> = (0..config.partition_count)
            .map(|index| {
                Arc::new(Partition::new(
                    index,
                    config.max_connections_per_partition,
                    config.acquire_increment,
                ))
            })
            .collect();

        // Pre-create the warm set. A single failure closes everything
        // created so far and fails construction.
        for partition in &*partitions {
            for _ in 0..config.min_connections_per_partition {
                match factory
                    .open(&config.url, &config.username, &config.password)
                    .await
                {
                    Ok(raw) => {
                        partition.record_created();
                        partition.free.put(ConnInner::new(raw, partition.index)).await;
                    }
                    Err(error) => {
                        close_partitions(&partitions).await;
                        return Err(PoolError::InitFailed(error));
                    }
                }
            }
        }

        let pool = Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                hook,
                partitions,
                starvation: AtomicBool::new(false),
                next_home: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                workers: Mutex::new(Vec::new()),
                termination: tokio::sync::Mutex::new(()),
            }),
        };
        pool.spawn_workers();
        Ok(pool)
    }

    fn spawn_workers(&self) {
        let inner = &self.inner;
        let mut handles = inner.workers.lock();
        for partition in &*inner.partitions {
            handles.push(tokio::spawn(workers::pool_watch_loop(
                Arc::downgrade(inner),
                partition.clone(),
                inner.shutdown.clone(),
            )));
            if let Some(period) = inner.config.idle_connection_test_period() {
                handles.push(tokio::spawn(workers::connection_tester_loop(
                    Arc::downgrade(inner),
                    partition.clone(),
                    period,
                    inner.shutdown.clone(),
                )));
            }
            for _ in 0..inner.config.release_helper_count {
                handles.push(tokio::spawn(workers::release_helper_loop(
                    Arc::downgrade(inner),
                    partition.clone(),
                    inner.shutdown.clone(),
                )));
            }
        }
    }

    /// Checks a connection out of the pool.
    ///
    /// Callers are biased towards a home partition to keep contention low;
    /// when the home queue is empty the other partitions are scanned, and
    /// when the whole pool has run dry the call waits in the home queue
    /// for a release to land there.
    ///
    /// The returned future is cancel-safe: dropping it before completion
    /// removes nothing from the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ShutDown`] once the pool has been shut down.
    pub async fn acquire(&self) -> Result<Pooled<F>, PoolError<F::Error>> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }

        let home = inner.next_home.fetch_add(1, Ordering::Relaxed) % inner.partitions.len();
        let mut chosen = home;
        inner.partitions[home].maybe_signal_for_more();

        let mut conn = if inner.starvation.load(Ordering::Relaxed) {
            // The pool has run dry before: wait where releases land
            // instead of racing through the non-blocking probes.
            Some(
                inner.partitions[home]
                    .free
                    .take()
                    .await
                    .map_err(|_| PoolError::ShutDown)?,
            )
        } else {
            inner.partitions[home].free.poll()
        };

        if conn.is_none() {
            // Home partition is empty; steal from the first non-empty one.
            for (index, partition) in inner.partitions.iter().enumerate() {
                if index == home {
                    continue;
                }
                if let Some(stolen) = partition.free.poll() {
                    chosen = index;
                    conn = Some(stolen);
                    break;
                }
            }
        }

        let mut conn = match conn {
            Some(conn) => conn,
            None => {
                inner.starvation.store(true, Ordering::Relaxed);
                chosen = home;
                inner.partitions[home]
                    .free
                    .take()
                    .await
                    .map_err(|_| PoolError::ShutDown)?
            }
        };

        conn.origin = chosen;
        conn.renew();
        inner.run_hook("check-out", |hook| hook.on_check_out(&mut conn.raw));
        Ok(Pooled::new(conn, inner))
    }

    /// Submits an acquire onto the runtime and returns its handle; the
    /// task completes with the same semantics as [`Pool::acquire`].
    pub fn acquire_spawned(&self) -> JoinHandle<Result<Pooled<F>, PoolError<F::Error>>> {
        let pool = self.clone();
        tokio::spawn(async move { pool.acquire().await })
    }

    /// Returns a connection to the pool.
    ///
    /// A connection flagged with [`Pooled::mark_broken`] is probed first
    /// and destroyed if the probe fails; the affected partition is
    /// refilled in the background. With release helpers configured the
    /// check-in work happens off the caller's task.
    ///
    /// # Errors
    ///
    /// [`PoolError::AlienConnection`] if the connection was checked out of
    /// a different pool (it is returned to its owner), and
    /// [`PoolError::ShutDown`] if this pool has shut down, in which case
    /// the raw connection is closed in place.
    pub async fn release(&self, conn: Pooled<F>) -> Result<(), PoolError<F::Error>> {
        let inner = &self.inner;
        if !Pooled::belongs_to(&conn, inner) {
            // The guard's own drop returns it to whichever pool owns it.
            return Err(PoolError::AlienConnection);
        }
        let mut conn = Pooled::take_inner(conn);

        if inner.closed.load(Ordering::Acquire) {
            inner.post_destroy(conn).await;
            return Err(PoolError::ShutDown);
        }

        inner.run_hook("check-in", |hook| hook.on_check_in(&mut conn.raw));

        if inner.config.release_helper_count > 0 {
            let partition = &inner.partitions[conn.origin];
            if let Err(conn) = partition.pending_release.offer(conn) {
                // Only reachable if accounting has drifted; fall back to
                // the caller's task.
                debug_assert!(false, "pending-release queue full");
                inner.internal_release(conn).await;
            }
            return Ok(());
        }

        inner.internal_release(conn).await;
        Ok(())
    }

    /// Shuts the pool down: stops the background workers and closes every
    /// idle connection. Waiting acquirers fail with
    /// [`PoolError::ShutDown`], as does any later pool operation.
    ///
    /// Idempotent; concurrent calls drain at most once.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if !inner.closed.swap(true, Ordering::AcqRel) {
            debug!("shutting down connection pool");
            inner.shutdown.cancel();
            for handle in inner.workers.lock().drain(..) {
                handle.abort();
            }
        }
        self.terminate_all_connections().await;
    }

    /// Synonym of [`Pool::shutdown`].
    pub async fn close(&self) {
        self.shutdown().await;
    }

    /// Closes every queued connection in every partition.
    async fn terminate_all_connections(&self) {
        let inner = &self.inner;
        // Another shutdown may already be draining; let it finish.
        let Ok(_guard) = inner.termination.try_lock() else {
            return;
        };
        for partition in &*inner.partitions {
            partition.free.close();
            partition.pending_release.close();
            while let Some(conn) = partition.free.drain_pop() {
                inner.post_destroy(conn).await;
            }
            while let Some(conn) = partition.pending_release.drain_pop() {
                inner.post_destroy(conn).await;
            }
        }
    }

    /// Indicates whether this [`Pool`] has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Pool-wide counters, summed over all partitions.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let mut status = PoolStatus {
            total_created: 0,
            total_free: 0,
            total_leased: 0,
        };
        for partition in &*self.inner.partitions {
            let p = partition.status();
            status.total_created += p.created;
            status.total_free += p.free;
            status.total_leased += p.leased;
        }
        status
    }

    /// Counters of a single partition, or `None` for an out-of-range
    /// index.
    #[must_use]
    pub fn partition_status(&self, index: usize) -> Option<PartitionStatus> {
        self.inner.partitions.get(index).map(|p| p.status())
    }

    /// Returns the [`ConnectionFactory`] of this [`Pool`].
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Returns the sanitized configuration this [`Pool`] runs with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

async fn close_partitions<C: RawConnection>(partitions: &[Arc<Partition<C>>]) {
    for partition in partitions {
        while let Some(mut conn) = partition.free.drain_pop() {
            if let Err(error) = conn.raw.close().await {
                warn!(%error, "error closing connection while aborting pool initialization");
            }
        }
    }
}

pub(crate) struct PoolInner<F: ConnectionFactory> {
    pub(crate) factory: F,
    pub(crate) config: PoolConfig,
    hook: Option<Arc<dyn ConnectionHook<F::Conn>>>,
    pub(crate) partitions: Box<[Arc<Partition<F::Conn>>]>,

    /// Set once the pool has ever been exhausted; never reset. Switches
    /// acquire into its simpler saturated mode for the rest of the pool's
    /// life.
    starvation: AtomicBool,

    /// Round-robin task identity substitute for partition selection.
    next_home: AtomicUsize,

    closed: AtomicBool,
    pub(crate) shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    termination: tokio::sync::Mutex<()>,
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// The check-in work proper: probe possibly broken connections,
    /// destroy the dead, requeue the rest.
    pub(crate) async fn internal_release(&self, mut conn: ConnInner<F::Conn>) {
        if conn.possibly_broken && !self.is_alive(&mut conn.raw).await {
            // Refill can start while the dead connection is torn down.
            self.partitions[conn.origin].maybe_signal_for_more();
            self.post_destroy(conn).await;
            return;
        }
        conn.touch();
        self.release_into_any_free_partition(conn).await;
    }

    /// Requeues into the origin partition, spilling over to any other
    /// partition with room.
    pub(crate) async fn release_into_any_free_partition(&self, conn: ConnInner<F::Conn>) {
        let preferred = conn.origin;
        let mut conn = match self.partitions[preferred].free.offer(conn) {
            Ok(()) => return,
            Err(conn) => conn,
        };
        for partition in &*self.partitions {
            match partition.free.offer(conn) {
                Ok(()) => return,
                Err(back) => conn = back,
            }
        }
        // Only reachable if accounting has drifted; the bounded put still
        // succeeds once anything is dequeued.
        debug_assert!(false, "all free queues full on release");
        self.partitions[preferred].free.put(conn).await;
    }

    /// Retires a connection: undoes its accounting, re-enables growth for
    /// its partition and closes the raw handle.
    pub(crate) async fn post_destroy(&self, mut conn: ConnInner<F::Conn>) {
        self.partitions[conn.origin].record_destroyed();
        self.run_hook("destroy", |hook| hook.on_destroy(&mut conn.raw));
        if let Err(error) = conn.raw.close().await {
            warn!(%error, "error closing destroyed connection");
        }
    }

    /// One cheap round-trip to decide whether a connection is usable.
    pub(crate) async fn is_alive(&self, raw: &mut F::Conn) -> bool {
        match self.config.connection_test_statement.as_deref() {
            Some(sql) => match raw.prepare(sql).await {
                Ok(mut statement) => {
                    let executed = statement.execute().await.is_ok();
                    // A statement that cannot be closed fails the probe
                    // even after a successful execution.
                    let closed = statement.close().await.is_ok();
                    executed && closed
                }
                Err(_) => false,
            },
            None => raw.lookup_table_metadata(KEEPALIVE_TABLE).await.is_ok(),
        }
    }

    /// Synchronous best-effort return used by the guard's `Drop`.
    pub(crate) fn return_dropped(&self, mut conn: ConnInner<F::Conn>) {
        if self.closed.load(Ordering::Acquire) {
            self.forget_dropped(conn);
            return;
        }
        conn.touch();
        let mut conn = match self.partitions[conn.origin].free.offer(conn) {
            Ok(()) => return,
            Err(conn) => conn,
        };
        for partition in &*self.partitions {
            match partition.free.offer(conn) {
                Ok(()) => return,
                Err(back) => conn = back,
            }
        }
        debug_assert!(false, "all free queues full on drop return");
        self.forget_dropped(conn);
    }

    /// Retires a connection without the async close handshake; dropping
    /// the raw handle releases its resources.
    fn forget_dropped(&self, mut conn: ConnInner<F::Conn>) {
        self.partitions[conn.origin].record_destroyed();
        self.run_hook("destroy", |hook| hook.on_destroy(&mut conn.raw));
        debug!("connection discarded outside the release path");
    }

    /// Runs a hook callback, containing any panic it raises.
    pub(crate) fn run_hook(&self, stage: &str, f: impl FnOnce(&dyn ConnectionHook<F::Conn>)) {
        if let Some(hook) = self.hook.as_deref() {
            if catch_unwind(AssertUnwindSafe(|| f(hook))).is_err() {
                warn!(stage, "connection hook panicked");
            }
        }
    }
}
