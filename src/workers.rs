//! Background maintenance: per-partition growth, idle testing and
//! asynchronous release processing.
//!
//! Every loop holds only a [`Weak`] pool reference and an owned handle to
//! its partition, so an abandoned pool can be dropped while its workers
//! are parked; each loop also exits on the shutdown token.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{connection::ConnInner, partition::Partition, pool::PoolInner, ConnectionFactory};

/// Waits for the almost-full signal and manufactures connections in
/// batches until the partition is comfortable again.
pub(crate) async fn pool_watch_loop<F: ConnectionFactory>(
    pool: Weak<PoolInner<F>>,
    partition: Arc<Partition<F::Conn>>,
    shutdown: CancellationToken,
) {
    loop {
        let wake = partition.almost_full.notified();
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = wake => {}
        }
        let Some(pool) = pool.upgrade() else { return };
        fill_partition(&pool, &partition).await;
    }
}

async fn fill_partition<F: ConnectionFactory>(pool: &PoolInner<F>, partition: &Partition<F::Conn>) {
    while partition.below_threshold()
        && partition.created() < partition.max_connections
        && !partition.is_unable_to_create_more()
    {
        let batch = partition
            .acquire_increment
            .min(partition.max_connections - partition.created());
        for _ in 0..batch {
            match pool
                .factory
                .open(&pool.config.url, &pool.config.username, &pool.config.password)
                .await
            {
                Ok(raw) => {
                    partition.record_created();
                    partition
                        .free
                        .put(ConnInner::new(raw, partition.index))
                        .await;
                }
                Err(error) => {
                    // Latch growth off; the next destroy re-arms it. A
                    // single producer absorbing the failure keeps starved
                    // callers from hammering a dead server.
                    partition.set_unable_to_create_more();
                    warn!(
                        partition = partition.index,
                        %error,
                        "connection factory failed; partition growth suspended"
                    );
                    return;
                }
            }
        }
    }
}

/// Periodically sweeps the partition's free queue, evicting connections
/// past their idle age and destroying ones that fail the liveness probe.
pub(crate) async fn connection_tester_loop<F: ConnectionFactory>(
    pool: Weak<PoolInner<F>>,
    partition: Arc<Partition<F::Conn>>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let Some(pool) = pool.upgrade() else { return };
        test_idle_connections(&pool, &partition).await;
    }
}

async fn test_idle_connections<F: ConnectionFactory>(
    pool: &PoolInner<F>,
    partition: &Partition<F::Conn>,
) {
    let idle_max_age = pool.config.idle_max_age();
    // Bound the sweep by the length at the start of the tick so re-offered
    // entries are not tested twice.
    for _ in 0..partition.free.len() {
        let Some(mut conn) = partition.free.poll() else {
            break;
        };
        if idle_max_age.is_some_and(|max| conn.last_used.elapsed() >= max) {
            debug!(
                partition = partition.index,
                "evicting idle connection past its maximum age"
            );
            pool.post_destroy(conn).await;
        } else if !pool.is_alive(&mut conn.raw).await {
            debug!(partition = partition.index, "destroying dead idle connection");
            pool.post_destroy(conn).await;
        } else {
            pool.release_into_any_free_partition(conn).await;
        }
    }
}

/// Takes connections off the pending-release queue and runs the check-in
/// work the caller's `release` deferred.
pub(crate) async fn release_helper_loop<F: ConnectionFactory>(
    pool: Weak<PoolInner<F>>,
    partition: Arc<Partition<F::Conn>>,
    shutdown: CancellationToken,
) {
    loop {
        let conn = tokio::select! {
            () = shutdown.cancelled() => return,
            taken = partition.pending_release.take() => match taken {
                Ok(conn) => conn,
                Err(_closed) => return,
            },
        };
        let Some(pool) = pool.upgrade() else { return };
        pool.internal_release(conn).await;
    }
}
