mod common;

use std::time::Duration;

use shardpool::{Pool, PoolError};

use common::{quiet_config, MockFactory};

#[tokio::test]
async fn shutdown_drains_idle_and_rejects_new_work() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(quiet_config(2, 2, 4))
        .build()
        .await
        .unwrap();

    let mut held = Vec::new();
    for _ in 0..3 {
        held.push(pool.acquire().await.unwrap());
    }

    pool.shutdown().await;
    assert!(pool.is_closed());

    // The idle connection was drained and closed; the three leases are
    // still accounted.
    let status = pool.status();
    assert_eq!(status.total_free, 0);
    assert_eq!(status.total_created, 3);
    assert_eq!(factory.closed(), 1);

    assert!(matches!(pool.acquire().await, Err(PoolError::ShutDown)));

    // A lease released after shutdown is closed in place.
    let conn = held.pop().unwrap();
    assert!(matches!(pool.release(conn).await, Err(PoolError::ShutDown)));
    assert_eq!(factory.closed(), 2);
    assert_eq!(pool.status().total_created, 2);

    drop(held);
    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let factory = MockFactory::new();
    let pool = Pool::builder(factory.clone())
        .config(quiet_config(2, 2, 2))
        .build()
        .await
        .unwrap();

    pool.shutdown().await;
    let after_first = pool.status();
    let closed_after_first = factory.closed();

    pool.close().await;
    let after_second = pool.status();

    assert_eq!(after_first.total_created, after_second.total_created);
    assert_eq!(after_first.total_free, after_second.total_free);
    assert_eq!(closed_after_first, factory.closed());
    assert_eq!(factory.closed(), 4);
}

#[tokio::test]
async fn blocked_acquire_fails_once_the_pool_shuts_down() {
    let pool = Pool::builder(MockFactory::new())
        .config(quiet_config(1, 1, 1))
        .build()
        .await
        .unwrap();

    let held = pool.acquire().await.unwrap();
    let blocked = pool.acquire_spawned();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    pool.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .expect("blocked acquire did not observe the shutdown")
        .unwrap();
    assert!(matches!(result, Err(PoolError::ShutDown)));

    drop(held);
}
