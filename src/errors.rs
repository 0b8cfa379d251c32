use thiserror::Error;

/// Possible errors returned by [`Pool`] operations.
///
/// `E` is the error type of the [`ConnectionFactory`] backing the pool.
/// Factory failures during background growth are never surfaced here;
/// they latch the affected partition instead (see the crate docs).
///
/// [`Pool`]: super::Pool
/// [`ConnectionFactory`]: super::ConnectionFactory
#[derive(Debug, Error)]
pub enum PoolError<E> {
    /// Pre-creating the warm connection set failed during pool
    /// construction. All partially created connections have been closed
    /// before this error was returned.
    #[error("pool initialization failed: {0}")]
    InitFailed(E),

    /// The operation was attempted after [`Pool::shutdown`]. Shutdown is
    /// terminal; a pool cannot be re-opened.
    ///
    /// [`Pool::shutdown`]: super::Pool::shutdown
    #[error("pool has been shut down")]
    ShutDown,

    /// The released connection was checked out from a different pool.
    #[error("connection does not belong to this pool")]
    AlienConnection,
}
