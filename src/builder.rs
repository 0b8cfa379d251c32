use std::{sync::Arc, time::Duration};

use super::{ConnectionFactory, ConnectionHook, Pool, PoolConfig, PoolError};

/// Builder for [`Pool`]s.
///
/// Instances of this are created by calling the [`Pool::builder()`] method.
#[must_use = "builder does nothing itself, use `.build()` to build it"]
pub struct PoolBuilder<F>
where
    F: ConnectionFactory,
{
    pub(crate) factory: F,
    pub(crate) config: PoolConfig,
    pub(crate) hook: Option<Arc<dyn ConnectionHook<F::Conn>>>,
}

impl<F> PoolBuilder<F>
where
    F: ConnectionFactory,
{
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory,
            config: PoolConfig::default(),
            hook: None,
        }
    }

    /// Builds the [`Pool`], pre-creating the configured warm set of
    /// connections and starting the background workers.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`PoolError::InitFailed`] if the factory fails while the warm set
    /// is created; everything created up to that point is closed first.
    pub async fn build(self) -> Result<Pool<F>, PoolError<F::Error>> {
        Pool::from_builder(self).await
    }

    /// Sets a whole [`PoolConfig`] to build the [`Pool`] with.
    pub fn config(mut self, value: PoolConfig) -> Self {
        self.config = value;
        self
    }

    /// Sets the [`PoolConfig::partition_count`].
    pub fn partition_count(mut self, value: usize) -> Self {
        self.config.partition_count = value;
        self
    }

    /// Sets the [`PoolConfig::min_connections_per_partition`].
    pub fn min_connections_per_partition(mut self, value: usize) -> Self {
        self.config.min_connections_per_partition = value;
        self
    }

    /// Sets the [`PoolConfig::max_connections_per_partition`].
    pub fn max_connections_per_partition(mut self, value: usize) -> Self {
        self.config.max_connections_per_partition = value;
        self
    }

    /// Sets the [`PoolConfig::acquire_increment`].
    pub fn acquire_increment(mut self, value: usize) -> Self {
        self.config.acquire_increment = value;
        self
    }

    /// Sets the idle tester period; `None` disables idle testing.
    pub fn idle_connection_test_period(mut self, value: Option<Duration>) -> Self {
        self.config.idle_connection_test_period_ms =
            value.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the idle eviction age; `None` disables age-based eviction.
    pub fn idle_max_age(mut self, value: Option<Duration>) -> Self {
        self.config.idle_max_age_ms =
            value.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Sets the [`PoolConfig::connection_test_statement`].
    pub fn connection_test_statement(mut self, value: impl Into<String>) -> Self {
        self.config.connection_test_statement = Some(value.into());
        self
    }

    /// Sets the [`PoolConfig::release_helper_count`].
    pub fn release_helper_count(mut self, value: usize) -> Self {
        self.config.release_helper_count = value;
        self
    }

    /// Sets the URL and credentials handed to the factory.
    pub fn credentials(
        mut self,
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.url = url.into();
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    /// Installs a [`ConnectionHook`] invoked at check-out, check-in and
    /// destroy.
    pub fn hook(mut self, value: Arc<dyn ConnectionHook<F::Conn>>) -> Self {
        self.hook = Some(value);
        self
    }
}

impl<F> std::fmt::Debug for PoolBuilder<F>
where
    F: ConnectionFactory,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("config", &self.config)
            .finish()
    }
}
