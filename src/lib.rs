#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]
#![warn(clippy::pedantic)]
#![warn(
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]
#![allow(
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::match_same_arms
)]

mod builder;
mod config;
mod connection;
mod errors;
mod partition;
mod pool;
mod queue;
mod workers;

pub use self::{
    builder::PoolBuilder, config::PoolConfig, connection::Pooled, errors::PoolError, pool::Pool,
};

use std::fmt;

use async_trait::async_trait;

/// Pool-wide counters, summed over all partitions.
#[derive(Clone, Copy, Debug)]
pub struct PoolStatus {
    /// Connections currently in existence.
    pub total_created: usize,

    /// Connections idle in the free queues, available right away.
    pub total_free: usize,

    /// Connections currently held by callers.
    pub total_leased: usize,
}

/// Counters of a single partition.
#[derive(Clone, Copy, Debug)]
pub struct PartitionStatus {
    /// Connections accounted against this partition.
    pub created: usize,

    /// Connections idle in this partition's free queue.
    pub free: usize,

    /// Connections from this partition currently held by callers.
    pub leased: usize,
}

/// Produces raw connections for the pool.
///
/// Called during pool construction for the warm set and from the growth
/// worker whenever a partition runs low. `open` should be idempotent and
/// may take arbitrarily long; the pool never calls it on the acquire
/// path.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Type of connections this factory creates.
    type Conn: RawConnection + 'static;

    /// Error this factory can return when opening a connection.
    type Error: fmt::Display + Send + 'static;

    /// Opens a new connection against `url` with the given credentials.
    async fn open(
        &self,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<Self::Conn, Self::Error>;
}

/// An open database connection as the pool sees it.
///
/// The pool itself only prepares and executes statements for liveness
/// probes; everything else the application does with a connection goes
/// through [`Pooled`]'s `Deref` to this type.
#[async_trait]
pub trait RawConnection: Send {
    /// Error produced by operations on this connection.
    type Error: fmt::Display + Send;

    /// Prepared statement handle.
    type Stmt: Statement<Error = Self::Error> + Send;

    /// Prepares `sql` for execution.
    async fn prepare(&mut self, sql: &str) -> Result<Self::Stmt, Self::Error>;

    /// Performs a metadata lookup for `table_name`, restricted to
    /// TABLE-type relations. The lookup need not find anything; the pool
    /// only cares whether the round-trip succeeds.
    async fn lookup_table_metadata(&mut self, table_name: &str) -> Result<(), Self::Error>;

    /// Closes the connection. Best-effort; the pool logs and otherwise
    /// ignores errors.
    async fn close(&mut self) -> Result<(), Self::Error>;
}

/// A prepared statement produced by [`RawConnection::prepare`].
#[async_trait]
pub trait Statement: Send {
    /// Error produced by operations on this statement.
    type Error: fmt::Display + Send;

    /// Executes the statement, discarding any result set.
    async fn execute(&mut self) -> Result<(), Self::Error>;

    /// Closes the statement. The pool treats a close failure as a failed
    /// liveness probe.
    async fn close(&mut self) -> Result<(), Self::Error>;
}

/// Optional callbacks around a connection's lifecycle, invoked
/// synchronously on the task performing the transition.
///
/// Panics raised by a hook are caught and logged; they never corrupt
/// pool state.
pub trait ConnectionHook<C>: Send + Sync {
    /// Called when a connection is handed to a caller.
    fn on_check_out(&self, _conn: &mut C) {}

    /// Called when a connection is returned, before any health probe.
    fn on_check_in(&self, _conn: &mut C) {}

    /// Called when a connection is retired from the pool.
    fn on_destroy(&self, _conn: &mut C) {}
}
