#![allow(dead_code)]

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shardpool::{ConnectionFactory, PoolConfig, RawConnection, Statement};

#[derive(Debug)]
pub struct MockError(pub &'static str);

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Switchboard shared by the factory and every connection it hands out.
#[derive(Default)]
pub struct MockState {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_open: AtomicBool,
    pub alive: AtomicBool,
    pub stmt_close_ok: AtomicBool,
    pub last_metadata_table: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct MockFactory {
    pub state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Self {
        let state = MockState::default();
        state.alive.store(true, Ordering::SeqCst);
        state.stmt_close_ok.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_alive(&self, alive: bool) {
        self.state.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_stmt_close_ok(&self, ok: bool) {
        self.state.stmt_close_ok.store(ok, Ordering::SeqCst);
    }

    pub fn last_metadata_table(&self) -> Option<String> {
        self.state.last_metadata_table.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Conn = MockConn;
    type Error = MockError;

    async fn open(
        &self,
        _url: &str,
        _username: &str,
        _password: &str,
    ) -> Result<MockConn, MockError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(MockError("server unreachable"));
        }
        let _ = self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            state: self.state.clone(),
        })
    }
}

pub struct MockConn {
    state: Arc<MockState>,
}

#[async_trait]
impl RawConnection for MockConn {
    type Error = MockError;
    type Stmt = MockStmt;

    async fn prepare(&mut self, _sql: &str) -> Result<MockStmt, MockError> {
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(MockStmt {
                state: self.state.clone(),
            })
        } else {
            Err(MockError("connection lost"))
        }
    }

    async fn lookup_table_metadata(&mut self, table_name: &str) -> Result<(), MockError> {
        *self.state.last_metadata_table.lock().unwrap() = Some(table_name.to_owned());
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MockError("connection lost"))
        }
    }

    async fn close(&mut self) -> Result<(), MockError> {
        let _ = self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockStmt {
    state: Arc<MockState>,
}

#[async_trait]
impl Statement for MockStmt {
    type Error = MockError;

    async fn execute(&mut self) -> Result<(), MockError> {
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MockError("connection lost"))
        }
    }

    async fn close(&mut self) -> Result<(), MockError> {
        if self.state.stmt_close_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MockError("statement close failed"))
        }
    }
}

/// A config with every background feature off; tests opt features back
/// in field by field.
pub fn quiet_config(partitions: usize, min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        partition_count: partitions,
        min_connections_per_partition: min,
        max_connections_per_partition: max,
        acquire_increment: 1,
        idle_connection_test_period_ms: 0,
        idle_max_age_ms: 0,
        connection_test_statement: None,
        release_helper_count: 0,
        url: "mock://db".into(),
        username: "user".into(),
        password: "pass".into(),
    }
}

/// Polls `cond` until it holds, panicking after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within five seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
