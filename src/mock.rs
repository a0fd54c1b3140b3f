//! Scriptable in-memory driver.
//!
//! `MockDriver` serves a scripted result set and can inject failures at
//! every driver boundary (pool open, acquisition, execute, fetch). Shared
//! atomic counters make lease accounting observable, so tests can assert
//! that a connection was released exactly once or that an open circuit
//! short-circuits before the driver is invoked.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PoolConfig;
use crate::driver::{
    Connection, CursorMeta, Driver, DriverError, DriverPool, DriverResult, PoolStats, RowBatch,
    Value,
};

/// Invocation counters shared between a [`MockDriver`] and its pools.
#[derive(Default)]
pub struct MockCounters {
    opens: AtomicU32,
    acquire_attempts: AtomicU32,
    acquired: AtomicU32,
    releases: AtomicU32,
    executes: AtomicU32,
    fetches: AtomicU32,
    closes: AtomicU32,
}

impl MockCounters {
    /// Pools opened.
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Acquisition attempts, including injected failures.
    pub fn acquire_attempts(&self) -> u32 {
        self.acquire_attempts.load(Ordering::SeqCst)
    }

    /// Successful acquisitions.
    pub fn acquired(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Connections returned to the pool.
    pub fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Statements executed.
    pub fn executes(&self) -> u32 {
        self.executes.load(Ordering::SeqCst)
    }

    /// Fetch calls, including the empty end-of-cursor fetch.
    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Pool close calls.
    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Script {
    columns: Vec<String>,
    batches: Vec<RowBatch>,
    fail_open_pool: bool,
    fail_first_acquires: u32,
    fail_all_acquires: bool,
    fail_execute: bool,
    /// Batch index at which `fetch_batch` fails instead of serving rows
    fail_fetch_at: Option<usize>,
}

/// A driver whose every response is scripted up front.
#[derive(Clone)]
pub struct MockDriver {
    script: Arc<Script>,
    counters: Arc<MockCounters>,
}

impl MockDriver {
    /// A driver serving an empty result set with no columns.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Script::default()),
            counters: Arc::new(MockCounters::default()),
        }
    }

    /// Script the result column names.
    pub fn columns(mut self, names: &[&str]) -> Self {
        self.script_mut().columns = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Script the row batches served per execution, in order.
    ///
    /// Batches are served verbatim; after the last one, fetches return an
    /// empty batch.
    pub fn batches(mut self, batches: Vec<RowBatch>) -> Self {
        self.script_mut().batches = batches;
        self
    }

    /// Fail `open_pool` outright.
    pub fn fail_open_pool(mut self) -> Self {
        self.script_mut().fail_open_pool = true;
        self
    }

    /// Fail the first `count` acquisition attempts, then succeed.
    pub fn fail_first_acquires(mut self, count: u32) -> Self {
        self.script_mut().fail_first_acquires = count;
        self
    }

    /// Fail every acquisition attempt.
    pub fn fail_all_acquires(mut self) -> Self {
        self.script_mut().fail_all_acquires = true;
        self
    }

    /// Fail `execute` on every connection.
    pub fn fail_execute(mut self) -> Self {
        self.script_mut().fail_execute = true;
        self
    }

    /// Fail the fetch that would serve batch `index`.
    pub fn fail_fetch_at(mut self, index: usize) -> Self {
        self.script_mut().fail_fetch_at = Some(index);
        self
    }

    /// Handle to the shared invocation counters.
    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }

    fn script_mut(&mut self) -> &mut Script {
        // Builders run before the driver is shared; the Arc is still unique.
        Arc::get_mut(&mut self.script).expect("mock script mutated after sharing")
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn open_pool(&self, _config: &PoolConfig) -> DriverResult<Arc<dyn DriverPool>> {
        if self.script.fail_open_pool {
            return Err(DriverError::Unavailable("injected open_pool failure".into()));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockPool {
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct MockPool {
    script: Arc<Script>,
    counters: Arc<MockCounters>,
}

#[async_trait]
impl DriverPool for MockPool {
    async fn acquire(&self) -> DriverResult<Box<dyn Connection>> {
        let attempt = self.counters.acquire_attempts.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_all_acquires || attempt < self.script.fail_first_acquires {
            return Err(DriverError::Unavailable(
                "injected acquisition failure".into(),
            ));
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
            cursor_open: false,
            next_batch: 0,
        }))
    }

    fn release(&self, _conn: Box<dyn Connection>) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn stats(&self) -> PoolStats {
        let acquired = self.counters.acquired();
        let released = self.counters.releases();
        PoolStats {
            open: acquired,
            busy: acquired.saturating_sub(released),
        }
    }
}

struct MockConnection {
    script: Arc<Script>,
    counters: Arc<MockCounters>,
    cursor_open: bool,
    next_batch: usize,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, _query: &str, _params: &[Value]) -> DriverResult<CursorMeta> {
        self.counters.executes.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_execute {
            return Err(DriverError::Statement("injected execute failure".into()));
        }
        self.cursor_open = true;
        self.next_batch = 0;
        Ok(CursorMeta {
            columns: self.script.columns.clone(),
        })
    }

    async fn fetch_batch(&mut self, _max_rows: usize) -> DriverResult<RowBatch> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.cursor_open {
            return Err(DriverError::Statement("no open cursor".into()));
        }
        if self.script.fail_fetch_at == Some(self.next_batch) {
            return Err(DriverError::Statement("injected fetch failure".into()));
        }
        match self.script.batches.get(self.next_batch) {
            Some(batch) => {
                self.next_batch += 1;
                Ok(batch.clone())
            }
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Row;

    fn config() -> PoolConfig {
        PoolConfig::new("mock", "u", "p")
    }

    #[tokio::test]
    async fn test_scripted_batches_then_empty() {
        let driver = MockDriver::new()
            .columns(&["n"])
            .batches(vec![vec![Row::new([Value::Int(1)])]]);
        let pool = driver.open_pool(&config()).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let meta = conn.execute("SELECT n FROM t", &[]).await.unwrap();
        assert_eq!(meta.columns, vec!["n"]);

        let first = conn.fetch_batch(10).await.unwrap();
        assert_eq!(first.len(), 1);
        let end = conn.fetch_batch(10).await.unwrap();
        assert!(end.is_empty());

        pool.release(conn);
        assert_eq!(driver.counters().releases(), 1);
    }

    #[tokio::test]
    async fn test_fail_first_acquires_then_succeed() {
        let driver = MockDriver::new().fail_first_acquires(2);
        let pool = driver.open_pool(&config()).await.unwrap();

        assert!(pool.acquire().await.is_err());
        assert!(pool.acquire().await.is_err());
        assert!(pool.acquire().await.is_ok());
        assert_eq!(driver.counters().acquire_attempts(), 3);
        assert_eq!(driver.counters().acquired(), 1);
    }

    #[tokio::test]
    async fn test_fetch_without_execute_fails() {
        let driver = MockDriver::new();
        let pool = driver.open_pool(&config()).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        assert!(conn.fetch_batch(10).await.is_err());
    }
}
