//! Resilient connection pool.
//!
//! Wraps a driver-owned pool with bounded-retry acquisition and a circuit
//! breaker. Repeated acquisition failures under a dead backend indicate a
//! systemic outage rather than transient contention, so once the configured
//! retries are exhausted the circuit opens and subsequent callers fail fast
//! until [`ResilientPool::reset_circuit`] or a fresh pool.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::driver::{Connection, CursorMeta, Driver, DriverPool, PoolStats, RowBatch, Value};
use crate::error::{ExtractError, Result};

/// Gauge callback receiving pool occupancy snapshots.
pub type GaugeHook = Arc<dyn Fn(&PoolStats) + Send + Sync>;

/// Breaker state. Reset to `{0, false}` on successful acquisition or an
/// explicit reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CircuitState {
    /// Failed acquisition attempts since the last success or reset
    pub failure_count: u32,
    /// Whether acquisition is currently short-circuited
    pub open: bool,
}

// ============================================================================
// Pooled connection
// ============================================================================

/// A connection leased from a [`ResilientPool`].
///
/// When dropped, the raw connection is returned to the driver pool, so
/// release happens exactly once on every exit path, including early
/// abandonment of an extraction.
pub struct PooledConnection {
    /// The raw connection (None once returned to the pool)
    conn: Option<Box<dyn Connection>>,
    /// The driver pool the connection goes back to
    pool: Arc<dyn DriverPool>,
    /// Gauge hook observed after the release
    gauge: Option<GaugeHook>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("held", &self.conn.is_some())
            .finish()
    }
}

impl PooledConnection {
    /// Execute a statement on the leased connection.
    pub async fn execute(&mut self, query: &str, params: &[Value]) -> Result<CursorMeta> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExtractError::ConnectionError("connection already released".into()))?
            .execute(query, params)
            .await
            .map_err(|e| ExtractError::QueryError(e.to_string()))
    }

    /// Fetch up to `max_rows` rows from the connection's open cursor.
    pub async fn fetch_batch(&mut self, max_rows: usize) -> Result<RowBatch> {
        self.conn
            .as_mut()
            .ok_or_else(|| ExtractError::ConnectionError("connection already released".into()))?
            .fetch_batch(max_rows)
            .await
            .map_err(|e| ExtractError::QueryError(e.to_string()))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
            if let Some(gauge) = &self.gauge {
                gauge(&self.pool.stats());
            }
        }
    }
}

// ============================================================================
// Pool inner
// ============================================================================

struct PoolInner {
    config: PoolConfig,
    driver: Arc<dyn Driver>,
    /// Live driver pool; None before `initialize` and after `close`.
    /// The Arc is cloned out before any await so this lock is never held
    /// across suspension.
    pool: Mutex<Option<Arc<dyn DriverPool>>>,
    circuit: Mutex<CircuitState>,
    gauge: Mutex<Option<GaugeHook>>,
}

// ============================================================================
// Resilient pool
// ============================================================================

/// A connection pool with bounded-retry acquisition and a circuit breaker.
///
/// Cloning is cheap and all clones share the same pool and breaker state.
#[derive(Clone)]
pub struct ResilientPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ResilientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientPool").finish_non_exhaustive()
    }
}

impl ResilientPool {
    /// Create an uninitialized pool. Call [`initialize`](Self::initialize)
    /// before acquiring.
    pub fn new(config: PoolConfig, driver: Arc<dyn Driver>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                driver,
                pool: Mutex::new(None),
                circuit: Mutex::new(CircuitState::default()),
                gauge: Mutex::new(None),
            }),
        }
    }

    /// Create and initialize a pool in one step.
    pub async fn connect(config: PoolConfig, driver: Arc<dyn Driver>) -> Result<Self> {
        let pool = Self::new(config, driver);
        pool.initialize().await?;
        Ok(pool)
    }

    /// Validate the configuration and open the underlying driver pool.
    ///
    /// Precondition: must not be called on an already-initialized pool.
    pub async fn initialize(&self) -> Result<()> {
        self.inner.config.validate()?;
        let pool = self
            .inner
            .driver
            .open_pool(&self.inner.config)
            .await
            .map_err(|e| ExtractError::ConnectionError(e.to_string()))?;
        *self.inner.pool.lock() = Some(pool);
        info!(dsn = %self.inner.config.dsn, "connection pool opened");
        Ok(())
    }

    /// Lease a connection, retrying with exponential backoff.
    ///
    /// Fails fast with `ConnectionError` when the circuit is open or the
    /// pool is not initialized. Otherwise makes up to `max_retries` attempts
    /// (always at least one); each failure increments the failure counter,
    /// and exhausting the attempts opens the circuit. No backoff delay is
    /// applied after the final failing attempt.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.inner.circuit.lock().open {
            return Err(ExtractError::ConnectionError("circuit open".into()));
        }
        let pool = self
            .inner
            .pool
            .lock()
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| ExtractError::ConnectionError("pool not initialized".into()))?;

        let attempts = self.inner.config.max_retries.max(1);
        let mut delay = self.inner.config.retry_delay;

        for attempt in 1..=attempts {
            match pool.acquire().await {
                Ok(conn) => {
                    *self.inner.circuit.lock() = CircuitState::default();
                    let gauge = self.inner.gauge.lock().clone();
                    if let Some(gauge) = &gauge {
                        gauge(&pool.stats());
                    }
                    return Ok(PooledConnection {
                        conn: Some(conn),
                        pool,
                        gauge,
                    });
                }
                Err(err) => {
                    let failures = {
                        let mut circuit = self.inner.circuit.lock();
                        circuit.failure_count += 1;
                        circuit.failure_count
                    };
                    debug!(attempt, failures, error = %err, "connection acquisition failed");

                    if attempt == attempts {
                        self.inner.circuit.lock().open = true;
                        warn!(attempts, "circuit opened after exhausting acquisition attempts");
                        return Err(ExtractError::ConnectionError(format!(
                            "acquisition failed after {attempts} attempts: {err}"
                        )));
                    }
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.inner.config.retry_backoff);
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }

    /// Return a leased connection to the pool.
    ///
    /// Equivalent to dropping the guard; provided for call sites that prefer
    /// an explicit release.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Close the breaker unconditionally and zero the failure counter.
    ///
    /// The only way to recover from an open circuit short of a fresh pool.
    pub fn reset_circuit(&self) {
        *self.inner.circuit.lock() = CircuitState::default();
        info!("circuit reset");
    }

    /// Current breaker state snapshot.
    pub fn circuit(&self) -> CircuitState {
        *self.inner.circuit.lock()
    }

    /// Close the underlying driver pool. Subsequent acquisitions fail with
    /// `ConnectionError("pool not initialized")`.
    pub async fn close(&self) {
        let pool = self.inner.pool.lock().take();
        if let Some(pool) = pool {
            pool.close().await;
            info!("connection pool closed");
        }
    }

    /// Best-effort occupancy snapshot; `None` when uninitialized. Never
    /// blocks.
    pub fn stats(&self) -> Option<PoolStats> {
        self.inner.pool.lock().as_ref().map(|p| p.stats())
    }

    /// Register a gauge hook invoked with a fresh snapshot after every
    /// successful acquisition and every release.
    pub fn set_gauge(&self, hook: GaugeHook) {
        *self.inner.gauge.lock() = Some(hook);
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

/// Concurrently create and initialize one pool per configuration.
///
/// Pools come back in input order. The first initialization error aborts the
/// remaining tasks and is returned.
pub async fn connect_many(
    configs: Vec<PoolConfig>,
    driver: Arc<dyn Driver>,
) -> Result<Vec<ResilientPool>> {
    let mut tasks = JoinSet::new();
    let count = configs.len();
    for (index, config) in configs.into_iter().enumerate() {
        let driver = Arc::clone(&driver);
        tasks.spawn(async move {
            ResilientPool::connect(config, driver)
                .await
                .map(|pool| (index, pool))
        });
    }

    let mut pools: Vec<Option<ResilientPool>> = Vec::new();
    pools.resize_with(count, || None);
    while let Some(joined) = tasks.join_next().await {
        let (index, pool) = joined.map_err(|e| ExtractError::ConnectionError(e.to_string()))??;
        pools[index] = Some(pool);
    }
    Ok(pools.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config() -> PoolConfig {
        PoolConfig::new("localhost/xe", "scott", "tiger")
            .max_retries(3)
            .retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_acquire_uninitialized_fails() {
        let pool = ResilientPool::new(config(), Arc::new(MockDriver::new()));
        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("pool not initialized"));
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_config() {
        let pool = ResilientPool::new(config().pool_min(0), Arc::new(MockDriver::new()));
        let err = pool.initialize().await.unwrap_err();
        assert!(matches!(err, ExtractError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_initialize_wraps_driver_failure() {
        let driver = MockDriver::new().fail_open_pool();
        let err = ResilientPool::connect(config(), Arc::new(driver))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_transient_failures_recover_and_circuit_stays_closed() {
        let driver = MockDriver::new().fail_first_acquires(2);
        let counters = driver.counters();
        let pool = ResilientPool::connect(config(), Arc::new(driver))
            .await
            .unwrap();

        let conn = pool.acquire().await.unwrap();
        assert_eq!(counters.acquire_attempts(), 3);
        assert_eq!(pool.circuit(), CircuitState::default());
        drop(conn);
        assert_eq!(counters.releases(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_open_circuit() {
        let driver = MockDriver::new().fail_all_acquires();
        let counters = driver.counters();
        let pool = ResilientPool::connect(config(), Arc::new(driver))
            .await
            .unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, ExtractError::ConnectionError(_)));
        assert_eq!(counters.acquire_attempts(), 3);
        assert!(pool.circuit().open);
        assert_eq!(pool.circuit().failure_count, 3);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_driver_call() {
        let driver = MockDriver::new().fail_all_acquires();
        let counters = driver.counters();
        let pool = ResilientPool::connect(config(), Arc::new(driver))
            .await
            .unwrap();

        pool.acquire().await.unwrap_err();
        let attempts_after_open = counters.acquire_attempts();

        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("circuit open"));
        assert_eq!(counters.acquire_attempts(), attempts_after_open);
    }

    #[tokio::test]
    async fn test_reset_circuit_allows_acquisition_again() {
        // Fail exactly the attempts of the first acquire, then recover.
        let driver = MockDriver::new().fail_first_acquires(3);
        let pool = ResilientPool::connect(config(), Arc::new(driver))
            .await
            .unwrap();

        pool.acquire().await.unwrap_err();
        assert!(pool.circuit().open);

        pool.reset_circuit();
        assert_eq!(pool.circuit(), CircuitState::default());
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_retries_still_makes_one_attempt() {
        let driver = MockDriver::new();
        let counters = driver.counters();
        let pool = ResilientPool::connect(config().max_retries(0), Arc::new(driver))
            .await
            .unwrap();

        assert!(pool.acquire().await.is_ok());
        assert_eq!(counters.acquire_attempts(), 1);
    }

    #[tokio::test]
    async fn test_close_then_acquire_fails() {
        let driver = MockDriver::new();
        let counters = driver.counters();
        let pool = ResilientPool::connect(config(), Arc::new(driver))
            .await
            .unwrap();

        pool.close().await;
        assert_eq!(counters.closes(), 1);
        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("pool not initialized"));
    }

    #[tokio::test]
    async fn test_stats_none_until_initialized() {
        let pool = ResilientPool::new(config(), Arc::new(MockDriver::new()));
        assert!(pool.stats().is_none());

        pool.initialize().await.unwrap();
        assert!(pool.stats().is_some());
    }

    #[tokio::test]
    async fn test_gauge_observes_acquire_and_release() {
        let driver = MockDriver::new();
        let pool = ResilientPool::connect(config(), Arc::new(driver))
            .await
            .unwrap();

        let observations = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&observations);
        pool.set_gauge(Arc::new(move |stats: &PoolStats| {
            assert!(stats.open >= stats.busy);
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let conn = pool.acquire().await.unwrap();
        assert_eq!(observations.load(Ordering::SeqCst), 1);
        pool.release(conn);
        assert_eq!(observations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_many_preserves_order() {
        let driver: Arc<dyn Driver> = Arc::new(MockDriver::new());
        let configs = vec![
            config().pool_max(21),
            config().pool_max(22),
            config().pool_max(23),
        ];
        let pools = connect_many(configs, driver).await.unwrap();
        assert_eq!(pools.len(), 3);
        assert_eq!(pools[0].config().pool_max, 21);
        assert_eq!(pools[1].config().pool_max, 22);
        assert_eq!(pools[2].config().pool_max, 23);
    }

    #[tokio::test]
    async fn test_connect_many_surfaces_first_error() {
        let driver: Arc<dyn Driver> = Arc::new(MockDriver::new().fail_open_pool());
        let err = connect_many(vec![config(), config()], driver)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::ConnectionError(_)));
    }
}
