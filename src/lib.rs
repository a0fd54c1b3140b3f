//! Resilient streaming extraction from relational databases into Arrow
//! tables and Parquet files.
//!
//! The database client is an opaque [`Driver`] collaborator; this crate adds
//! the parts around it:
//! - `config`: pool configuration and validation
//! - `pool`: connection pool with bounded retries and a circuit breaker
//! - `extract`: lazy batch streaming with guaranteed connection release
//! - `sink`: columnar destinations (in-memory Arrow table, Parquet file)
//! - `mock`: scriptable in-memory driver for tests
//!
//! ```rust,ignore
//! use extractkit::{extract, PoolConfig};
//!
//! let config = PoolConfig::new("dbhost/orclpdb", "system", "oracle");
//! let table = extract("SELECT * FROM orders", config, driver).await?;
//! println!("{} rows", table.num_rows());
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod extract;
pub mod mock;
pub mod pool;
pub mod sink;

use std::sync::Arc;

pub use config::PoolConfig;
pub use driver::{
    Connection, CursorMeta, Driver, DriverError, DriverPool, DriverResult, PoolStats, Row,
    RowBatch, Value, ValueKind,
};
pub use error::{ExtractError, Result};
pub use extract::{Extractor, RowStream, StreamingExtractor};
pub use mock::MockDriver;
pub use pool::{connect_many, CircuitState, GaugeHook, PooledConnection, ResilientPool};
pub use sink::{ColumnarSink, ParquetCompression, ParquetSink, Schema, Table, TableSink};

/// One-line extraction: open a pool, drain the query into a table, close the
/// pool. The pool is closed even when the extraction fails.
pub async fn extract(
    query: &str,
    config: PoolConfig,
    driver: Arc<dyn Driver>,
) -> Result<Table> {
    let extractor = Extractor::connect(config, driver).await?;
    let result = extractor.extract_to_table(query, &[]).await;
    extractor.close().await;
    result
}
