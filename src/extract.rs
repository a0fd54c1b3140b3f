//! Streaming extraction.
//!
//! [`StreamingExtractor`] drives one query through a pooled connection and
//! exposes the result as a lazy, single-pass sequence of row batches, keeping
//! memory bounded by the batch size rather than the result size. The
//! [`Extractor`] facade bundles a pool with the two common destinations
//! (in-memory table, Parquet file).

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::PoolConfig;
use crate::driver::{Driver, PoolStats, RowBatch, Value};
use crate::error::Result;
use crate::pool::{PooledConnection, ResilientPool};
use crate::sink::{ColumnarSink, ParquetCompression, ParquetSink, Table, TableSink};

// ============================================================================
// Row stream
// ============================================================================

/// A lazy, finite, single-pass sequence of row batches for one query.
///
/// The leased connection is released exactly once: when the cursor is
/// exhausted, when a fetch fails, or when the stream is dropped early by an
/// abandoning consumer. Re-polling after exhaustion yields nothing.
pub struct RowStream {
    /// Leased connection; taking it releases it via the guard
    conn: Option<PooledConnection>,
    columns: Vec<String>,
    batch_size: usize,
    done: bool,
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .field("batch_size", &self.batch_size)
            .field("done", &self.done)
            .finish()
    }
}

impl RowStream {
    /// Result column names reported by the cursor.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Pull the next batch; `None` once the cursor is exhausted.
    ///
    /// Batches preserve server order. A driver failure surfaces as
    /// `QueryError` after the connection has been released.
    pub async fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if self.done {
            return Ok(None);
        }
        let Some(conn) = self.conn.as_mut() else {
            self.done = true;
            return Ok(None);
        };
        match conn.fetch_batch(self.batch_size).await {
            Ok(batch) if batch.is_empty() => {
                self.done = true;
                self.conn.take();
                Ok(None)
            }
            Ok(batch) => Ok(Some(batch)),
            Err(err) => {
                self.done = true;
                self.conn.take();
                Err(err)
            }
        }
    }
}

// ============================================================================
// Streaming extractor
// ============================================================================

/// Extraction engine pulling fixed-size batches through a [`ResilientPool`].
///
/// The batch size defaults to the pool's `arraysize`; a "fetch everything at
/// once" mode is just a batch size at least as large as the result.
pub struct StreamingExtractor {
    pool: ResilientPool,
    batch_size: usize,
    compression: ParquetCompression,
}

impl StreamingExtractor {
    pub fn new(pool: ResilientPool) -> Self {
        let batch_size = pool.config().arraysize;
        Self {
            pool,
            batch_size,
            compression: ParquetCompression::default(),
        }
    }

    /// Override the rows fetched per batch.
    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows.max(1);
        self
    }

    /// Set the compression codec used for Parquet output.
    pub fn compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Execute a query and return the lazy batch sequence.
    ///
    /// Pool acquisition errors propagate unchanged; execution failures
    /// surface as `QueryError` with the connection already released.
    pub async fn execute(&self, query: &str, params: &[Value]) -> Result<RowStream> {
        let mut conn = self.pool.acquire().await?;
        let meta = conn.execute(query, params).await?;
        Ok(RowStream {
            conn: Some(conn),
            columns: meta.columns,
            batch_size: self.batch_size,
            done: false,
        })
    }

    /// Drain the result into an in-memory [`Table`].
    ///
    /// Memory is O(result size); intended for small results. All-or-nothing:
    /// a failure mid-stream yields no partial table.
    pub async fn extract_to_table(&self, query: &str, params: &[Value]) -> Result<Table> {
        let mut stream = self.execute(query, params).await?;
        let mut sink = TableSink::new(stream.columns().to_vec());
        let mut batches = 0usize;
        while let Some(batch) = stream.next_batch().await? {
            sink.write_batch(&batch)?;
            batches += 1;
        }
        sink.finish()?;
        let table = sink.into_table();
        debug!(rows = table.num_rows(), batches, "extraction materialized");
        Ok(table)
    }

    /// Drain the result incrementally into a Parquet file, one row group per
    /// batch. Returns the number of rows written.
    ///
    /// The file is created on the first non-empty batch; a zero-row result
    /// creates no file and returns 0. The writer is finalized exactly once
    /// on every path, so a failed extraction leaves a readable (if partial)
    /// file rather than a truncated one.
    pub async fn extract_to_file(
        &self,
        query: &str,
        path: impl AsRef<Path>,
        params: &[Value],
    ) -> Result<u64> {
        let mut stream = self.execute(query, params).await?;
        let mut sink = ParquetSink::new(path, stream.columns().to_vec(), self.compression);

        loop {
            let batch = match stream.next_batch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    let _ = sink.finish();
                    return Err(err);
                }
            };
            if let Err(err) = sink.write_batch(&batch) {
                let _ = sink.finish();
                return Err(err);
            }
        }
        sink.finish()?;
        debug!(
            rows = sink.rows_written(),
            row_groups = sink.row_groups(),
            "extraction written to file"
        );
        Ok(sink.rows_written())
    }
}

// ============================================================================
// High-level facade
// ============================================================================

/// Owns a configured pool and exposes one-call extraction entry points.
pub struct Extractor {
    pool: ResilientPool,
}

impl Extractor {
    /// Validate the configuration, open the pool, and return the facade.
    pub async fn connect(config: PoolConfig, driver: Arc<dyn Driver>) -> Result<Self> {
        let pool = ResilientPool::connect(config, driver).await?;
        Ok(Self { pool })
    }

    /// The underlying pool, for circuit control and telemetry hooks.
    pub fn pool(&self) -> &ResilientPool {
        &self.pool
    }

    /// A streaming extractor over this pool.
    pub fn streaming(&self) -> StreamingExtractor {
        StreamingExtractor::new(self.pool.clone())
    }

    /// Extract a query into an in-memory table.
    pub async fn extract_to_table(&self, query: &str, params: &[Value]) -> Result<Table> {
        self.streaming().extract_to_table(query, params).await
    }

    /// Extract a query into a Parquet file; returns rows written.
    pub async fn extract_to_parquet(
        &self,
        query: &str,
        path: impl AsRef<Path>,
        params: &[Value],
    ) -> Result<u64> {
        self.streaming().extract_to_file(query, path, params).await
    }

    /// Pool occupancy snapshot.
    pub fn stats(&self) -> Option<PoolStats> {
        self.pool.stats()
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
