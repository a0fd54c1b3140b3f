//! Database driver abstraction.
//!
//! The underlying database client is an opaque collaborator expressed as a
//! small trait family:
//! - [`Driver`]: opens a sized connection pool from a [`PoolConfig`]
//! - [`DriverPool`]: hands out and takes back raw connections
//! - [`Connection`]: executes one statement at a time and fetches row batches
//!   from its open cursor
//!
//! Drivers produce [`DriverError`] only; the pool and extractor wrap it into
//! the crate error taxonomy at each call site.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use smallvec::SmallVec;
use thiserror::Error;

use crate::config::PoolConfig;

// Re-export serde_json::Value for JSON column support
pub use serde_json::Value as JsonValue;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors produced by a driver implementation.
///
/// This type never crosses into extractor or pool callers; it is wrapped
/// into `ConnectionError`/`QueryError` at the invocation boundary.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("connection is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Row values
// ============================================================================

/// A typed scalar value in a result row.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    /// JSON column payload, carried through as a parsed value
    Json(JsonValue),
}

impl Value {
    /// The value's kind, or `None` for NULL.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Bytes(_) => Some(ValueKind::Bytes),
            Value::Timestamp(_) => Some(ValueKind::Timestamp),
            Value::Date(_) => Some(ValueKind::Date),
            Value::Json(_) => Some(ValueKind::Json),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// The type of a non-null [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Timestamp,
    Date,
    Json,
}

/// One result row.
///
/// Uses SmallVec to inline storage for rows with <=16 columns (most tables),
/// avoiding heap allocation for typical workloads.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Row {
    pub values: SmallVec<[Value; 16]>,
}

impl Row {
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// An ordered batch of rows, the unit of memory-bounded streaming.
///
/// An empty batch from [`Connection::fetch_batch`] signals cursor exhaustion.
pub type RowBatch = Vec<Row>;

// ============================================================================
// Driver contract
// ============================================================================

/// Cursor metadata reported by [`Connection::execute`].
#[derive(Clone, Debug)]
pub struct CursorMeta {
    /// Result column names, one per column, in result order.
    pub columns: Vec<String>,
}

/// Best-effort snapshot of pool occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections currently open
    pub open: u32,
    /// Connections currently leased out
    pub busy: u32,
}

/// A raw database connection leased from a [`DriverPool`].
///
/// A connection holds at most one open cursor: `execute` opens it and
/// `fetch_batch` advances it until an empty batch is returned. Callers must
/// not interleave statements on one lease.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement, opening this connection's cursor, and report the
    /// result column names.
    async fn execute(&mut self, query: &str, params: &[Value]) -> DriverResult<CursorMeta>;

    /// Fetch up to `max_rows` rows from the open cursor.
    ///
    /// An empty batch means the cursor is exhausted.
    async fn fetch_batch(&mut self, max_rows: usize) -> DriverResult<RowBatch>;
}

/// A sized pool of raw connections owned by the driver.
#[async_trait]
pub trait DriverPool: Send + Sync {
    /// Lease a connection. May suspend up to the configured pool timeout.
    async fn acquire(&self) -> DriverResult<Box<dyn Connection>>;

    /// Return a leased connection. Must not block.
    fn release(&self, conn: Box<dyn Connection>);

    /// Close the pool and all idle connections.
    async fn close(&self);

    /// Snapshot of open/busy counts. Must not block.
    fn stats(&self) -> PoolStats;
}

/// A database driver capable of opening connection pools.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a pool sized `[pool_min, pool_max]` per the configuration.
    async fn open_pool(&self, config: &PoolConfig) -> DriverResult<Arc<dyn DriverPool>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kinds() {
        assert_eq!(Value::Null.kind(), None);
        assert_eq!(Value::Bool(true).kind(), Some(ValueKind::Bool));
        assert_eq!(Value::Int(1).kind(), Some(ValueKind::Int));
        assert_eq!(Value::Float(1.5).kind(), Some(ValueKind::Float));
        assert_eq!(Value::Text("x".into()).kind(), Some(ValueKind::Text));
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
    }

    #[test]
    fn test_row_from_iterator() {
        let row: Row = vec![Value::Int(1), Value::Text("a".into())]
            .into_iter()
            .collect();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get(2), None);
    }
}
