//! Error types for extractkit.
//!
//! Driver-originated failures are wrapped at the boundary where the driver
//! is invoked; no driver-specific error type crosses into caller-facing APIs.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Query execution error: {0}")]
    QueryError(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatchError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
