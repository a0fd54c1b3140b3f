//! Incremental Parquet file sink.

use std::fs::File;
use std::path::{Path, PathBuf};

use arrow_schema::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::RowBatch;
use crate::error::Result;

use super::{to_record_batch, ColumnarSink, Schema};

/// Compression codec for Parquet output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// No compression
    None,
    /// Snappy (fast, moderate ratio)
    #[default]
    Snappy,
    /// Gzip (slower, better ratio)
    Gzip,
    /// LZ4 (very fast, lower ratio)
    Lz4,
    /// Zstd (good balance of speed and ratio)
    Zstd,
}

impl ParquetCompression {
    fn to_parquet(self) -> Compression {
        match self {
            ParquetCompression::None => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(Default::default()),
            ParquetCompression::Lz4 => Compression::LZ4,
            ParquetCompression::Zstd => Compression::ZSTD(Default::default()),
        }
    }
}

struct OpenWriter {
    schema: Schema,
    arrow: SchemaRef,
    writer: ArrowWriter<File>,
}

/// Sink writing batches to a Parquet file, one row group per batch.
///
/// The file is created lazily on the first non-empty batch so the schema is
/// inferred from real data; a sink that never sees a row creates no file.
/// An existing file at the path is overwritten. Output is incremental and
/// not transactional: a failed extraction may leave a partial file behind.
/// Callers needing atomicity should write to a temporary path and rename.
pub struct ParquetSink {
    path: PathBuf,
    column_names: Vec<String>,
    compression: ParquetCompression,
    writer: Option<OpenWriter>,
    finished: bool,
    rows_written: u64,
    row_groups: usize,
}

impl ParquetSink {
    pub fn new(
        path: impl AsRef<Path>,
        column_names: Vec<String>,
        compression: ParquetCompression,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            column_names,
            compression,
            writer: None,
            finished: false,
            rows_written: 0,
            row_groups: 0,
        }
    }

    /// Rows written so far.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Row groups written so far (one per non-empty batch).
    pub fn row_groups(&self) -> usize {
        self.row_groups
    }

    /// Whether the output file has been created yet.
    pub fn file_created(&self) -> bool {
        self.writer.is_some() || (self.finished && self.row_groups > 0)
    }

    fn open_writer(&mut self, batch: &RowBatch) -> Result<()> {
        let schema = Schema::infer(&self.column_names, batch)?;
        let arrow = schema.to_arrow();
        let file = File::create(&self.path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression.to_parquet())
            .build();
        let writer = ArrowWriter::try_new(file, arrow.clone(), Some(props))?;
        debug!(path = %self.path.display(), columns = schema.len(), "parquet writer opened");
        self.writer = Some(OpenWriter {
            schema,
            arrow,
            writer,
        });
        Ok(())
    }
}

impl ColumnarSink for ParquetSink {
    fn write_batch(&mut self, batch: &RowBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.writer.is_none() {
            self.open_writer(batch)?;
        }
        let open = self.writer.as_mut().expect("writer opened above");
        let record_batch = to_record_batch(&open.arrow, &open.schema, batch)?;
        open.writer.write(&record_batch)?;
        // End the row group so batch boundaries map 1:1 onto row groups.
        open.writer.flush()?;
        self.rows_written += record_batch.num_rows() as u64;
        self.row_groups += 1;
        Ok(())
    }

    /// Write the footer and close the file. Idempotent; without any written
    /// batch there is no file to finalize.
    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if let Some(open) = self.writer.take() {
            open.writer.close()?;
            debug!(
                path = %self.path.display(),
                rows = self.rows_written,
                row_groups = self.row_groups,
                "parquet file finalized"
            );
        }
        Ok(())
    }
}

impl Drop for ParquetSink {
    fn drop(&mut self) {
        // A file without its footer is unreadable; finalize on every exit
        // path. Errors here have no caller to go to.
        if !self.finished {
            if let Some(mut open) = self.writer.take() {
                let _ = open.writer.finish();
            }
            self.finished = true;
        }
    }
}
