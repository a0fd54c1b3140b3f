//! Columnar sinks.
//!
//! A sink consumes row batches from an extraction and materializes them
//! incrementally, one batch at a time:
//! - `table`: in-memory accumulation into an Arrow [`Table`](table::Table)
//! - `parquet`: on-disk Parquet file, one row group per batch
//!
//! Both infer their schema from the first non-empty batch (column names come
//! from the cursor, column types from the data) and reject any later batch
//! that disagrees with it.

pub mod parquet;
pub mod table;

use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Date32Builder, Float64Builder, Int64Builder, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow_array::{ArrayRef, RecordBatch};
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef, TimeUnit};
use chrono::Datelike;

use crate::driver::{Row, RowBatch, Value, ValueKind};
use crate::error::{ExtractError, Result};

pub use self::parquet::{ParquetCompression, ParquetSink};
pub use self::table::{Table, TableSink};

/// Days from 0001-01-01 (CE) to the Unix epoch, for Date32 conversion.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

/// A destination for ordered row batches.
///
/// Writing is append-only: batch N's rows appear before batch N+1's, with no
/// reordering or merging. `finish` is idempotent and must be called (or the
/// sink dropped) to finalize the output.
pub trait ColumnarSink {
    /// Append one batch. Empty batches are ignored.
    fn write_batch(&mut self, batch: &RowBatch) -> Result<()>;

    /// Finalize the output. Safe to call more than once.
    fn finish(&mut self) -> Result<()>;
}

// ============================================================================
// Schema inference
// ============================================================================

/// One inferred result column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ValueKind,
}

/// Result schema inferred from cursor metadata and the first non-empty batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Infer a schema from column names and the first non-empty batch.
    ///
    /// Per column, NULLs merge with anything, Int and Float widen to Float,
    /// and any other conflict fails. A column that is entirely NULL in the
    /// first batch defaults to Text.
    pub fn infer(names: &[String], batch: &RowBatch) -> Result<Self> {
        let mut kinds: Vec<Option<ValueKind>> = vec![None; names.len()];
        for row in batch {
            check_width(row, names.len())?;
            for (index, value) in row.values.iter().enumerate() {
                let Some(kind) = value.kind() else { continue };
                kinds[index] = Some(match kinds[index] {
                    None => kind,
                    Some(seen) => merge_kinds(seen, kind).ok_or_else(|| {
                        ExtractError::SchemaMismatchError(format!(
                            "column '{}' mixes {:?} and {:?}",
                            names[index], seen, kind
                        ))
                    })?,
                });
            }
        }

        let columns = names
            .iter()
            .zip(kinds)
            .map(|(name, kind)| Column {
                name: name.clone(),
                kind: kind.unwrap_or(ValueKind::Text),
            })
            .collect();
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The equivalent Arrow schema. All columns are nullable; JSON columns
    /// are carried as serialized strings.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c.name.clone(), arrow_type(c.kind), true))
            .collect();
        Arc::new(ArrowSchema::new(fields))
    }
}

fn merge_kinds(a: ValueKind, b: ValueKind) -> Option<ValueKind> {
    match (a, b) {
        (a, b) if a == b => Some(a),
        (ValueKind::Int, ValueKind::Float) | (ValueKind::Float, ValueKind::Int) => {
            Some(ValueKind::Float)
        }
        _ => None,
    }
}

fn arrow_type(kind: ValueKind) -> DataType {
    match kind {
        ValueKind::Bool => DataType::Boolean,
        ValueKind::Int => DataType::Int64,
        ValueKind::Float => DataType::Float64,
        ValueKind::Text => DataType::Utf8,
        ValueKind::Bytes => DataType::Binary,
        ValueKind::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
        ValueKind::Date => DataType::Date32,
        ValueKind::Json => DataType::Utf8,
    }
}

fn check_width(row: &Row, expected: usize) -> Result<()> {
    if row.len() != expected {
        return Err(ExtractError::SchemaMismatchError(format!(
            "row has {} values, schema has {} columns",
            row.len(),
            expected
        )));
    }
    Ok(())
}

// ============================================================================
// Row batch -> Arrow RecordBatch
// ============================================================================

/// Convert one row batch into an Arrow record batch under the given schema.
///
/// Fails with `SchemaMismatchError` when a row's width or a value's kind
/// disagrees with the schema. Int values are accepted into Float columns.
pub fn to_record_batch(
    arrow_schema: &SchemaRef,
    schema: &Schema,
    batch: &RowBatch,
) -> Result<RecordBatch> {
    for row in batch {
        check_width(row, schema.len())?;
    }

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.len());
    for (index, column) in schema.columns().iter().enumerate() {
        arrays.push(build_array(column, index, batch)?);
    }
    RecordBatch::try_new(Arc::clone(arrow_schema), arrays).map_err(ExtractError::from)
}

fn build_array(column: &Column, index: usize, batch: &RowBatch) -> Result<ArrayRef> {
    let mismatch = |value: &Value| {
        ExtractError::SchemaMismatchError(format!(
            "column '{}': expected {:?}, found {:?}",
            column.name,
            column.kind,
            value.kind()
        ))
    };

    let array: ArrayRef = match column.kind {
        ValueKind::Bool => {
            let mut builder = BooleanBuilder::with_capacity(batch.len());
            for row in batch {
                match &row.values[index] {
                    Value::Bool(b) => builder.append_value(*b),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        ValueKind::Int => {
            let mut builder = Int64Builder::with_capacity(batch.len());
            for row in batch {
                match &row.values[index] {
                    Value::Int(i) => builder.append_value(*i),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        ValueKind::Float => {
            let mut builder = Float64Builder::with_capacity(batch.len());
            for row in batch {
                match &row.values[index] {
                    Value::Float(f) => builder.append_value(*f),
                    Value::Int(i) => builder.append_value(*i as f64),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        ValueKind::Text => {
            let mut builder = StringBuilder::new();
            for row in batch {
                match &row.values[index] {
                    Value::Text(s) => builder.append_value(s),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        ValueKind::Bytes => {
            let mut builder = BinaryBuilder::new();
            for row in batch {
                match &row.values[index] {
                    Value::Bytes(b) => builder.append_value(b),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        ValueKind::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(batch.len());
            for row in batch {
                match &row.values[index] {
                    Value::Timestamp(ts) => builder.append_value(ts.and_utc().timestamp_micros()),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        ValueKind::Date => {
            let mut builder = Date32Builder::with_capacity(batch.len());
            for row in batch {
                match &row.values[index] {
                    Value::Date(d) => {
                        builder.append_value(d.num_days_from_ce() - UNIX_EPOCH_CE_DAYS)
                    }
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
        ValueKind::Json => {
            let mut builder = StringBuilder::new();
            for row in batch {
                match &row.values[index] {
                    // serde_json's Display renders compact JSON
                    Value::Json(v) => builder.append_value(v.to_string()),
                    Value::Null => builder.append_null(),
                    other => return Err(mismatch(other)),
                }
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Array, Float64Array, Int64Array, StringArray};
    use chrono::NaiveDate;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_infer_basic_kinds() {
        let batch = vec![Row::new([
            Value::Int(1),
            Value::Text("a".into()),
            Value::Bool(true),
        ])];
        let schema = Schema::infer(&names(&["id", "name", "active"]), &batch).unwrap();
        assert_eq!(schema.columns()[0].kind, ValueKind::Int);
        assert_eq!(schema.columns()[1].kind, ValueKind::Text);
        assert_eq!(schema.columns()[2].kind, ValueKind::Bool);
    }

    #[test]
    fn test_infer_int_and_float_widen_to_float() {
        let batch = vec![
            Row::new([Value::Int(1)]),
            Row::new([Value::Float(2.5)]),
        ];
        let schema = Schema::infer(&names(&["v"]), &batch).unwrap();
        assert_eq!(schema.columns()[0].kind, ValueKind::Float);
    }

    #[test]
    fn test_infer_all_null_defaults_to_text() {
        let batch = vec![Row::new([Value::Null]), Row::new([Value::Null])];
        let schema = Schema::infer(&names(&["v"]), &batch).unwrap();
        assert_eq!(schema.columns()[0].kind, ValueKind::Text);
    }

    #[test]
    fn test_infer_null_then_value_takes_value_kind() {
        let batch = vec![Row::new([Value::Null]), Row::new([Value::Int(3)])];
        let schema = Schema::infer(&names(&["v"]), &batch).unwrap();
        assert_eq!(schema.columns()[0].kind, ValueKind::Int);
    }

    #[test]
    fn test_infer_conflicting_kinds_fail() {
        let batch = vec![
            Row::new([Value::Bool(true)]),
            Row::new([Value::Text("x".into())]),
        ];
        let err = Schema::infer(&names(&["v"]), &batch).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaMismatchError(_)));
    }

    #[test]
    fn test_infer_rejects_ragged_rows() {
        let batch = vec![Row::new([Value::Int(1), Value::Int(2)])];
        let err = Schema::infer(&names(&["only"]), &batch).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaMismatchError(_)));
    }

    #[test]
    fn test_to_record_batch_values() {
        let batch = vec![
            Row::new([Value::Int(1), Value::Text("a".into()), Value::Float(0.5)]),
            Row::new([Value::Null, Value::Null, Value::Int(2)]),
        ];
        let schema = Schema::infer(&names(&["id", "name", "ratio"]), &batch).unwrap();
        let arrow = schema.to_arrow();
        let rb = to_record_batch(&arrow, &schema, &batch).unwrap();

        assert_eq!(rb.num_rows(), 2);
        let ids = rb.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(0), 1);
        assert!(ids.is_null(1));
        let name = rb.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(name.value(0), "a");
        let ratio = rb
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(ratio.value(0), 0.5);
        // Int widened into the Float column
        assert_eq!(ratio.value(1), 2.0);
    }

    #[test]
    fn test_to_record_batch_rejects_wrong_kind() {
        let first = vec![Row::new([Value::Int(1)])];
        let schema = Schema::infer(&names(&["v"]), &first).unwrap();
        let arrow = schema.to_arrow();

        let bad = vec![Row::new([Value::Text("nope".into())])];
        let err = to_record_batch(&arrow, &schema, &bad).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaMismatchError(_)));
    }

    #[test]
    fn test_temporal_conversion() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 11).unwrap();
        let ts = date.and_hms_opt(0, 0, 1).unwrap();
        let batch = vec![Row::new([Value::Date(date), Value::Timestamp(ts)])];
        let schema = Schema::infer(&names(&["d", "t"]), &batch).unwrap();
        let rb = to_record_batch(&schema.to_arrow(), &schema, &batch).unwrap();

        let days = rb
            .column(0)
            .as_any()
            .downcast_ref::<arrow_array::Date32Array>()
            .unwrap();
        assert_eq!(days.value(0), 10);
        let micros = rb
            .column(1)
            .as_any()
            .downcast_ref::<arrow_array::TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(micros.value(0), (10 * 86_400 + 1) * 1_000_000);
    }
}
