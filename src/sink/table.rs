//! In-memory columnar table.

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::{DataType, Field, Schema as ArrowSchema, SchemaRef};

use crate::driver::RowBatch;
use crate::error::Result;

use super::{to_record_batch, ColumnarSink, Schema};

/// The materialized result of one extraction: an Arrow schema plus the
/// record batches in arrival order.
///
/// Table mode is all-or-nothing; a failed extraction never yields a partial
/// `Table`. A zero-row extraction yields the cursor's column names typed as
/// `DataType::Null` and no batches.
#[derive(Clone, Debug)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    num_rows: usize,
}

impl Table {
    /// A table with the given column names and no rows.
    pub fn empty(column_names: &[String]) -> Self {
        let fields: Vec<Field> = column_names
            .iter()
            .map(|name| Field::new(name.clone(), DataType::Null, true))
            .collect();
        Self {
            schema: Arc::new(ArrowSchema::new(fields)),
            batches: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Record batches in arrival order, one per fetched row batch.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.fields().iter().map(|f| f.name().as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }
}

/// Sink accumulating batches into a [`Table`].
pub struct TableSink {
    column_names: Vec<String>,
    /// Inferred on the first non-empty batch
    schema: Option<(Schema, SchemaRef)>,
    batches: Vec<RecordBatch>,
    num_rows: usize,
}

impl TableSink {
    pub fn new(column_names: Vec<String>) -> Self {
        Self {
            column_names,
            schema: None,
            batches: Vec::new(),
            num_rows: 0,
        }
    }

    /// Consume the sink, producing the accumulated table.
    pub fn into_table(self) -> Table {
        match self.schema {
            Some((_, arrow)) => Table {
                schema: arrow,
                batches: self.batches,
                num_rows: self.num_rows,
            },
            None => Table::empty(&self.column_names),
        }
    }
}

impl ColumnarSink for TableSink {
    fn write_batch(&mut self, batch: &RowBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.schema.is_none() {
            let schema = Schema::infer(&self.column_names, batch)?;
            let arrow = schema.to_arrow();
            self.schema = Some((schema, arrow));
        }
        let (schema, arrow) = self.schema.as_ref().expect("schema set above");
        let record_batch = to_record_batch(arrow, schema, batch)?;
        self.num_rows += record_batch.num_rows();
        self.batches.push(record_batch);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
