//! Storage backend (Arrow/Parquet)
//!
//! **Append-Only Write Pattern**:
//! - Archived experiments are written once, as whole record batches
//! - Archive files are never updated in place; a later archive call writes a
//!   new file next to the earlier ones
//! - Reads load every batch of a file into memory

use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::Path;

/// Storage engine for Arrow/Parquet data
#[derive(Debug, Default)]
pub struct StorageEngine {
    batches: Vec<RecordBatch>,
}

impl StorageEngine {
    /// Create a new storage engine from existing batches
    #[must_use]
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = File::open(path.as_ref()).map_err(|e| {
            Error::StorageError(format!("Failed to open Parquet file: {e}"))
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::StorageError(format!("Failed to parse Parquet file: {e}"))
        })?;

        let reader = builder.build().map_err(|e| {
            Error::StorageError(format!("Failed to create Parquet reader: {e}"))
        })?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::StorageError(format!("Failed to read record batch: {e}"))
            })?;
            batches.push(batch);
        }

        Ok(Self { batches })
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total rows across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Append a batch
    ///
    /// # Errors
    ///
    /// Returns error if batch schema doesn't match existing batches
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if !self.batches.is_empty() {
            let existing_schema = self.batches[0].schema();
            if batch.schema() != existing_schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    existing_schema,
                    batch.schema()
                )));
            }
        }
        self.batches.push(batch);
        Ok(())
    }

    /// Write every batch into `file` as one Parquet file, then fsync it.
    ///
    /// # Errors
    ///
    /// Returns error if there is nothing to write or the writer fails
    pub fn write_parquet(&self, file: File) -> Result<()> {
        let schema = self
            .batches
            .first()
            .map(RecordBatch::schema)
            .ok_or_else(|| Error::StorageError("No batches to write".to_string()))?;

        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        let file = writer.into_inner()?;
        file.sync_all()?;
        Ok(())
    }
}
