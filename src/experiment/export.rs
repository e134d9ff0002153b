//! Columnar trial summaries (Arrow `RecordBatch` / Parquet)
//!
//! One row per trial:
//!
//! ```text
//! trial_id | status | learning_rate | dropout_rate | dense_neurons | batch_size | epochs | epochs_run | final_metric
//! u64      | utf8   | f64           | f64          | u32           | u32        | u32    | u32        | f64 (nullable)
//! ```

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::ExperimentRecord;
use crate::{Error, Result};

/// Arrow schema of the trial summary table.
#[must_use]
pub fn summary_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("trial_id", DataType::UInt64, false),
        Field::new("status", DataType::Utf8, false),
        Field::new("learning_rate", DataType::Float64, false),
        Field::new("dropout_rate", DataType::Float64, false),
        Field::new("dense_neurons", DataType::UInt32, false),
        Field::new("batch_size", DataType::UInt32, false),
        Field::new("epochs", DataType::UInt32, false),
        Field::new("epochs_run", DataType::UInt32, false),
        Field::new("final_metric", DataType::Float64, true),
    ]))
}

/// Build the summary table for `records`.
///
/// # Errors
///
/// Returns `Error::Arrow` if the columns do not match the schema.
pub fn summary_batch(records: &[ExperimentRecord]) -> Result<RecordBatch> {
    let trial_id = UInt64Array::from_iter_values(records.iter().map(ExperimentRecord::trial_id));
    let status = StringArray::from_iter_values(records.iter().map(|r| r.status().as_str()));
    let lr = Float64Array::from_iter_values(records.iter().map(|r| r.params().learning_rate()));
    let dropout =
        Float64Array::from_iter_values(records.iter().map(|r| r.params().dropout_rate()));
    let dense = UInt32Array::from_iter_values(records.iter().map(|r| r.params().dense_neurons()));
    let batch = UInt32Array::from_iter_values(records.iter().map(|r| r.params().batch_size()));
    let epochs = UInt32Array::from_iter_values(records.iter().map(|r| r.params().epochs()));
    let epochs_run = UInt32Array::from_iter_values(
        records
            .iter()
            .map(|r| u32::try_from(r.metrics().len()).unwrap_or(u32::MAX)),
    );
    let final_metric: Float64Array = records.iter().map(ExperimentRecord::final_metric).collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(trial_id),
        Arc::new(status),
        Arc::new(lr),
        Arc::new(dropout),
        Arc::new(dense),
        Arc::new(batch),
        Arc::new(epochs),
        Arc::new(epochs_run),
        Arc::new(final_metric),
    ];
    Ok(RecordBatch::try_new(summary_schema(), columns)?)
}

/// Write the summary table for `records` to a Parquet file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_parquet(records: &[ExperimentRecord], path: &Path) -> Result<()> {
    let batch = summary_batch(records)?;
    let file = File::create(path).map_err(|e| {
        Error::StorageError(format!("Failed to create {}: {e}", path.display()))
    })?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;
    use crate::search::{HyperparameterSet, SearchSpace, TrialStatus};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn records() -> Vec<ExperimentRecord> {
        let params = HyperparameterSet::new(&SearchSpace::default(), 1e-3, 0.2, 64, 16, 5).unwrap();
        vec![
            ExperimentRecord::builder("s", 0, params.clone(), TrialStatus::Completed)
                .metric(0.5)
                .metric(0.6)
                .final_metric(0.6)
                .build(),
            ExperimentRecord::builder("s", 1, params, TrialStatus::Failed)
                .failure_reason("non-finite loss")
                .build(),
        ]
    }

    #[test]
    fn test_summary_batch_shape() {
        let batch = summary_batch(&records()).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 9);

        let final_metric = batch
            .column(8)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!(final_metric.is_valid(0));
        assert!(final_metric.is_null(1));
    }

    #[test]
    fn test_parquet_round_trip_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.parquet");
        write_parquet(&records(), &path).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);
    }
}
