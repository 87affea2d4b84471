//! Parquet persistence of node tables and panels.
//!
//! Node tables hold one row per country (`country` Utf8 plus one Float64
//! value column). Panels hold `country` Utf8, `year` Int64 and one Float64
//! column per panel column; missing values are written as nulls and read
//! back as NaN.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::panel::{Panel, PanelError, PanelKey};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("Parquet read/write error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Panel error: {0}")]
    Panel(#[from] PanelError),

    #[error("column {column}: {message}")]
    Schema { column: String, message: String },
}

fn schema_error(column: &str, message: &str) -> TableError {
    TableError::Schema {
        column: column.to_string(),
        message: message.to_string(),
    }
}

fn float_array(values: &[f64]) -> ArrayRef {
    let cells: Vec<Option<f64>> = values.iter().map(|&v| (!v.is_nan()).then_some(v)).collect();
    Arc::new(Float64Array::from(cells))
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<(), TableError> {
    let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>, TableError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<_>, _> = reader.collect();
    Ok(batches?)
}

fn strings<'a>(batch: &'a RecordBatch, column: &str) -> Result<&'a StringArray, TableError> {
    batch
        .column_by_name(column)
        .ok_or_else(|| schema_error(column, "missing"))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| schema_error(column, "expected Utf8"))
}

fn integers<'a>(batch: &'a RecordBatch, column: &str) -> Result<&'a Int64Array, TableError> {
    batch
        .column_by_name(column)
        .ok_or_else(|| schema_error(column, "missing"))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| schema_error(column, "expected Int64"))
}

fn floats<'a>(batch: &'a RecordBatch, column: &str) -> Result<&'a Float64Array, TableError> {
    batch
        .column_by_name(column)
        .ok_or_else(|| schema_error(column, "missing"))?
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| schema_error(column, "expected Float64"))
}

fn float_at(array: &Float64Array, row: usize) -> f64 {
    if array.is_null(row) {
        f64::NAN
    } else {
        array.value(row)
    }
}

/// Write a per-country value table such as `output` or `gdp`
pub fn write_node_table(path: &Path, column: &str, rows: &[(String, f64)]) -> Result<(), TableError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("country", DataType::Utf8, false),
        Field::new(column, DataType::Float64, true),
    ]));
    let countries: Vec<&str> = rows.iter().map(|(c, _)| c.as_str()).collect();
    let values: Vec<f64> = rows.iter().map(|(_, v)| *v).collect();
    let batch = RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(countries)), float_array(&values)])?;

    write_batch(path, &batch)?;
    log::debug!("Wrote {} rows of {} to {}", rows.len(), column, path.display());
    Ok(())
}

pub fn read_node_table(path: &Path, column: &str) -> Result<BTreeMap<String, f64>, TableError> {
    let mut table = BTreeMap::new();
    for batch in read_batches(path)? {
        let countries = strings(&batch, "country")?;
        let values = floats(&batch, column)?;
        for row in 0..batch.num_rows() {
            table.insert(countries.value(row).to_string(), float_at(values, row));
        }
    }
    Ok(table)
}

/// Write every column of `panel` along with its keys
pub fn write_panel(path: &Path, panel: &Panel) -> Result<(), TableError> {
    let mut fields = vec![
        Field::new("country", DataType::Utf8, false),
        Field::new("year", DataType::Int64, false),
    ];
    let countries: Vec<&str> = panel.keys().iter().map(|k| k.country.as_str()).collect();
    let years: Vec<i64> = panel.keys().iter().map(|k| k.year).collect();
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from(countries)), Arc::new(Int64Array::from(years))];

    for name in panel.column_names() {
        fields.push(Field::new(name, DataType::Float64, true));
        columns.push(float_array(panel.require(name)?));
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    write_batch(path, &batch)?;
    log::info!(
        "Wrote panel with {} rows and {} columns to {}",
        panel.len(),
        batch.num_columns(),
        path.display()
    );
    Ok(())
}

pub fn read_panel(path: &Path) -> Result<Panel, TableError> {
    let batches = read_batches(path)?;
    let mut keys = Vec::new();
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for batch in &batches {
        let countries = strings(batch, "country")?;
        let years = integers(batch, "year")?;
        for row in 0..batch.num_rows() {
            keys.push(PanelKey::new(countries.value(row), years.value(row)));
        }

        let schema = batch.schema();
        for field in schema.fields() {
            let name = field.name();
            if name == "country" || name == "year" {
                continue;
            }
            let values = floats(batch, name)?;
            columns
                .entry(name.clone())
                .or_default()
                .extend((0..batch.num_rows()).map(|row| float_at(values, row)));
        }
    }

    let mut panel = Panel::new(keys)?;
    for (name, values) in columns {
        panel.insert_column(name, values)?;
    }
    Ok(panel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_node_table_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gdp.parquet");
        let rows = vec![("AUS".to_string(), 41.0), ("FRA".to_string(), f64::NAN), ("USA".to_string(), 102.5)];
        write_node_table(&path, "gdp", &rows).unwrap();

        let table = read_node_table(&path, "gdp").unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table["AUS"], 41.0);
        assert!(table["FRA"].is_nan());
        assert!(matches!(read_node_table(&path, "output"), Err(TableError::Schema { .. })));
    }

    #[test]
    fn test_panel_round_trip_keeps_missing_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("panel.parquet");
        let mut panel = Panel::new(vec![PanelKey::new("AUS", 2005), PanelKey::new("AUS", 2006)]).unwrap();
        panel.insert_column("log_gdp", vec![1.5, 1.75]).unwrap();
        panel.insert_column("lag_log_gdp", vec![f64::NAN, 1.5]).unwrap();
        write_panel(&path, &panel).unwrap();

        let back = read_panel(&path).unwrap();
        assert_eq!(back.keys(), panel.keys());
        assert_eq!(back.column("log_gdp").unwrap(), &[1.5, 1.75]);
        let lag = back.column("lag_log_gdp").unwrap();
        assert!(lag[0].is_nan());
        assert_eq!(lag[1], 1.5);
    }
}
