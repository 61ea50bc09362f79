//! Parquet encode/decode for staged artifacts
//!
//! Staged files are GZIP-compressed parquet. A column whose cells all coerced
//! to the declared type is written with that Arrow type; a column with any
//! uncoerced stragglers falls back to Utf8 so normalization failures never
//! lose data.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use mdp_common::{EtlError, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;

use crate::catalog::{ColumnType, DatasetKind};
use crate::dataset::{CellValue, RawDataset};

/// Encode a dataset to compressed parquet bytes.
pub fn encode(dataset: &RawDataset, kind: DatasetKind) -> Result<Vec<u8>> {
    let mut fields = Vec::with_capacity(dataset.num_columns());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(dataset.num_columns());

    for (col, name) in dataset.columns.iter().enumerate() {
        let declared = kind
            .schema()
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.ty);
        let effective = effective_type(dataset, col, declared);

        fields.push(Field::new(name, arrow_type(effective), true));
        arrays.push(build_array(dataset, col, effective));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| EtlError::Staging(format!("build record batch: {}", e)))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::GZIP(GzipLevel::default()))
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))
        .map_err(|e| EtlError::Staging(format!("open parquet writer: {}", e)))?;
    writer
        .write(&batch)
        .map_err(|e| EtlError::Staging(format!("write parquet: {}", e)))?;
    writer
        .close()
        .map_err(|e| EtlError::Staging(format!("close parquet writer: {}", e)))?;

    Ok(buf)
}

/// Decode parquet bytes back into a dataset.
pub fn decode(bytes: Vec<u8>) -> Result<RawDataset> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
        .map_err(|e| EtlError::Staging(format!("open parquet reader: {}", e)))?;

    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    let mut dataset = RawDataset::new(columns);

    let reader = builder
        .build()
        .map_err(|e| EtlError::Staging(format!("build parquet reader: {}", e)))?;

    for batch in reader {
        let batch = batch.map_err(|e| EtlError::Staging(format!("read parquet batch: {}", e)))?;
        let mut cols = Vec::with_capacity(batch.num_columns());
        for column in batch.columns() {
            cols.push(column_cells(column)?);
        }
        for row in 0..batch.num_rows() {
            let cells = cols.iter().map(|c| c[row].clone()).collect();
            dataset.push_row(cells)?;
        }
    }

    Ok(dataset)
}

/// The Arrow-facing type a column is written with: the declared type when
/// every cell matches it, Utf8 otherwise.
fn effective_type(dataset: &RawDataset, col: usize, declared: Option<ColumnType>) -> ColumnType {
    let Some(ty) = declared else {
        return ColumnType::Text;
    };
    let all_match = dataset.rows.iter().all(|row| row[col].matches(ty));
    if all_match {
        ty
    } else {
        ColumnType::Text
    }
}

fn arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::Text => DataType::Utf8,
        ColumnType::Integer => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::Date => DataType::Date32,
    }
}

fn build_array(dataset: &RawDataset, col: usize, ty: ColumnType) -> ArrayRef {
    match ty {
        ColumnType::Text => {
            let values: Vec<Option<String>> = dataset
                .rows
                .iter()
                .map(|row| match &row[col] {
                    CellValue::Null => None,
                    cell => Some(cell.to_string()),
                })
                .collect();
            Arc::new(StringArray::from(values))
        }
        ColumnType::Integer => {
            let values: Vec<Option<i64>> = dataset
                .rows
                .iter()
                .map(|row| match &row[col] {
                    CellValue::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect();
            Arc::new(Int64Array::from(values))
        }
        ColumnType::Float => {
            let values: Vec<Option<f64>> = dataset.rows.iter().map(|row| row[col].as_f64()).collect();
            Arc::new(Float64Array::from(values))
        }
        ColumnType::Date => {
            let values: Vec<Option<i32>> = dataset
                .rows
                .iter()
                .map(|row| match &row[col] {
                    CellValue::Date(d) => Some(Date32Type::from_naive_date(*d)),
                    _ => None,
                })
                .collect();
            Arc::new(Date32Array::from(values))
        }
    }
}

fn column_cells(array: &ArrayRef) -> Result<Vec<CellValue>> {
    let cells = match array.data_type() {
        DataType::Utf8 => {
            let typed = downcast::<StringArray>(array)?;
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::Text(typed.value(i).to_string())
                    }
                })
                .collect()
        }
        DataType::Int64 => {
            let typed = downcast::<Int64Array>(array)?;
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::Integer(typed.value(i))
                    }
                })
                .collect()
        }
        DataType::Float64 => {
            let typed = downcast::<Float64Array>(array)?;
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::Float(typed.value(i))
                    }
                })
                .collect()
        }
        DataType::Date32 => {
            let typed = downcast::<Date32Array>(array)?;
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        CellValue::Null
                    } else {
                        CellValue::Date(Date32Type::to_naive_date(typed.value(i)))
                    }
                })
                .collect()
        }
        other => {
            return Err(EtlError::Staging(format!(
                "unsupported column type in staged file: {}",
                other
            )))
        }
    };

    Ok(cells)
}

fn downcast<T: 'static>(array: &ArrayRef) -> Result<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| EtlError::Internal("array downcast mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn movies_subset() -> RawDataset {
        let mut ds = RawDataset::new(vec![
            "identifier".into(),
            "popularity".into(),
            "release_date".into(),
            "vote_count".into(),
        ]);
        ds.push_row(vec![
            CellValue::Text("m1".into()),
            CellValue::Float(7.5),
            CellValue::Date(NaiveDate::from_ymd_opt(2003, 10, 15).unwrap()),
            CellValue::Integer(120),
        ])
        .unwrap();
        ds.push_row(vec![
            CellValue::Text("m2".into()),
            CellValue::Null,
            CellValue::Null,
            CellValue::Null,
        ])
        .unwrap();
        ds
    }

    #[test]
    fn round_trip_typed_columns() {
        let original = movies_subset();
        let bytes = encode(&original, DatasetKind::Movies).unwrap();
        let decoded = decode(bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn uncoerced_column_falls_back_to_text() {
        let mut ds = RawDataset::new(vec!["identifier".into(), "release_date".into()]);
        ds.push_row(vec![
            CellValue::Text("m1".into()),
            CellValue::Date(NaiveDate::from_ymd_opt(2003, 10, 15).unwrap()),
        ])
        .unwrap();
        ds.push_row(vec![
            CellValue::Text("m2".into()),
            CellValue::Text("next tuesday".into()),
        ])
        .unwrap();

        let bytes = encode(&ds, DatasetKind::Movies).unwrap();
        let decoded = decode(bytes).unwrap();

        // Both cells stringly typed, nothing dropped.
        assert_eq!(decoded.rows[0][1], CellValue::Text("2003-10-15".into()));
        assert_eq!(decoded.rows[1][1], CellValue::Text("next tuesday".into()));
    }

    #[test]
    fn zero_row_dataset_round_trips() {
        let ds = RawDataset::new(vec!["identifier".into(), "username".into()]);
        let bytes = encode(&ds, DatasetKind::Users).unwrap();
        let decoded = decode(bytes).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.columns, ds.columns);
    }
}
