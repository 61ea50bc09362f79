//! In-memory tabular representation
//!
//! [`RawDataset`] is the transient row/column form data takes between fetch,
//! normalization, and staging. It is never persisted; the staged parquet file
//! is the durable form.

use chrono::NaiveDate;
use mdp_common::{EtlError, Result};

use crate::catalog::ColumnType;

/// One cell of tabular data.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Whether the cell already matches the given logical type. Nulls match
    /// every type.
    pub fn matches(&self, ty: ColumnType) -> bool {
        match (self, ty) {
            (CellValue::Null, _) => true,
            (CellValue::Text(_), ColumnType::Text) => true,
            (CellValue::Integer(_), ColumnType::Integer) => true,
            // An integer is an exact float; loads accept it in float columns.
            (CellValue::Integer(_), ColumnType::Float) => true,
            (CellValue::Float(_), ColumnType::Float) => true,
            (CellValue::Date(_), ColumnType::Date) => true,
            _ => false,
        }
    }

    /// Numeric view of the cell, used by aggregate evaluation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Tabular data in memory: a header plus rows of cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawDataset {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row. Row arity must match the header.
    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(EtlError::Parse(format!(
                "row has {} fields, header has {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a named column in the header.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}
