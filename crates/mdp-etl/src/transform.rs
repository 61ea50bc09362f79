//! Column normalization
//!
//! Applies the per-column coercion rules declared by a kind's schema. A cell
//! that refuses to coerce keeps its original representation and is recorded
//! as a [`SchemaParseWarning`]; rows are never dropped.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::catalog::{ColumnType, DatasetKind};
use crate::dataset::{CellValue, RawDataset};

/// A non-fatal coercion failure, kept for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaParseWarning {
    pub column: String,
    pub row: usize,
    pub reason: String,
}

/// Normalization output: the coerced dataset plus any warnings.
#[derive(Debug)]
pub struct NormalizeReport {
    pub dataset: RawDataset,
    pub warnings: Vec<SchemaParseWarning>,
}

/// Stateless column normalizer.
pub struct Transformer;

impl Transformer {
    /// Coerce every declared column of `raw` to its schema type.
    ///
    /// Output row count always equals input row count. Columns present in the
    /// data but absent from the schema pass through untouched.
    pub fn normalize(raw: RawDataset, kind: DatasetKind) -> NormalizeReport {
        let mut warnings = Vec::new();
        let mut dataset = raw;

        for spec in kind.schema() {
            let Some(col) = dataset.column_index(spec.name) else {
                // The loader fills missing declared columns with nulls.
                debug!(dataset = %kind, column = spec.name, "Declared column absent from source");
                continue;
            };

            for (row_idx, row) in dataset.rows.iter_mut().enumerate() {
                let cell = &mut row[col];
                if cell.matches(spec.ty) {
                    continue;
                }
                match coerce(cell, spec.ty) {
                    Ok(coerced) => *cell = coerced,
                    Err(reason) => {
                        warn!(
                            dataset = %kind,
                            column = spec.name,
                            row = row_idx,
                            reason = %reason,
                            "Column coercion failed, keeping original value"
                        );
                        warnings.push(SchemaParseWarning {
                            column: spec.name.to_string(),
                            row: row_idx,
                            reason,
                        });
                    }
                }
            }
        }

        NormalizeReport { dataset, warnings }
    }
}

/// Coerce a single cell to the target type. `Err` carries the reason and
/// leaves the caller's cell untouched.
fn coerce(cell: &CellValue, ty: ColumnType) -> std::result::Result<CellValue, String> {
    let text = match cell {
        CellValue::Text(s) => s.trim(),
        // Float-typed exports of integer columns are common; narrow when exact.
        CellValue::Float(f) if ty == ColumnType::Integer && f.fract() == 0.0 => {
            return Ok(CellValue::Integer(*f as i64));
        }
        other => return Err(format!("cannot coerce {:?} to {:?}", other, ty)),
    };

    match ty {
        ColumnType::Text => Ok(CellValue::Text(text.to_string())),
        ColumnType::Integer => text
            .parse::<i64>()
            .map(CellValue::Integer)
            .or_else(|_| {
                // "3.0" style values from float-typed source exports.
                text.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| CellValue::Integer(f as i64))
                    .ok_or_else(|| format!("not an integer: {:?}", text))
            }),
        ColumnType::Float => text
            .parse::<f64>()
            .map(CellValue::Float)
            .map_err(|_| format!("not a float: {:?}", text)),
        ColumnType::Date => parse_date(text)
            .map(CellValue::Date)
            .ok_or_else(|| format!("not a date: {:?}", text)),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| {
            // Timestamp-style exports carry a time component.
            NaiveDate::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        })
        .ok()
}
