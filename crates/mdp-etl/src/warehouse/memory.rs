//! In-memory warehouse for tests
//!
//! Implements the full [`Warehouse`] contract against process memory,
//! including evaluation of derived-table and view specs, so pipeline tests
//! can assert warehouse semantics without a live store. Also supports
//! targeted failure injection for fail-fast and chunk-failure tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use mdp_common::{EtlError, Result};
use tokio::sync::RwLock;

use super::{DerivedTableSpec, TableRef, ViewSpec, Warehouse};
use crate::catalog::ColumnSpec;
use crate::dataset::CellValue;

#[derive(Debug, Clone)]
struct StoredTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone)]
struct StoredView {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, StoredTable>,
    views: HashMap<String, StoredView>,
    create_failures: HashSet<String>,
    append_failures: HashMap<String, HashSet<usize>>,
    append_counts: HashMap<String, usize>,
    append_sizes: HashMap<String, Vec<usize>>,
}

/// In-memory [`Warehouse`] implementation.
#[derive(Default)]
pub struct MemoryWarehouse {
    inner: RwLock<Inner>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_table` for the named table fail with `QueryExecution`.
    pub async fn inject_create_failure(&self, table_name: &str) {
        self.inner
            .write()
            .await
            .create_failures
            .insert(table_name.to_string());
    }

    /// Make the `nth` (0-based) append call against the named table fail.
    pub async fn inject_append_failure(&self, table_name: &str, nth: usize) {
        self.inner
            .write()
            .await
            .append_failures
            .entry(table_name.to_string())
            .or_default()
            .insert(nth);
    }

    /// Rows of a table, for assertions.
    pub async fn table_rows(&self, table: &TableRef) -> Option<Vec<Vec<CellValue>>> {
        let inner = self.inner.read().await;
        inner.tables.get(&table.qualified()).map(|t| t.rows.clone())
    }

    /// Column names of a table, for assertions.
    pub async fn table_columns(&self, table: &TableRef) -> Option<Vec<String>> {
        let inner = self.inner.read().await;
        inner
            .tables
            .get(&table.qualified())
            .map(|t| t.columns.clone())
    }

    /// Row counts of each committed append against a table, in call order.
    pub async fn append_sizes(&self, table: &TableRef) -> Vec<usize> {
        let inner = self.inner.read().await;
        inner
            .append_sizes
            .get(&table.table)
            .cloned()
            .unwrap_or_default()
    }

    /// Columns and rows of a view, for assertions.
    pub async fn view_rows(&self, view: &TableRef) -> Option<(Vec<String>, Vec<Vec<CellValue>>)> {
        let inner = self.inner.read().await;
        inner
            .views
            .get(&view.qualified())
            .map(|v| (v.columns.clone(), v.rows.clone()))
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        Ok(self.inner.read().await.tables.contains_key(&table.qualified()))
    }

    async fn create_table(&self, table: &TableRef, schema: &[ColumnSpec]) -> Result<()> {
        let mut inner = self.inner.write().await;

        if inner.create_failures.contains(&table.table) {
            return Err(EtlError::QueryExecution(format!(
                "injected create failure for {}",
                table
            )));
        }
        if inner.tables.contains_key(&table.qualified()) {
            return Err(EtlError::TableAlreadyExists(table.qualified()));
        }

        inner.tables.insert(
            table.qualified(),
            StoredTable {
                columns: schema.iter().map(|s| s.name.to_string()).collect(),
                rows: Vec::new(),
            },
        );

        Ok(())
    }

    async fn append_rows(
        &self,
        table: &TableRef,
        schema: &[ColumnSpec],
        rows: &[Vec<CellValue>],
    ) -> Result<u64> {
        let mut inner = self.inner.write().await;

        let call = *inner.append_counts.get(&table.table).unwrap_or(&0);
        *inner.append_counts.entry(table.table.clone()).or_default() += 1;
        if inner
            .append_failures
            .get(&table.table)
            .is_some_and(|fails| fails.contains(&call))
        {
            return Err(EtlError::QueryExecution(format!(
                "injected append failure for {}",
                table
            )));
        }

        let stored = inner
            .tables
            .get_mut(&table.qualified())
            .ok_or_else(|| EtlError::QueryExecution(format!("table {} does not exist", table)))?;

        // The store rejects rows violating the declared schema, chunk-wide.
        for row in rows {
            if row.len() != schema.len() {
                return Err(EtlError::QueryExecution(format!(
                    "row arity {} does not match schema arity {}",
                    row.len(),
                    schema.len()
                )));
            }
            for (spec, cell) in schema.iter().zip(row) {
                if spec.required && cell.is_null() {
                    return Err(EtlError::QueryExecution(format!(
                        "null in required column {}",
                        spec.name
                    )));
                }
                if !cell.matches(spec.ty) {
                    return Err(EtlError::QueryExecution(format!(
                        "value {:?} does not match column {} type {:?}",
                        cell, spec.name, spec.ty
                    )));
                }
            }
        }

        stored.rows.extend(rows.iter().cloned());
        inner
            .append_sizes
            .entry(table.table.clone())
            .or_default()
            .push(rows.len());
        Ok(rows.len() as u64)
    }

    async fn rebuild_derived(&self, spec: &DerivedTableSpec) -> Result<()> {
        let mut inner = self.inner.write().await;

        let source = inner
            .tables
            .get(&spec.source.qualified())
            .ok_or_else(|| {
                EtlError::QueryExecution(format!("source table {} does not exist", spec.source))
            })?
            .clone();

        let indices = spec
            .columns
            .iter()
            .map(|name| {
                source.columns.iter().position(|c| c == name).ok_or_else(|| {
                    EtlError::QueryExecution(format!(
                        "column {} missing from source {}",
                        name, spec.source
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let filter_idx = source
            .columns
            .iter()
            .position(|c| *c == spec.require_nonnull)
            .ok_or_else(|| {
                EtlError::QueryExecution(format!(
                    "filter column {} missing from source {}",
                    spec.require_nonnull, spec.source
                ))
            })?;

        let rows = source
            .rows
            .iter()
            .filter(|row| !row[filter_idx].is_null())
            .map(|row| indices.iter().map(|i| row[*i].clone()).collect())
            .collect();

        // Whole-table replace; layout metadata carries no meaning in memory.
        inner.tables.insert(
            spec.table.qualified(),
            StoredTable {
                columns: spec.columns.clone(),
                rows,
            },
        );

        Ok(())
    }

    async fn view_exists(&self, view: &TableRef) -> Result<bool> {
        Ok(self.inner.read().await.views.contains_key(&view.qualified()))
    }

    async fn create_view(&self, spec: &ViewSpec) -> Result<()> {
        let mut inner = self.inner.write().await;

        if inner.views.contains_key(&spec.view.qualified()) {
            return Err(EtlError::ViewAlreadyExists(spec.view.qualified()));
        }

        let rows = evaluate_view(&inner, spec)?;
        let mut columns = spec.group_columns.clone();
        columns.push(spec.aggregate_alias.clone());

        inner
            .views
            .insert(spec.view.qualified(), StoredView { columns, rows });

        Ok(())
    }
}

/// Evaluate the view spec against current table contents: inner join on the
/// key, group per left row, `avg` aggregate, `count(*) > min_support`
/// predicate, ordered by the aggregate descending.
fn evaluate_view(inner: &Inner, spec: &ViewSpec) -> Result<Vec<Vec<CellValue>>> {
    let left = inner.tables.get(&spec.left.qualified()).ok_or_else(|| {
        EtlError::QueryExecution(format!("view source {} does not exist", spec.left))
    })?;
    let right = inner.tables.get(&spec.right.qualified()).ok_or_else(|| {
        EtlError::QueryExecution(format!("view source {} does not exist", spec.right))
    })?;

    fn position(table: &StoredTable, name: &str, side: &TableRef) -> Result<usize> {
        table
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| EtlError::QueryExecution(format!("column {} missing from {}", name, side)))
    }

    let left_key = position(left, &spec.join_key, &spec.left)?;
    let right_key = position(right, &spec.join_key, &spec.right)?;
    let right_agg = position(right, &spec.aggregate_column, &spec.right)?;
    let group_indices = spec
        .group_columns
        .iter()
        .map(|name| position(left, name, &spec.left))
        .collect::<Result<Vec<_>>>()?;

    // count(*) counts every joined row; avg ignores non-numeric cells.
    let mut matches: HashMap<String, (i64, Vec<f64>)> = HashMap::new();
    for row in &right.rows {
        let key = &row[right_key];
        if key.is_null() {
            continue;
        }
        let entry = matches.entry(key.to_string()).or_default();
        entry.0 += 1;
        if let Some(v) = row[right_agg].as_f64() {
            entry.1.push(v);
        }
    }

    let mut rows = Vec::new();
    for row in &left.rows {
        let key = &row[left_key];
        if key.is_null() {
            continue;
        }
        let Some((count, values)) = matches.get(&key.to_string()) else {
            continue;
        };
        if *count <= spec.min_support {
            continue;
        }

        let average = if values.is_empty() {
            CellValue::Null
        } else {
            CellValue::Float(values.iter().sum::<f64>() / values.len() as f64)
        };

        let mut out: Vec<CellValue> = group_indices.iter().map(|i| row[*i].clone()).collect();
        out.push(average);
        rows.push(out);
    }

    // Order by the aggregate descending; null averages sort last.
    rows.sort_by(|a, b| {
        let av = a.last().and_then(CellValue::as_f64);
        let bv = b.last().and_then(CellValue::as_f64);
        bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetKind;

    #[tokio::test]
    async fn create_table_twice_is_already_exists() {
        let warehouse = MemoryWarehouse::new();
        let table = TableRef::new("p", "n", "stg_users");
        let schema = DatasetKind::Users.schema();

        warehouse.create_table(&table, schema).await.unwrap();
        let err = warehouse.create_table(&table, schema).await.unwrap_err();
        assert!(matches!(err, EtlError::TableAlreadyExists(_)));
    }

    #[tokio::test]
    async fn append_rejects_type_mismatch() {
        let warehouse = MemoryWarehouse::new();
        let table = TableRef::new("p", "n", "stg_ratings");
        let schema = DatasetKind::Ratings.schema();
        warehouse.create_table(&table, schema).await.unwrap();

        let row = vec![
            CellValue::Text("r1".into()),
            CellValue::Null,
            CellValue::Text("not a number".into()),
            CellValue::Null,
        ];
        let err = warehouse.append_rows(&table, schema, &[row]).await.unwrap_err();
        assert!(matches!(err, EtlError::QueryExecution(_)));
    }

    #[tokio::test]
    async fn append_rejects_null_in_required_column() {
        let warehouse = MemoryWarehouse::new();
        let table = TableRef::new("p", "n", "stg_users");
        let schema = DatasetKind::Users.schema();
        warehouse.create_table(&table, schema).await.unwrap();

        let row = vec![CellValue::Null; schema.len()];
        let err = warehouse.append_rows(&table, schema, &[row]).await.unwrap_err();
        assert!(matches!(err, EtlError::QueryExecution(_)));
    }
}
