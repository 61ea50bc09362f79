//! Chunked warehouse loads
//!
//! Appends a tabular batch into a warehouse table in chunks of at most
//! `chunk_rows` rows. Each chunk is an independent append: a failed chunk is
//! counted and reported, later chunks are still attempted, and nothing rolls
//! back chunks already committed. Delivery is therefore at-least-once per
//! run; exactly-once needs an external dedup key, which the pipeline assumes
//! but does not enforce.

use std::sync::Arc;

use mdp_common::{EtlError, Result};
use tracing::{info, instrument, warn};

use super::{TableRef, Warehouse};
use crate::catalog::ColumnSpec;
use crate::dataset::{CellValue, RawDataset};

/// Per-chunk accounting for one load call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_loaded: u64,
    pub chunks_total: usize,
    pub chunks_failed: usize,
}

impl LoadReport {
    /// Promote chunk failures to an error so dependents do not run on a
    /// partial load. Committed chunks stay committed either way.
    pub fn into_result(self, table: &TableRef) -> Result<LoadReport> {
        if self.chunks_failed > 0 {
            return Err(EtlError::ChunkLoad {
                table: table.qualified(),
                failed: self.chunks_failed,
                total: self.chunks_total,
            });
        }
        Ok(self)
    }
}

pub struct Loader {
    warehouse: Arc<dyn Warehouse>,
    chunk_rows: usize,
}

impl Loader {
    pub fn new(warehouse: Arc<dyn Warehouse>, chunk_rows: usize) -> Self {
        Self {
            warehouse,
            chunk_rows,
        }
    }

    /// Append `dataset` to `table` in independent chunks.
    ///
    /// Rows are first projected onto the declared schema: declared columns
    /// missing from the dataset are filled with nulls, undeclared dataset
    /// columns are dropped. The loader never retries a chunk; retry policy
    /// belongs to the orchestrator and must stay chunk-scoped.
    #[instrument(skip(self, dataset), fields(table = %table))]
    pub async fn load(
        &self,
        table: &TableRef,
        schema: &'static [ColumnSpec],
        dataset: &RawDataset,
    ) -> Result<LoadReport> {
        let rows = project_rows(dataset, schema);

        let mut report = LoadReport {
            rows_loaded: 0,
            chunks_total: 0,
            chunks_failed: 0,
        };

        for (chunk_idx, chunk) in rows.chunks(self.chunk_rows).enumerate() {
            report.chunks_total += 1;

            match self.warehouse.append_rows(table, schema, chunk).await {
                Ok(appended) => {
                    report.rows_loaded += appended;
                    info!(
                        table = %table,
                        chunk = chunk_idx,
                        rows = appended,
                        "Loaded chunk"
                    );
                }
                Err(err) => {
                    report.chunks_failed += 1;
                    warn!(
                        table = %table,
                        chunk = chunk_idx,
                        rows = chunk.len(),
                        error = %err,
                        "Chunk load failed"
                    );
                }
            }
        }

        info!(
            table = %table,
            rows = report.rows_loaded,
            chunks = report.chunks_total,
            failed = report.chunks_failed,
            "Load finished"
        );

        Ok(report)
    }
}

/// Reorder dataset rows into declared schema column order.
fn project_rows(dataset: &RawDataset, schema: &[ColumnSpec]) -> Vec<Vec<CellValue>> {
    let indices: Vec<Option<usize>> = schema
        .iter()
        .map(|spec| dataset.column_index(spec.name))
        .collect();

    dataset
        .rows
        .iter()
        .map(|row| {
            indices
                .iter()
                .map(|idx| match idx {
                    Some(i) => row[*i].clone(),
                    None => CellValue::Null,
                })
                .collect()
        })
        .collect()
}
