//! Idempotent table creation

use std::sync::Arc;

use mdp_common::{EtlError, Result};
use tracing::{info, instrument};

use super::{TableRef, Warehouse};
use crate::catalog::ColumnSpec;

/// Outcome of an idempotent create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Created,
    AlreadyExists,
}

/// Ensures warehouse tables exist with their declared schema.
///
/// Schema drift between the declared schema and an existing table is not
/// detected or reconciled.
pub struct SchemaManager {
    warehouse: Arc<dyn Warehouse>,
}

impl SchemaManager {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    /// Create the table if absent; an existing table is left untouched.
    ///
    /// Only a precise already-exists condition from the store is treated as
    /// success; any other creation failure propagates.
    #[instrument(skip(self, schema))]
    pub async fn ensure_table(&self, table: &TableRef, schema: &[ColumnSpec]) -> Result<TableStatus> {
        if self.warehouse.table_exists(table).await? {
            info!(table = %table, "Table already exists");
            return Ok(TableStatus::AlreadyExists);
        }

        match self.warehouse.create_table(table, schema).await {
            Ok(()) => {
                info!(table = %table, columns = schema.len(), "Created table");
                Ok(TableStatus::Created)
            }
            // Lost a create race to a concurrent caller; same terminal state.
            Err(EtlError::TableAlreadyExists(_)) => {
                info!(table = %table, "Table created concurrently");
                Ok(TableStatus::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetKind;
    use crate::warehouse::MemoryWarehouse;

    #[tokio::test]
    async fn create_then_already_exists() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let manager = SchemaManager::new(warehouse.clone());
        let table = TableRef::new("p", "n", "stg_movies");
        let schema = DatasetKind::Movies.schema();

        assert_eq!(
            manager.ensure_table(&table, schema).await.unwrap(),
            TableStatus::Created
        );
        assert_eq!(
            manager.ensure_table(&table, schema).await.unwrap(),
            TableStatus::AlreadyExists
        );

        // Column set unchanged after both calls.
        let columns = warehouse.table_columns(&table).await.unwrap();
        assert_eq!(columns.len(), schema.len());
        assert_eq!(columns[0], "identifier");
    }

    #[tokio::test]
    async fn non_duplicate_failure_propagates() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        warehouse.inject_create_failure("stg_movies").await;
        let manager = SchemaManager::new(warehouse);
        let table = TableRef::new("p", "n", "stg_movies");

        let err = manager
            .ensure_table(&table, DatasetKind::Movies.schema())
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::QueryExecution(_)));
    }
}
