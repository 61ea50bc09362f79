//! Warehouse abstraction
//!
//! The core talks to the analytical store through the [`Warehouse`] trait:
//! idempotency (create-if-absent, replace-whole-table) is delegated to the
//! backing store's atomic semantics, never emulated with in-process locks.
//! Backends: Postgres ([`postgres::PostgresWarehouse`]) for production, an
//! in-memory store ([`memory::MemoryWarehouse`]) for tests.
//!
//! Error contract: `create_table` against an existing table fails with
//! precisely `TableAlreadyExists`, `create_view` with `ViewAlreadyExists`;
//! any other DDL/DML failure is `QueryExecution`. Nothing else may be
//! interpreted as "already exists".

pub mod loader;
pub mod materialize;
pub mod memory;
pub mod postgres;
pub mod schema_manager;
pub mod view;

pub use loader::{LoadReport, Loader};
pub use materialize::Materializer;
pub use memory::MemoryWarehouse;
pub use postgres::PostgresWarehouse;
pub use schema_manager::{SchemaManager, TableStatus};
pub use view::{ViewBuilder, ViewStatus};

use async_trait::async_trait;
use mdp_common::Result;
use serde::{Deserialize, Serialize};

use crate::catalog::ColumnSpec;
use crate::dataset::CellValue;

/// Fully qualified warehouse table name: `{project}.{namespace}.{table}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub namespace: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        namespace: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            namespace: namespace.into(),
            table: table.into(),
        }
    }

    /// A sibling table in the same project and namespace.
    pub fn sibling(&self, table: impl Into<String>) -> Self {
        Self {
            project: self.project.clone(),
            namespace: self.namespace.clone(),
            table: table.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}.{}", self.project, self.namespace, self.table)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Physical layout of a derived table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Partition rows by calendar month of a date column.
    PartitionByMonth(String),
    /// Cluster rows by a high-cardinality key column.
    ClusterBy(String),
}

/// Declarative definition of a derived table, rebuilt wholesale from its
/// source table on every materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedTableSpec {
    pub table: TableRef,
    pub source: TableRef,
    /// Projected columns, in output order.
    pub columns: Vec<String>,
    /// Rows with a null in this column are excluded.
    pub require_nonnull: String,
    pub layout: Layout,
}

/// Declarative definition of a view joining two derived tables with an
/// average aggregate and a minimum-support predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    pub view: TableRef,
    /// Left (grouped) side of the join.
    pub left: TableRef,
    /// Right (aggregated) side of the join.
    pub right: TableRef,
    /// Column shared by both sides; inner join equality key.
    pub join_key: String,
    /// Left-side columns the output is grouped on.
    pub group_columns: Vec<String>,
    /// Right-side column fed to `avg(...)`.
    pub aggregate_column: String,
    /// Output name of the aggregate.
    pub aggregate_alias: String,
    /// Groups with `count(*)` at or below this bound are excluded.
    pub min_support: i64,
}

/// Abstract analytical store.
///
/// Implementations must be safe to share across concurrent tasks as a
/// read-only handle.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// Create a table with exactly the declared column set. Fails with
    /// `TableAlreadyExists` when the table is already present.
    async fn create_table(&self, table: &TableRef, schema: &[ColumnSpec]) -> Result<()>;

    /// Append rows to a table. `rows` are in `schema` column order. Returns
    /// the number of rows appended.
    async fn append_rows(
        &self,
        table: &TableRef,
        schema: &[ColumnSpec],
        rows: &[Vec<CellValue>],
    ) -> Result<u64>;

    /// Replace-semantics rebuild of a derived table from its source.
    async fn rebuild_derived(&self, spec: &DerivedTableSpec) -> Result<()>;

    async fn view_exists(&self, view: &TableRef) -> Result<bool>;

    /// Create a view. Fails with `ViewAlreadyExists` when already present.
    async fn create_view(&self, spec: &ViewSpec) -> Result<()>;
}
