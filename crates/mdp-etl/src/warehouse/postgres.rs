//! Postgres warehouse backend
//!
//! Renders the declarative table, derived-table, and view definitions into
//! Postgres DDL/DML. The `{project}` segment of a [`TableRef`] selects the
//! database (fixed by the connection); `{namespace}` maps to a schema and
//! `{table}` to a relation inside it.
//!
//! Error discrimination: only SQLSTATE 42P07 (duplicate relation) is treated
//! as "already exists"; every other failure surfaces as `QueryExecution`.
//! Partition and cluster layouts are realized as expression indexes, the
//! closest physical equivalent this backend offers.

use mdp_common::{EtlError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, instrument};

use super::{DerivedTableSpec, Layout, TableRef, ViewSpec, Warehouse};
use crate::catalog::{ColumnSpec, ColumnType};
use crate::dataset::CellValue;

use async_trait::async_trait;

/// SQLSTATE for "relation already exists" (tables and views alike).
const DUPLICATE_RELATION: &str = "42P07";

/// Rows per INSERT statement, bounded by the Postgres 65535 bind-parameter
/// limit at the widest schema.
const INSERT_BATCH_ROWS: usize = 1_000;

pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| EtlError::Config(format!("warehouse connection failed: {}", e)))?;

        info!("Warehouse connection pool initialized");

        Ok(Self { pool })
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    #[instrument(skip(self))]
    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
        )
        .bind(&table.namespace)
        .bind(&table.table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EtlError::QueryExecution(format!("existence probe for {}: {}", table, e)))?;

        Ok(row.get::<bool, _>(0))
    }

    #[instrument(skip(self, schema))]
    async fn create_table(&self, table: &TableRef, schema: &[ColumnSpec]) -> Result<()> {
        let ensure_schema = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.namespace));
        sqlx::query(&ensure_schema)
            .execute(&self.pool)
            .await
            .map_err(|e| EtlError::QueryExecution(format!("create schema: {}", e)))?;

        let columns = schema
            .iter()
            .map(|spec| {
                format!(
                    "{} {}{}",
                    quote_ident(spec.name),
                    sql_type(spec.ty),
                    if spec.required { " NOT NULL" } else { "" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let ddl = format!("CREATE TABLE {} ({})", relation(table), columns);

        debug!(table = %table, "Executing: {}", ddl);

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| map_duplicate(e, EtlError::TableAlreadyExists(table.qualified())))?;

        Ok(())
    }

    #[instrument(skip(self, schema, rows), fields(rows = rows.len()))]
    async fn append_rows(
        &self,
        table: &TableRef,
        schema: &[ColumnSpec],
        rows: &[Vec<CellValue>],
    ) -> Result<u64> {
        let column_list = schema
            .iter()
            .map(|spec| quote_ident(spec.name))
            .collect::<Vec<_>>()
            .join(", ");

        let mut appended = 0u64;
        for batch in rows.chunks(INSERT_BATCH_ROWS) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", relation(table), column_list));

            builder.push_values(batch, |mut b, row| {
                for (spec, cell) in schema.iter().zip(row) {
                    match (cell, spec.ty) {
                        (CellValue::Null, ColumnType::Text) => b.push_bind(Option::<String>::None),
                        (CellValue::Null, ColumnType::Integer) => b.push_bind(Option::<i64>::None),
                        (CellValue::Null, ColumnType::Float) => b.push_bind(Option::<f64>::None),
                        (CellValue::Null, ColumnType::Date) => {
                            b.push_bind(Option::<chrono::NaiveDate>::None)
                        }
                        (CellValue::Integer(i), ColumnType::Float) => b.push_bind(*i as f64),
                        (CellValue::Integer(i), _) => b.push_bind(*i),
                        (CellValue::Float(f), _) => b.push_bind(*f),
                        (CellValue::Date(d), _) => b.push_bind(*d),
                        // Uncoerced text in a typed column reaches the server
                        // and fails the chunk there.
                        (CellValue::Text(s), _) => b.push_bind(s.clone()),
                    };
                }
            });

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| EtlError::QueryExecution(format!("append into {}: {}", table, e)))?;
            appended += result.rows_affected();
        }

        Ok(appended)
    }

    #[instrument(skip(self, spec), fields(table = %spec.table))]
    async fn rebuild_derived(&self, spec: &DerivedTableSpec) -> Result<()> {
        let columns = spec
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let drop = format!("DROP TABLE IF EXISTS {}", relation(&spec.table));
        let create = format!(
            "CREATE TABLE {} AS SELECT {} FROM {} WHERE {} IS NOT NULL",
            relation(&spec.table),
            columns,
            relation(&spec.source),
            quote_ident(&spec.require_nonnull),
        );
        let layout_ddl = layout_statements(spec);

        // Postgres DDL is transactional: the replace is atomic.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EtlError::QueryExecution(format!("begin rebuild of {}: {}", spec.table, e)))?;

        for statement in std::iter::once(&drop)
            .chain(std::iter::once(&create))
            .chain(layout_ddl.iter())
        {
            debug!(table = %spec.table, "Executing: {}", statement);
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    EtlError::QueryExecution(format!("rebuild of {}: {}", spec.table, e))
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| EtlError::QueryExecution(format!("commit rebuild of {}: {}", spec.table, e)))?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn view_exists(&self, view: &TableRef) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.views
                WHERE table_schema = $1 AND table_name = $2
            )",
        )
        .bind(&view.namespace)
        .bind(&view.table)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EtlError::QueryExecution(format!("existence probe for {}: {}", view, e)))?;

        Ok(row.get::<bool, _>(0))
    }

    #[instrument(skip(self, spec), fields(view = %spec.view))]
    async fn create_view(&self, spec: &ViewSpec) -> Result<()> {
        let ddl = render_view(spec);
        debug!(view = %spec.view, "Executing: {}", ddl);

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| map_duplicate(e, EtlError::ViewAlreadyExists(spec.view.qualified())))?;

        Ok(())
    }
}

/// Schema-qualified relation name.
fn relation(table: &TableRef) -> String {
    format!("{}.{}", quote_ident(&table.namespace), quote_ident(&table.table))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Text => "TEXT",
        ColumnType::Integer => "BIGINT",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Date => "DATE",
    }
}

/// Index DDL realizing the derived table's layout.
fn layout_statements(spec: &DerivedTableSpec) -> Vec<String> {
    match &spec.layout {
        Layout::PartitionByMonth(column) => vec![format!(
            "CREATE INDEX {} ON {} (date_trunc('month', {}))",
            quote_ident(&format!("{}_{}_month_idx", spec.table.table, column)),
            relation(&spec.table),
            quote_ident(column),
        )],
        Layout::ClusterBy(column) => {
            let index = format!("{}_{}_idx", spec.table.table, column);
            vec![
                format!(
                    "CREATE INDEX {} ON {} ({})",
                    quote_ident(&index),
                    relation(&spec.table),
                    quote_ident(column),
                ),
                format!(
                    "CLUSTER {} USING {}",
                    relation(&spec.table),
                    quote_ident(&index),
                ),
            ]
        }
    }
}

fn render_view(spec: &ViewSpec) -> String {
    let group_select = spec
        .group_columns
        .iter()
        .map(|c| format!("m.{}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "CREATE VIEW {view} AS \
         SELECT {group}, avg(r.{agg}) AS {alias} \
         FROM {left} m \
         INNER JOIN {right} r ON r.{key} = m.{key} \
         GROUP BY {group} \
         HAVING count(*) > {support} \
         ORDER BY avg(r.{agg}) DESC",
        view = relation(&spec.view),
        group = group_select,
        agg = quote_ident(&spec.aggregate_column),
        alias = quote_ident(&spec.aggregate_alias),
        left = relation(&spec.left),
        right = relation(&spec.right),
        key = quote_ident(&spec.join_key),
        support = spec.min_support,
    )
}

fn map_duplicate(err: sqlx::Error, already_exists: EtlError) -> EtlError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(DUPLICATE_RELATION) {
            return already_exists;
        }
    }
    EtlError::QueryExecution(err.to_string())
}
