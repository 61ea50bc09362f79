//! Idempotent view creation

use std::sync::Arc;

use mdp_common::{EtlError, Result};
use tracing::{info, instrument};

use super::{TableRef, ViewSpec, Warehouse};

/// Outcome of an idempotent view create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStatus {
    Created,
    AlreadyExists,
}

/// Creates derived views over materialized tables. An existing view is left
/// untouched, never replaced.
pub struct ViewBuilder {
    warehouse: Arc<dyn Warehouse>,
}

impl ViewBuilder {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse }
    }

    #[instrument(skip(self, spec), fields(view = %spec.view))]
    pub async fn ensure_view(&self, spec: &ViewSpec) -> Result<ViewStatus> {
        if self.warehouse.view_exists(&spec.view).await? {
            info!(view = %spec.view, "View already exists");
            return Ok(ViewStatus::AlreadyExists);
        }

        match self.warehouse.create_view(spec).await {
            Ok(()) => {
                info!(view = %spec.view, "Created view");
                Ok(ViewStatus::Created)
            }
            Err(EtlError::ViewAlreadyExists(_)) => {
                info!(view = %spec.view, "View created concurrently");
                Ok(ViewStatus::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }
}

impl ViewSpec {
    /// Movies joined to their ratings: average rating per movie, restricted
    /// to movies with more than 100 supporting ratings, ordered by the
    /// average descending.
    pub fn movie_ratings(left: &TableRef, right: &TableRef) -> Self {
        Self {
            view: left.sibling("view_movieratings"),
            left: left.clone(),
            right: right.clone(),
            join_key: "movie_id".into(),
            group_columns: vec![
                "movie_id".into(),
                "movie_title".into(),
                "popularity".into(),
                "release_date".into(),
                "runtime".into(),
            ],
            aggregate_column: "rating_value".into(),
            aggregate_alias: "average_rating".into(),
            min_support: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{DerivedTableSpec, MemoryWarehouse};
    use crate::catalog::DatasetKind;
    use crate::dataset::CellValue;

    async fn seeded(warehouse: &Arc<MemoryWarehouse>) -> ViewSpec {
        let movies = TableRef::new("p", "n", "stg_movies");
        let ratings = TableRef::new("p", "n", "stg_ratings");
        warehouse
            .create_table(&movies, DatasetKind::Movies.schema())
            .await
            .unwrap();
        warehouse
            .create_table(&ratings, DatasetKind::Ratings.schema())
            .await
            .unwrap();

        let mut row = vec![CellValue::Null; DatasetKind::Movies.schema().len()];
        row[0] = CellValue::Text("m1".into());
        row[5] = CellValue::Text("m1".into());
        warehouse
            .append_rows(&movies, DatasetKind::Movies.schema(), &[row])
            .await
            .unwrap();

        let left = DerivedTableSpec::partitioned_movies(&movies);
        let right = DerivedTableSpec::clustered_ratings(&ratings);
        ViewSpec::movie_ratings(&left.table, &right.table)
    }

    #[tokio::test]
    async fn create_then_already_exists() {
        let warehouse = Arc::new(MemoryWarehouse::new());
        let spec = seeded(&warehouse).await;

        // Empty derived tables are enough for create/exists semantics.
        warehouse
            .rebuild_derived(&DerivedTableSpec::partitioned_movies(&TableRef::new(
                "p",
                "n",
                "stg_movies",
            )))
            .await
            .unwrap();
        warehouse
            .rebuild_derived(&DerivedTableSpec::clustered_ratings(&TableRef::new(
                "p",
                "n",
                "stg_ratings",
            )))
            .await
            .unwrap();

        let builder = ViewBuilder::new(warehouse.clone());
        assert_eq!(
            builder.ensure_view(&spec).await.unwrap(),
            ViewStatus::Created
        );
        assert_eq!(
            builder.ensure_view(&spec).await.unwrap(),
            ViewStatus::AlreadyExists
        );
    }
}
