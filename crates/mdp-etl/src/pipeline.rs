//! Pipeline assembly
//!
//! Builds the task graphs for the two flows: web → staging (`ingest`) and
//! staging → warehouse (`warehouse`), plus the combined run. Dataset kinds
//! are independent branches everywhere except the materialize/view barrier,
//! the one cross-kind serialization point.

use std::sync::Arc;

use mdp_common::{EtlError, Result};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::catalog::DatasetKind;
use crate::config::EtlConfig;
use crate::dataset::RawDataset;
use crate::fetch::Fetcher;
use crate::orchestrator::{Orchestrator, RetryPolicy, TaskGraph};
use crate::staging::StagingStore;
use crate::transform::Transformer;
use crate::warehouse::{
    DerivedTableSpec, Loader, Materializer, SchemaManager, TableRef, ViewBuilder, ViewSpec,
    Warehouse,
};

/// In-run handoff between the fetch, normalize, and stage nodes of one kind.
#[derive(Default)]
struct IngestSlots {
    fetched: OnceCell<RawDataset>,
    normalized: OnceCell<RawDataset>,
}

/// Wires components into runnable task graphs.
pub struct Pipeline {
    config: EtlConfig,
    fetcher: Arc<Fetcher>,
    staging: Arc<StagingStore>,
    warehouse: Arc<dyn Warehouse>,
}

impl Pipeline {
    pub fn new(
        config: EtlConfig,
        fetcher: Arc<Fetcher>,
        staging: Arc<StagingStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            config,
            fetcher,
            staging,
            warehouse,
        }
    }

    /// Orchestrator sized to the configured worker limit.
    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.config.worker_limit)
    }

    /// Staging table reference for a kind.
    pub fn table_ref(&self, kind: DatasetKind) -> TableRef {
        TableRef::new(
            self.config.project.clone(),
            self.config.namespace.clone(),
            kind.staging_table(),
        )
    }

    /// Web → staging graph: per kind, fetch → normalize → stage.
    pub fn ingest_graph(&self, sources: &[(DatasetKind, String)]) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        self.add_ingest_nodes(&mut graph, sources)?;
        Ok(graph)
    }

    /// Staging → warehouse graph: per kind, download + ensure_table → load;
    /// then the materialize/view barrier.
    pub fn warehouse_graph(&self, kinds: &[DatasetKind]) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        self.add_warehouse_nodes(&mut graph, kinds, |_| None)?;
        Ok(graph)
    }

    /// Combined graph: the warehouse flow of each kind starts after that
    /// kind's staging upload.
    pub fn full_graph(&self, sources: &[(DatasetKind, String)]) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        self.add_ingest_nodes(&mut graph, sources)?;
        let kinds: Vec<DatasetKind> = sources.iter().map(|(kind, _)| *kind).collect();
        self.add_warehouse_nodes(&mut graph, &kinds, |kind| Some(format!("stage:{}", kind)))?;
        Ok(graph)
    }

    fn add_ingest_nodes(
        &self,
        graph: &mut TaskGraph,
        sources: &[(DatasetKind, String)],
    ) -> Result<()> {
        for (kind, locator) in sources {
            let kind = *kind;
            let slots = Arc::new(IngestSlots::default());

            let fetch_name = format!("fetch:{}", kind);
            {
                let fetcher = self.fetcher.clone();
                let locator = locator.clone();
                let slots = slots.clone();
                graph.add_task(
                    &fetch_name,
                    &[],
                    Some(RetryPolicy::fetch(self.config.fetch_attempts)),
                    move || {
                        let fetcher = fetcher.clone();
                        let locator = locator.clone();
                        let slots = slots.clone();
                        async move {
                            let dataset = fetcher.fetch(&locator).await?;
                            let _ = slots.fetched.set(dataset);
                            Ok(())
                        }
                    },
                )?;
            }

            let normalize_name = format!("normalize:{}", kind);
            {
                let slots = slots.clone();
                graph.add_task(&normalize_name, &[fetch_name.as_str()], None, move || {
                    let slots = slots.clone();
                    async move {
                        let raw = slots
                            .fetched
                            .get()
                            .cloned()
                            .ok_or_else(|| EtlError::Internal("fetched dataset missing".into()))?;
                        let report = Transformer::normalize(raw, kind);
                        if !report.warnings.is_empty() {
                            warn!(
                                dataset = %kind,
                                warnings = report.warnings.len(),
                                "Normalization finished with coercion warnings"
                            );
                        }
                        let _ = slots.normalized.set(report.dataset);
                        Ok(())
                    }
                })?;
            }

            let stage_name = format!("stage:{}", kind);
            {
                let staging = self.staging.clone();
                let slots = slots.clone();
                graph.add_task(&stage_name, &[normalize_name.as_str()], None, move || {
                    let staging = staging.clone();
                    let slots = slots.clone();
                    async move {
                        let dataset = slots
                            .normalized
                            .get()
                            .ok_or_else(|| EtlError::Internal("normalized dataset missing".into()))?;
                        let path = staging.write_local(dataset, kind).await?;
                        staging.upload(&path, kind).await?;
                        Ok(())
                    }
                })?;
            }
        }

        Ok(())
    }

    fn add_warehouse_nodes(
        &self,
        graph: &mut TaskGraph,
        kinds: &[DatasetKind],
        upstream: impl Fn(DatasetKind) -> Option<String>,
    ) -> Result<()> {
        for kind in kinds {
            let kind = *kind;
            let upstream_dep = upstream(kind);
            let upstream_deps: Vec<&str> = upstream_dep.as_deref().into_iter().collect();

            let download_name = format!("download:{}", kind);
            {
                let staging = self.staging.clone();
                graph.add_task(&download_name, &upstream_deps, None, move || {
                    let staging = staging.clone();
                    async move {
                        staging.download(kind).await?;
                        Ok(())
                    }
                })?;
            }

            let ensure_name = format!("ensure_table:{}", kind);
            {
                let manager = Arc::new(SchemaManager::new(self.warehouse.clone()));
                let table = self.table_ref(kind);
                graph.add_task(&ensure_name, &[], None, move || {
                    let manager = manager.clone();
                    let table = table.clone();
                    async move {
                        let status = manager.ensure_table(&table, kind.schema()).await?;
                        info!(table = %table, status = ?status, "Ensured table");
                        Ok(())
                    }
                })?;
            }

            let load_name = format!("load:{}", kind);
            {
                let staging = self.staging.clone();
                let loader = Arc::new(Loader::new(self.warehouse.clone(), self.config.chunk_rows));
                let table = self.table_ref(kind);
                graph.add_task(
                    &load_name,
                    &[download_name.as_str(), ensure_name.as_str()],
                    None,
                    move || {
                        let staging = staging.clone();
                        let loader = loader.clone();
                        let table = table.clone();
                        async move {
                            let path = staging.local_path(kind);
                            let raw = staging.read_local(&path).await?;
                            // Staged files may carry uncoerced text columns;
                            // normalize again before the typed load.
                            let report = Transformer::normalize(raw, kind);
                            if !report.warnings.is_empty() {
                                warn!(
                                    dataset = %kind,
                                    warnings = report.warnings.len(),
                                    "Staged data still carries coercion warnings"
                                );
                            }
                            let load_report =
                                loader.load(&table, kind.schema(), &report.dataset).await?;
                            load_report.into_result(&table)?;
                            Ok(())
                        }
                    },
                )?;
            }
        }

        self.add_derived_nodes(graph, kinds)?;

        Ok(())
    }

    /// Materializers run after every load feeding their source table; the
    /// view runs after both materializers. This is the only cross-kind
    /// barrier in the graph.
    fn add_derived_nodes(&self, graph: &mut TaskGraph, kinds: &[DatasetKind]) -> Result<()> {
        let movies_in = kinds.contains(&DatasetKind::Movies);
        let ratings_in = kinds.contains(&DatasetKind::Ratings);

        if movies_in {
            let spec = DerivedTableSpec::partitioned_movies(&self.table_ref(DatasetKind::Movies));
            let materializer = Arc::new(Materializer::new(self.warehouse.clone()));
            let load_movies = format!("load:{}", DatasetKind::Movies);
            graph.add_task(
                "materialize:partitioned_movies",
                &[load_movies.as_str()],
                None,
                move || {
                    let materializer = materializer.clone();
                    let spec = spec.clone();
                    async move { materializer.rebuild(&spec).await }
                },
            )?;
        }

        if ratings_in {
            let spec = DerivedTableSpec::clustered_ratings(&self.table_ref(DatasetKind::Ratings));
            let materializer = Arc::new(Materializer::new(self.warehouse.clone()));
            let load_ratings = format!("load:{}", DatasetKind::Ratings);
            graph.add_task(
                "materialize:clustered_ratings",
                &[load_ratings.as_str()],
                None,
                move || {
                    let materializer = materializer.clone();
                    let spec = spec.clone();
                    async move { materializer.rebuild(&spec).await }
                },
            )?;
        }

        if movies_in && ratings_in {
            let left = DerivedTableSpec::partitioned_movies(&self.table_ref(DatasetKind::Movies));
            let right = DerivedTableSpec::clustered_ratings(&self.table_ref(DatasetKind::Ratings));
            let spec = ViewSpec::movie_ratings(&left.table, &right.table);
            let builder = Arc::new(ViewBuilder::new(self.warehouse.clone()));
            graph.add_task(
                "ensure_view:view_movieratings",
                &[
                    "materialize:partitioned_movies",
                    "materialize:clustered_ratings",
                ],
                None,
                move || {
                    let builder = builder.clone();
                    let spec = spec.clone();
                    async move {
                        let status = builder.ensure_view(&spec).await?;
                        info!(view = %spec.view, status = ?status, "Ensured view");
                        Ok(())
                    }
                },
            )?;
        }

        Ok(())
    }
}
