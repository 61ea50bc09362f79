//! MDP ETL Core
//!
//! Idempotent, dependency-ordered orchestration for moving tabular movie
//! datasets from remote sources through object-storage staging into
//! analytical warehouse tables and views.
//!
//! # Pipeline shape
//!
//! Per dataset kind: fetch → normalize → stage (local parquet + remote
//! upload); later, independently: download → load into the staging table;
//! then derived tables are rebuilt with replace semantics and the reporting
//! view is created idempotently. Every stage is safe to repeat: staging
//! overwrites, table/view creation is create-if-absent, and derived rebuilds
//! replace the whole table.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mdp_etl::catalog::DatasetKind;
//! use mdp_etl::config::EtlConfig;
//! use mdp_etl::fetch::Fetcher;
//! use mdp_etl::pipeline::Pipeline;
//! use mdp_etl::staging::StagingStore;
//! use mdp_etl::storage::MemoryObjectStore;
//! use mdp_etl::warehouse::MemoryWarehouse;
//!
//! # #[tokio::main]
//! # async fn main() -> mdp_common::Result<()> {
//! let config = EtlConfig::default();
//! let staging = Arc::new(StagingStore::new(
//!     config.data_dir.clone(),
//!     Arc::new(MemoryObjectStore::new()),
//! ));
//! let pipeline = Pipeline::new(
//!     config,
//!     Arc::new(Fetcher::new()?),
//!     staging,
//!     Arc::new(MemoryWarehouse::new()),
//! );
//!
//! let sources = vec![(DatasetKind::Movies, "data/movie_data.csv".to_string())];
//! let graph = pipeline.full_graph(&sources)?;
//! let report = pipeline.orchestrator().run(graph).await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod dataset;
pub mod fetch;
pub mod orchestrator;
pub mod pipeline;
pub mod staging;
pub mod storage;
pub mod transform;
pub mod warehouse;

// Re-export commonly used types
pub use catalog::{ColumnSpec, ColumnType, DatasetKind};
pub use dataset::{CellValue, RawDataset};
pub use orchestrator::{NodeState, Orchestrator, RunReport, TaskGraph};
pub use pipeline::Pipeline;
