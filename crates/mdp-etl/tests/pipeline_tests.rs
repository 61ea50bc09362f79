//! End-to-end pipeline runs against the in-memory object store and
//! warehouse: staging round trips, warehouse loads, the materialize/view
//! barrier, idempotent re-runs, and failure propagation.

use std::fmt::Write as _;
use std::sync::Arc;

use mdp_etl::catalog::DatasetKind;
use mdp_etl::config::EtlConfig;
use mdp_etl::dataset::{CellValue, RawDataset};
use mdp_etl::fetch::Fetcher;
use mdp_etl::orchestrator::NodeState;
use mdp_etl::pipeline::Pipeline;
use mdp_etl::staging::StagingStore;
use mdp_etl::storage::MemoryObjectStore;
use mdp_etl::warehouse::{DerivedTableSpec, Loader, MemoryWarehouse, TableRef, ViewSpec, Warehouse};

struct Harness {
    _tmp: tempfile::TempDir,
    pipeline: Pipeline,
    store: Arc<MemoryObjectStore>,
    warehouse: Arc<MemoryWarehouse>,
    sources: Vec<(DatasetKind, String)>,
}

/// Write source CSVs to disk and wire a pipeline against in-memory backends.
fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();

    let movies = "\
identifier,movie_id,movie_title,popularity,release_date,runtime
m1,m1,High Tension,7.5,2003-10-15,91
m2,m2,Slow Burn,5.0,2010-01-02,120
m3,m3,Barely Seen,1.2,1999-06-30,88
";
    let mut ratings = String::from("identifier,movie_id,rating_value,user_id\n");
    // m1: 150 ratings of 7, m2: 101 ratings of 9, m3: only 50 ratings.
    for (movie, count, value) in [("m1", 150, 7), ("m2", 101, 9), ("m3", 50, 5)] {
        for i in 0..count {
            writeln!(ratings, "r_{}_{},{},{},u{}", movie, i, movie, value, i).unwrap();
        }
    }
    let users = "\
identifier,display_name,num_rating_pages,num_reviews,username
u1,Alice,2.0,14,alice
u2,Bob,1.0,3,bob
";

    let mut sources = Vec::new();
    for (kind, content) in [
        (DatasetKind::Movies, movies.to_string()),
        (DatasetKind::Ratings, ratings),
        (DatasetKind::Users, users.to_string()),
    ] {
        let path = tmp.path().join(format!("{}_export.csv", kind));
        std::fs::write(&path, content).unwrap();
        sources.push((kind, path.to_string_lossy().into_owned()));
    }

    let config = EtlConfig {
        data_dir: tmp.path().join("data"),
        worker_limit: 4,
        ..EtlConfig::default()
    };

    let store = Arc::new(MemoryObjectStore::new());
    let warehouse = Arc::new(MemoryWarehouse::new());
    let staging = Arc::new(StagingStore::new(config.data_dir.clone(), store.clone()));
    let pipeline = Pipeline::new(
        config,
        Arc::new(Fetcher::new().unwrap()),
        staging,
        warehouse.clone(),
    );

    Harness {
        _tmp: tmp,
        pipeline,
        store,
        warehouse,
        sources,
    }
}

fn table(pipeline: &Pipeline, kind: DatasetKind) -> TableRef {
    pipeline.table_ref(kind)
}

#[tokio::test]
async fn full_run_moves_all_datasets_into_the_warehouse() {
    let h = harness();

    let graph = h.pipeline.full_graph(&h.sources).unwrap();
    let report = h.pipeline.orchestrator().run(graph).await;
    assert!(report.is_success(), "unexpected failures:\n{}", report);

    // Staged artifacts at their deterministic keys.
    assert_eq!(
        h.store.keys().await,
        vec![
            "data/movies.parquet",
            "data/ratings.parquet",
            "data/users.parquet"
        ]
    );

    // Staging tables carry every source row.
    let movies = table(&h.pipeline, DatasetKind::Movies);
    let ratings = table(&h.pipeline, DatasetKind::Ratings);
    let users = table(&h.pipeline, DatasetKind::Users);
    assert_eq!(h.warehouse.table_rows(&movies).await.unwrap().len(), 3);
    assert_eq!(h.warehouse.table_rows(&ratings).await.unwrap().len(), 301);
    assert_eq!(h.warehouse.table_rows(&users).await.unwrap().len(), 2);

    // Derived tables rebuilt from the staged tables.
    let partitioned = DerivedTableSpec::partitioned_movies(&movies).table;
    let clustered = DerivedTableSpec::clustered_ratings(&ratings).table;
    assert_eq!(h.warehouse.table_rows(&partitioned).await.unwrap().len(), 3);
    assert_eq!(h.warehouse.table_rows(&clustered).await.unwrap().len(), 301);

    // View keeps only movies with more than 100 supporting ratings, ordered
    // by descending average rating: m2 (avg 9) before m1 (avg 7); m3 is out.
    let view = ViewSpec::movie_ratings(&partitioned, &clustered).view;
    let (columns, rows) = h.warehouse.view_rows(&view).await.unwrap();
    assert_eq!(columns.last().unwrap(), "average_rating");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], CellValue::Text("m2".into()));
    assert_eq!(rows[1][0], CellValue::Text("m1".into()));
    assert_eq!(rows[0].last().unwrap(), &CellValue::Float(9.0));
}

#[tokio::test]
async fn rerun_is_idempotent_for_schema_objects_and_appends_data() {
    let h = harness();

    let report = h
        .pipeline
        .orchestrator()
        .run(h.pipeline.full_graph(&h.sources).unwrap())
        .await;
    assert!(report.is_success());

    let report = h
        .pipeline
        .orchestrator()
        .run(h.pipeline.full_graph(&h.sources).unwrap())
        .await;
    assert!(report.is_success(), "re-run failed:\n{}", report);
    assert_eq!(
        report.state_of("ensure_view:view_movieratings"),
        Some(NodeState::Succeeded)
    );

    // Loads are append-only at-least-once: staging tables doubled.
    let movies = table(&h.pipeline, DatasetKind::Movies);
    assert_eq!(h.warehouse.table_rows(&movies).await.unwrap().len(), 6);

    // Derived tables were rebuilt wholesale, not appended twice over.
    let partitioned = DerivedTableSpec::partitioned_movies(&movies).table;
    assert_eq!(h.warehouse.table_rows(&partitioned).await.unwrap().len(), 6);
}

#[tokio::test]
async fn ensure_table_failure_skips_branch_but_not_independent_kinds() {
    let h = harness();

    // Stage everything first so the warehouse flow has artifacts to pull.
    let report = h
        .pipeline
        .orchestrator()
        .run(h.pipeline.ingest_graph(&h.sources).unwrap())
        .await;
    assert!(report.is_success());

    h.warehouse.inject_create_failure("stg_movies").await;

    let kinds: Vec<DatasetKind> = h.sources.iter().map(|(kind, _)| *kind).collect();
    let graph = h.pipeline.warehouse_graph(&kinds).unwrap();
    let report = h.pipeline.orchestrator().run(graph).await;

    assert!(!report.is_success());
    assert_eq!(report.state_of("ensure_table:movies"), Some(NodeState::Failed));
    assert_eq!(report.state_of("load:movies"), Some(NodeState::Skipped));
    assert_eq!(
        report.state_of("materialize:partitioned_movies"),
        Some(NodeState::Skipped)
    );
    assert_eq!(
        report.state_of("ensure_view:view_movieratings"),
        Some(NodeState::Skipped)
    );

    // Independent branches still complete.
    assert_eq!(report.state_of("load:users"), Some(NodeState::Succeeded));
    assert_eq!(report.state_of("load:ratings"), Some(NodeState::Succeeded));
    assert_eq!(
        report.state_of("materialize:clustered_ratings"),
        Some(NodeState::Succeeded)
    );
}

#[tokio::test(start_paused = true)]
async fn unreachable_source_exhausts_fetch_budget() {
    let h = harness();

    let sources = vec![(
        DatasetKind::Movies,
        "/nonexistent/movie_data.csv".to_string(),
    )];
    let graph = h.pipeline.ingest_graph(&sources).unwrap();
    let report = h.pipeline.orchestrator().run(graph).await;

    assert!(!report.is_success());
    let fetch = report.outcome("fetch:movies").unwrap();
    assert_eq!(fetch.state, NodeState::Failed);
    assert_eq!(fetch.attempts, 3);
    assert_eq!(report.state_of("normalize:movies"), Some(NodeState::Skipped));
    assert_eq!(report.state_of("stage:movies"), Some(NodeState::Skipped));
}

#[tokio::test]
async fn warehouse_flow_without_prior_upload_fails_download_only() {
    let h = harness();

    let graph = h
        .pipeline
        .warehouse_graph(&[DatasetKind::Users])
        .unwrap();
    let report = h.pipeline.orchestrator().run(graph).await;

    assert!(!report.is_success());
    let download = report.outcome("download:users").unwrap();
    assert_eq!(download.state, NodeState::Failed);
    assert!(download.error.as_deref().unwrap().contains("not found"));
    assert_eq!(report.state_of("load:users"), Some(NodeState::Skipped));
    // Table creation has no data dependency and still succeeds.
    assert_eq!(report.state_of("ensure_table:users"), Some(NodeState::Succeeded));
}

#[tokio::test]
async fn loading_1_2m_rows_produces_three_chunks() {
    let warehouse = Arc::new(MemoryWarehouse::new());
    let table = TableRef::new("p", "n", "stg_ratings");
    let schema = DatasetKind::Ratings.schema();
    warehouse.create_table(&table, schema).await.unwrap();

    let mut dataset = RawDataset::new(vec![
        "identifier".into(),
        "movie_id".into(),
        "rating_value".into(),
        "user_id".into(),
    ]);
    for i in 0..1_200_000usize {
        dataset
            .push_row(vec![
                CellValue::Text(format!("r{}", i)),
                CellValue::Null,
                CellValue::Integer(5),
                CellValue::Null,
            ])
            .unwrap();
    }

    let loader = Loader::new(warehouse.clone(), 500_000);
    let report = loader.load(&table, schema, &dataset).await.unwrap();

    assert_eq!(report.chunks_total, 3);
    assert_eq!(report.chunks_failed, 0);
    assert_eq!(report.rows_loaded, 1_200_000);
    assert_eq!(
        warehouse.append_sizes(&table).await,
        vec![500_000, 500_000, 200_000]
    );
}

/// The qualifying predicate and ordering, pinned at the warehouse level:
/// support counts {50, 101, 150} keep exactly the 101 and 150 movies, and
/// the output is ordered by average rating, not by support.
#[tokio::test]
async fn view_predicate_filters_and_orders_by_average() {
    let warehouse = Arc::new(MemoryWarehouse::new());
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

    let movie_schema = DatasetKind::Movies.schema();
    let mut movie_rows = Vec::new();
    for id in ["m_50", "m_101", "m_150"] {
        let mut row = vec![CellValue::Null; movie_schema.len()];
        row[0] = CellValue::Text(id.into());
        row[5] = CellValue::Text(id.into());
        row[11] = CellValue::Date(chrono::NaiveDate::from_ymd_opt(2003, 10, 15).unwrap());
        movie_rows.push(row);
    }
    warehouse
        .append_rows(&movies, movie_schema, &movie_rows)
        .await
        .unwrap();

    // m_101 averages 9, m_150 averages 7: average order inverts count order.
    let rating_schema = DatasetKind::Ratings.schema();
    let mut rating_rows = Vec::new();
    for (movie, count, value) in [("m_50", 50, 8), ("m_101", 101, 9), ("m_150", 150, 7)] {
        for i in 0..count {
            rating_rows.push(vec![
                CellValue::Text(format!("r_{}_{}", movie, i)),
                CellValue::Text(movie.into()),
                CellValue::Integer(value),
                CellValue::Text(format!("u{}", i)),
            ]);
        }
    }
    warehouse
        .append_rows(&ratings, rating_schema, &rating_rows)
        .await
        .unwrap();

    let left = DerivedTableSpec::partitioned_movies(&movies);
    let right = DerivedTableSpec::clustered_ratings(&ratings);
    warehouse.rebuild_derived(&left).await.unwrap();
    warehouse.rebuild_derived(&right).await.unwrap();

    let spec = ViewSpec::movie_ratings(&left.table, &right.table);
    warehouse.create_view(&spec).await.unwrap();

    let (_, rows) = warehouse.view_rows(&spec.view).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], CellValue::Text("m_101".into()));
    assert_eq!(rows[0].last().unwrap(), &CellValue::Float(9.0));
    assert_eq!(rows[1][0], CellValue::Text("m_150".into()));
    assert_eq!(rows[1].last().unwrap(), &CellValue::Float(7.0));
}
