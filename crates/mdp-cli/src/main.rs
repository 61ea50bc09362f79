//! MDP CLI - pipeline entry points
//!
//! One subcommand per pipeline stage, parameterized by dataset identifiers
//! and warehouse project/namespace. Exit code 0 on full success, 1 when any
//! orchestrator node fails.

use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use mdp_common::logging::{init_logging, LogConfig, LogLevel};
use mdp_etl::catalog::DatasetKind;
use mdp_etl::config::{EtlConfig, StorageConfig};
use mdp_etl::fetch::Fetcher;
use mdp_etl::orchestrator::RunReport;
use mdp_etl::pipeline::Pipeline;
use mdp_etl::staging::StagingStore;
use mdp_etl::storage::{ObjectStore, S3ObjectStore};
use mdp_etl::warehouse::{MemoryWarehouse, PostgresWarehouse, Warehouse};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mdp")]
#[command(author, version, about = "Movie data pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Fetch source datasets and upload them to staging
    Ingest {
        /// Dataset to ingest, as a `kind=locator` pair; repeatable
        /// (e.g. --dataset movies=https://example.com/movie_data.csv)
        #[arg(short, long = "dataset", required = true)]
        datasets: Vec<String>,
    },

    /// Load staged datasets into the warehouse and rebuild derived tables
    Warehouse {
        /// Warehouse project
        #[arg(long, env = "MDP_PROJECT")]
        project: Option<String>,

        /// Warehouse namespace
        #[arg(long, env = "MDP_NAMESPACE")]
        namespace: Option<String>,

        /// Comma-separated dataset kinds to load
        #[arg(long, default_value = "movies,ratings,users")]
        datasets: String,

        /// Warehouse connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },

    /// Run both stages end to end
    Run {
        /// Dataset to move, as a `kind=locator` pair; repeatable
        #[arg(short, long = "dataset", required = true)]
        datasets: Vec<String>,

        /// Warehouse project
        #[arg(long, env = "MDP_PROJECT")]
        project: Option<String>,

        /// Warehouse namespace
        #[arg(long, env = "MDP_NAMESPACE")]
        namespace: Option<String>,

        /// Warehouse connection string
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag and environment
    let log_config = if cli.verbose {
        LogConfig {
            level: LogLevel::Debug,
            json: false,
        }
    } else {
        LogConfig::from_env().unwrap_or_default()
    };
    let _ = init_logging(&log_config);

    match execute(cli.command).await {
        Ok(report) => {
            print!("{}", report);
            if !report.is_success() {
                error!("Pipeline run finished with failures");
                process::exit(1);
            }
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

async fn execute(command: Command) -> Result<RunReport> {
    match command {
        Command::Ingest { datasets } => {
            let config = etl_config(None, None)?;
            let sources = parse_sources(&datasets)?;
            // The ingest flow never touches the warehouse; satisfy the
            // wiring with the in-memory stub.
            let warehouse: Arc<dyn Warehouse> = Arc::new(MemoryWarehouse::new());
            let pipeline = build_pipeline(config, warehouse)?;
            let graph = pipeline.ingest_graph(&sources)?;
            run_graph(&pipeline, graph).await
        }

        Command::Warehouse {
            project,
            namespace,
            datasets,
            database_url,
        } => {
            let config = etl_config(project, namespace)?;
            let kinds = parse_kinds(&datasets)?;
            let warehouse: Arc<dyn Warehouse> =
                Arc::new(PostgresWarehouse::connect(&database_url).await?);
            let pipeline = build_pipeline(config, warehouse)?;
            let graph = pipeline.warehouse_graph(&kinds)?;
            run_graph(&pipeline, graph).await
        }

        Command::Run {
            datasets,
            project,
            namespace,
            database_url,
        } => {
            let config = etl_config(project, namespace)?;
            let sources = parse_sources(&datasets)?;
            let warehouse: Arc<dyn Warehouse> =
                Arc::new(PostgresWarehouse::connect(&database_url).await?);
            let pipeline = build_pipeline(config, warehouse)?;
            let graph = pipeline.full_graph(&sources)?;
            run_graph(&pipeline, graph).await
        }
    }
}

/// Environment config with CLI flag overrides.
fn etl_config(project: Option<String>, namespace: Option<String>) -> Result<EtlConfig> {
    let mut config = EtlConfig::load()?;
    if let Some(project) = project {
        config.project = project;
    }
    if let Some(namespace) = namespace {
        config.namespace = namespace;
    }
    config.validate()?;
    Ok(config)
}

fn build_pipeline(config: EtlConfig, warehouse: Arc<dyn Warehouse>) -> Result<Pipeline> {
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(StorageConfig::from_env()));
    let staging = Arc::new(StagingStore::new(config.data_dir.clone(), store));
    Ok(Pipeline::new(
        config,
        Arc::new(Fetcher::new()?),
        staging,
        warehouse,
    ))
}

async fn run_graph(pipeline: &Pipeline, graph: mdp_etl::TaskGraph) -> Result<RunReport> {
    let orchestrator = pipeline.orchestrator();

    // Ctrl-C stops scheduling new nodes; in-flight nodes finish naturally.
    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancellation requested, letting in-flight tasks finish");
            cancel.cancel();
        }
    });

    Ok(orchestrator.run(graph).await)
}

/// Parse repeatable `kind=locator` arguments.
fn parse_sources(args: &[String]) -> Result<Vec<(DatasetKind, String)>> {
    args.iter()
        .map(|arg| {
            let (kind, locator) = arg
                .split_once('=')
                .ok_or_else(|| anyhow!("expected kind=locator, got {:?}", arg))?;
            let kind: DatasetKind = kind.parse()?;
            if locator.is_empty() {
                return Err(anyhow!("empty locator for dataset {}", kind));
            }
            Ok((kind, locator.to_string()))
        })
        .collect()
}

/// Parse a comma-separated kind list.
fn parse_kinds(arg: &str) -> Result<Vec<DatasetKind>> {
    arg.split(',')
        .map(|kind| kind.parse::<DatasetKind>().map_err(Into::into))
        .collect()
}
