//! Collector CLI
//!
//! Schema management, record import, enrichment stages, engagement polling,
//! table export/restore and bulk reset. Every command prints its summary as
//! JSON on stdout; logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use collector_common::clients::{FacebookGraph, HttpFetcher};
use collector_common::db::{schema, ResetTarget};
use collector_common::{metrics, AppConfig, DbPool, Fetcher, Repository, Stage, VERSION};
use collector_pipeline::{
    export_tables, import_tables, load_records, EngagementPoller, ImportMode, Ingestor, Pipeline, Table,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collector")]
#[command(about = "DOI enrichment pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file, overriding the layered config/ directory
    #[arg(short, long, global = true, env = "COLLECTOR_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create all tables
    InitDb,

    /// Drop all tables
    DropDb,

    /// Drop and recreate all tables
    ResetDb,

    /// Import identifier records from a CSV file or a JSON payload
    Import {
        file: PathBuf,

        /// Rows per transaction
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Canonical https://doi.org URLs
    DoiNew,

    /// Canonical http://dx.doi.org URLs
    DoiOld,

    /// Both canonical URL forms
    DoiUrls,

    /// Landing pages via the DOI resolver
    DoiLp,

    /// PubMed and PMC URLs via the NCBI ID converter
    Ncbi,

    /// Open-access URLs via Unpaywall
    Unpaywall,

    /// Every enrichment stage in order
    Enrich,

    /// Poll Facebook engagement for every stored URL
    Engagement,

    /// Bulk delete: imports, dois, urls, requests, engagement or all
    Delete { target: ResetTarget },

    /// Write tables to `{dir}/{prefix}{table}.csv`
    Export {
        #[arg(long, default_value = "data/export")]
        dir: PathBuf,

        /// File name prefix; defaults to the current timestamp
        #[arg(long)]
        prefix: Option<String>,

        /// Comma-separated subset of imports,dois,urls,requests,fbrequests
        #[arg(long, value_delimiter = ',')]
        tables: Vec<Table>,
    },

    /// Restore tables from `{dir}/{prefix}{table}.csv`
    ImportTables {
        #[arg(long, default_value = "data/import")]
        dir: PathBuf,

        #[arg(long, default_value = "")]
        prefix: String,

        /// Comma-separated subset of imports,dois,urls,requests,fbrequests
        #[arg(long, value_delimiter = ',')]
        tables: Vec<Table>,

        /// append keeps existing rows; reset recreates every table first
        #[arg(long, default_value = "append")]
        mode: ImportMode,
    },

    /// Table counts and identifiers pending per stage
    Status,
}

/// Requested tables, or every table when none were named
fn selected(tables: Vec<Table>) -> Vec<Table> {
    if tables.is_empty() {
        Table::ALL.to_vec()
    } else {
        tables
    }
}

#[derive(Serialize)]
struct StatusReport {
    tables: collector_common::db::TableCounts,
    pending: Vec<PendingStage>,
}

#[derive(Serialize)]
struct PendingStage {
    stage: Stage,
    pending: u64,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn init_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let port = config.observability.metrics_port;
    if port == 0 {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            metrics::EXTERNAL_LATENCY_BUCKETS,
        )?
        .install()
        .context("failed to install Prometheus exporter")?;

    metrics::register_metrics();
    info!(port, "Metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    init_tracing(&config);
    info!(
        service = %config.observability.service_name,
        "Starting collector v{}",
        VERSION
    );
    init_metrics(&config)?;

    let pool = DbPool::new(&config.database).await?;
    let repository = Repository::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            schema::create_tables(pool.write()).await?;
            info!("Tables created");
        }
        Commands::DropDb => {
            schema::drop_tables(pool.write()).await?;
            info!("Tables dropped");
        }
        Commands::ResetDb => {
            schema::reset_tables(pool.write()).await?;
            info!("Tables reset");
        }
        Commands::Import { file, batch_size } => {
            let (source, loaded) = load_records(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let batch_size = batch_size.unwrap_or(config.pipeline.batch_size);

            let ingestor = Ingestor::new(repository, batch_size);
            let mut summary = ingestor.ingest(&source, loaded.records).await?;
            summary.rejected = loaded.rejected;
            print_json(&summary)?;
        }
        command @ (Commands::DoiNew
        | Commands::DoiOld
        | Commands::DoiUrls
        | Commands::DoiLp
        | Commands::Ncbi
        | Commands::Unpaywall
        | Commands::Enrich) => {
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.apis, &config.rate_limit)?);
            let pipeline = Pipeline::new(config.clone(), fetcher, repository);

            let stages: &[Stage] = match command {
                Commands::DoiNew => &[Stage::DoiNew],
                Commands::DoiOld => &[Stage::DoiOld],
                Commands::DoiUrls => &[Stage::DoiNew, Stage::DoiOld],
                Commands::DoiLp => &[Stage::LandingPage],
                Commands::Ncbi => &[Stage::Ncbi],
                Commands::Unpaywall => &[Stage::Unpaywall],
                _ => &[],
            };

            let summaries = if stages.is_empty() {
                pipeline.enrich_all().await?
            } else {
                let mut summaries = Vec::with_capacity(stages.len());
                for stage in stages {
                    if let Some(summary) = pipeline.run(*stage).await? {
                        summaries.push(summary);
                    }
                }
                summaries
            };
            print_json(&summaries)?;
        }
        Commands::Engagement => {
            let api = Arc::new(FacebookGraph::new(&config.facebook, &config.apis)?);
            let poller = EngagementPoller::new(repository, api, config.pipeline.engagement_batch_size);
            print_json(&poller.poll().await?)?;
        }
        Commands::Delete { target } => {
            let deleted = repository.delete(target).await?;
            print_json(&deleted)?;
        }
        Commands::Export { dir, prefix, tables } => {
            let prefix = prefix.unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d-%H-%M-%S_").to_string());
            let exported = export_tables(&repository, &selected(tables), &dir, &prefix).await?;
            print_json(&exported)?;
        }
        Commands::ImportTables { dir, prefix, tables, mode } => {
            let restored = import_tables(&repository, &selected(tables), &dir, &prefix, mode).await?;
            print_json(&restored)?;
        }
        Commands::Status => {
            let report = StatusReport {
                tables: repository.counts().await?,
                pending: repository
                    .pending_counts()
                    .await?
                    .into_iter()
                    .map(|(stage, pending)| PendingStage { stage, pending })
                    .collect(),
            };
            print_json(&report)?;
        }
    }

    Ok(())
}
