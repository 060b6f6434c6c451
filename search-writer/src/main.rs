use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};

use search_writer::{init_tracing, AppError, Dependencies, LogFormat};
use search_writer_pipeline::{
    backup, delete_by_query, restore, BulkWriterConfig, IndexMigrator, MigrationConfig,
    MigrationOutcome, ScrollConfig,
};
use search_writer_repository::{queries, SearchApiClient};
use search_writer_shared::{IndexDescriptor, StatusSummary};

#[derive(Parser)]
#[command(name = "search-writer")]
#[command(about = "Index migration and maintenance for aliased search indices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// OpenSearch URL (overrides OPENSEARCH_URL)
    #[arg(long, global = true)]
    opensearch_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring an alias to the given index version, copying live data if needed
    Migrate {
        /// Alias readers and writers address
        #[arg(long)]
        alias: String,
        /// Target version; the index is named <alias>_v<version>
        #[arg(long)]
        version: u32,
        /// JSON file with the settings and mappings of the target version
        #[arg(long)]
        mapping: PathBuf,
        /// Replica count, applied only when the mapping sets none
        #[arg(long)]
        replicas: Option<u32>,
        /// Seconds subtracted from the start time for the catch-up pass
        #[arg(long, default_value = "5")]
        safety_skew: u64,
        /// Timestamp field selecting documents for the catch-up pass
        #[arg(long, default_value = "updated_at")]
        modified_field: String,
        #[arg(long, default_value = "1000")]
        batch_size: usize,
        #[arg(long, default_value = "9")]
        workers: usize,
    },
    /// Write every document of an index to a gzip file
    Backup {
        #[arg(long)]
        index: String,
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value = "1000")]
        page_size: usize,
    },
    /// Index every document of a backup file
    Restore {
        #[arg(long)]
        index: String,
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value = "500")]
        batch_size: usize,
        #[arg(long, default_value = "4")]
        workers: usize,
    },
    /// Delete every document matching a query clause
    DeleteByQuery {
        #[arg(long)]
        index: String,
        /// Query clause as JSON, e.g. '{"ids": {"values": ["1"]}}'
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "1000")]
        page_size: usize,
    },
    /// Count documents, optionally matching a query clause
    Count {
        #[arg(long)]
        index: String,
        #[arg(long)]
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing(LogFormat::from_env());

    let cli = Cli::parse();

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(AppError::Interrupted),
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let deps = Dependencies::new(cli.opensearch_url).await?;
    let client = deps.client;

    match cli.command {
        Commands::Migrate {
            alias,
            version,
            mapping,
            replicas,
            safety_skew,
            modified_field,
            batch_size,
            workers,
        } => {
            let mut descriptor = IndexDescriptor::new(alias, version, mapping)
                .with_safety_skew(Duration::from_secs(safety_skew))
                .with_modified_field(modified_field);
            if let Some(replicas) = replicas {
                descriptor = descriptor.with_replicas(replicas);
            }
            migrate(client, &descriptor, batch_size, workers).await
        }
        Commands::Backup {
            index,
            path,
            page_size,
        } => {
            let scroll = ScrollConfig {
                page_size,
                ..ScrollConfig::default()
            };
            let written = backup(&client, &index, &path, &scroll).await?;
            println!("{}", serde_json::json!({ "index": index, "written": written }));
            Ok(())
        }
        Commands::Restore {
            index,
            path,
            batch_size,
            workers,
        } => {
            let config = BulkWriterConfig::default()
                .with_batch_size(batch_size)
                .with_workers(workers)
                .with_updated_at_field(None);
            let summary = restore(&client, &index, &path, config).await?;
            report(&index, &summary)
        }
        Commands::DeleteByQuery {
            index,
            query,
            page_size,
        } => {
            let clause = parse_clause(&query)?;
            let scroll = ScrollConfig {
                page_size,
                ..ScrollConfig::default()
            };
            let summary = delete_by_query(&client, &index, clause, &scroll).await?;
            report(&index, &summary)
        }
        Commands::Count { index, query } => {
            let clause = match query {
                Some(query) => parse_clause(&query)?,
                None => queries::match_all(),
            };
            let count = client.count(&index, clause).await?;
            println!("{}", serde_json::json!({ "index": index, "count": count }));
            Ok(())
        }
    }
}

async fn migrate(
    client: SearchApiClient,
    descriptor: &IndexDescriptor,
    batch_size: usize,
    workers: usize,
) -> Result<(), AppError> {
    let migrator = IndexMigrator::with_config(
        client,
        MigrationConfig::default()
            .with_batch_size(batch_size)
            .with_workers(workers),
    );

    match migrator.migrate(descriptor).await? {
        MigrationOutcome::NotNeeded => {
            info!(alias = %descriptor.alias, version = descriptor.version, "Already up to date");
        }
        MigrationOutcome::Created { index } => {
            info!(alias = %descriptor.alias, index = %index, "Created first index generation");
        }
        MigrationOutcome::Migrated {
            from,
            to,
            first_pass,
            second_pass,
        } => {
            info!(
                alias = %descriptor.alias,
                from = %from,
                to = %to,
                copied = first_pass.ok,
                caught_up = second_pass.ok,
                "Migration finished"
            );
        }
    }
    Ok(())
}

fn parse_clause(raw: &str) -> Result<Value, AppError> {
    serde_json::from_str(raw).map_err(|e| AppError::config(format!("invalid query JSON: {}", e)))
}

fn report(index: &str, summary: &StatusSummary) -> Result<(), AppError> {
    println!("{}", serde_json::json!({ "index": index, "status": summary }));
    if summary.is_success() {
        Ok(())
    } else {
        Err(AppError::Incomplete(format!(
            "{} finished with {} errors, {} conflicts and {} failed requests",
            index, summary.errors, summary.conflicts, summary.failures
        )))
    }
}
