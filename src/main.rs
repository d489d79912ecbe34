use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod ingest;
mod lms;
#[cfg(test)]
mod memory;
mod models;
mod normalize;
mod report;
mod transform;

use config::{LmsConfig, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT_SECS};
use db::PgStore;
use error::IngestError;
use ingest::IngestionService;
use lms::LmsClient;
use models::{CsvExport, ResponseStatus};

#[derive(Parser)]
#[command(name = "lms-ingest")]
#[command(about = "Pull LMS grades into AI training records", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    #[arg(long, env = "LMS_URL")]
    lms_url: Option<String>,

    #[arg(long, env = "LMS_TOKEN", hide_env_values = true)]
    lms_token: Option<String>,

    #[arg(long, env = "LMS_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    lms_timeout_secs: u64,

    /// Grade requests in flight per course
    #[arg(long, env = "LMS_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    lms_concurrency: usize,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Sync the enrolled students of one course
    SyncCourse {
        #[arg(long)]
        course_id: i64,
    },
    /// Pull every course and transform grades into AI records
    Pull,
    /// List stored AI records
    Records {
        #[arg(long)]
        student_id: Option<i64>,
    },
    /// Export AI records as CSV
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Summarize stored AI records
    Stats,
    /// Check that the LMS answers. Unlike a plain liveness check this makes one
    /// course-listing round-trip, so it fails while the LMS is down.
    Health,
}

impl Cli {
    fn lms_config(&self) -> LmsConfig {
        LmsConfig {
            base_url: self.lms_url.clone(),
            token: self.lms_token.clone(),
            timeout: Duration::from_secs(self.lms_timeout_secs),
            concurrency: self.lms_concurrency,
        }
    }
}

fn lms_failure(err: IngestError) -> anyhow::Error {
    if err.is_gateway() {
        anyhow::Error::new(err)
            .context("LMS request failed; check LMS_URL, LMS_TOKEN and connectivity")
    } else {
        err.into()
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "lms_ingest=debug"
    } else {
        "lms_ingest=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone());

    let lms_service = || -> anyhow::Result<IngestionService<LmsClient, PgStore>> {
        let lms_config = cli.lms_config();
        let client = LmsClient::new(&lms_config).context("LMS client is not configured")?;
        Ok(IngestionService::new(
            client,
            store.clone(),
            lms_config.concurrency(),
        ))
    };

    match &cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::SyncCourse { course_id } => {
            let summary = lms_service()?
                .sync_course_students(*course_id)
                .await
                .map_err(lms_failure)?;
            print_json(&summary)?;
        }
        Commands::Pull => {
            let summary = lms_service()?.pull_and_transform_data().await;
            print_json(&summary)?;
            if summary.status == ResponseStatus::Error {
                std::process::exit(1);
            }
        }
        Commands::Records { student_id } => {
            let records = match student_id {
                Some(id) => report::get_student_ai_data(&store, *id).await?,
                None => report::get_all_ai_student_data(&store).await?,
            };
            print_json(&records)?;
        }
        Commands::Export { out } => {
            let export = report::export_ai_data_as_csv(&store).await?;
            match (out, &export) {
                (Some(path), CsvExport::Data { data, record_count, .. }) => {
                    std::fs::write(path, data)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported {record_count} records to {}.", path.display());
                }
                _ => print_json(&export)?,
            }
        }
        Commands::Stats => {
            print_json(&report::get_data_statistics(&store).await?)?;
        }
        Commands::Health => {
            let health = lms_service()?.health().await.map_err(lms_failure)?;
            print_json(&health)?;
        }
    }

    Ok(())
}
