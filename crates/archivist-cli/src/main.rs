//! `archivist` command-line interface
//!
//! ```text
//! archivist [--config config.json] track [--services A,B] [--types T] [--extract-only]
//! archivist [--config config.json] latest <service> <terms type> [--document ID]
//! ```
//!
//! Exit codes: `0` success, `1` startup or configuration error, `2` fatal
//! tracking error (including a graceful shutdown that timed out).

mod config;
mod declarations;
mod extractor;
mod fetcher;
mod listener;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use archivist_core::{Archivist, ArchivistContext, ArchivistError, TrackOptions};
use archivist_storage::open_recorder;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::declarations::load_declarations;
use crate::extractor::HtmlExtractor;
use crate::fetcher::HttpFetcher;
use crate::listener::LoggingListener;
use crate::logging::init_logging;

const EXIT_STARTUP: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "archivist")]
#[command(author, version, about = "Track changes of documents hosted online", long_about = None)]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, record and extract the declared terms
    Track {
        /// Only track these services (comma separated or repeated)
        #[arg(long, value_delimiter = ',')]
        services: Vec<String>,

        /// Only track these terms types
        #[arg(long = "types", value_delimiter = ',')]
        terms_types: Vec<String>,

        /// Re-extract versions from the latest snapshots without fetching
        #[arg(long)]
        extract_only: bool,
    },

    /// Print the metadata of the latest snapshot of a terms
    Latest {
        service: String,

        terms_type: String,

        /// Document id, for terms combining several documents
        #[arg(long)]
        document: Option<String>,
    },
}

enum Failure {
    Startup(anyhow::Error),
    Tracking(ArchivistError),
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Startup(err)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Startup(err)) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_STARTUP)
        }
        Err(Failure::Tracking(err)) => {
            tracing::error!(error = %err, "tracking stopped");
            eprintln!("error: {err}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> Result<(), Failure> {
    let config = Config::load(&cli.config)?;
    init_logging(&config.log).context("failed to set up logging")?;

    match cli.command {
        Commands::Track {
            services,
            terms_types,
            extract_only,
        } => {
            let options = TrackOptions {
                services: (!services.is_empty()).then_some(services),
                terms_types: (!terms_types.is_empty()).then_some(terms_types),
                extract_only,
            };
            track(config, options).await
        }
        Commands::Latest {
            service,
            terms_type,
            document,
        } => Ok(latest(&config, &service, &terms_type, document.as_deref()).await?),
    }
}

async fn track(config: Config, options: TrackOptions) -> Result<(), Failure> {
    let declarations = load_declarations(&config.declarations_path)?;
    let context = ArchivistContext {
        recorder: Arc::new(open_recorder(&config.recorder)),
        fetcher: Arc::new(HttpFetcher::new(config.fetcher.clone())),
        extractor: Arc::new(HtmlExtractor),
        declarations: Arc::new(declarations),
    };
    let archivist = Archivist::new(context, config.archivist.clone());
    let listener = Arc::new(LoggingListener::new());
    archivist.attach(listener.clone());

    archivist
        .initialize()
        .await
        .context("failed to open the recorder")?;

    let report = archivist.track(options).await.map_err(Failure::Tracking)?;
    archivist.finalize().await.map_err(Failure::Tracking)?;

    let output = serde_json::json!({
        "run_id": report.run_id,
        "services": report.services,
        "terms": report.terms,
        "extract_only": report.extract_only,
        "summary": listener.summary(),
    });
    println!("{output}");
    Ok(())
}

async fn latest(
    config: &Config,
    service_id: &str,
    terms_type: &str,
    document_id: Option<&str>,
) -> anyhow::Result<()> {
    let recorder = open_recorder(&config.recorder);
    recorder
        .initialize()
        .await
        .context("failed to open the recorder")?;

    let snapshot = recorder
        .get_latest_snapshot(service_id, terms_type, document_id)
        .await
        .with_context(|| format!("failed to read snapshots of {service_id} {terms_type}"))?;
    recorder.finalize().await.context("failed to close the recorder")?;

    match snapshot {
        Some(record) => {
            let output = serde_json::json!({
                "id": record.id,
                "service_id": record.service_id,
                "terms_type": record.terms_type,
                "document_id": record.document_id,
                "mime_type": record.mime_type,
                "fetch_date": record.fetch_date,
                "is_first_record": record.is_first_record,
                "bytes": record.content.len(),
            });
            println!("{output}");
        }
        None => eprintln!("no snapshot recorded for {service_id} {terms_type}"),
    }
    Ok(())
}
