//! mvmt-ingest - movement recording ingestion CLI
//!
//! Subcommands:
//! - `ingest <DIR> --author <NAME>`: upload new `.txt` recordings, tag them,
//!   register a dataset version
//! - `load`: read every stored recording back as one CSV table
//! - `decode <FILENAME>...`: show the metadata encoded in filenames
//! - `versions`: list registered dataset versions

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mvmt_common::config::{ConfigOverrides, IngestConfig, TomlConfig};
use mvmt_common::logging::init_tracing;
use mvmt_ingest::credentials::AzCliCredentialProvider;
use mvmt_ingest::loader::{load_dataset, write_csv};
use mvmt_ingest::store::{connect_azure, DataDomain, LocalStore, RemoteStore};
use mvmt_ingest::{decode, Catalog, IngestionWorkflow, SqliteCatalog};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Command-line arguments for mvmt-ingest
#[derive(Parser, Debug)]
#[command(name = "mvmt-ingest")]
#[command(about = "Upload, tag and reload movement recordings")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults to ~/.config/mvmt/config.toml)
    #[arg(long, global = true, env = "MVMT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Log level when --debug is not given (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Blob container for raw recordings
    #[arg(long, global = true)]
    container: Option<String>,

    /// Dataset name registered after ingestion
    #[arg(long, global = true)]
    dataset_name: Option<String>,

    /// Dataset catalog database
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Files processed at once during ingestion
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload new recordings from a directory and register a dataset version
    Ingest {
        /// Directory holding the `.txt` recordings (not searched recursively)
        directory: PathBuf,

        /// Recorded in the dataset description as `author: <AUTHOR>`
        #[arg(long, env = "MVMT_AUTHOR")]
        author: String,

        /// Use a local directory instead of Azure Blob Storage
        #[arg(long)]
        local_store: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load stored recordings as one table and write it as CSV
    Load {
        #[arg(long, value_enum, default_value_t = Domain::Raw)]
        domain: Domain,

        /// Read from a local directory instead of Azure Blob Storage
        #[arg(long)]
        local_store: Option<PathBuf>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decode recording filenames
    Decode {
        #[arg(required = true)]
        filenames: Vec<String>,

        /// Print tags as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered versions of a dataset
    Versions {
        /// Dataset name (configured name if omitted)
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Domain {
    /// Raw recordings
    Raw,
    /// Computed feature sets
    FeatureSets,
}

impl From<Domain> for DataDomain {
    fn from(domain: Domain) -> Self {
        match domain {
            Domain::Raw => DataDomain::RawData,
            Domain::FeatureSets => DataDomain::FeatureSets,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Decoding needs neither cloud settings nor a catalog
    if let Command::Decode { filenames, json } = &cli.command {
        let level = if cli.debug { "debug" } else { cli.log_level.as_deref().unwrap_or("warn") };
        init_tracing(level)?;
        return run_decode(filenames, *json);
    }

    let config = load_config(&cli)?;
    init_tracing(config.effective_log_level())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        built = env!("BUILD_TIMESTAMP"),
        profile = env!("BUILD_PROFILE"),
        "Starting mvmt-ingest"
    );

    match cli.command {
        Command::Ingest {
            directory,
            author,
            local_store,
            json,
        } => run_ingest(&config, &directory, &author, local_store.as_deref(), json).await,
        Command::Load {
            domain,
            local_store,
            output,
        } => run_load(&config, domain, local_store.as_deref(), output.as_deref()).await,
        Command::Versions { name } => run_versions(&config, name.as_deref()).await,
        Command::Decode { filenames, json } => run_decode(&filenames, json),
    }
}

fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let overrides = ConfigOverrides {
        container: cli.container.clone(),
        dataset_name: cli.dataset_name.clone(),
        catalog_path: cli.catalog.clone(),
        max_concurrent_uploads: cli.concurrency,
        debug: cli.debug.then_some(true),
        log_level: cli.log_level.clone(),
    };

    let config = match &cli.config {
        Some(path) => {
            let toml_config = TomlConfig::from_file(path)?;
            IngestConfig::resolve(&toml_config, |key| std::env::var(key).ok(), &overrides)?
        }
        None => IngestConfig::load(&overrides)?,
    };
    Ok(config)
}

async fn open_store(
    config: &IngestConfig,
    domain: DataDomain,
    local_store: Option<&Path>,
) -> Result<Arc<dyn RemoteStore>> {
    if let Some(dir) = local_store {
        let store = LocalStore::open(dir)
            .await
            .with_context(|| format!("Failed to open local store {}", dir.display()))?;
        return Ok(Arc::new(store));
    }

    let provider = AzCliCredentialProvider::new();
    let store = connect_azure(config, domain, &provider)
        .await
        .context("Failed to connect to blob storage")?;
    Ok(store)
}

async fn run_ingest(
    config: &IngestConfig,
    directory: &Path,
    author: &str,
    local_store: Option<&Path>,
    json: bool,
) -> Result<()> {
    let store = open_store(config, DataDomain::RawData, local_store).await?;
    let catalog = SqliteCatalog::open(&config.catalog_path)
        .await
        .context("Failed to open dataset catalog")?;

    let workflow = IngestionWorkflow::new(store, Arc::new(catalog), &config.dataset_name)
        .with_max_concurrent(config.max_concurrent_uploads);
    let report = workflow
        .run(directory, author)
        .await
        .with_context(|| format!("Ingestion of {} failed", directory.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} files considered: {} uploaded ({} tagged), {} already stored, {} with errors",
            report.considered(),
            report.uploaded(),
            report.tagged(),
            report.already_remote(),
            report.failed()
        );
        println!(
            "Registered {} version {} at {}",
            report.dataset.name, report.dataset.version, report.dataset.path
        );
    }

    if report.failed() > 0 {
        warn!(failed = report.failed(), "Some files were not fully ingested; see log for details");
    }
    Ok(())
}

async fn run_load(
    config: &IngestConfig,
    domain: Domain,
    local_store: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let store = open_store(config, domain.into(), local_store).await?;
    let report = load_dataset(store.as_ref())
        .await
        .context("Failed to load dataset")?;

    for skipped in &report.skipped {
        warn!(object = %skipped.name, reason = %skipped.reason, "Not loaded");
    }

    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_csv(&report.dataset, std::io::BufWriter::new(file))?;
            info!(path = %path.display(), rows = report.dataset.rows.len(), "Wrote dataset");
        }
        None => {
            let stdout = std::io::stdout();
            write_csv(&report.dataset, stdout.lock())?;
        }
    }
    Ok(())
}

async fn run_versions(config: &IngestConfig, name: Option<&str>) -> Result<()> {
    let name = name.unwrap_or(&config.dataset_name);
    let catalog = SqliteCatalog::open(&config.catalog_path)
        .await
        .context("Failed to open dataset catalog")?;

    let versions = catalog.versions(name).await?;
    if versions.is_empty() {
        println!("No versions registered for {}", name);
        return Ok(());
    }
    for v in versions {
        println!(
            "{}\tv{}\t{}\t{}\t{}",
            v.name,
            v.version,
            v.created_at.to_rfc3339(),
            v.path,
            v.description
        );
    }
    Ok(())
}

fn run_decode(filenames: &[String], json: bool) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;

    for filename in filenames {
        match decode(filename) {
            Ok(meta) if json => {
                writeln!(out, "{}", serde_json::to_string(&meta.tags())?)?;
            }
            Ok(meta) => {
                writeln!(out, "{}\t{}", filename, meta.values().join("\t"))?;
            }
            Err(e) => {
                eprintln!("{}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} filenames did not decode", failures, filenames.len());
    }
    Ok(())
}
