//! objmigrate: copy listed source objects to a destination bucket.
//!
//! Crash-only design: a run can be killed at any point and simply started
//! again.  Objects already in the record ledger are skipped; anything that
//! was in flight is transferred again from scratch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::Semaphore;
use tracing::info;

use objmigrate::config::{Config, DestinationConfig};
use objmigrate::record::sqlite::SqliteLedger;
use objmigrate::runner::MigrationRunner;
use objmigrate::source::{HttpDownloader, QiniuSigner};
use objmigrate::task::TaskSettings;
use objmigrate::transport::local::LocalTransport;
use objmigrate::transport::s3::S3Transport;
use objmigrate::transport::{TransportSet, UploadTransport};
use objmigrate::MigrationContext;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "objmigrate",
    version,
    about = "Resumable object migration to S3-compatible storage"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "objmigrate.yaml")]
    config: PathBuf,

    /// Tab-separated manifest listing `key size etag` per line.
    #[arg(short, long)]
    manifest: PathBuf,

    /// Override `migrate.threads`.
    #[arg(short, long)]
    threads: Option<usize>,
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = objmigrate::config::load_config(&cli.config)?;
    if let Some(threads) = cli.threads {
        config.migrate.threads = threads;
    }
    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config.display());
    config.validate()?;

    if config.observability.metrics {
        objmigrate::metrics::init_metrics()?;
        objmigrate::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // Ensure parent directory exists for the SQLite file.
    let record_path = &config.record.path;
    if let Some(parent) = Path::new(record_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let ledger = SqliteLedger::new(record_path)?;
    info!("Record ledger opened at {}", record_path);

    let transports = build_transports(&config.destination).await?;

    let downloader = HttpDownloader::new(
        Duration::from_secs(config.download.connect_timeout_secs),
        Duration::from_secs(config.download.timeout_secs),
        config.download.retries,
    )?;

    let ctx = Arc::new(MigrationContext {
        settings: TaskSettings::from_config(&config),
        signer: Arc::new(QiniuSigner::new(
            config.source.access_key.clone(),
            config.source.secret_key.clone(),
        )),
        downloader: Arc::new(downloader),
        transports,
        ledger: Arc::new(ledger),
        limiter: Arc::new(Semaphore::new(config.migrate.threads)),
    });

    info!(
        kind = %config.migrate.kind,
        threads = config.migrate.threads,
        bucket = %config.destination.bucket,
        "Starting migration from {}",
        cli.manifest.display()
    );
    let started = Instant::now();
    let runner = MigrationRunner::new(ctx);
    let summary = runner.run_manifest_file(&cli.manifest).await?;

    println!(
        "success: {}, fail: {} ({} retryable), skip: {}, malformed: {}, bytes: {}, elapsed: {:.1}s",
        summary.stats.success,
        summary.stats.fail,
        summary.retryable,
        summary.stats.skip,
        summary.malformed,
        summary.stats.bytes,
        started.elapsed().as_secs_f64()
    );

    if let Some(path) = &config.observability.metrics_path {
        if config.observability.metrics {
            objmigrate::metrics::write_snapshot(path)?;
            info!("Metrics written to {}", path.display());
        }
    }

    if summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

/// Build the small-file and big-file transports for the configured backend.
async fn build_transports(dest: &DestinationConfig) -> anyhow::Result<TransportSet> {
    match dest.backend.as_str() {
        "s3" => {
            let s3 = dest.s3.as_ref().ok_or_else(|| {
                anyhow::anyhow!(
                    "destination.backend is 's3' but destination.s3 config section is missing"
                )
            })?;
            let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

            let small = S3Transport::new(
                s3.region.clone(),
                non_empty(&s3.endpoint_url),
                s3.use_path_style,
                non_empty(&s3.access_key_id),
                non_empty(&s3.secret_access_key),
                None,
            )
            .await?;
            let big = S3Transport::new(
                s3.region.clone(),
                non_empty(&s3.endpoint_url),
                s3.use_path_style,
                non_empty(&s3.access_key_id),
                non_empty(&s3.secret_access_key),
                Some(s3.part_size),
            )
            .await?;
            info!(
                region = %s3.region,
                threshold = dest.big_file_threshold,
                "S3 destination initialized"
            );
            Ok(TransportSet {
                small: Arc::new(small),
                big: Arc::new(big),
                big_file_threshold: dest.big_file_threshold,
            })
        }
        "local" => {
            let local: Arc<dyn UploadTransport> =
                Arc::new(LocalTransport::new(&dest.local.root_dir)?);
            info!("Local destination initialized at {}", dest.local.root_dir);
            Ok(TransportSet::single(local))
        }
        other => anyhow::bail!("unknown destination.backend: {other}"),
    }
}
