mod config;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use granary_client::{CkanClient, build_session};
use granary_core::{
    DownloadConfig, DownloadReport, DownloadService, HarvestConfig, HttpConfig, IngestConfig,
    IngestService, RepairConfig, RepairService, StageStats, TracingReporter, load_harvest_config,
};
use granary_db::{TableRepository, connect_pool};

use crate::config::{
    Command, Config, DEFAULT_CATALOG_URL, DownloadArgs, IngestArgs, RepairArgs, StoreArgs,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let Config {
        output,
        log_level,
        config_path,
        store,
        command,
    } = Config::parse();

    init_tracing(&log_level)?;

    let cancel_token = CancellationToken::new();
    spawn_interrupt_handler(cancel_token.clone());

    match command {
        Command::Download(args) => {
            let report = download(&args, &output, config_path, &cancel_token).await?;
            print_download_summary(&report);
        }
        Command::Repair(args) => {
            let stats = repair(&args, &output, &cancel_token).await?;
            print_stage_summary("REPAIR", &stats, "repaired", "clean");
        }
        Command::Ingest(args) => {
            let pool = connect(&store).await?;
            let stats = ingest(&args, &output, pool, &cancel_token).await?;
            print_stage_summary("INGEST", &stats, "loaded", "skipped");
        }
        Command::Run {
            download: download_args,
            repair: repair_args,
            ingest: ingest_args,
        } => {
            // Store failures are fatal; surface them before downloading
            let pool = connect(&store).await?;

            let report = download(&download_args, &output, config_path, &cancel_token).await?;
            print_download_summary(&report);
            if cancel_token.is_cancelled() {
                return Ok(());
            }

            let stats = repair(&repair_args, &output, &cancel_token).await?;
            print_stage_summary("REPAIR", &stats, "repaired", "clean");
            if cancel_token.is_cancelled() {
                return Ok(());
            }

            let stats = ingest(&ingest_args, &output, pool, &cancel_token).await?;
            print_stage_summary("INGEST", &stats, "loaded", "skipped");
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level '{}'", log_level))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

/// Cancels the token on Ctrl-C; in-flight work finishes, nothing new starts.
fn spawn_interrupt_handler(cancel_token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            cancel_token.cancel();
        }
    });
}

async fn connect(store: &StoreArgs) -> anyhow::Result<PgPool> {
    let store_config = store.store_config();
    info!("Connecting to database...");
    connect_pool(&store_config, &store.db_config())
        .await
        .with_context(|| format!("Failed to connect to database ({:?})", store_config))
}

/// Merges command line flags over the optional config file.
///
/// Flags win; an empty flag list falls back to the file's list.
fn resolve_catalog(args: &DownloadArgs, file: Option<HarvestConfig>) -> (String, DownloadConfig) {
    let entry = file.map(|f| f.catalog);

    let url = args
        .catalog
        .clone()
        .or_else(|| entry.as_ref().map(|e| e.url.clone()))
        .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());

    let pick = |flags: &[String], from_file: Option<&Vec<String>>| {
        if flags.is_empty() {
            from_file.cloned().unwrap_or_default()
        } else {
            flags.to_vec()
        }
    };
    let groups = pick(&args.groups, entry.as_ref().map(|e| &e.groups));
    let formats = pick(&args.formats, entry.as_ref().map(|e| &e.formats));

    (
        url,
        DownloadConfig::default()
            .with_groups(groups)
            .with_formats(formats),
    )
}

async fn download(
    args: &DownloadArgs,
    output: &Path,
    config_path: Option<PathBuf>,
    cancel_token: &CancellationToken,
) -> anyhow::Result<DownloadReport> {
    let harvest_config = load_harvest_config(config_path)?;
    let (catalog_url, download_config) = resolve_catalog(args, harvest_config);

    let http = HttpConfig::default();
    let session = build_session(&http).context("Failed to build HTTP session")?;
    let client = CkanClient::new(session, &catalog_url, &http)?;

    info!(
        catalog = catalog_url.as_str(),
        output = %output.display(),
        max_concurrency = args.max_concurrency,
        "Starting download"
    );

    let service = DownloadService::new(client, download_config);
    let report = service
        .run_with_progress(
            output,
            args.max_concurrency,
            &TracingReporter,
            cancel_token.clone(),
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    Ok(report)
}

async fn repair(
    args: &RepairArgs,
    output: &Path,
    cancel_token: &CancellationToken,
) -> anyhow::Result<StageStats> {
    info!(output = %output.display(), policy = %args.policy, "Starting repair");
    let service = RepairService::new(RepairConfig {
        policy: args.policy,
    });
    let stats = service
        .repair_dir_with_progress(output, &TracingReporter, cancel_token.clone())
        .await
        .with_context(|| format!("Cannot repair files under {}", output.display()))?;
    Ok(stats)
}

async fn ingest(
    args: &IngestArgs,
    output: &Path,
    pool: PgPool,
    cancel_token: &CancellationToken,
) -> anyhow::Result<StageStats> {
    info!(output = %output.display(), "Starting ingest");
    let config = IngestConfig::default()
        .with_sample_rows(args.sample_rows)
        .with_skip_loaded(args.skip_loaded);
    let service = IngestService::new(TableRepository::new(pool), config);
    let stats = service
        .ingest_dir_with_progress(output, &TracingReporter, cancel_token.clone())
        .await
        .with_context(|| format!("Cannot ingest files under {}", output.display()))?;
    Ok(stats)
}

fn print_download_summary(report: &DownloadReport) {
    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("DOWNLOAD COMPLETE");
    info!("═══════════════════════════════════════════════════════");
    info!("  Packages fetched:    {}", report.packages.succeeded);
    info!("  Packages skipped:    {}", report.packages.skipped);
    info!("  Packages failed:     {}", report.packages.failed);
    info!("───────────────────────────────────────────────────────");
    info!("  Resources fetched:   {}", report.resources.succeeded);
    info!("  Resources skipped:   {}", report.resources.skipped);
    info!("  Resources failed:    {}", report.resources.failed);
    info!("  Transient failures:  {}", report.retryable);
    info!("═══════════════════════════════════════════════════════");

    let failed = report.packages.failed + report.resources.failed;
    if report.cancelled {
        warn!("Download interrupted; run again to resume");
    } else if failed > report.retryable {
        warn!(
            "{} failed items need attention before a re-run can fetch them",
            failed - report.retryable
        );
    } else if failed > 0 {
        info!("Failed items are retried on the next run");
    }
}

fn print_stage_summary(stage: &str, stats: &StageStats, done: &str, skipped: &str) {
    info!("");
    info!("═══════════════════════════════════════════════════════");
    info!("{} COMPLETE", stage);
    info!("═══════════════════════════════════════════════════════");
    info!("  {:<20} {}", format!("{}:", capitalize(done)), stats.succeeded);
    info!("  {:<20} {}", format!("{}:", capitalize(skipped)), stats.skipped);
    info!("  {:<20} {}", "Failed:", stats.failed);
    info!("───────────────────────────────────────────────────────");
    info!("  {:<20} {}", "Total files:", stats.total());
    info!("═══════════════════════════════════════════════════════");
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
