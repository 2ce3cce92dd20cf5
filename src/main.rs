use anyhow::{Context, Result};
use catalog_previews::catalog_store::SqliteCatalogStore;
use catalog_previews::cli_style::{
    get_styles, print_error, print_key_value, print_list_item, print_section_footer,
    print_section_header, print_success, print_warning,
};
use catalog_previews::config::{AppConfig, CliConfig, FileConfig, DEFAULT_THROTTLE_MS};
use catalog_previews::downloader::{Downloader, FetchContext, ScratchDir};
use catalog_previews::media::FfmpegTool;
use catalog_previews::metrics;
use catalog_previews::pipeline::{BatchSelection, BatchSummary, PipelineOptions, PreviewPipeline};
use catalog_previews::transcoder::Transcoder;
use catalog_previews::verifier::{ContentVerifier, JsonFileLedger};
use catalog_previews::LinkExtractor;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Regenerate preview clips for catalog songs.
#[derive(Parser, Debug)]
#[command(styles = get_styles())]
struct CliArgs {
    /// Dry run: run every stage but write nothing (no catalog, ledger or previews changes).
    #[clap(long)]
    pub debug: bool,

    /// Maximum number of songs to process.
    #[clap(long)]
    pub limit: Option<usize>,

    /// Process only this song.
    #[clap(long)]
    pub song_id: Option<i64>,

    /// Start from this song id.
    #[clap(long)]
    pub start_id: Option<i64>,

    /// Regenerate songs that already have a valid preview.
    #[clap(long)]
    pub force: bool,

    /// Move replaced clips into previews/backup/.
    #[clap(long)]
    pub backup: bool,

    /// Path to a TOML config file. Values in it override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite catalog database file.
    #[clap(long, value_parser = parse_path)]
    pub db: Option<PathBuf>,

    /// Media root; clips are written to <media-root>/previews/.
    #[clap(long, value_parser = parse_path)]
    pub media_root: Option<PathBuf>,

    /// Content hash ledger file. Defaults to <media-root>/previews/content_hashes.json.
    #[clap(long, value_parser = parse_path)]
    pub ledger: Option<PathBuf>,

    /// Root for per-run scratch directories.
    #[clap(long, value_parser = parse_path)]
    pub scratch_dir: Option<PathBuf>,

    /// Known-good clip copied when every transcode attempt fails.
    #[clap(long, value_parser = parse_path)]
    pub fallback_clip: Option<PathBuf>,

    /// Pause between songs, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_THROTTLE_MS)]
    pub throttle_ms: u64,

    /// Also write logs to this file.
    #[clap(long, value_parser = parse_path)]
    pub log_file: Option<PathBuf>,

    /// Write Prometheus metrics to this file when the batch ends.
    #[clap(long, value_parser = parse_path)]
    pub metrics_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;
    Ok(())
}

fn print_summary(summary: &BatchSummary, dry_run: bool) {
    print_section_header(if dry_run {
        "Preview Batch (dry run)"
    } else {
        "Preview Batch"
    });
    print_key_value("Processed", &summary.processed.to_string());
    print_key_value("Updated", &summary.updated.to_string());
    if dry_run {
        print_key_value("Would update", &summary.dry_run.to_string());
    }
    print_key_value("Degraded", &summary.degraded.to_string());
    print_key_value("Skipped", &summary.skipped.to_string());
    print_key_value("Failed", &summary.failed.to_string());
    print_key_value("Warnings", &summary.warnings.to_string());
    print_section_footer();

    for duplicate in &summary.duplicates {
        print_warning(&format!(
            "Song {} ({}) has the same audio as song {} ({})",
            duplicate.song_id,
            duplicate.song_name,
            duplicate.other_song_id,
            duplicate.other_song_name
        ));
    }
    for (song_id, stage, message) in &summary.failures {
        print_list_item(&format!("song {} failed while {}: {}", song_id, stage, message), 1);
    }

    if summary.failed == 0 {
        print_success("Batch complete");
    } else {
        print_error(&format!("Batch complete with {} failed songs", summary.failed));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db.clone(),
        media_root: cli_args.media_root.clone(),
        ledger_path: cli_args.ledger.clone(),
        scratch_dir: cli_args.scratch_dir.clone(),
        fallback_clip: cli_args.fallback_clip.clone(),
        throttle_ms: cli_args.throttle_ms,
        log_file: cli_args.log_file.clone(),
        metrics_file: cli_args.metrics_file.clone(),
        backup: cli_args.backup,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    init_logging(config.log_file.as_ref())?;

    let tool = FfmpegTool::new(
        &config.ffmpeg_path,
        &config.ffprobe_path,
        Duration::from_secs(30),
    );
    tool.check_available()
        .await
        .context("ffmpeg/ffprobe are required")?;
    let tool = Arc::new(tool);

    metrics::init_metrics();

    info!("Opening catalog database at {:?}...", config.db_path);
    let store = Arc::new(SqliteCatalogStore::open(&config.db_path)?);

    let scratch = ScratchDir::create(&config.scratch_root)
        .await
        .with_context(|| format!("Failed to create scratch dir in {:?}", config.scratch_root))?;
    info!("Scratch directory: {:?}", scratch.path());

    let downloader = Downloader::new(FetchContext::new(
        tool.clone(),
        scratch,
        config.download.clone(),
    )?);
    let transcoder = Transcoder::new(
        tool.clone(),
        config.transcode.standard.clone(),
        config.fallback_clip.clone(),
        config.transcode.timeout,
    );
    let ledger = Arc::new(JsonFileLedger::new(&config.ledger_path));
    let verifier = ContentVerifier::new(tool.clone(), ledger, config.transcode.timeout);

    let options = PipelineOptions {
        dry_run: cli_args.debug,
        force: cli_args.force,
        backup: config.backup,
        throttle: Duration::from_millis(config.throttle_ms),
        stale_claim_secs: config.stale_claim_secs,
        url_prefix: config.url_prefix.clone(),
    };
    let pipeline = PreviewPipeline::new(
        store,
        LinkExtractor::new(config.host_table()),
        downloader,
        transcoder,
        verifier,
        config.media_root.clone(),
        options,
    );

    let selection = BatchSelection {
        song_id: cli_args.song_id,
        start_id: cli_args.start_id,
        limit: cli_args.limit,
    };
    let summary = pipeline.run_batch(&selection).await?;

    print_summary(&summary, cli_args.debug);

    if let Some(path) = &config.metrics_file {
        if let Err(e) = metrics::write_metrics_file(path) {
            print_warning(&format!("Failed to write metrics file {:?}: {}", path, e));
        }
    }

    Ok(())
}
