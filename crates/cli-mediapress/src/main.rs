use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use humansize::{format_size, DECIMAL};
use log::{info, warn, LevelFilter};
use mediapress::{
    EventSink, JobExecutor, JobMode, JobRequest, LogSink, PressConfig, RetentionSweeper,
};

/// Media compression job runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daily retention schedule until interrupted
    Serve,

    /// Compress or convert a single file
    Compress {
        /// File to process
        input: PathBuf,

        /// Speed preset (turbo, fast, balanced, quality)
        #[arg(short, long)]
        preset: Option<String>,

        /// Kind hint: image, video, audio, pdf or a MIME type
        #[arg(short, long)]
        kind: Option<String>,

        /// Convert to this extension instead of compressing in place
        #[arg(long = "to")]
        target: Option<String>,

        /// User id recorded in the activity log
        #[arg(long)]
        user: Option<String>,

        /// Treat the input as an owned upload and remove it once a smaller output wins
        #[arg(long)]
        consume: bool,
    },

    /// Run one retention sweep now
    Sweep {
        /// Override the configured retention window
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show processing counters
    Metrics {
        /// Also show totals for the last N days
        #[arg(long, default_value_t = 7)]
        days: u32,

        /// Zero the lifetime counters
        #[arg(long)]
        reset: bool,
    },

    /// Show recent activity, newest first
    Activity {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; --verbose only raises the default
    let mut logger = env_logger::Builder::new();
    logger.filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    logger.parse_default_env();
    logger.format_timestamp_secs().init();

    let cfg = PressConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?
        .apply_env()
        .context("Failed to apply environment overrides")?;

    std::fs::create_dir_all(&cfg.uploads_dir)
        .with_context(|| format!("Failed to create uploads directory: {}", cfg.uploads_dir.display()))?;
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("Failed to create data directory: {}", cfg.data_dir.display()))?;

    let events: Arc<dyn EventSink> = Arc::new(LogSink);
    let executor = JobExecutor::open(&cfg, Arc::clone(&events))
        .await
        .context("Failed to open metrics/activity stores")?;

    match args.command {
        Command::Serve => serve(&cfg, &executor, events).await,
        Command::Compress {
            input,
            preset,
            kind,
            target,
            user,
            consume,
        } => compress(&executor, input, preset, kind, target, user, consume).await,
        Command::Sweep { days } => {
            let sweeper = sweeper(&cfg, &executor, events);
            let days = days.unwrap_or(sweeper.policy().auto_delete_days);
            let uploads = sweeper.sweep_uploads(days).await;
            let data = sweeper.sweep_data(days).await;
            println!("Deleted {} upload(s)", uploads.deleted_count);
            for name in &uploads.deleted_names {
                println!("  {}", name);
            }
            println!(
                "Pruned {} metrics day(s) and {} activity entries",
                data.metrics_days_pruned, data.activity_entries_pruned
            );
            Ok(())
        }
        Command::Metrics { days, reset } => {
            let metrics = executor.metrics();
            let snap = if reset {
                metrics.reset_lifetime().await.context("Failed to reset metrics")?
            } else {
                metrics.snapshot().await
            };
            println!("Lifetime files:      {}", snap.lifetime_files);
            println!("Lifetime bytes:      {}", format_size(snap.lifetime_bytes, DECIMAL));
            println!("Lifetime compressed: {}", snap.lifetime_compressed);
            println!("Lifetime converted:  {}", snap.lifetime_converted);
            for (kind, count) in &snap.lifetime_by_kind {
                println!("  {:<6} {}", kind, count);
            }
            let window = metrics.window_totals(days, Utc::now()).await;
            println!(
                "Last {} day(s): {} file(s), {} ({} compressed, {} converted)",
                days,
                window.files,
                format_size(window.bytes, DECIMAL),
                window.compressed,
                window.converted
            );
            Ok(())
        }
        Command::Activity { limit } => {
            if executor.activity().is_empty().await {
                println!("No activity recorded");
                return Ok(());
            }
            for entry in executor.activity().recent(limit).await {
                println!(
                    "{} [{:?}] {}: {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.severity,
                    entry.kind,
                    entry.message
                );
            }
            Ok(())
        }
    }
}

fn sweeper(cfg: &PressConfig, executor: &JobExecutor, events: Arc<dyn EventSink>) -> RetentionSweeper {
    RetentionSweeper::new(
        cfg.uploads_dir.clone(),
        cfg.retention_policy(),
        Arc::clone(executor.metrics()),
        Arc::clone(executor.activity()),
        events,
    )
}

async fn serve(cfg: &PressConfig, executor: &JobExecutor, events: Arc<dyn EventSink>) -> Result<()> {
    info!("mediapress starting");
    info!("Configuration loaded:");
    info!("  Uploads dir: {}", cfg.uploads_dir.display());
    info!("  Data dir: {}", cfg.data_dir.display());
    info!("  Max concurrent jobs: {}", cfg.max_concurrent);
    info!("  Default preset: {}", cfg.default_preset);
    info!("  Auto delete after: {} day(s), sweep hour {}", cfg.auto_delete_days, cfg.sweep_hour);
    match cfg.tool_timeout_secs {
        Some(secs) => info!("  Tool timeout: {}s", secs),
        None => warn!("  Tool timeout disabled"),
    }

    let sweeper = sweeper(cfg, executor, events);
    let hour = cfg.sweep_hour;
    let schedule = tokio::spawn(async move { sweeper.run_schedule(hour).await });

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    executor.limiter().close();
    schedule.abort();
    Ok(())
}

async fn compress(
    executor: &JobExecutor,
    input: PathBuf,
    preset: Option<String>,
    kind: Option<String>,
    target: Option<String>,
    user: Option<String>,
    consume: bool,
) -> Result<()> {
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    let request = if consume {
        let size = std::fs::metadata(&input)
            .with_context(|| format!("Failed to read {}", input.display()))?
            .len();
        JobRequest::upload(&input, kind.as_deref(), &ext, size)
    } else {
        JobRequest::new(&input, kind.as_deref(), &ext)
    };
    let mut request = request
        .ok_or_else(|| anyhow!("Cannot determine the media kind of {}", input.display()))?
        .with_preset(preset.as_deref());
    if let Some(target) = target {
        request = request.with_mode(JobMode::Convert { target_extension: target });
    }
    if let Some(user) = user {
        request = request.with_user(user);
    }

    let result = executor
        .execute(request)
        .await
        .with_context(|| format!("Failed to process {}", input.display()))?;

    info!(
        "{}: {} -> {} ({:.2}% saved, preset {})",
        input.display(),
        format_size(result.original_size_bytes, DECIMAL),
        format_size(result.final_size_bytes, DECIMAL),
        result.savings_percent,
        result.preset
    );
    println!("{}", serde_json::to_string_pretty(&result.to_response())?);
    Ok(())
}
