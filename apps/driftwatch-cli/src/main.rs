mod ui;

use std::{env, path::PathBuf, sync::mpsc, thread};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use driftwatch_bus::{EventBus, LocalBus, NullBus};
use driftwatch_capture::source_for;
use driftwatch_ops::{ensure_parent_dir, init_tracing};
use driftwatch_orchestrator::{stop_channel, BatchComparison, CaptureLoop, StopHandle};
use driftwatch_stream::{ffmpeg::probe_ffmpeg, FfmpegSink};
use driftwatch_types::config::{CadencePolicy, CaptureTarget, DriftwatchConfig};
use futures::StreamExt;
use tracing::{error, info};

use crate::ui::UiMessage;

const DEFAULT_CONFIG_PATH: &str = "configs/driftwatch.toml";
const DEFAULT_TUI_LOG: &str = "driftwatch.log";

#[derive(Parser, Debug)]
#[command(name = "driftwatch", version, about = "Record a rolling screen change-history dashboard")]
struct Cli {
    /// TOML config file (falls back to $DRIFTWATCH_CONFIG, then configs/driftwatch.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `driftwatch_orchestrator=debug`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Capture target: desktop, left_monitor or browser.
    #[arg(long, global = true)]
    target: Option<CaptureTarget>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture continuously and record the live/heatmap dashboard to video.
    Live(LiveArgs),
    /// Capture a fixed sequence, then write pairwise diffs and a composite heatmap.
    Batch(BatchArgs),
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// Frames kept in the rolling history window.
    #[arg(long)]
    history: Option<usize>,
    #[arg(long)]
    fps: Option<f64>,
    #[arg(long)]
    output: Option<String>,
    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,
    /// Subtract tick latency from the sleep between ticks.
    #[arg(long)]
    compensate: bool,
    /// Show a terminal status view; `q` stops the recording.
    #[arg(long)]
    tui: bool,
}

#[derive(Args, Debug)]
struct BatchArgs {
    #[arg(long)]
    images: Option<usize>,
    #[arg(long)]
    duration: Option<f64>,
    /// Print the report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(level) = &cli.log_level {
        config.ops.log_level = level.clone();
    }
    if let Some(target) = cli.target {
        config.capture.target = target;
    }

    match cli.command {
        Command::Live(args) => {
            apply_live_overrides(&mut config, &args);
            config.validate()?;
            init_tracing(&config.ops)?;
            run_live(config, args.tui).await
        }
        Command::Batch(args) => {
            if let Some(images) = args.images {
                config.batch.num_images = images;
            }
            if let Some(duration) = args.duration {
                config.batch.duration_seconds = duration;
            }
            config.validate()?;
            init_tracing(&config.ops)?;
            run_batch(config, args.json).await
        }
    }
}

fn load_config(explicit: Option<&PathBuf>) -> Result<DriftwatchConfig> {
    let from_env = env::var("DRIFTWATCH_CONFIG").ok().map(PathBuf::from);
    match explicit.cloned().or(from_env) {
        Some(path) => DriftwatchConfig::from_file(&path)
            .with_context(|| format!("loading config from '{}'", path.display())),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if !path.exists() {
                return Ok(DriftwatchConfig::default());
            }
            match DriftwatchConfig::from_file(&path) {
                Ok(cfg) => Ok(cfg),
                Err(err) => {
                    eprintln!(
                        "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                        path.display()
                    );
                    Ok(DriftwatchConfig::default())
                }
            }
        }
    }
}

fn apply_live_overrides(config: &mut DriftwatchConfig, args: &LiveArgs) {
    if let Some(history) = args.history {
        config.history.size = history;
    }
    if let Some(fps) = args.fps {
        config.stream.fps = fps;
    }
    if let Some(output) = &args.output {
        config.stream.output = output.clone();
    }
    if args.ticks.is_some() {
        config.stream.max_ticks = args.ticks;
    }
    if args.compensate {
        config.stream.cadence = CadencePolicy::Compensated;
    }
    if args.tui && config.ops.log_file.is_none() {
        config.ops.log_file = Some(DEFAULT_TUI_LOG.into());
    }
}

async fn run_live(config: DriftwatchConfig, tui: bool) -> Result<()> {
    let bus = LocalBus::new(256);
    let source = source_for(&config.capture).await?;
    let mut capture_loop = CaptureLoop::prepare(&config, source, bus.clone()).await?;

    probe_ffmpeg(&config.stream).await?;
    ensure_parent_dir(&config.stream.output)?;
    let sink = FfmpegSink::open(&config.stream, capture_loop.output_dimensions())?;

    let (handle, stop) = stop_channel();
    spawn_ctrl_c(handle.clone());
    let ui = tui.then(|| spawn_ui(&bus, handle.clone(), summary(&config)));

    if !tui {
        println!("Recording dashboard to '{}'. Press Ctrl-C to stop.", config.stream.output);
    }
    let result = capture_loop.run(sink, stop).await;

    if let Some((ui_tx, ui_thread)) = ui {
        let _ = ui_tx.send(UiMessage::Shutdown);
        drop(ui_tx);
        if ui_thread.join().is_err() {
            error!("status view thread panicked");
        }
    }

    let metrics = result?;
    println!(
        "Video saved to '{}' ({} frames, {} capture failures)",
        config.stream.output, metrics.rendered_frames, metrics.capture_failures
    );
    Ok(())
}

async fn run_batch(config: DriftwatchConfig, json: bool) -> Result<()> {
    let source = source_for(&config.capture).await?;
    let batch = BatchComparison::new(&config, source, NullBus);
    let report = batch.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for pair in &report.pairs {
        println!(
            "  - {} vs {}: score={}",
            pair.first.display(),
            pair.second.display(),
            pair.score
        );
    }
    match &report.composite {
        Some(path) => {
            println!("Total difference score: {}", report.total_difference_score);
            println!("Composite heatmap saved to: {}", path.display());
        }
        None => println!("No differences to combine."),
    }
    Ok(())
}

fn spawn_ctrl_c(handle: StopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted by user");
            handle.stop();
        }
    });
}

/// Forward bus events into the blocking status view thread.
fn spawn_ui(
    bus: &LocalBus,
    handle: StopHandle,
    summary: String,
) -> (mpsc::Sender<UiMessage>, thread::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let forward = tx.clone();
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if forward.send(UiMessage::Event(event)).is_err() {
                break;
            }
        }
    });

    let thread = thread::spawn(move || {
        if let Err(err) = ui::run(rx, summary) {
            error!("status view failed: {err}");
        }
        // Leaving the view, by `q` or otherwise, ends the recording.
        handle.stop();
    });
    (tx, thread)
}

fn summary(config: &DriftwatchConfig) -> String {
    format!(
        "{:?} · history {} · {} fps · {}",
        config.capture.target, config.history.size, config.stream.fps, config.stream.output
    )
}
