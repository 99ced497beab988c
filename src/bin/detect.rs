//! detect - run object detection over an image, video, camera, or capture
//!
//! Loads configuration (file named by YOLO_STREAM_CONFIG, then YOLO_STREAM_*
//! environment variables, then command-line flags), starts one session and
//! ticks it until the source ends, `--max-frames` is reached, or Ctrl-C.
//! Processed frames can be written as annotated PNGs and/or printed as JSON lines.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use yolo_stream::config::CameraDriverKind;
use yolo_stream::{
    controller_from_config, AppConfig, BackendKind, DetectionSummary, ModelVariant, SourceKind,
    StreamError, TickOutcome,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "YOLO_STREAM_CONFIG")]
    config: Option<PathBuf>,
    /// Source kind (image|video|camera|single_capture).
    #[arg(long)]
    kind: Option<SourceKind>,
    /// Image/video path, capture location, or stub:// URI.
    #[arg(long)]
    source: Option<String>,
    /// Model variant (nano|small|medium|large|extra_large).
    #[arg(long)]
    variant: Option<ModelVariant>,
    /// Minimum detection confidence in [0, 1].
    #[arg(long)]
    confidence: Option<f32>,
    /// Overlap (IoU) threshold for suppression in [0, 1].
    #[arg(long)]
    iou: Option<f32>,
    /// Detector backend (contrast|tract).
    #[arg(long)]
    backend: Option<BackendKind>,
    /// Directory holding yolo11{n,s,m,l,x}.onnx.
    #[arg(long)]
    weights_dir: Option<PathBuf>,
    /// Process every K-th frame of videos and cameras.
    #[arg(long)]
    stride: Option<u64>,
    /// Minimum milliseconds between processed single captures.
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Repeat a single capture as a pseudo-stream.
    #[arg(long)]
    repeat: bool,
    /// Camera driver (device|synthetic).
    #[arg(long)]
    camera_driver: Option<CameraDriverKind>,
    /// Stop after this many frames have been read.
    #[arg(long)]
    max_frames: Option<u64>,
    /// Write annotated frames as PNG files into this directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Print one JSON summary line per processed frame to stdout.
    #[arg(long)]
    json: bool,
    /// Stderr progress bar (auto|plain|pretty).
    #[arg(long, value_enum, default_value_t = ui::ProgressMode::Auto, value_name = "MODE")]
    ui: ui::ProgressMode,
}

#[derive(Serialize)]
struct FrameLine<'a> {
    sequence: u64,
    captured_at_ms: u64,
    #[serde(flatten)]
    summary: &'a DetectionSummary,
}

#[derive(Serialize)]
struct FailureLine<'a> {
    sequence: u64,
    code: &'static str,
    error: &'a str,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = AppConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args);
    cfg.validate()?;

    if let Some(dir) = &args.out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
    }

    let mut controller = controller_from_config(&cfg)?;
    if let Err(err) = controller.start(&cfg.stream_config()) {
        if let Some(classified) = StreamError::classify(&err) {
            log::error!(
                "{} session failed to start [{}]",
                cfg.source.kind.as_str(),
                classified.code()
            );
        }
        return Err(err);
    }

    let stop = controller.stop_handle();
    ctrlc::set_handler(move || stop.request()).context("set Ctrl-C handler")?;

    let json_on_terminal = args.json && std::io::stdout().is_terminal();
    let mut progress = ui::SessionProgress::new(
        args.ui,
        std::io::stderr().is_terminal(),
        json_on_terminal,
        args.max_frames,
    );
    let mut stdout = std::io::stdout().lock();
    let report = controller.run(args.max_frames, |outcome| {
        progress.observe(outcome);
        match outcome {
            TickOutcome::Processed(rendered) => {
                if let Some(dir) = &args.out_dir {
                    let path = dir.join(format!("frame_{:06}.png", rendered.sequence));
                    rendered
                        .image
                        .save(&path)
                        .with_context(|| format!("write {}", path.display()))?;
                }
                if args.json {
                    let line = FrameLine {
                        sequence: rendered.sequence,
                        captured_at_ms: unix_millis(rendered.captured_at),
                        summary: &rendered.summary,
                    };
                    writeln!(stdout, "{}", serde_json::to_string(&line)?)?;
                }
            }
            TickOutcome::InferenceFailed { sequence, error } => {
                if args.json {
                    let message = error.to_string();
                    let line = FailureLine {
                        sequence: *sequence,
                        code: error.code(),
                        error: &message,
                    };
                    writeln!(stdout, "{}", serde_json::to_string(&line)?)?;
                }
            }
            TickOutcome::Skipped { .. }
            | TickOutcome::Idle
            | TickOutcome::Stopped
            | TickOutcome::Finished { .. } => {}
        }
        Ok(())
    })?;
    progress.finish(&report);

    if let Some(stats) = controller.last_session() {
        log::info!(
            "session summary: {}",
            serde_json::to_string(stats).context("serialize session stats")?
        );
    }
    log::info!(
        "{} ticks: {} processed, {} skipped, {} inference failures, ended by {:?}",
        report.ticks,
        report.processed,
        report.skipped,
        report.inference_failures,
        report.end_reason
    );
    Ok(())
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as u64)
}

fn apply_args(cfg: &mut AppConfig, args: &Args) {
    if let Some(kind) = args.kind {
        cfg.source.kind = kind;
    }
    if let Some(source) = &args.source {
        cfg.source.path = source.clone();
    }
    if let Some(variant) = args.variant {
        cfg.model.variant = variant;
    }
    if let Some(confidence) = args.confidence {
        cfg.model.confidence = confidence;
    }
    if let Some(iou) = args.iou {
        cfg.model.iou = iou;
    }
    if let Some(backend) = args.backend {
        cfg.backend = backend;
    }
    if let Some(dir) = &args.weights_dir {
        cfg.weights_dir = dir.clone();
    }
    if let Some(stride) = args.stride {
        cfg.sampling.stride = stride;
    }
    if let Some(ms) = args.interval_ms {
        cfg.sampling.min_interval = Duration::from_millis(ms);
    }
    if args.repeat {
        cfg.source.repeat = true;
    }
    if let Some(driver) = args.camera_driver {
        cfg.source.camera_driver = driver;
    }
}
