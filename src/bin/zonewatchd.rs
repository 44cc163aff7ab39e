//! zonewatchd - zone intrusion detection daemon
//!
//! This daemon:
//! 1. Ingests frames from the configured camera or stream source
//! 2. Runs person detection through the configured backend
//! 3. Tests detections against polygonal monitoring zones
//! 4. Dispatches debounced alerts with snapshots and a durable history
//! 5. Optionally runs a fixed-length benchmark and writes a report

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use zonewatch::{
    apply_power_mode, bench, select_backend, AlertChannel, AlertController, AlertDispatcher,
    CameraSource, Config, InferenceAdapter, Pipeline, PowerMode, RunLimits, SqliteAlertHistory,
    TelegramChannel, WebhookChannel, ZoneEvaluator,
};

/// Frames discarded before the measured benchmark window.
const BENCHMARK_WARMUP_FRAMES: u64 = 30;
/// Frames in the measured benchmark window.
const BENCHMARK_MEASURED_FRAMES: u64 = 300;

#[derive(Parser, Debug)]
#[command(name = "zonewatchd", version, about = "Edge zone-intrusion detection daemon")]
struct Args {
    /// Configuration file; created with defaults if it does not exist.
    #[arg(long, env = "ZONEWATCH_CONFIG", default_value = "config/config.json")]
    config: PathBuf,

    /// Run a fixed-length measured run and write a benchmark report.
    #[arg(long)]
    benchmark: bool,

    /// Halve capture resolution and stretch the inference cadence.
    #[arg(long)]
    low_power: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    log::info!(
        "zonewatch {} starting: source {}, model {}, {} zones",
        env!("CARGO_PKG_VERSION"),
        config.camera.source,
        config.model.path,
        config.zones.len()
    );

    let mode = if args.low_power {
        PowerMode::LowPower
    } else {
        PowerMode::Normal
    };
    let settings = apply_power_mode(mode, config.pipeline_settings());
    if mode == PowerMode::LowPower {
        log::info!(
            "low-power mode: capturing at {}x{}, inference every {} frames",
            settings.capture.width,
            settings.capture.height,
            settings.inference_interval
        );
    }

    let source = CameraSource::open(&config.source_descriptor(), settings.capture.clone())
        .context("open camera source")?;
    let backend = select_backend(&config.model)?;
    let adapter = InferenceAdapter::new(
        backend,
        config.model.confidence_threshold,
        config.model.target_classes.clone(),
    );
    let evaluator = ZoneEvaluator::new(config.zones.clone())?;

    let controller = if config.alerts.enabled {
        AlertController::new(evaluator.zones(), config.alerts.cooldown)
    } else {
        AlertController::new(&[], config.alerts.cooldown)
    };

    let mut channels: Vec<Box<dyn AlertChannel>> = Vec::new();
    if config.alerts.enabled {
        if let Some(webhook) = &config.alerts.webhook {
            channels.push(Box::new(WebhookChannel::new(
                webhook.url.clone(),
                webhook.timeout,
            )));
            log::info!("webhook alert channel configured");
        }
        if let Some(telegram) = &config.alerts.telegram {
            channels.push(Box::new(TelegramChannel::new(
                &telegram.bot_token,
                telegram.chat_id.clone(),
                telegram.timeout,
            )));
            log::info!("telegram alert channel configured");
        }
    }
    if config.alerts.enabled && channels.is_empty() {
        log::warn!("alerts enabled but no channels configured; history and snapshots only");
    }

    let history = SqliteAlertHistory::open(&config.alerts.history_db)?;
    let dispatcher = AlertDispatcher::new(
        channels,
        Box::new(history),
        config.alerts.snapshot_dir.clone(),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("install signal handler")?;
    }

    let limits = if args.benchmark {
        log::info!(
            "benchmark mode: {BENCHMARK_WARMUP_FRAMES} warmup + {BENCHMARK_MEASURED_FRAMES} measured frames"
        );
        RunLimits {
            warmup_frames: BENCHMARK_WARMUP_FRAMES,
            max_frames: Some(BENCHMARK_WARMUP_FRAMES + BENCHMARK_MEASURED_FRAMES),
        }
    } else {
        RunLimits::default()
    };

    let pipeline = Pipeline::new(
        source,
        adapter,
        evaluator,
        controller,
        dispatcher,
        settings.clone(),
    );
    let summary = pipeline.run(shutdown, limits)?;

    log::info!(
        "run complete: {} captured, {} processed, {} dropped, {} detections, {} alerts ({} dispatch failures), {:.1} fps",
        summary.frames_captured,
        summary.frames_processed,
        summary.frames_dropped,
        summary.detections,
        summary.alerts_dispatched,
        summary.dispatch_failures,
        summary.report.achieved_fps
    );
    if settings.save_detection_frames {
        log::info!("{} detection frames saved", summary.frames_saved);
    }
    for stage in &summary.report.stages {
        log::info!(
            "stage {}: mean {:.2}ms p50 {:.2}ms p95 {:.2}ms over {} samples",
            stage.stage,
            stage.mean_ms,
            stage.p50_ms,
            stage.p95_ms,
            stage.samples
        );
    }

    if args.benchmark {
        let mut report = summary.report;
        report.config = Some(serde_json::json!({
            "source": config.camera.source,
            "width": settings.capture.width,
            "height": settings.capture.height,
            "target_fps": settings.target_fps,
            "inference_interval": settings.inference_interval,
            "queue_capacity": settings.queue_capacity,
            "low_power": args.low_power,
        }));
        let path = bench::save_report(&report, &config.output.benchmark_dir)?;
        log::info!("benchmark report written to {}", path.display());
    }

    Ok(())
}
