//! Worker lifecycles, inter-stage queues, and shutdown ordering.
//!
//! Long-lived workers connected by bounded queues:
//!
//! ```text
//! capture ──drop-oldest──▶ process ──blocking──▶ dispatch
//!    ▲                       │ │
//!    └───── buffer return ───┘ └──drop-oldest──▶ sink (optional)
//! ```
//!
//! The process worker runs inference, zone evaluation, and the alert
//! controller in one thread: detections feed evaluation synchronously and
//! the controller is the only stateful stage, so splitting them would buy
//! queues without buying parallelism. Frame recording runs on its own sink
//! worker behind a drop-oldest queue so slow disk I/O never throttles
//! detection; spent pixel buffers flow back to the capture worker's pool
//! through a return channel.
//!
//! Shutdown is cooperative and ordered: a shutdown flag (or source end)
//! stops the capture worker, whose dropped sender drains the process worker,
//! whose dropped sender drains the dispatch worker. A fatal error in any
//! worker parks itself in a shared slot, raises the flag, and surfaces after
//! all workers have joined.

mod queue;

pub use queue::{bounded, OverflowPolicy, Push, QueueReceiver, QueueSender};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::alert::{AlertController, AlertDispatcher, AlertEvent, FrameSnapshot};
use crate::bench::{BenchmarkHarness, BenchmarkReport};
use crate::detect::{Detection, InferenceAdapter};
use crate::frame::Frame;
use crate::power::DetectionCache;
use crate::source::{CameraSource, CaptureSettings, FrameRead};
use crate::zones::ZoneEvaluator;

/// Alerts awaiting dispatch; small because dispatch back-pressures capture
/// of new alerts, never frames.
const ALERT_QUEUE_CAPACITY: usize = 16;

/// Detection frames awaiting the record sink. Drop-oldest: a slow disk
/// loses frames, never detection latency.
const SINK_QUEUE_CAPACITY: usize = 4;

/// Tunables for one pipeline run.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub capture: CaptureSettings,
    /// Capacity of the capture-to-process frame queue.
    pub queue_capacity: usize,
    /// Capture rate cap; `None` captures as fast as the source delivers.
    pub target_fps: Option<u32>,
    /// Run the detector every Nth frame; skipped frames reuse cached
    /// detections. 1 means every frame.
    pub inference_interval: u32,
    pub save_detection_frames: bool,
    pub detection_frames_dir: PathBuf,
    /// Save every Nth frame that carries detections.
    pub frame_save_interval: u32,
    pub health_log_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            queue_capacity: 8,
            target_fps: None,
            inference_interval: 1,
            save_detection_frames: false,
            detection_frames_dir: PathBuf::from("logs/frames"),
            frame_save_interval: 10,
            health_log_interval: Duration::from_secs(30),
        }
    }
}

/// Frame-count bounds for a run. Zero warmup and `None` max runs until the
/// source ends or shutdown is requested.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunLimits {
    /// Frames processed before benchmark counters reset.
    pub warmup_frames: u64,
    /// Stop capturing after this many frames.
    pub max_frames: Option<u64>,
}

/// What a finished run did, including the benchmark report for the
/// post-warmup portion.
#[derive(Debug)]
pub struct PipelineSummary {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub detections: u64,
    pub alerts_dispatched: u64,
    pub dispatch_failures: u64,
    pub frames_saved: u64,
    pub report: BenchmarkReport,
}

/// Detection-bearing frame handed to the record sink.
struct SinkItem {
    snapshot: FrameSnapshot,
    detections: Vec<Detection>,
}

struct CaptureStats {
    captured: u64,
    dropped: u64,
}

struct ProcessStats {
    processed: u64,
    detections: u64,
}

struct DispatchStats {
    dispatched: u64,
    failures: u64,
}

/// Owns every stage and runs them to completion.
pub struct Pipeline {
    source: CameraSource,
    adapter: InferenceAdapter,
    evaluator: ZoneEvaluator,
    controller: AlertController,
    dispatcher: AlertDispatcher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: CameraSource,
        adapter: InferenceAdapter,
        evaluator: ZoneEvaluator,
        controller: AlertController,
        dispatcher: AlertDispatcher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            adapter,
            evaluator,
            controller,
            dispatcher,
            settings,
        }
    }

    /// Run until the source ends, `limits.max_frames` is reached, or the
    /// shutdown flag is raised. Returns the first fatal worker error, if any.
    pub fn run(mut self, shutdown: Arc<AtomicBool>, limits: RunLimits) -> Result<PipelineSummary> {
        let backend = self.adapter.backend_name().to_string();
        self.adapter.warm_up().context("detector warm-up")?;

        let bench = Arc::new(Mutex::new(BenchmarkHarness::new()));
        let fatal: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));

        let (frame_tx, frame_rx) =
            queue::bounded::<Frame>(self.settings.queue_capacity, OverflowPolicy::DropOldest);
        let (alert_tx, alert_rx) =
            queue::bounded::<AlertEvent>(ALERT_QUEUE_CAPACITY, OverflowPolicy::Block);
        // Spent frames flow back to the capture worker for pool reuse.
        let (return_tx, return_rx) =
            crossbeam_channel::bounded::<Frame>(self.settings.queue_capacity * 2);

        let (sink, sink_tx) = if self.settings.save_detection_frames {
            let (tx, rx) =
                queue::bounded::<SinkItem>(SINK_QUEUE_CAPACITY, OverflowPolicy::DropOldest);
            let handle = spawn_sink(rx, self.settings.detection_frames_dir.clone())?;
            (Some(handle), Some(tx))
        } else {
            (None, None)
        };

        let capture = spawn_capture(
            self.source,
            frame_tx,
            return_rx,
            self.settings.clone(),
            limits,
            Arc::clone(&shutdown),
            Arc::clone(&fatal),
            Arc::clone(&bench),
        )?;
        let process = spawn_process(
            self.adapter,
            self.evaluator,
            self.controller,
            frame_rx,
            alert_tx,
            sink_tx,
            return_tx,
            self.settings.clone(),
            limits,
            Arc::clone(&shutdown),
            Arc::clone(&fatal),
            Arc::clone(&bench),
        )?;
        let dispatch = spawn_dispatch(self.dispatcher, alert_rx)?;

        let capture_stats = capture
            .join()
            .map_err(|_| anyhow!("capture worker panicked"))?;
        let process_stats = process
            .join()
            .map_err(|_| anyhow!("process worker panicked"))?;
        let frames_saved = match sink {
            Some(handle) => handle.join().map_err(|_| anyhow!("sink worker panicked"))?,
            None => 0,
        };
        let dispatch_stats = dispatch
            .join()
            .map_err(|_| anyhow!("dispatch worker panicked"))?;

        if let Some(err) = fatal.lock().expect("fatal slot lock").take() {
            return Err(err);
        }

        let report = bench.lock().expect("bench lock").report(&backend);
        Ok(PipelineSummary {
            frames_captured: capture_stats.captured,
            frames_processed: process_stats.processed,
            frames_dropped: capture_stats.dropped,
            detections: process_stats.detections,
            alerts_dispatched: dispatch_stats.dispatched,
            dispatch_failures: dispatch_stats.failures,
            frames_saved,
            report,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_capture(
    mut source: CameraSource,
    mut frame_tx: QueueSender<Frame>,
    return_rx: crossbeam_channel::Receiver<Frame>,
    settings: PipelineSettings,
    limits: RunLimits,
    shutdown: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<anyhow::Error>>>,
    bench: Arc<Mutex<BenchmarkHarness>>,
) -> Result<thread::JoinHandle<CaptureStats>> {
    thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let period = settings
                .target_fps
                .map(|fps| Duration::from_secs_f64(1.0 / fps.max(1) as f64));
            let mut last_emit: Option<Instant> = None;
            let mut captured = 0u64;

            loop {
                recycle_returned(&mut source, &return_rx);
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let Some(max) = limits.max_frames {
                    if captured >= max {
                        log::info!("capture reached frame limit ({max})");
                        break;
                    }
                }
                if let (Some(period), Some(last)) = (period, last_emit) {
                    let next = last + period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                }

                let started = Instant::now();
                match source.next_frame() {
                    Ok(FrameRead::Frame(frame)) => {
                        bench
                            .lock()
                            .expect("bench lock")
                            .record("capture", started, Instant::now());
                        last_emit = Some(Instant::now());
                        captured += 1;
                        match frame_tx.push(frame) {
                            Push::Delivered => {}
                            Push::Evicted(old) => source.recycle(old),
                            Push::Closed(_) => break,
                        }
                    }
                    Ok(FrameRead::EndOfStream) => {
                        log::info!("source reached end of stream");
                        break;
                    }
                    Err(err) => {
                        *fatal.lock().expect("fatal slot lock") = Some(err);
                        shutdown.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }

            CaptureStats {
                captured,
                dropped: frame_tx.dropped(),
            }
        })
        .context("spawn capture worker")
}

#[allow(clippy::too_many_arguments)]
fn spawn_process(
    mut adapter: InferenceAdapter,
    evaluator: ZoneEvaluator,
    mut controller: AlertController,
    frame_rx: QueueReceiver<Frame>,
    mut alert_tx: QueueSender<AlertEvent>,
    mut sink_tx: Option<QueueSender<SinkItem>>,
    return_tx: crossbeam_channel::Sender<Frame>,
    settings: PipelineSettings,
    limits: RunLimits,
    shutdown: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<anyhow::Error>>>,
    bench: Arc<Mutex<BenchmarkHarness>>,
) -> Result<thread::JoinHandle<ProcessStats>> {
    thread::Builder::new()
        .name("process".to_string())
        .spawn(move || {
            let interval = settings.inference_interval.max(1) as u64;
            let mut cache = DetectionCache::new();
            let mut processed = 0u64;
            let mut detections_total = 0u64;
            let mut frames_with_detections = 0u64;
            let mut last_health = Instant::now();

            'frames: while let Some(frame) = frame_rx.recv() {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                let detections = if processed % interval == 0 {
                    let started = Instant::now();
                    match adapter.infer(&frame) {
                        Ok(fresh) => {
                            bench
                                .lock()
                                .expect("bench lock")
                                .record("inference", started, Instant::now());
                            cache.refresh(fresh.clone());
                            fresh
                        }
                        Err(err) => {
                            *fatal.lock().expect("fatal slot lock") = Some(err);
                            shutdown.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                } else {
                    cache.reuse_for(frame.sequence_id)
                };

                let started = Instant::now();
                let matches = evaluator.evaluate(&detections);
                let events = controller.observe(Instant::now(), &matches, &frame);
                bench
                    .lock()
                    .expect("bench lock")
                    .record("zone_eval", started, Instant::now());

                for event in events {
                    if let Push::Closed(event) = alert_tx.push(event) {
                        log::error!(
                            "dispatch worker gone; alert for zone {} lost",
                            event.zone_id
                        );
                        break 'frames;
                    }
                }

                if let Some(sink) = sink_tx.as_mut() {
                    if !detections.is_empty() {
                        frames_with_detections += 1;
                        if frames_with_detections % settings.frame_save_interval.max(1) as u64 == 0
                        {
                            let item = SinkItem {
                                snapshot: FrameSnapshot::of(&frame),
                                detections: detections.clone(),
                            };
                            match sink.push(item) {
                                Push::Delivered | Push::Evicted(_) => {}
                                Push::Closed(_) => {
                                    log::warn!("record sink gone; frame saving disabled");
                                    sink_tx = None;
                                }
                            }
                        }
                    }
                }

                detections_total += detections.len() as u64;
                processed += 1;
                // Send the spent buffer home; a full return lane just drops it.
                let _ = return_tx.try_send(frame);

                {
                    let mut bench = bench.lock().expect("bench lock");
                    bench.mark_frame();
                    if limits.warmup_frames > 0 && processed == limits.warmup_frames {
                        log::info!("warmup complete after {processed} frames; counters reset");
                        bench.reset();
                    }
                    if last_health.elapsed() >= settings.health_log_interval {
                        log::info!(
                            "health: {:.1} fps, {processed} frames processed, {} queued",
                            bench.achieved_fps(),
                            frame_rx.len()
                        );
                        last_health = Instant::now();
                    }
                }
            }

            ProcessStats {
                processed,
                detections: detections_total,
            }
        })
        .context("spawn process worker")
}

/// Record sink: writes detection-bearing frames to disk off the frame path.
/// Returns the number of frames actually persisted.
fn spawn_sink(
    sink_rx: QueueReceiver<SinkItem>,
    dir: PathBuf,
) -> Result<thread::JoinHandle<u64>> {
    thread::Builder::new()
        .name("sink".to_string())
        .spawn(move || {
            let mut saved = 0u64;
            while let Some(item) = sink_rx.recv() {
                match save_detection_frame(&item.snapshot, &item.detections, &dir) {
                    Ok(()) => saved += 1,
                    Err(err) => log::warn!("failed to save detection frame: {err:#}"),
                }
            }
            saved
        })
        .context("spawn sink worker")
}

/// Hand returned buffers back to the source pool. Non-blocking; called once
/// per capture iteration.
fn recycle_returned(source: &mut CameraSource, returns: &crossbeam_channel::Receiver<Frame>) {
    while let Ok(frame) = returns.try_recv() {
        source.recycle(frame);
    }
}

fn spawn_dispatch(
    mut dispatcher: AlertDispatcher,
    alert_rx: QueueReceiver<AlertEvent>,
) -> Result<thread::JoinHandle<DispatchStats>> {
    thread::Builder::new()
        .name("dispatch".to_string())
        .spawn(move || {
            let mut dispatched = 0u64;
            let mut failures = 0u64;
            while let Some(event) = alert_rx.recv() {
                match dispatcher.dispatch(&event) {
                    Ok(record) => {
                        dispatched += 1;
                        if record.channels.iter().any(|c| !c.delivered) {
                            failures += 1;
                        }
                    }
                    Err(err) => {
                        failures += 1;
                        log::error!(
                            "alert dispatch for zone {} failed: {err:#}",
                            event.zone_id
                        );
                    }
                }
            }
            DispatchStats {
                dispatched,
                failures,
            }
        })
        .context("spawn dispatch worker")
}

/// Persist a detection-bearing frame as a JPEG plus a JSON sidecar listing
/// the detections.
fn save_detection_frame(snap: &FrameSnapshot, detections: &[Detection], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create frame dir {}", dir.display()))?;
    let stem = format!("frame_{:08}", snap.sequence_id);

    let img = image::RgbImage::from_raw(snap.width, snap.height, snap.pixels.clone())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{} RGB", snap.width, snap.height))?;
    img.save(dir.join(format!("{stem}.jpg")))?;

    let meta = serde_json::json!({
        "sequence_id": snap.sequence_id,
        "width": snap.width,
        "height": snap.height,
        "detections": detections,
    });
    std::fs::write(
        dir.join(format!("{stem}.json")),
        serde_json::to_string_pretty(&meta)?,
    )?;
    Ok(())
}
