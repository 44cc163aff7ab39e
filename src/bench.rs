//! Stage latency and throughput measurement.
//!
//! Each worker records `(start, end)` samples for its stage into a fixed-size
//! rolling window; the harness aggregates per-stage mean/p50/p95 latency and
//! the achieved end-to-end frame rate. Recording is a couple of `VecDeque`
//! pushes behind a short-lived lock, cheap enough for the measured path at
//! edge frame rates.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_WINDOW: usize = 256;

/// Aggregate statistics for one pipeline stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageStats {
    pub stage: String,
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

/// Structured benchmark report, serialized to `logs/benchmarks/`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub generated_at: String,
    pub backend: String,
    pub frames_observed: u64,
    pub achieved_fps: f64,
    pub stages: Vec<StageStats>,
    /// Echo of the run configuration, filled in by the caller so reports are
    /// self-describing.
    pub config: Option<serde_json::Value>,
}

struct StageWindow {
    durations: VecDeque<Duration>,
    capacity: usize,
}

impl StageWindow {
    fn record(&mut self, duration: Duration) {
        if self.durations.len() == self.capacity {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }
}

/// Rolling-window latency/throughput aggregator.
pub struct BenchmarkHarness {
    stages: BTreeMap<&'static str, StageWindow>,
    frame_marks: VecDeque<Instant>,
    frames_observed: u64,
    window: usize,
}

impl BenchmarkHarness {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            stages: BTreeMap::new(),
            frame_marks: VecDeque::with_capacity(window),
            frames_observed: 0,
            window,
        }
    }

    /// Record one stage invocation.
    pub fn record(&mut self, stage: &'static str, start: Instant, end: Instant) {
        let capacity = self.window;
        self.stages
            .entry(stage)
            .or_insert_with(|| StageWindow {
                durations: VecDeque::with_capacity(capacity),
                capacity,
            })
            .record(end.saturating_duration_since(start));
    }

    /// Mark a frame leaving the pipeline, for achieved-FPS tracking.
    pub fn mark_frame_at(&mut self, at: Instant) {
        if self.frame_marks.len() == self.window {
            self.frame_marks.pop_front();
        }
        self.frame_marks.push_back(at);
        self.frames_observed += 1;
    }

    pub fn mark_frame(&mut self) {
        self.mark_frame_at(Instant::now());
    }

    pub fn frames_observed(&self) -> u64 {
        self.frames_observed
    }

    /// Achieved frame rate over the rolling window.
    pub fn achieved_fps(&self) -> f64 {
        if self.frame_marks.len() < 2 {
            return 0.0;
        }
        let first = *self.frame_marks.front().expect("non-empty window");
        let last = *self.frame_marks.back().expect("non-empty window");
        let elapsed = last.saturating_duration_since(first).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (self.frame_marks.len() - 1) as f64 / elapsed
    }

    pub fn stage_stats(&self, stage: &str) -> Option<StageStats> {
        let window = self.stages.get(stage)?;
        if window.durations.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = window
            .durations
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("finite durations"));
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
        Some(StageStats {
            stage: stage.to_string(),
            samples: sorted.len(),
            mean_ms: mean,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
        })
    }

    pub fn report(&self, backend: &str) -> BenchmarkReport {
        let stages = self
            .stages
            .keys()
            .filter_map(|stage| self.stage_stats(stage))
            .collect();
        BenchmarkReport {
            generated_at: chrono::Local::now().to_rfc3339(),
            backend: backend.to_string(),
            frames_observed: self.frames_observed,
            achieved_fps: self.achieved_fps(),
            stages,
            config: None,
        }
    }

    /// Discard all samples, e.g. after a warmup phase.
    pub fn reset(&mut self) {
        self.stages.clear();
        self.frame_marks.clear();
        self.frames_observed = 0;
    }
}

impl Default for BenchmarkHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted_ms: &[f64], p: f64) -> f64 {
    if sorted_ms.is_empty() {
        return 0.0;
    }
    let rank = (p / 100.0) * (sorted_ms.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted_ms[lo]
    } else {
        let frac = rank - lo as f64;
        sorted_ms[lo] * (1.0 - frac) + sorted_ms[hi] * frac
    }
}

/// Write a report to `<dir>/benchmark_<timestamp>.json` and return the path.
pub fn save_report(report: &BenchmarkReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create benchmark dir {}", dir.display()))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("benchmark_{stamp}.json"));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)
        .with_context(|| format!("write benchmark report {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_stats_reflect_injected_delays() {
        let mut harness = BenchmarkHarness::new();
        let base = Instant::now();
        for i in 0..100u32 {
            let start = base + Duration::from_millis(i as u64 * 10);
            harness.record("inference", start, start + Duration::from_millis(5));
        }

        let stats = harness.stage_stats("inference").expect("stats");
        assert_eq!(stats.samples, 100);
        assert!((stats.mean_ms - 5.0).abs() < 0.5);
        assert!((stats.p50_ms - 5.0).abs() < 0.5);
        assert!((stats.p95_ms - 5.0).abs() < 0.5);
    }

    #[test]
    fn achieved_fps_matches_injected_spacing() {
        let mut harness = BenchmarkHarness::new();
        let base = Instant::now();
        // 100 frames spaced 10ms apart -> 100 fps.
        for i in 0..100u64 {
            harness.mark_frame_at(base + Duration::from_millis(i * 10));
        }
        let fps = harness.achieved_fps();
        assert!((fps - 100.0).abs() < 1.0, "fps={fps}");
        assert_eq!(harness.frames_observed(), 100);
    }

    #[test]
    fn window_keeps_only_recent_samples() {
        let mut harness = BenchmarkHarness::with_window(10);
        let base = Instant::now();
        for i in 0..50u64 {
            let start = base + Duration::from_millis(i);
            harness.record("capture", start, start + Duration::from_millis(1));
        }
        assert_eq!(harness.stage_stats("capture").unwrap().samples, 10);
    }

    #[test]
    fn reset_clears_all_samples() {
        let mut harness = BenchmarkHarness::new();
        let now = Instant::now();
        harness.record("capture", now, now + Duration::from_millis(1));
        harness.mark_frame_at(now);
        harness.reset();
        assert!(harness.stage_stats("capture").is_none());
        assert_eq!(harness.frames_observed(), 0);
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 50.0) - 2.5).abs() < 1e-9);
        assert!((percentile(&sorted, 100.0) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn report_serializes_and_saves() {
        let mut harness = BenchmarkHarness::new();
        let now = Instant::now();
        harness.record("inference", now, now + Duration::from_millis(3));
        harness.mark_frame_at(now);
        harness.mark_frame_at(now + Duration::from_millis(100));

        let report = harness.report("stub");
        let dir = tempfile::tempdir().unwrap();
        let path = save_report(&report, dir.path()).unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: BenchmarkReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.backend, "stub");
        assert_eq!(parsed.stages.len(), 1);
    }
}
