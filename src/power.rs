//! Low-power operating mode.
//!
//! The power mode is a pure parameter transform applied at pipeline
//! construction, not a runtime state machine: it lowers capture resolution
//! and stretches the inference cadence so the accelerator duty cycle drops.
//! Frames skipped by the cadence reuse the last known detections through an
//! explicit cache with an age counter.

use crate::detect::Detection;
use crate::pipeline::PipelineSettings;
use crate::source::MIN_CAPTURE_DIMENSION;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerMode {
    Normal,
    LowPower,
}

/// Inference cadence used when low-power mode does not configure its own.
const LOW_POWER_INFERENCE_INTERVAL: u32 = 3;

/// Transform pipeline settings for the requested power mode.
pub fn apply_power_mode(mode: PowerMode, mut settings: PipelineSettings) -> PipelineSettings {
    match mode {
        PowerMode::Normal => settings,
        PowerMode::LowPower => {
            // Halving never goes below the resolution the validator accepts.
            settings.capture.width = (settings.capture.width / 2).max(MIN_CAPTURE_DIMENSION) & !1;
            settings.capture.height = (settings.capture.height / 2).max(MIN_CAPTURE_DIMENSION) & !1;
            settings.inference_interval =
                settings.inference_interval.max(LOW_POWER_INFERENCE_INTERVAL);
            settings
        }
    }
}

/// Last known detections for frames skipped by the inference cadence.
///
/// This is the only place stale detections live; zone evaluation for a
/// skipped frame consults it explicitly rather than through hidden state.
#[derive(Default)]
pub struct DetectionCache {
    detections: Vec<Detection>,
    age_frames: u32,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store fresh detections; resets the age.
    pub fn refresh(&mut self, detections: Vec<Detection>) {
        self.detections = detections;
        self.age_frames = 0;
    }

    /// Reuse cached detections for a skipped frame, re-bound to that frame.
    pub fn reuse_for(&mut self, frame_ref: u64) -> Vec<Detection> {
        self.age_frames += 1;
        self.detections
            .iter()
            .map(|d| Detection {
                frame_ref,
                ..d.clone()
            })
            .collect()
    }

    /// Frames elapsed since the last refresh.
    pub fn age_frames(&self) -> u32 {
        self.age_frames
    }
}
