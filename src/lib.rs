//! zonewatch
//!
//! Edge zone-intrusion detection: a single-device, single-stream real-time
//! pipeline that moves frames from a camera source through inference, zone
//! evaluation, and debounced multi-channel alert dispatch.
//!
//! # Architecture
//!
//! Control flow is strictly pipelined and one-directional:
//!
//! ```text
//! CameraSource -> InferenceAdapter -> ZoneEvaluator + AlertController -> dispatch
//!                                                   \-> optional record sink
//! ```
//!
//! Stages run as long-lived worker threads connected by bounded queues.
//! The capture queue drops the oldest frame under pressure (freshness over
//! completeness); the alert outbound queue blocks (alerts are never silently
//! dropped). Only the `AlertController` holds long-lived per-zone state.
//!
//! # Module Structure
//!
//! - `frame`: frame ownership and buffer pooling
//! - `source`: camera/stream ingestion with bounded reconnect
//! - `detect`: detector backends and the filtering inference adapter
//! - `zones`: polygonal zones and boundary-inclusive containment
//! - `alert`: per-zone cooldown state machine, dispatch, history
//! - `pipeline`: queues, worker lifecycles, shutdown ordering
//! - `bench`: rolling-window stage latency and throughput measurement
//! - `power`: low-power parameter transform and detection reuse cache

pub mod alert;
pub mod bench;
pub mod config;
pub mod detect;
pub mod frame;
pub mod pipeline;
pub mod power;
pub mod source;
pub mod zones;

pub use alert::{
    AlertChannel, AlertController, AlertDispatcher, AlertEvent, AlertHistoryStore, AlertRecord,
    InMemoryAlertHistory, SqliteAlertHistory, TelegramChannel, WebhookChannel, ZonePhase,
};
pub use bench::{BenchmarkHarness, BenchmarkReport, StageStats};
pub use config::Config;
pub use detect::{
    select_backend, BoundingBox, DemoBackend, Detection, DetectorBackend, InferenceAdapter,
    RawDetection, ScriptedBackend, StubBackend,
};
pub use frame::{Frame, FramePool};
pub use pipeline::{Pipeline, PipelineSettings, PipelineSummary, RunLimits};
pub use power::{apply_power_mode, DetectionCache, PowerMode};
pub use source::{CameraSource, CaptureSettings, FrameRead, SourceDescriptor};
pub use zones::{Zone, ZoneEvaluator};

/// Error taxonomy for the detection pipeline.
///
/// Recoverable conditions (`SourceUnavailable` before retries exhaust,
/// `DispatchFailure`) are handled locally and logged. Anything that would
/// corrupt pipeline invariants surfaces as a fatal error to the operator.
#[derive(Clone, Debug)]
pub enum PipelineError {
    /// Stream read failed and the reconnect budget is exhausted.
    SourceUnavailable { source: String, attempts: u32 },
    /// Unrecoverable accelerator fault; terminates the current run.
    InferenceFailure(String),
    /// A notification channel failed; logged, never retried within the event.
    DispatchFailure { channel: String, reason: String },
    /// Rejected at startup, before pipeline construction.
    ConfigurationInvalid(String),
}

impl PipelineError {
    /// Fatal errors terminate the run; recoverable ones are logged in place.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::SourceUnavailable { .. }
                | PipelineError::InferenceFailure(_)
                | PipelineError::ConfigurationInvalid(_)
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::SourceUnavailable { source, attempts } => {
                write!(f, "source {source} unavailable after {attempts} attempts")
            }
            PipelineError::InferenceFailure(msg) => write!(f, "inference failure: {msg}"),
            PipelineError::DispatchFailure { channel, reason } => {
                write!(f, "dispatch via {channel} failed: {reason}")
            }
            PipelineError::ConfigurationInvalid(msg) => {
                write!(f, "invalid configuration: {msg}")
            }
        }
    }
}

impl std::error::Error for PipelineError {}
