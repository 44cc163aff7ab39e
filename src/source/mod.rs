//! Frame ingestion.
//!
//! A `CameraSource` wraps one concrete stream backend:
//! - `stub://` synthetic frames (always available, used by tests and demos)
//! - local V4L2 devices and network RTSP URIs via GStreamer
//!   (feature: rtsp-gstreamer)
//!
//! The descriptor is resolved to a backend once at construction; call sites
//! never dispatch on the source kind. The source owns sequence numbering and
//! the reconnect budget: transient read failures are retried with exponential
//! backoff, and `SourceUnavailable` surfaces only after retries exhaust.
//! Rate limiting is the scheduler's job, not the source's.

mod synthetic;

#[cfg(feature = "rtsp-gstreamer")]
mod gst;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::frame::{Frame, FramePool};
use crate::PipelineError;

use synthetic::SyntheticSource;

/// Smallest capture dimension accepted anywhere: configuration validation
/// and the low-power transform both clamp to this.
pub const MIN_CAPTURE_DIMENSION: u32 = 16;

/// Where frames come from, resolved once at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Local capture device index (`/dev/video<N>`).
    Local(u32),
    /// Network stream URI (`rtsp://...`) or `stub://` synthetic stream.
    Network(String),
}

impl SourceDescriptor {
    /// Parse the configured source string: a bare integer is a local device
    /// index, anything else is a URI.
    pub fn parse(raw: &str) -> SourceDescriptor {
        match raw.trim().parse::<u32>() {
            Ok(index) => SourceDescriptor::Local(index),
            Err(_) => SourceDescriptor::Network(raw.trim().to_string()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SourceDescriptor::Local(index) => format!("/dev/video{index}"),
            SourceDescriptor::Network(uri) => uri.clone(),
        }
    }
}

/// Capture parameters the source is opened with.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    /// Bounded reconnect budget for transient read failures.
    pub max_retries: u32,
    /// Base backoff delay, doubled per consecutive failed attempt.
    pub retry_backoff: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            max_retries: 5,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Result of a frame read.
#[derive(Debug)]
pub enum FrameRead {
    Frame(Frame),
    /// The stream ended cleanly (finite sources only).
    EndOfStream,
}

pub(crate) enum BackendRead {
    Pixels { data: Vec<u8>, width: u32, height: u32 },
    EndOfStream,
}

pub(crate) trait StreamBackend {
    fn connect(&mut self) -> Result<()>;
    /// Read one frame into `buf` (reused across calls when pooled).
    fn read(&mut self, buf: Vec<u8>) -> Result<BackendRead>;
    fn describe(&self) -> String;
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(gst::GstreamerSource),
}

impl SourceBackend {
    fn as_stream(&mut self) -> &mut dyn StreamBackend {
        match self {
            SourceBackend::Synthetic(s) => s,
            #[cfg(feature = "rtsp-gstreamer")]
            SourceBackend::Gstreamer(s) => s,
        }
    }
}

/// A camera or network stream producing timestamped, sequence-numbered frames.
pub struct CameraSource {
    backend: SourceBackend,
    settings: CaptureSettings,
    pool: FramePool,
    next_sequence: u64,
    frames_read: u64,
    reconnects: u64,
    recycled: u64,
}

impl CameraSource {
    pub fn open(descriptor: &SourceDescriptor, settings: CaptureSettings) -> Result<Self> {
        let backend = match descriptor {
            SourceDescriptor::Network(uri) if uri.starts_with("stub://") => {
                SourceBackend::Synthetic(SyntheticSource::new(
                    uri.clone(),
                    settings.width,
                    settings.height,
                ))
            }
            #[cfg(feature = "rtsp-gstreamer")]
            other => SourceBackend::Gstreamer(gst::GstreamerSource::new(other, &settings)?),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            other => {
                return Err(PipelineError::ConfigurationInvalid(format!(
                    "source {} requires the rtsp-gstreamer feature",
                    other.describe()
                ))
                .into());
            }
        };

        let pool = FramePool::new(settings.width, settings.height, 8);
        let mut source = Self {
            backend,
            settings,
            pool,
            next_sequence: 0,
            frames_read: 0,
            reconnects: 0,
            recycled: 0,
        };
        source.backend.as_stream().connect()?;
        Ok(source)
    }

    /// Read the next frame, reconnecting transparently on transient failure.
    ///
    /// Sequence numbering continues across reconnects without gaps or
    /// duplication; a frame lost to a failed read simply never gets a number.
    pub fn next_frame(&mut self) -> Result<FrameRead> {
        let mut attempt = 0u32;
        loop {
            let buf = self.pool.acquire();
            match self.backend.as_stream().read(buf) {
                Ok(BackendRead::Pixels {
                    data,
                    width,
                    height,
                }) => {
                    let frame = Frame {
                        pixels: data,
                        width,
                        height,
                        sequence_id: self.next_sequence,
                        captured_at: Instant::now(),
                    };
                    self.next_sequence += 1;
                    self.frames_read += 1;
                    return Ok(FrameRead::Frame(frame));
                }
                Ok(BackendRead::EndOfStream) => return Ok(FrameRead::EndOfStream),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.settings.max_retries {
                        return Err(PipelineError::SourceUnavailable {
                            source: self.backend.as_stream().describe(),
                            attempts: attempt,
                        }
                        .into());
                    }
                    let backoff = self.settings.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "source read failed (attempt {attempt}/{}): {err}; reconnecting in {:?}",
                        self.settings.max_retries,
                        backoff
                    );
                    thread::sleep(backoff);
                    if let Err(err) = self.backend.as_stream().connect() {
                        log::warn!("source reconnect failed: {err}");
                        continue;
                    }
                    self.reconnects += 1;
                }
            }
        }
    }

    /// Return a spent frame's pixel buffer to the pool. Used for both
    /// queue-evicted frames and frames the process worker has finished with.
    pub fn recycle(&mut self, frame: Frame) {
        self.pool.release(frame.into_pixels());
        self.recycled += 1;
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn recycled(&self) -> u64 {
        self.recycled
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Test aid: inject `count` consecutive read failures into a synthetic
    /// backend. No-op for real backends.
    pub fn inject_read_failures(&mut self, count: u32) {
        if let SourceBackend::Synthetic(s) = &mut self.backend {
            s.fail_reads(count);
        }
    }

    /// Test aid: make a synthetic backend finite.
    pub fn limit_frames(&mut self, max_frames: u64) {
        if let SourceBackend::Synthetic(s) = &mut self.backend {
            s.limit_frames(max_frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_stub(settings: CaptureSettings) -> CameraSource {
        let descriptor = SourceDescriptor::Network("stub://front_gate".to_string());
        CameraSource::open(&descriptor, settings).expect("open stub source")
    }

    fn fast_settings() -> CaptureSettings {
        CaptureSettings {
            width: 64,
            height: 48,
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
        }
    }

    #[test]
    fn descriptor_parses_device_index_and_uri() {
        assert_eq!(SourceDescriptor::parse("2"), SourceDescriptor::Local(2));
        assert_eq!(
            SourceDescriptor::parse("rtsp://cam/stream"),
            SourceDescriptor::Network("rtsp://cam/stream".to_string())
        );
    }

    #[test]
    fn frames_are_sequence_numbered() {
        let mut source = open_stub(fast_settings());
        for expected in 0..5u64 {
            match source.next_frame().unwrap() {
                FrameRead::Frame(frame) => assert_eq!(frame.sequence_id, expected),
                FrameRead::EndOfStream => panic!("unexpected end of stream"),
            }
        }
    }

    #[test]
    fn reconnects_within_budget_without_sequence_gap() {
        let mut source = open_stub(fast_settings());
        let first = match source.next_frame().unwrap() {
            FrameRead::Frame(f) => f.sequence_id,
            FrameRead::EndOfStream => panic!("unexpected end of stream"),
        };

        source.inject_read_failures(3);
        let next = match source.next_frame().unwrap() {
            FrameRead::Frame(f) => f.sequence_id,
            FrameRead::EndOfStream => panic!("unexpected end of stream"),
        };

        assert_eq!(next, first + 1, "reconnect must not skip or repeat ids");
        assert!(source.reconnects() >= 1);
    }

    #[test]
    fn source_unavailable_after_retry_budget() {
        let mut source = open_stub(fast_settings());
        source.inject_read_failures(10);

        let err = source.next_frame().unwrap_err();
        let pipeline_err = err
            .downcast_ref::<PipelineError>()
            .expect("pipeline error expected");
        assert!(matches!(
            pipeline_err,
            PipelineError::SourceUnavailable { .. }
        ));
    }

    #[test]
    fn finite_stub_reaches_end_of_stream() {
        let mut source = open_stub(fast_settings());
        source.limit_frames(2);
        assert!(matches!(
            source.next_frame().unwrap(),
            FrameRead::Frame(_)
        ));
        assert!(matches!(
            source.next_frame().unwrap(),
            FrameRead::Frame(_)
        ));
        assert!(matches!(
            source.next_frame().unwrap(),
            FrameRead::EndOfStream
        ));
    }
}
