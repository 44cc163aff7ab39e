use anyhow::Result;

use crate::detect::result::RawDetection;

/// Detector backend trait: the black-box `detect(frame) -> detections[]`
/// collaborator.
///
/// Implementations must be callable from exactly one context at a time; the
/// scheduler guarantees this by running a single inference worker. Finding
/// nothing is an empty vector, never an error. An `Err` is an unrecoverable
/// accelerator fault and terminates the run.
pub trait DetectorBackend: Send {
    /// Backend identifier for logs and benchmark reports.
    fn name(&self) -> &'static str;

    /// Run detection on one RGB24 frame.
    ///
    /// The pixel slice is read-only and ephemeral; implementations must not
    /// retain it beyond the call.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once before the pipeline starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
