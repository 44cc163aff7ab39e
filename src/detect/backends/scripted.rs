use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Deterministic backend replaying a fixed per-frame script. Frames past the
/// end of the script yield no detections.
pub struct ScriptedBackend {
    script: Vec<Vec<RawDetection>>,
    cursor: usize,
    /// When set, the backend fails with an accelerator fault at this call.
    fail_at_call: Option<usize>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self {
            script,
            cursor: 0,
            fail_at_call: None,
        }
    }

    /// Fail with an unrecoverable fault on the given zero-based call index.
    pub fn fail_at_call(mut self, call: usize) -> Self {
        self.fail_at_call = Some(call);
        self
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<RawDetection>> {
        let call = self.cursor;
        self.cursor += 1;
        if self.fail_at_call == Some(call) {
            return Err(anyhow!("scripted accelerator fault at call {call}"));
        }
        Ok(self.script.get(call).cloned().unwrap_or_default())
    }
}
