use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, RawDetection};

/// Demo backend: a synthetic "person" walking left to right across the frame,
/// wrapping around. Lets the full pipeline run end to end without a model.
pub struct DemoBackend {
    call_count: u64,
    /// Horizontal pixels advanced per frame.
    stride: f32,
}

impl DemoBackend {
    pub fn new() -> Self {
        Self {
            call_count: 0,
            stride: 8.0,
        }
    }
}

impl Default for DemoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for DemoBackend {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn detect(&mut self, _pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let w = width as f32;
        let h = height as f32;
        let box_w = w * 0.1;
        let box_h = h * 0.4;

        let x = (self.call_count as f32 * self.stride) % (w + box_w) - box_w;
        self.call_count += 1;

        let bbox = BoundingBox {
            x_min: x.max(0.0),
            y_min: h * 0.5,
            x_max: (x + box_w).min(w),
            y_max: h * 0.9,
        };
        if bbox.width() <= 0.0 {
            return Ok(Vec::new());
        }

        Ok(vec![RawDetection {
            class_id: 0,
            confidence: 0.9,
            bbox,
        }])
    }
}
