use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    /// Zone-containment test point: approximates ground contact better than
    /// the centroid for intrusion semantics.
    pub fn bottom_center(&self) -> (f32, f32) {
        ((self.x_min + self.x_max) / 2.0, self.y_max)
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }
}

/// Backend output, before threshold/class filtering and frame binding.
#[derive(Clone, Debug)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// One filtered detection, immutable once produced. `frame_ref` is the
/// `sequence_id` of the frame it was inferred from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub frame_ref: u64,
}
