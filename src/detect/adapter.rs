use anyhow::Result;

use crate::config::ModelConfig;
use crate::detect::backend::DetectorBackend;
use crate::detect::backends::{DemoBackend, StubBackend};
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::PipelineError;

/// Wraps the external detector: filters below-threshold and out-of-class
/// detections and binds survivors to the frame that produced them.
pub struct InferenceAdapter {
    backend: Box<dyn DetectorBackend>,
    confidence_threshold: f32,
    target_classes: Vec<u32>,
}

impl InferenceAdapter {
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        confidence_threshold: f32,
        target_classes: Vec<u32>,
    ) -> Self {
        Self {
            backend,
            confidence_threshold,
            target_classes,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.backend.warm_up()
    }

    /// Run detection on a frame. An empty result means nothing qualified;
    /// an error is an unrecoverable accelerator fault.
    pub fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let raw = self
            .backend
            .detect(&frame.pixels, frame.width, frame.height)
            .map_err(|e| PipelineError::InferenceFailure(e.to_string()))?;

        Ok(raw
            .into_iter()
            .filter(|d| d.confidence >= self.confidence_threshold)
            .filter(|d| self.target_classes.is_empty() || self.target_classes.contains(&d.class_id))
            .map(|d| Detection {
                class_id: d.class_id,
                confidence: d.confidence,
                bbox: d.bbox,
                frame_ref: frame.sequence_id,
            })
            .collect())
    }
}

/// Resolve the configured model path to a backend.
///
/// `stub` and `demo` are built in; anything else is expected to be a model
/// file for an accelerator backend compiled into this build.
pub fn select_backend(model: &ModelConfig) -> Result<Box<dyn DetectorBackend>> {
    match model.path.as_str() {
        "stub" => Ok(Box::new(StubBackend::new())),
        "demo" => Ok(Box::new(DemoBackend::new())),
        other => Err(PipelineError::ConfigurationInvalid(format!(
            "no detector backend available for model '{other}' in this build"
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::result::{BoundingBox, RawDetection};
    use std::time::Instant;

    fn raw(class_id: u32, confidence: f32) -> RawDetection {
        RawDetection {
            class_id,
            confidence,
            bbox: BoundingBox {
                x_min: 0.0,
                y_min: 0.0,
                x_max: 10.0,
                y_max: 10.0,
            },
        }
    }

    fn frame(sequence_id: u64) -> Frame {
        Frame {
            pixels: vec![0u8; 12],
            width: 2,
            height: 2,
            sequence_id,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn filters_by_threshold_and_class() {
        let script = vec![vec![raw(0, 0.9), raw(0, 0.3), raw(7, 0.95)]];
        let mut adapter =
            InferenceAdapter::new(Box::new(ScriptedBackend::new(script)), 0.5, vec![0]);

        let out = adapter.infer(&frame(42)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id, 0);
        assert!(out[0].confidence >= 0.5);
        assert_eq!(out[0].frame_ref, 42);
    }

    #[test]
    fn empty_class_list_accepts_all_classes() {
        let script = vec![vec![raw(3, 0.8), raw(5, 0.8)]];
        let mut adapter =
            InferenceAdapter::new(Box::new(ScriptedBackend::new(script)), 0.5, vec![]);
        assert_eq!(adapter.infer(&frame(0)).unwrap().len(), 2);
    }

    #[test]
    fn no_detections_is_ok_not_error() {
        let mut adapter =
            InferenceAdapter::new(Box::new(ScriptedBackend::new(vec![])), 0.5, vec![0]);
        assert!(adapter.infer(&frame(0)).unwrap().is_empty());
    }

    #[test]
    fn backend_fault_maps_to_inference_failure() {
        let backend = ScriptedBackend::new(vec![]).fail_at_call(0);
        let mut adapter = InferenceAdapter::new(Box::new(backend), 0.5, vec![0]);
        let err = adapter.infer(&frame(0)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InferenceFailure(_))
        ));
    }
}
