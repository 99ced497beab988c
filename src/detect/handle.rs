use anyhow::Result;

use super::backend::DetectorBackend;
use super::model::{validate_threshold, ModelVariant};
use super::result::DetectionResult;
use crate::error::StreamError;
use crate::frame::Frame;

/// A loaded model plus the variant it was built from.
///
/// Owned by `ModelRegistry`; dropping the handle releases the model.
pub struct DetectorHandle {
    variant: ModelVariant,
    backend: Box<dyn DetectorBackend>,
    inferences: u64,
}

impl DetectorHandle {
    pub fn new(variant: ModelVariant, backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            variant,
            backend,
            inferences: 0,
        }
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Number of completed `infer` calls.
    pub fn inferences(&self) -> u64 {
        self.inferences
    }

    /// Run the detector on one frame.
    ///
    /// Backend failures are raised as `StreamError::Inference`. Out-of-range
    /// thresholds are `StreamError::InvalidConfig`.
    pub fn infer(&mut self, frame: &Frame, confidence: f32, iou: f32) -> Result<DetectionResult> {
        validate_threshold("confidence", confidence)?;
        validate_threshold("iou", iou)?;

        let mut result = self
            .backend
            .detect(frame, confidence, iou)
            .map_err(|err| StreamError::Inference {
                sequence: frame.sequence,
                reason: format!("{:#}", err),
            })?;
        self.inferences += 1;

        let dropped = result.retain_confident(confidence);
        if dropped > 0 {
            log::debug!(
                "{} returned {} detections below confidence {}",
                self.backend.name(),
                dropped,
                confidence
            );
        }
        Ok(result)
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        log::info!(
            "model {} ({}) released after {} inferences",
            self.variant.label(),
            self.backend.name(),
            self.inferences
        );
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle")
            .field("variant", &self.variant)
            .field("backend", &self.backend.name())
            .field("inferences", &self.inferences)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::{BoundingBox, Detection};
    use anyhow::anyhow;

    /// Returns fixed scores regardless of the requested threshold.
    struct CarelessBackend {
        fail: bool,
    }

    impl DetectorBackend for CarelessBackend {
        fn name(&self) -> &'static str {
            "careless"
        }

        fn detect(&mut self, _frame: &Frame, _confidence: f32, _iou: f32) -> Result<DetectionResult> {
            if self.fail {
                return Err(anyhow!("tensor shape mismatch"));
            }
            let scores = [0.1, 0.45, 0.5, 0.95];
            Ok(DetectionResult::new(
                scores
                    .iter()
                    .enumerate()
                    .map(|(i, &confidence)| Detection {
                        class_id: i,
                        class_name: format!("c{}", i),
                        confidence,
                        bbox: BoundingBox::new(i as f32 * 10.0, 0.0, 5.0, 5.0),
                    })
                    .collect(),
            ))
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, 7).unwrap()
    }

    #[test]
    fn results_respect_confidence_for_all_thresholds() -> Result<()> {
        let mut handle = DetectorHandle::new(
            ModelVariant::Nano,
            Box::new(CarelessBackend { fail: false }),
        );
        for step in 0..=20 {
            let threshold = step as f32 / 20.0;
            let result = handle.infer(&frame(), threshold, 0.7)?;
            assert!(result.detections.iter().all(|d| d.confidence >= threshold));
        }
        assert_eq!(handle.inferences(), 21);
        Ok(())
    }

    #[test]
    fn backend_failure_is_inference_error() {
        let mut handle =
            DetectorHandle::new(ModelVariant::Nano, Box::new(CarelessBackend { fail: true }));
        let err = handle.infer(&frame(), 0.5, 0.7).unwrap_err();
        match StreamError::classify(&err) {
            Some(StreamError::Inference { sequence, reason }) => {
                assert_eq!(*sequence, 7);
                assert!(reason.contains("tensor shape"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn invalid_threshold_is_rejected_before_inference() {
        let mut handle = DetectorHandle::new(
            ModelVariant::Nano,
            Box::new(CarelessBackend { fail: false }),
        );
        assert!(handle.infer(&frame(), 1.2, 0.7).is_err());
        assert_eq!(handle.inferences(), 0);
    }
}
