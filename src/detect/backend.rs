use anyhow::Result;

use super::result::DetectionResult;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend is a loaded model. `detect` MUST return only detections scoring at
/// least `confidence`, with overlapping boxes already suppressed at `iou`.
/// Backends borrow the frame for the duration of the call and keep no pixels.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, confidence: f32, iou: f32) -> Result<DetectionResult>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
