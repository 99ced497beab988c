#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::coco::class_name;
use crate::detect::model::ModelVariant;
use crate::detect::nms::non_max_suppression;
use crate::detect::registry::ModelLoader;
use crate::detect::result::{BoundingBox, Detection, DetectionResult};
use crate::frame::Frame;

/// Square network input edge for the exported YOLO11 models.
pub const INPUT_SIZE: u32 = 640;

/// Box coordinates (cx, cy, w, h) precede the class scores in each prediction.
const CXYWH_OFFSET: usize = 4;

/// Padding value for the letterbox area.
const PAD_VALUE: f32 = 144.0 / 255.0;

/// YOLO11 detector running an exported ONNX graph through tract.
///
/// Output layout is `[1, 4 + classes, anchors]`. Frames are resized to fit the
/// input while keeping their aspect ratio, anchored at the top-left corner.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = INPUT_SIZE as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: INPUT_SIZE,
        })
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, confidence: f32, iou: f32) -> Result<DetectionResult> {
        if frame.is_empty() {
            return Err(anyhow!("frame {} has no pixels", frame.sequence));
        }
        let input = letterbox(frame, self.input_size)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let ratio = letterbox_ratio(self.input_size, frame.width, frame.height);
        let detections =
            decode_predictions(preds, frame.width, frame.height, ratio, confidence)?;
        Ok(DetectionResult::new(non_max_suppression(detections, iou)))
    }
}

/// Scale factor from frame to network coordinates.
fn letterbox_ratio(input_size: u32, width: u32, height: u32) -> f32 {
    (input_size as f32 / width as f32).min(input_size as f32 / height as f32)
}

/// Resize `frame` into a `[1, 3, size, size]` tensor, image at the top-left,
/// the rest filled with `PAD_VALUE`.
fn letterbox(frame: &Frame, input_size: u32) -> Result<Tensor> {
    let ratio = letterbox_ratio(input_size, frame.width, frame.height);
    let new_w = ((frame.width as f32 * ratio).round() as u32).clamp(1, input_size);
    let new_h = ((frame.height as f32 * ratio).round() as u32).clamp(1, input_size);
    let resized = image::imageops::resize(
        &frame.to_rgb_image()?,
        new_w,
        new_h,
        FilterType::Triangle,
    );

    let size = input_size as usize;
    let mut input = tract_ndarray::Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE);
    for (x, y, pixel) in resized.enumerate_pixels() {
        for channel in 0..3 {
            input[[0, channel, y as usize, x as usize]] = pixel[channel] as f32 / 255.0;
        }
    }
    Ok(input.into_tensor())
}

/// Turn a `[1, 4 + classes, anchors]` output into frame-space detections scoring
/// at least `confidence`. Suppression is left to the caller.
fn decode_predictions(
    preds: tract_ndarray::ArrayViewD<'_, f32>,
    width: u32,
    height: u32,
    ratio: f32,
    confidence: f32,
) -> Result<Vec<Detection>> {
    let shape = preds.shape();
    if shape.len() != 3 || shape[0] != 1 || shape[1] <= CXYWH_OFFSET {
        return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
    }
    let classes = shape[1] - CXYWH_OFFSET;
    let anchors = shape[2];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (0..classes)
            .map(|c| (c, preds[[0, CXYWH_OFFSET + c, anchor]]))
            .fold((0, f32::NEG_INFINITY), |best, x| if x.1 > best.1 { x } else { best });
        if !score.is_finite() || score < confidence {
            continue;
        }
        let cx = preds[[0, 0, anchor]] / ratio;
        let cy = preds[[0, 1, anchor]] / ratio;
        let w = preds[[0, 2, anchor]] / ratio;
        let h = preds[[0, 3, anchor]] / ratio;
        let bbox = BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h).clamp_to(width, height);
        if bbox.area() <= 0.0 {
            continue;
        }
        candidates.push(Detection {
            class_id,
            class_name: class_name(class_id).to_string(),
            confidence: score.min(1.0),
            bbox,
        });
    }
    Ok(candidates)
}

/// Loads `yolo11{n,s,m,l,x}.onnx` from a weights directory.
pub struct TractLoader {
    weights_dir: PathBuf,
}

impl TractLoader {
    pub fn new(weights_dir: impl Into<PathBuf>) -> Self {
        Self {
            weights_dir: weights_dir.into(),
        }
    }
}

impl ModelLoader for TractLoader {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn load(&mut self, variant: ModelVariant) -> Result<Box<dyn DetectorBackend>> {
        let path = self.weights_dir.join(variant.weights_file());
        if !path.is_file() {
            return Err(anyhow!("weights file {} not found", path.display()));
        }
        Ok(Box::new(TractBackend::new(&path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const CLASSES: usize = 80;

    /// `[1, 4 + 80, anchors]` output with one scored box per entry.
    fn output(boxes: &[([f32; 4], usize, f32)]) -> tract_ndarray::Array3<f32> {
        let mut preds =
            tract_ndarray::Array3::<f32>::zeros((1, CXYWH_OFFSET + CLASSES, boxes.len()));
        for (anchor, (cxywh, class_id, score)) in boxes.iter().enumerate() {
            for (i, value) in cxywh.iter().enumerate() {
                preds[[0, i, anchor]] = *value;
            }
            preds[[0, CXYWH_OFFSET + class_id, anchor]] = *score;
        }
        preds
    }

    #[test]
    fn decode_rescales_to_frame_and_picks_best_class() -> Result<()> {
        let ratio = letterbox_ratio(INPUT_SIZE, 1280, 720);
        assert_eq!(ratio, 0.5);

        let mut preds = output(&[
            ([100.0, 50.0, 40.0, 20.0], 2, 0.9),
            ([300.0, 300.0, 50.0, 50.0], 0, 0.2),
            ([200.0, 200.0, 0.0, 30.0], 0, 0.8),
        ]);
        preds[[0, CXYWH_OFFSET, 0]] = 0.3;

        let detections = decode_predictions(preds.view().into_dyn(), 1280, 720, ratio, 0.5)?;
        assert_eq!(detections.len(), 1);
        let car = &detections[0];
        assert_eq!(car.class_id, 2);
        assert_eq!(car.class_name, "car");
        assert!((car.confidence - 0.9).abs() < 1e-6);
        assert_eq!(car.bbox, BoundingBox::new(160.0, 80.0, 80.0, 40.0));
        Ok(())
    }

    #[test]
    fn decode_clamps_boxes_to_frame() -> Result<()> {
        let preds = output(&[([630.0, 10.0, 40.0, 40.0], 0, 0.7)]);
        let detections = decode_predictions(preds.view().into_dyn(), 640, 480, 1.0, 0.5)?;
        assert_eq!(detections[0].bbox, BoundingBox::new(610.0, 0.0, 30.0, 30.0));
        assert_eq!(detections[0].class_name, "person");
        Ok(())
    }

    #[test]
    fn decode_rejects_malformed_output() {
        let boxes_only = tract_ndarray::Array3::<f32>::zeros((1, 3, 8));
        assert!(decode_predictions(boxes_only.view().into_dyn(), 640, 480, 1.0, 0.5).is_err());

        let flat = tract_ndarray::Array2::<f32>::zeros((84, 8));
        assert!(decode_predictions(flat.view().into_dyn(), 640, 480, 1.0, 0.5).is_err());
    }

    #[test]
    fn letterbox_anchors_image_top_left() -> Result<()> {
        let frame = Frame::from_rgb_image(RgbImage::from_pixel(1280, 720, Rgb([255, 255, 255])), 1)?;
        let tensor = letterbox(&frame, INPUT_SIZE)?;
        let view = tensor.to_array_view::<f32>()?;

        assert_eq!(view.shape(), &[1, 3, 640, 640]);
        assert!((view[[0, 0, 0, 0]] - 1.0).abs() < 1e-3);
        assert!((view[[0, 2, 359, 639]] - 1.0).abs() < 1e-3);
        assert_eq!(view[[0, 1, 400, 10]], PAD_VALUE);
        Ok(())
    }

    #[test]
    fn missing_weights_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = TractLoader::new(dir.path());
        let err = loader.load(ModelVariant::Nano).err().expect("no weights");
        assert!(err.to_string().contains("yolo11n.onnx"));
    }
}
