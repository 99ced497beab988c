//! CPU foreground detector.
//!
//! Finds bright, compact regions that stand out from the background: Otsu
//! threshold on luma, 8-connected components, one detection per component large
//! enough to matter. Scores combine luma contrast against the background with how
//! well the component fills its box. Needs no weights, so it is always available.

use anyhow::Result;
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::detect::backend::DetectorBackend;
use crate::detect::model::ModelVariant;
use crate::detect::nms::non_max_suppression;
use crate::detect::registry::ModelLoader;
use crate::detect::result::{BoundingBox, Detection, DetectionResult};
use crate::frame::Frame;

pub const FOREGROUND_CLASS: &str = "object";

/// Minimum luma gap between the two Otsu classes before anything counts.
const MIN_LUMA_GAP: f32 = 24.0;

pub struct ContrastBackend {
    /// Smallest component kept, as a fraction of the frame area.
    min_area_fraction: f32,
    max_detections: usize,
}

impl ContrastBackend {
    /// Larger variants keep smaller components.
    pub fn for_variant(variant: ModelVariant) -> Self {
        let min_area_fraction = match variant {
            ModelVariant::Nano => 0.004,
            ModelVariant::Small => 0.003,
            ModelVariant::Medium => 0.002,
            ModelVariant::Large => 0.001,
            ModelVariant::ExtraLarge => 0.0005,
        };
        Self {
            min_area_fraction,
            max_detections: 100,
        }
    }
}

impl Default for ContrastBackend {
    fn default() -> Self {
        Self::for_variant(ModelVariant::Nano)
    }
}

#[derive(Clone, Copy)]
struct Blob {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u64,
    luma_sum: u64,
}

impl Blob {
    fn new(x: u32, y: u32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
            luma_sum: 0,
        }
    }

    fn add(&mut self, x: u32, y: u32, luma: u8) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.area += 1;
        self.luma_sum += luma as u64;
    }

    fn bbox(&self) -> BoundingBox {
        BoundingBox::new(
            self.min_x as f32,
            self.min_y as f32,
            (self.max_x - self.min_x + 1) as f32,
            (self.max_y - self.min_y + 1) as f32,
        )
    }
}

impl DetectorBackend for ContrastBackend {
    fn name(&self) -> &'static str {
        "contrast"
    }

    fn detect(&mut self, frame: &Frame, confidence: f32, iou: f32) -> Result<DetectionResult> {
        if frame.is_empty() {
            return Ok(DetectionResult::default());
        }
        let gray = GrayImage::from_fn(frame.width, frame.height, |x, y| {
            Luma([frame.luma(x, y)])
        });
        let level = otsu_level(&gray);

        let mut foreground = GrayImage::new(frame.width, frame.height);
        let (mut bg_sum, mut bg_count) = (0u64, 0u64);
        for (x, y, pixel) in gray.enumerate_pixels() {
            if pixel[0] > level {
                foreground.put_pixel(x, y, Luma([255]));
            } else {
                bg_sum += pixel[0] as u64;
                bg_count += 1;
            }
        }
        if bg_count == 0 {
            return Ok(DetectionResult::default());
        }
        let bg_mean = bg_sum as f32 / bg_count as f32;

        let labels = connected_components(&foreground, Connectivity::Eight, Luma([0u8]));
        let mut blobs: Vec<Option<Blob>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if blobs.len() < label {
                blobs.resize(label, None);
            }
            blobs[label - 1]
                .get_or_insert_with(|| Blob::new(x, y))
                .add(x, y, gray.get_pixel(x, y)[0]);
        }

        let frame_area = frame.width as f32 * frame.height as f32;
        let min_area = (frame_area * self.min_area_fraction).max(4.0);
        let candidates = blobs
            .into_iter()
            .flatten()
            .filter(|blob| blob.area as f32 >= min_area)
            .filter_map(|blob| {
                let fg_mean = blob.luma_sum as f32 / blob.area as f32;
                let gap = fg_mean - bg_mean;
                if gap < MIN_LUMA_GAP {
                    return None;
                }
                let bbox = blob.bbox();
                let fill = blob.area as f32 / bbox.area();
                let score = ((gap / 255.0).sqrt() * fill.sqrt()).clamp(0.0, 1.0);
                (score >= confidence).then(|| Detection {
                    class_id: 0,
                    class_name: FOREGROUND_CLASS.to_string(),
                    confidence: score,
                    bbox,
                })
            })
            .collect();

        let mut detections = non_max_suppression(candidates, iou);
        detections.truncate(self.max_detections);
        Ok(DetectionResult::new(detections))
    }
}

/// Loader for the contrast backend. Needs no weight files.
#[derive(Default)]
pub struct ContrastLoader;

impl ModelLoader for ContrastLoader {
    fn name(&self) -> &'static str {
        "contrast"
    }

    fn load(&mut self, variant: ModelVariant) -> Result<Box<dyn DetectorBackend>> {
        Ok(Box::new(ContrastBackend::for_variant(variant)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn scene(objects: &[(u32, u32, u32)]) -> Result<Frame> {
        let mut img = RgbImage::from_pixel(120, 90, Rgb([30, 35, 40]));
        for &(ox, oy, side) in objects {
            for y in oy..oy + side {
                for x in ox..ox + side {
                    img.put_pixel(x, y, Rgb([230, 230, 220]));
                }
            }
        }
        Frame::from_rgb_image(img, 1)
    }

    #[test]
    fn finds_single_foreground_object() -> Result<()> {
        let mut backend = ContrastBackend::default();
        let result = backend.detect(&scene(&[(40, 30, 20)])?, 0.5, 0.7)?;

        assert_eq!(result.len(), 1);
        let detection = &result.detections[0];
        assert!(detection.confidence >= 0.5);
        assert_eq!(detection.bbox, BoundingBox::new(40.0, 30.0, 20.0, 20.0));
        Ok(())
    }

    #[test]
    fn separate_objects_are_reported_separately() -> Result<()> {
        let mut backend = ContrastBackend::default();
        let result = backend.detect(&scene(&[(5, 5, 15), (80, 50, 25)])?, 0.5, 0.7)?;
        assert_eq!(result.len(), 2);
        Ok(())
    }

    #[test]
    fn flat_frame_has_no_detections() -> Result<()> {
        let mut backend = ContrastBackend::default();
        let result = backend.detect(&scene(&[])?, 0.0, 0.7)?;
        assert!(result.is_empty());
        Ok(())
    }

    #[test]
    fn confidence_threshold_filters_everything_at_one() -> Result<()> {
        let mut backend = ContrastBackend::default();
        let result = backend.detect(&scene(&[(40, 30, 20)])?, 1.0, 0.7)?;
        assert!(result.is_empty());
        Ok(())
    }
}
