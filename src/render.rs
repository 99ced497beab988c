//! Annotated output.
//!
//! `ResultRenderer` draws one box and label per detection on a copy of the frame
//! and builds the structured `DetectionSummary` reported with it. The frame and
//! the detection result are only read.

use anyhow::{Context, Result};
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use crate::detect::{BoundingBox, Detection, DetectionResult};
use crate::frame::Frame;

pub const DEFAULT_THICKNESS: u32 = 2;

const LABEL_SCALE: f32 = 16.0;
const LABEL_TAB: u32 = 8;
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

const PALETTE: [[u8; 3]; 10] = [
    [255, 64, 64],
    [64, 255, 64],
    [64, 64, 255],
    [255, 255, 64],
    [255, 64, 255],
    [64, 255, 255],
    [255, 128, 0],
    [128, 0, 255],
    [255, 128, 192],
    [128, 255, 128],
];

/// One line of the summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryEntry {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Counts and labels for one processed frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub total_count: usize,
    pub per_class_counts: BTreeMap<String, usize>,
    pub detections: Vec<SummaryEntry>,
}

impl DetectionSummary {
    pub fn from_result(result: &DetectionResult) -> Self {
        let mut per_class_counts = BTreeMap::new();
        for detection in &result.detections {
            *per_class_counts
                .entry(detection.class_name.clone())
                .or_insert(0) += 1;
        }
        Self {
            total_count: result.len(),
            per_class_counts,
            detections: result
                .detections
                .iter()
                .map(|d| SummaryEntry {
                    class_name: d.class_name.clone(),
                    confidence: d.confidence,
                    bbox: d.bbox,
                })
                .collect(),
        }
    }
}

/// Output of one processed frame.
#[derive(Clone, Debug)]
pub struct RenderedFrame {
    pub sequence: u64,
    /// Wall-clock capture time of the source frame.
    pub captured_at: SystemTime,
    pub image: RgbImage,
    pub summary: DetectionSummary,
}

pub struct ResultRenderer {
    thickness: u32,
    font: Option<FontVec>,
}

impl Default for ResultRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_THICKNESS)
    }
}

impl ResultRenderer {
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness: thickness.max(1),
            font: None,
        }
    }

    /// Draw text labels with a TrueType/OpenType font.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("parse font {}", path.display()))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn render(&self, frame: &Frame, result: &DetectionResult) -> Result<RenderedFrame> {
        let mut image = frame.to_rgb_image()?;
        for detection in &result.detections {
            self.draw_detection(&mut image, detection);
        }
        Ok(RenderedFrame {
            sequence: frame.sequence,
            captured_at: frame.captured_at,
            image,
            summary: DetectionSummary::from_result(result),
        })
    }

    fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
        let bbox = detection.bbox.clamp_to(image.width(), image.height());
        let (x, y) = (bbox.x.round() as i32, bbox.y.round() as i32);
        let (w, h) = (bbox.w.round() as u32, bbox.h.round() as u32);
        if w == 0 || h == 0 {
            return;
        }
        let color = color_for(detection.class_id);

        for inset in 0..self.thickness.min(w / 2).min(h / 2).max(1) {
            let rect = Rect::at(x + inset as i32, y + inset as i32)
                .of_size((w - 2 * inset).max(1), (h - 2 * inset).max(1));
            draw_hollow_rect_mut(image, rect, color);
        }

        match &self.font {
            Some(font) => {
                let text = format!("{} {:.2}", detection.class_name, detection.confidence);
                let scale = PxScale::from(LABEL_SCALE);
                let (text_w, text_h) = text_size(scale, font, &text);
                let label_y = (y - text_h as i32 - 2).max(0);
                let tab = Rect::at(x, label_y).of_size(text_w.max(1) + 4, text_h.max(1) + 2);
                draw_filled_rect_mut(image, tab, color);
                draw_text_mut(image, LABEL_TEXT, x + 2, label_y, scale, font, &text);
            }
            None => {
                let tab = Rect::at(x, (y - LABEL_TAB as i32).max(0))
                    .of_size(LABEL_TAB.min(w), LABEL_TAB);
                draw_filled_rect_mut(image, tab, color);
            }
        }
    }
}

fn color_for(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}
