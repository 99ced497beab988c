use serde::Serialize;

/// Axis-aligned box in frame pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.w).min(other.x + other.w);
        let bottom = (self.y + self.h).min(other.y + other.h);
        (right - left).max(0.0) * (bottom - top).max(0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> f32 {
        self.area() + other.area() - self.intersection(other)
    }

    /// Intersection over union. Degenerate pairs score 0.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let union = self.union(other);
        if union <= 0.0 {
            0.0
        } else {
            self.intersection(other) / union
        }
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let (fw, fh) = (width as f32, height as f32);
        let x = self.x.clamp(0.0, fw);
        let y = self.y.clamp(0.0, fh);
        BoundingBox {
            x,
            y,
            w: (self.x + self.w).clamp(0.0, fw) - x,
            h: (self.y + self.h).clamp(0.0, fh) - y,
        }
    }
}

/// One detected object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    /// Score in [0, 1].
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Detections for one frame, in detector output order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Drop detections scoring below `confidence`, keeping order.
    pub fn retain_confident(&mut self, confidence: f32) -> usize {
        let before = self.detections.len();
        self.detections.retain(|d| d.confidence >= confidence);
        before - self.detections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(50.0, 50.0, 1.0, 1.0)), 0.0);
    }

    #[test]
    fn clamp_keeps_box_inside_frame() {
        let clamped = BoundingBox::new(-5.0, 90.0, 20.0, 20.0).clamp_to(100, 100);
        assert_eq!(clamped, BoundingBox::new(0.0, 90.0, 15.0, 10.0));
    }
}
