use std::cmp::Ordering;

use super::result::Detection;

/// Greedy non-maximum suppression, applied per class.
///
/// Candidates are visited in descending confidence; a candidate is dropped when it
/// overlaps an already kept box of the same class by more than `iou_threshold`.
/// Survivors keep their descending-confidence order.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn det(class_id: usize, confidence: f32, x: f32) -> Detection {
        Detection {
            class_id,
            class_name: format!("class{}", class_id),
            confidence,
            bbox: BoundingBox::new(x, 0.0, 10.0, 10.0),
        }
    }

    #[test]
    fn suppresses_overlapping_same_class() {
        let kept = non_max_suppression(vec![det(0, 0.6, 1.0), det(0, 0.9, 0.0)], 0.5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn keeps_overlapping_boxes_of_other_classes() {
        let kept = non_max_suppression(vec![det(0, 0.9, 0.0), det(1, 0.8, 1.0)], 0.5);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn threshold_of_one_keeps_everything() {
        let kept = non_max_suppression(vec![det(0, 0.9, 0.0), det(0, 0.8, 0.0)], 1.0);
        assert_eq!(kept.len(), 2);
    }
}
