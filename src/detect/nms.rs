use crate::detect::result::Detection;

/// Greedy per-class non-max suppression.
///
/// Candidates are visited in descending confidence. A candidate is dropped when a
/// kept box with the same label overlaps it by more than `overlap_threshold` IoU.
/// The output is ordered by descending confidence.
pub fn non_max_suppression(mut candidates: Vec<Detection>, overlap_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|existing| {
            existing.label == candidate.label
                && existing.bbox.iou(&candidate.bbox) > overlap_threshold
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

    fn det(x: i32, y: i32, label: &str, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x, y, 20, 20), label, confidence)
    }

    #[test]
    fn keeps_highest_confidence_in_cluster() {
        let kept = non_max_suppression(
            vec![det(0, 0, "person", 0.6), det(2, 2, "person", 0.9), det(1, 1, "person", 0.7)],
            0.3,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn different_classes_are_not_suppressed() {
        let kept = non_max_suppression(vec![det(0, 0, "person", 0.8), det(0, 0, "dog", 0.7)], 0.3);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn distant_boxes_survive() {
        let kept = non_max_suppression(vec![det(0, 0, "car", 0.8), det(100, 100, "car", 0.6)], 0.3);
        assert_eq!(kept.len(), 2);
        assert!(kept[0].confidence >= kept[1].confidence);
    }

    #[test]
    fn no_retained_pair_exceeds_threshold() {
        let mut candidates = Vec::new();
        for i in 0..30 {
            candidates.push(det(i * 3, (i % 4) * 5, "person", 0.5 + (i as f32) / 100.0));
        }
        let kept = non_max_suppression(candidates, 0.3);
        for (i, a) in kept.iter().enumerate() {
            for b in kept.iter().skip(i + 1) {
                assert!(a.bbox.iou(&b.bbox) <= 0.3);
            }
        }
    }
}
