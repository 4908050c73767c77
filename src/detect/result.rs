use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixels, top-left origin.
///
/// `x`/`y` may be negative when a detection hangs off the frame edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Convert a center-form box to top-left form, rounding to whole pixels.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x: (cx - w / 2.0).round() as i32,
            y: (cy - h / 2.0).round() as i32,
            w: w.round() as i32,
            h: h.round() as i32,
        }
    }

    pub fn area(&self) -> i64 {
        i64::from(self.w.max(0)) * i64::from(self.h.max(0))
    }

    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.w)
    }

    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.h)
    }

    /// Intersection over union. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = i64::from(self.x.max(other.x));
        let top = i64::from(self.y.max(other.y));
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        let inter = (right - left).max(0) as i128 * (bottom - top).max(0) as i128;
        let union = i128::from(self.area()) + i128::from(other.area()) - inter;
        if union <= 0 {
            return 0.0;
        }
        (inter as f64 / union as f64) as f32
    }

    /// The part of the box inside a `width` x `height` frame, or `None` if nothing is left.
    pub fn clipped(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let left = i64::from(self.x).max(0);
        let top = i64::from(self.y).max(0);
        let right = self.right().min(i64::from(width));
        let bottom = self.bottom().min(i64::from(height));
        if right <= left || bottom <= top {
            return None;
        }
        Some(BoundingBox::new(
            i32::try_from(left).ok()?,
            i32::try_from(top).ok()?,
            i32::try_from(right - left).ok()?,
            i32::try_from(bottom - top).ok()?,
        ))
    }
}

/// One labeled detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    /// In [0, 1].
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Ordered, suppressed detections for one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }
}

impl From<Vec<Detection>> for DetectionResult {
    fn from(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

/// Thresholds shared by all detectors. Fixed once the engine is built.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionConfig {
    /// Minimum class score for a detection to be kept.
    pub confidence_threshold: f32,
    /// Same-class boxes overlapping more than this IoU are suppressed.
    pub overlap_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            overlap_threshold: 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(10, 10, 20, 20);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 10, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 10, 10);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn from_center_uses_top_left_origin() {
        let b = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(b, BoundingBox::new(40, 35, 20, 10));
    }

    #[test]
    fn iou_survives_boxes_at_the_coordinate_limits() {
        let a = BoundingBox::new(i32::MAX - 5, 0, 20, 20);
        let b = BoundingBox::new(i32::MAX - 10, 0, i32::MAX, 20);
        let iou = a.iou(&b);
        assert!(iou.is_finite() && (0.0..=1.0).contains(&iou));
    }

    #[test]
    fn clipping_keeps_the_visible_part() {
        let b = BoundingBox::new(-10, 5, 30, i32::MAX);
        assert_eq!(b.clipped(16, 16), Some(BoundingBox::new(0, 5, 16, 11)));
        assert_eq!(BoundingBox::new(20, 0, 5, 5).clipped(16, 16), None);
        assert_eq!(BoundingBox::new(0, 0, 0, 5).clipped(16, 16), None);
    }

    #[test]
    fn empty_boxes_have_no_overlap() {
        let a = BoundingBox::new(0, 0, 0, 0);
        assert_eq!(a.iou(&a), 0.0);
    }
}
